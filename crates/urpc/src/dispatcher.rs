// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client-side call dispatcher.
//!
//! `CallDispatcher::call` turns one logical call into one or more request
//! datagrams and blocks until the call resolves:
//!
//! - **Idempotent** operations are retransmitted (same call id, same bytes)
//!   every time the attempt window expires, until a response arrives.
//! - **Non-idempotent** operations are sent exactly once; if no response
//!   arrives within the window the call fails with a response timeout.
//!   Resending could execute the operation a second time on a server that
//!   did not see the first request.
//!
//! A single listener thread owns the transport's receive side and routes
//! each response to the waiting call by call id, so concurrent calls never
//! see each other's responses and stale retransmitted responses are ignored.

use crate::config::DispatcherConfig;
use crate::error::{RpcError, RpcResult};
use crate::protocol::{CallId, Envelope, Value};
use crate::transport::Transport;
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use dashmap::DashMap;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Whether an operation may safely run more than once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Idempotency {
    /// Repeating the call has the same effect and result as running it once.
    Idempotent,
    /// Each execution changes state or result.
    NonIdempotent,
}

/// Static idempotency classification, by operation name.
///
/// Names missing from the catalog are treated as non-idempotent.
#[derive(Debug, Clone, Default)]
pub struct OperationCatalog {
    entries: HashMap<String, Idempotency>,
}

impl OperationCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `name` as idempotent.
    #[must_use]
    pub fn idempotent(mut self, name: &str) -> Self {
        self.entries.insert(name.to_string(), Idempotency::Idempotent);
        self
    }

    /// Mark `name` as non-idempotent.
    #[must_use]
    pub fn non_idempotent(mut self, name: &str) -> Self {
        self.entries
            .insert(name.to_string(), Idempotency::NonIdempotent);
        self
    }

    pub fn classify(&self, operation: &str) -> Idempotency {
        self.entries
            .get(operation)
            .copied()
            .unwrap_or(Idempotency::NonIdempotent)
    }
}

/// Snapshot of dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub calls: u64,
    pub retransmissions: u64,
    pub timeouts: u64,
    pub stale_responses: u64,
}

type PendingMap = DashMap<CallId, Sender<Envelope>>;

/// Removes a call's pending entry however the call ends.
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    call_id: CallId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.call_id);
    }
}

/// RPC client: issues calls to one server over a shared transport.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use urpc::{CallDispatcher, DispatcherConfig, OperationCatalog, UdpTransport, Value};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let server = "127.0.0.1:9701".parse()?;
/// let transport = Arc::new(UdpTransport::bind_for_peer(server)?);
/// let catalog = OperationCatalog::new().idempotent("get");
/// let client = CallDispatcher::new(transport, server, catalog, DispatcherConfig::default())?;
///
/// let value = client.call("get", vec![Value::from("a")])?;
/// println!("{}", value);
/// # Ok(())
/// # }
/// ```
pub struct CallDispatcher {
    transport: Arc<dyn Transport>,
    server_addr: SocketAddr,
    catalog: OperationCatalog,
    config: DispatcherConfig,

    /// Outstanding calls: call id -> response channel
    pending: Arc<PendingMap>,

    shutdown: Arc<AtomicBool>,
    listener: Option<JoinHandle<()>>,

    calls: AtomicU64,
    retransmissions: AtomicU64,
    timeouts: AtomicU64,
    stale_responses: Arc<AtomicU64>,
}

impl CallDispatcher {
    /// Create a dispatcher and start its reply listener thread.
    pub fn new(
        transport: Arc<dyn Transport>,
        server_addr: SocketAddr,
        catalog: OperationCatalog,
        config: DispatcherConfig,
    ) -> RpcResult<Self> {
        config.validate()?;

        let pending: Arc<PendingMap> = Arc::new(DashMap::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let stale_responses = Arc::new(AtomicU64::new(0));

        let listener = start_reply_listener(
            Arc::clone(&transport),
            Arc::clone(&pending),
            Arc::clone(&shutdown),
            Arc::clone(&stale_responses),
            config.poll_interval(),
        )?;

        log::info!(
            "CallDispatcher started local={} server={}",
            transport.local_addr(),
            server_addr
        );

        Ok(Self {
            transport,
            server_addr,
            catalog,
            config,
            pending,
            shutdown,
            listener: Some(listener),
            calls: AtomicU64::new(0),
            retransmissions: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            stale_responses,
        })
    }

    /// Call `operation` on the server and block until it resolves.
    ///
    /// Returns the operation's value, `RpcError::Remote` with the server's
    /// description if the operation failed, or `RpcError::ResponseTimeout`
    /// if a non-idempotent call (or an idempotent call with a configured
    /// attempt cap) got no answer.
    pub fn call(&self, operation: &str, args: Vec<Value>) -> RpcResult<Value> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(RpcError::Shutdown);
        }

        let call_id = CallId::random();
        let idempotency = self.catalog.classify(operation);
        let request = Envelope::request(call_id, self.transport.local_addr(), operation, args);
        // Refuse oversized calls before anything leaves this host.
        let bytes = request.encode()?;
        self.calls.fetch_add(1, Ordering::Relaxed);

        let (tx, rx) = channel::unbounded();
        self.pending.insert(call_id, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            call_id,
        };

        log::debug!(
            "call {} op={} {:?} -> {}",
            call_id,
            operation,
            idempotency,
            self.server_addr
        );

        let mut attempt: u32 = 0;
        loop {
            if let Err(e) = self.transport.send(&bytes, self.server_addr) {
                match idempotency {
                    // Nothing left this host, so reporting the failure is safe.
                    Idempotency::NonIdempotent => return Err(e),
                    Idempotency::Idempotent => {
                        log::warn!("call {} send failed, will retry: {}", call_id, e);
                    }
                }
            }
            attempt += 1;

            match rx.recv_timeout(self.config.wait_for_attempt(attempt - 1)) {
                Ok(response) => return resolve(response),
                Err(RecvTimeoutError::Disconnected) => return Err(RpcError::Shutdown),
                Err(RecvTimeoutError::Timeout) => {}
            }

            if self.shutdown.load(Ordering::Relaxed) {
                return Err(RpcError::Shutdown);
            }

            let exhausted = self.config.max_attempts.is_some_and(|max| attempt >= max);
            if idempotency == Idempotency::NonIdempotent || exhausted {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                log::debug!(
                    "call {} op={} timed out after {} attempt(s)",
                    call_id,
                    operation,
                    attempt
                );
                return Err(RpcError::ResponseTimeout {
                    operation: operation.to_string(),
                    attempts: attempt,
                });
            }

            self.retransmissions.fetch_add(1, Ordering::Relaxed);
            log::debug!("call {} op={} retransmit #{}", call_id, operation, attempt);
        }
    }

    /// Server this dispatcher talks to.
    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    /// Local address responses are expected on.
    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    /// Number of calls currently waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            calls: self.calls.load(Ordering::Relaxed),
            retransmissions: self.retransmissions.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            stale_responses: self.stale_responses.load(Ordering::Relaxed),
        }
    }

    /// Stop the reply listener. Waiting calls fail with `RpcError::Shutdown`.
    pub fn shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::Relaxed) {
            log::info!("CallDispatcher local={} shutting down", self.local_addr());
        }
        // Dropping the senders wakes every waiting call.
        self.pending.clear();
    }
}

impl Drop for CallDispatcher {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.listener.take() {
            if handle.join().is_err() {
                log::error!("reply listener thread panicked");
            }
        }
    }
}

/// Turn a matched response envelope into the call's result.
fn resolve(response: Envelope) -> RpcResult<Value> {
    match response.into_outcome() {
        Some(Ok(value)) => Ok(value),
        Some(Err(message)) => Err(RpcError::Remote(message)),
        None => Err(RpcError::UnexpectedReply(
            "request envelope routed as a response".to_string(),
        )),
    }
}

/// Start the reply listener thread (routes responses by call id).
fn start_reply_listener(
    transport: Arc<dyn Transport>,
    pending: Arc<PendingMap>,
    shutdown: Arc<AtomicBool>,
    stale_responses: Arc<AtomicU64>,
    poll_interval: std::time::Duration,
) -> RpcResult<JoinHandle<()>> {
    let name = format!("urpc-replies-{}", transport.local_addr().port());
    let handle = thread::Builder::new().name(name).spawn(move || {
        while !shutdown.load(Ordering::Relaxed) {
            let datagram = match transport.recv(Some(poll_interval)) {
                Ok(Some(dg)) => dg,
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("reply listener receive error: {}", e);
                    thread::sleep(poll_interval);
                    continue;
                }
            };

            let envelope = match Envelope::decode(&datagram.data) {
                Ok(env) => env,
                Err(e) => {
                    log::warn!("dropping malformed reply from {}: {}", datagram.source, e);
                    continue;
                }
            };
            if envelope.is_request() {
                log::debug!("ignoring request envelope from {}", datagram.source);
                continue;
            }

            let call_id = envelope.call_id;
            match pending.get(&call_id) {
                // Receiver may already be gone if the call just resolved.
                Some(tx) => drop(tx.send(envelope)),
                None => {
                    stale_responses.fetch_add(1, Ordering::Relaxed);
                    log::debug!("ignoring stale response for call {}", call_id);
                }
            }
        }
        log::debug!("reply listener stopped");
    })?;
    Ok(handle)
}
