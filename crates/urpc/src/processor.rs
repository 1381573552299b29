// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Server-side request processor.
//!
//! Receives request envelopes, deduplicates them by call id, invokes the
//! service at most once per id and answers every delivery (first or
//! duplicate) with the one cached response for that id.

use crate::config::ProcessorConfig;
use crate::dedup::DedupTable;
use crate::error::RpcResult;
use crate::protocol::{Envelope, Payload, Value};
use crate::service::Service;
use crate::transport::{Datagram, Transport};
use crossbeam::channel;
use std::any::Any;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

/// A response ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Where to send it.
    pub dest: SocketAddr,
    /// Encoded response envelope (identical for every replay).
    pub bytes: Arc<[u8]>,
    /// `true` if this answers a duplicate delivery.
    pub replayed: bool,
}

/// Snapshot of processor counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    pub received: u64,
    pub invocations: u64,
    pub replays: u64,
    pub malformed: u64,
    pub receive_errors: u64,
}

/// Cloneable handle that stops a running [`RequestProcessor::run`].
#[derive(Debug, Clone)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// RPC server: serves one [`Service`] over one transport.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use urpc::{KvStore, ProcessorConfig, RequestProcessor, UdpTransport};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = Arc::new(UdpTransport::bind("127.0.0.1:9701".parse()?)?);
/// let store = Arc::new(KvStore::new());
/// let server = RequestProcessor::new(transport, Arc::new(store.service()), ProcessorConfig::default())?;
/// server.run()?;
/// # Ok(())
/// # }
/// ```
pub struct RequestProcessor {
    transport: Arc<dyn Transport>,
    service: Arc<dyn Service>,
    dedup: DedupTable,
    config: ProcessorConfig,
    shutdown: Arc<AtomicBool>,

    received: AtomicU64,
    invocations: AtomicU64,
    replays: AtomicU64,
    malformed: AtomicU64,
    receive_errors: AtomicU64,
}

impl RequestProcessor {
    pub fn new(
        transport: Arc<dyn Transport>,
        service: Arc<dyn Service>,
        config: ProcessorConfig,
    ) -> RpcResult<Self> {
        config.validate()?;
        Ok(Self {
            transport,
            service,
            dedup: DedupTable::new(),
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
            received: AtomicU64::new(0),
            invocations: AtomicU64::new(0),
            replays: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            receive_errors: AtomicU64::new(0),
        })
    }

    /// Process one inbound datagram.
    ///
    /// Returns the reply to send, or `None` if the datagram is dropped
    /// (malformed, or not a request).
    pub fn handle_datagram(&self, datagram: &Datagram) -> Option<Reply> {
        self.received.fetch_add(1, Ordering::Relaxed);

        let envelope = match Envelope::decode(&datagram.data) {
            Ok(env) => env,
            Err(e) => {
                self.malformed.fetch_add(1, Ordering::Relaxed);
                log::warn!("dropping malformed datagram from {}: {}", datagram.source, e);
                return None;
            }
        };

        let Envelope {
            call_id,
            sender,
            payload,
        } = envelope;
        let Payload::Request { operation, args } = payload else {
            self.malformed.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                "dropping non-request envelope for call {} from {}",
                call_id,
                datagram.source
            );
            return None;
        };

        // An unspecified sender (client bound to 0.0.0.0) is only reachable
        // through the datagram's source address.
        let dest = if sender.ip().is_unspecified() {
            datagram.source
        } else {
            sender
        };
        let local = self.transport.local_addr();

        let resolution = self.dedup.resolve(call_id, || {
            self.invocations.fetch_add(1, Ordering::Relaxed);
            log::debug!("invoke call {} op={} args={}", call_id, operation, args.len());
            let response = match self.invoke(&operation, &args) {
                Ok(value) => Envelope::success(call_id, local, value),
                Err(message) => {
                    log::warn!("call {} op={} failed: {}", call_id, operation, message);
                    Envelope::error(call_id, local, message)
                }
            };
            match response.encode() {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::error!("call {} op={} response not encodable: {}", call_id, operation, e);
                    let message = format!("response for '{}' not encodable: {}", operation, e);
                    Envelope::error(call_id, local, message)
                        .encode()
                        .unwrap_or_default()
                }
            }
        });

        let replayed = resolution.is_replay();
        if replayed {
            self.replays.fetch_add(1, Ordering::Relaxed);
            log::debug!("replay cached response for call {} to {}", call_id, dest);
        }

        Some(Reply {
            dest,
            bytes: Arc::clone(resolution.bytes()),
            replayed,
        })
    }

    /// Handle a datagram and send the reply, if any.
    fn serve(&self, datagram: &Datagram) {
        if let Some(reply) = self.handle_datagram(datagram) {
            if let Err(e) = self.transport.send(&reply.bytes, reply.dest) {
                // The client's retry (or a later duplicate) gets the replay.
                log::warn!("failed to send reply to {}: {}", reply.dest, e);
            }
        }
    }

    /// Invoke the service, converting a panic into an error description.
    fn invoke(&self, operation: &str, args: &[Value]) -> Result<Value, String> {
        let service = &self.service;
        match panic::catch_unwind(AssertUnwindSafe(|| service.invoke(operation, args))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(e.to_string()),
            Err(panic) => {
                let text = panic_message(panic.as_ref());
                log::error!("service panicked in '{}': {}", operation, text);
                Err(format!("internal error in '{}': {}", operation, text))
            }
        }
    }

    /// Run the receive loop until [`ShutdownHandle::shutdown`] is called.
    ///
    /// With `workers > 1`, requests are handed to a pool of scoped worker
    /// threads: different call ids run in parallel, duplicates of one id
    /// are serialized by the dedup table.
    pub fn run(&self) -> RpcResult<()> {
        log::info!(
            "RequestProcessor listening on {} (workers={})",
            self.transport.local_addr(),
            self.config.workers
        );

        if self.config.workers == 1 {
            while let Some(datagram) = self.next_datagram()? {
                self.serve(&datagram);
            }
        } else {
            let (tx, rx) = channel::bounded::<Datagram>(self.config.workers * 64);
            thread::scope(|scope| -> RpcResult<()> {
                for _ in 0..self.config.workers {
                    let rx = rx.clone();
                    scope.spawn(move || {
                        for datagram in rx.iter() {
                            self.serve(&datagram);
                        }
                    });
                }
                let result = loop {
                    match self.next_datagram() {
                        Ok(Some(datagram)) => {
                            if tx.send(datagram).is_err() {
                                break Ok(());
                            }
                        }
                        Ok(None) => break Ok(()),
                        Err(e) => break Err(e),
                    }
                };
                // Closing the channel lets the workers drain and exit.
                drop(tx);
                result
            })?;
        }

        log::info!("RequestProcessor on {} stopped", self.transport.local_addr());
        Ok(())
    }

    /// Block for the next datagram; `None` once shut down.
    ///
    /// Receive errors are logged and retried: only shutdown ends the loop.
    fn next_datagram(&self) -> RpcResult<Option<Datagram>> {
        let poll = self.config.poll_interval();
        while !self.shutdown.load(Ordering::Relaxed) {
            match self.transport.recv(Some(poll)) {
                Ok(Some(datagram)) => return Ok(Some(datagram)),
                Ok(None) => {}
                Err(e) => {
                    self.receive_errors.fetch_add(1, Ordering::Relaxed);
                    log::warn!(
                        "receive error on {}: {}",
                        self.transport.local_addr(),
                        e
                    );
                    thread::sleep(poll);
                }
            }
        }
        Ok(None)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(Arc::clone(&self.shutdown))
    }

    /// Stop the receive loop.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    /// Dedup table (read-only view for inspection).
    pub fn dedup(&self) -> &DedupTable {
        &self.dedup
    }

    pub fn stats(&self) -> ProcessorStats {
        ProcessorStats {
            received: self.received.load(Ordering::Relaxed),
            invocations: self.invocations.load(Ordering::Relaxed),
            replays: self.replays.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
