// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process lossy network.
//!
//! Every endpoint owns an inbound queue; `send` looks up the destination
//! queue and applies the network's fault plan before delivering:
//!
//! 1. scripted drop rules (`drop_next_to`), consumed first
//! 2. random loss with probability `loss_rate`
//! 3. random duplication with probability `duplicate_rate`
//!
//! Randomness comes from a seeded `fastrand::Rng`, so a given seed and
//! send sequence always produce the same fault pattern.

use crate::error::{RpcError, RpcResult};
use crate::transport::{Datagram, Transport};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// First port handed out by [`MemoryNetwork::endpoint_auto`].
const AUTO_PORT_BASE: u16 = 40_000;

/// Random fault parameters of a [`MemoryNetwork`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaultConfig {
    /// Probability in `[0, 1]` that a datagram is dropped.
    pub loss_rate: f64,
    /// Probability in `[0, 1]` that a delivered datagram arrives twice.
    pub duplicate_rate: f64,
    /// RNG seed.
    pub seed: u64,
}

impl FaultConfig {
    /// No random faults.
    pub fn reliable() -> Self {
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            seed: 0,
        }
    }

    /// Random loss and duplication with the given seed.
    pub fn lossy(loss_rate: f64, duplicate_rate: f64, seed: u64) -> Self {
        Self {
            loss_rate: loss_rate.clamp(0.0, 1.0),
            duplicate_rate: duplicate_rate.clamp(0.0, 1.0),
            seed,
        }
    }
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self::reliable()
    }
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub sent: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub duplicated: u64,
}

#[derive(Debug)]
struct DropRule {
    dest: SocketAddr,
    remaining: usize,
}

struct FaultState {
    config: FaultConfig,
    rng: fastrand::Rng,
    rules: Vec<DropRule>,
}

impl FaultState {
    /// Number of copies to deliver for one datagram to `dest` (0, 1 or 2).
    fn copies_for(&mut self, dest: SocketAddr) -> usize {
        if let Some(rule) = self
            .rules
            .iter_mut()
            .find(|r| r.dest == dest && r.remaining > 0)
        {
            rule.remaining -= 1;
            self.rules.retain(|r| r.remaining > 0);
            return 0;
        }
        if self.config.loss_rate > 0.0 && self.rng.f64() < self.config.loss_rate {
            return 0;
        }
        if self.config.duplicate_rate > 0.0 && self.rng.f64() < self.config.duplicate_rate {
            return 2;
        }
        1
    }
}

struct NetworkInner {
    endpoints: DashMap<SocketAddr, Sender<Datagram>>,
    faults: Mutex<FaultState>,
    next_port: AtomicU16,
    sent: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    duplicated: AtomicU64,
}

/// Shared handle to an in-process network.
#[derive(Clone)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

impl MemoryNetwork {
    /// Create a network with the given fault parameters.
    pub fn new(config: FaultConfig) -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                endpoints: DashMap::new(),
                faults: Mutex::new(FaultState {
                    config,
                    rng: fastrand::Rng::with_seed(config.seed),
                    rules: Vec::new(),
                }),
                next_port: AtomicU16::new(AUTO_PORT_BASE),
                sent: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                duplicated: AtomicU64::new(0),
            }),
        }
    }

    /// Create a network that never drops or duplicates on its own.
    pub fn reliable() -> Self {
        Self::new(FaultConfig::reliable())
    }

    /// Attach an endpoint at `addr`. Fails if the address is taken.
    pub fn endpoint(&self, addr: SocketAddr) -> RpcResult<MemoryTransport> {
        let (tx, rx) = channel::unbounded();
        match self.inner.endpoints.entry(addr) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(RpcError::Io(format!("address {} already in use", addr)))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(tx);
                Ok(MemoryTransport {
                    addr,
                    inbox: rx,
                    network: Arc::clone(&self.inner),
                })
            }
        }
    }

    /// Attach an endpoint on `127.0.0.1` at the next free auto port.
    pub fn endpoint_auto(&self) -> MemoryTransport {
        loop {
            let port = self.inner.next_port.fetch_add(1, Ordering::Relaxed);
            let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
            if let Ok(t) = self.endpoint(addr) {
                return t;
            }
        }
    }

    /// Drop the next `count` datagrams addressed to `dest`.
    pub fn drop_next_to(&self, dest: SocketAddr, count: usize) {
        if count == 0 {
            return;
        }
        self.inner.faults.lock().rules.push(DropRule {
            dest,
            remaining: count,
        });
    }

    /// Replace the random fault parameters (scripted rules are kept).
    pub fn set_faults(&self, config: FaultConfig) {
        let mut faults = self.inner.faults.lock();
        faults.rng = fastrand::Rng::with_seed(config.seed);
        faults.config = config;
    }

    /// Snapshot of the delivery counters.
    pub fn stats(&self) -> NetworkStats {
        NetworkStats {
            sent: self.inner.sent.load(Ordering::Relaxed),
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
            duplicated: self.inner.duplicated.load(Ordering::Relaxed),
        }
    }
}

/// One endpoint of a [`MemoryNetwork`].
pub struct MemoryTransport {
    addr: SocketAddr,
    inbox: Receiver<Datagram>,
    network: Arc<NetworkInner>,
}

impl Transport for MemoryTransport {
    fn send(&self, data: &[u8], dest: SocketAddr) -> RpcResult<()> {
        let net = &self.network;
        net.sent.fetch_add(1, Ordering::Relaxed);

        let copies = net.faults.lock().copies_for(dest);
        let Some(queue) = net.endpoints.get(&dest) else {
            // Nobody listening: the datagram is lost, the sender is not told.
            net.dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        };

        if copies == 0 {
            log::trace!("[MEM] drop {} -> {} ({} bytes)", self.addr, dest, data.len());
            net.dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        if copies > 1 {
            net.duplicated.fetch_add(1, Ordering::Relaxed);
        }
        for _ in 0..copies {
            let dg = Datagram {
                data: data.to_vec(),
                source: self.addr,
            };
            if queue.send(dg).is_ok() {
                net.delivered.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    fn recv(&self, timeout: Option<Duration>) -> RpcResult<Option<Datagram>> {
        match timeout {
            None => Ok(self.inbox.recv().ok()),
            Some(t) => match self.inbox.recv_timeout(t) {
                Ok(dg) => Ok(Some(dg)),
                Err(RecvTimeoutError::Timeout) => Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    Err(RpcError::Io(format!("endpoint {} detached", self.addr)))
                }
            },
        }
    }

    fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.network.endpoints.remove(&self.addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Option<Duration> = Some(Duration::from_millis(50));

    #[test]
    fn reliable_delivery() {
        let net = MemoryNetwork::reliable();
        let a = net.endpoint_auto();
        let b = net.endpoint_auto();

        a.send(b"ping", b.local_addr()).unwrap();
        let dg = b.recv(WAIT).unwrap().unwrap();
        assert_eq!(dg.data, b"ping");
        assert_eq!(dg.source, a.local_addr());
        assert!(b.recv(WAIT).unwrap().is_none());
    }

    #[test]
    fn scripted_drops_are_consumed_in_order() {
        let net = MemoryNetwork::reliable();
        let a = net.endpoint_auto();
        let b = net.endpoint_auto();
        net.drop_next_to(b.local_addr(), 2);

        for payload in [b"1", b"2", b"3"] {
            a.send(payload, b.local_addr()).unwrap();
        }
        assert_eq!(b.recv(WAIT).unwrap().unwrap().data, b"3");
        assert!(b.recv(WAIT).unwrap().is_none());

        let stats = net.stats();
        assert_eq!(stats.sent, 3);
        assert_eq!(stats.dropped, 2);
        assert_eq!(stats.delivered, 1);
    }

    #[test]
    fn full_duplication() {
        let net = MemoryNetwork::new(FaultConfig::lossy(0.0, 1.0, 7));
        let a = net.endpoint_auto();
        let b = net.endpoint_auto();

        a.send(b"dup", b.local_addr()).unwrap();
        assert_eq!(b.recv(WAIT).unwrap().unwrap().data, b"dup");
        assert_eq!(b.recv(WAIT).unwrap().unwrap().data, b"dup");
        assert_eq!(net.stats().duplicated, 1);
    }

    #[test]
    fn full_loss() {
        let net = MemoryNetwork::new(FaultConfig::lossy(1.0, 0.0, 7));
        let a = net.endpoint_auto();
        let b = net.endpoint_auto();

        a.send(b"gone", b.local_addr()).unwrap();
        assert!(b.recv(WAIT).unwrap().is_none());
    }

    #[test]
    fn unknown_destination_is_silently_lost() {
        let net = MemoryNetwork::reliable();
        let a = net.endpoint_auto();
        let nowhere: SocketAddr = "10.0.0.1:1".parse().unwrap();
        a.send(b"x", nowhere).unwrap();
        assert_eq!(net.stats().dropped, 1);
    }

    #[test]
    fn address_reuse_is_rejected_until_drop() {
        let net = MemoryNetwork::reliable();
        let addr: SocketAddr = "127.0.0.1:9701".parse().unwrap();
        let first = net.endpoint(addr).unwrap();
        assert!(net.endpoint(addr).is_err());
        drop(first);
        assert!(net.endpoint(addr).is_ok());
    }
}
