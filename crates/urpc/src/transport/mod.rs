// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport abstraction for urpc.
//!
//! A transport moves opaque datagrams between addressed peers. It gives no
//! delivery guarantee: datagrams may be lost, delayed or duplicated, but a
//! delivered datagram is always whole.
//!
//! Implementations:
//! - [`UdpTransport`] - real network, one `socket2`-built UDP socket
//! - [`MemoryNetwork`] - in-process lossy network for tests and simulations

use crate::error::RpcResult;
use std::net::SocketAddr;
use std::time::Duration;

pub mod memory;
pub mod udp;

pub use memory::{FaultConfig, MemoryNetwork, MemoryTransport, NetworkStats};
pub use udp::UdpTransport;

/// One inbound datagram and the address it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub data: Vec<u8>,
    pub source: SocketAddr,
}

/// Addressed, unreliable datagram delivery.
///
/// Methods take `&self` so one transport can be shared between a sending
/// thread and a receiving thread.
pub trait Transport: Send + Sync {
    /// Send `data` to `dest`. Fire-and-forget: `Ok` means handed to the
    /// network, not delivered.
    fn send(&self, data: &[u8], dest: SocketAddr) -> RpcResult<()>;

    /// Receive the next datagram.
    ///
    /// `None` timeout blocks until a datagram arrives. Returns `Ok(None)`
    /// when the timeout expires with nothing received.
    fn recv(&self, timeout: Option<Duration>) -> RpcResult<Option<Datagram>>;

    /// Address peers use to reach this transport.
    fn local_addr(&self) -> SocketAddr;
}
