// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP transport for urpc request/response datagrams.

use crate::error::{RpcError, RpcResult};
use crate::transport::{Datagram, Transport};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

/// Largest payload a single UDP datagram can carry.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Smallest read timeout handed to the socket (zero means "block forever").
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// UDP transport over a single socket.
///
/// The socket is shared between senders and the (single) receiving thread;
/// `UdpSocket` send/receive calls are safe to issue concurrently.
pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
    max_datagram_size: usize,
}

impl UdpTransport {
    /// Bind a UDP socket to `addr` (port 0 picks an ephemeral port).
    pub fn bind(addr: SocketAddr) -> RpcResult<Self> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket2 = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket2.set_reuse_address(true)?;
        socket2.bind(&addr.into())?;

        let socket: UdpSocket = socket2.into();
        let local_addr = socket.local_addr()?;
        log::debug!("[UDP] transport bound addr={}", local_addr);

        Ok(Self {
            socket,
            local_addr,
            max_datagram_size: MAX_DATAGRAM_SIZE,
        })
    }

    /// Bind an ephemeral port on the unspecified address of `peer`'s family.
    ///
    /// Used by clients: the server answers to the datagram source when the
    /// envelope sender is unspecified.
    pub fn bind_for_peer(peer: SocketAddr) -> RpcResult<Self> {
        let any: SocketAddr = if peer.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        Self::bind(any)
    }

    /// Limit the receive buffer (datagrams above it are truncated by the OS
    /// and then rejected by the decoder).
    pub fn with_max_datagram_size(mut self, size: usize) -> Self {
        self.max_datagram_size = size.clamp(1, MAX_DATAGRAM_SIZE);
        self
    }
}

impl Transport for UdpTransport {
    fn send(&self, data: &[u8], dest: SocketAddr) -> RpcResult<()> {
        if data.len() > self.max_datagram_size {
            return Err(RpcError::Io(format!(
                "datagram of {} bytes exceeds limit {}",
                data.len(),
                self.max_datagram_size
            )));
        }
        self.socket.send_to(data, dest)?;
        Ok(())
    }

    fn recv(&self, timeout: Option<Duration>) -> RpcResult<Option<Datagram>> {
        self.socket
            .set_read_timeout(timeout.map(|t| t.max(MIN_READ_TIMEOUT)))?;

        let mut buf = vec![0u8; self.max_datagram_size];
        match self.socket.recv_from(&mut buf) {
            Ok((len, source)) => {
                buf.truncate(len);
                Ok(Some(Datagram { data: buf, source }))
            }
            Err(e) if is_no_message(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Errors that mean "nothing to read right now".
///
/// ICMP port-unreachable from an earlier send surfaces on some platforms as
/// `ConnectionRefused`/`ConnectionReset` on the next receive; for a lossy
/// datagram transport that is just a lost message.
fn is_no_message(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn bind_assigns_ephemeral_port() {
        let t = UdpTransport::bind(loopback()).unwrap();
        assert_ne!(t.local_addr().port(), 0);
    }

    #[test]
    fn recv_times_out_with_none() {
        let t = UdpTransport::bind(loopback()).unwrap();
        let got = t.recv(Some(Duration::from_millis(20))).unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn send_and_receive_loopback() {
        let a = UdpTransport::bind(loopback()).unwrap();
        let b = UdpTransport::bind(loopback()).unwrap();

        a.send(b"hello", b.local_addr()).unwrap();
        let dg = b.recv(Some(Duration::from_secs(2))).unwrap().unwrap();
        assert_eq!(dg.data, b"hello");
        assert_eq!(dg.source, a.local_addr());
    }

    #[test]
    fn oversized_send_is_rejected() {
        let t = UdpTransport::bind(loopback()).unwrap().with_max_datagram_size(8);
        let err = t.send(&[0u8; 16], t.local_addr()).unwrap_err();
        assert!(matches!(err, RpcError::Io(_)));
    }
}
