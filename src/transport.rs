//! TCP transport layer for ISO-on-TCP communication.
//!
//! This module provides the [`TcpTransport`] struct which handles the byte
//! stream to an S7 controller. It knows about sockets, timeouts and bytes,
//! nothing about frames or telegrams.
//!
//! # Design
//!
//! - **Protocol agnostic** - sends slices and fills buffers, no framing knowledge
//! - **Synchronous** - blocking I/O bounded by per-operation timeouts
//! - **Probe first** - [`TcpTransport::probe`] checks reachability with a short
//!   timeout before the real connection is opened
//!
//! # Constants
//!
//! - [`ISO_TCP_PORT`] - ISO-on-TCP port (102)
//! - [`DEFAULT_CONNECT_TIMEOUT`] - connect and probe timeout (1 second)
//! - [`DEFAULT_TIMEOUT`] - read and write timeout (2 seconds)

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::{map_io, Result, S7Error};

/// ISO-on-TCP port used by S7 controllers.
pub const ISO_TCP_PORT: u16 = 102;

/// Default timeout for the probe and the connect.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default timeout for reads and writes.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Independent timeouts for the three socket operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Timeout for the probe and the connect.
    pub connect: Duration,
    /// Read timeout.
    pub read: Duration,
    /// Write timeout.
    pub write: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: DEFAULT_CONNECT_TIMEOUT,
            read: DEFAULT_TIMEOUT,
            write: DEFAULT_TIMEOUT,
        }
    }
}

/// Resolves `host:port` to the first socket address.
///
/// # Errors
///
/// Returns [`S7Error::Unreachable`] when the name does not resolve.
pub fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .map_err(|_| S7Error::Unreachable {
            host: format!("{host}:{port}"),
        })?
        .next()
        .ok_or_else(|| S7Error::Unreachable {
            host: format!("{host}:{port}"),
        })
}

/// TCP transport for S7 communication.
///
/// One stream, one peer. Timeouts are applied on connect and kept for the
/// whole lifetime of the stream.
pub struct TcpTransport {
    stream: TcpStream,
    peer: SocketAddr,
}

impl TcpTransport {
    /// Checks that the peer accepts TCP connections, then closes the socket.
    ///
    /// # Errors
    ///
    /// Returns [`S7Error::Unreachable`] if the connect fails or times out.
    pub fn probe(peer: SocketAddr, timeout: Duration) -> Result<()> {
        let stream =
            TcpStream::connect_timeout(&peer, timeout).map_err(|_| S7Error::Unreachable {
                host: peer.to_string(),
            })?;
        let _ = stream.shutdown(Shutdown::Both);
        Ok(())
    }

    /// Opens a stream to the peer and applies the timeouts.
    ///
    /// Nagle is disabled, telegrams are small and latency-bound.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the socket cannot be opened or configured.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use s7_archiver::{TcpTransport, Timeouts};
    ///
    /// let transport = TcpTransport::connect(
    ///     "192.168.0.10:102".parse().unwrap(),
    ///     Timeouts::default(),
    /// ).unwrap();
    /// ```
    pub fn connect(peer: SocketAddr, timeouts: Timeouts) -> Result<Self> {
        let stream = TcpStream::connect_timeout(&peer, timeouts.connect).map_err(map_io)?;
        stream.set_read_timeout(Some(timeouts.read))?;
        stream.set_write_timeout(Some(timeouts.write))?;
        stream.set_nodelay(true)?;
        Ok(Self { stream, peer })
    }

    /// Sends the whole buffer.
    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).map_err(map_io)
    }

    /// Fills `buf` completely or fails.
    ///
    /// # Errors
    ///
    /// - [`S7Error::Timeout`] if the read timeout expires
    /// - [`S7Error::Io`] on reset or end of stream
    pub fn recv_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.stream.read_exact(buf).map_err(map_io)
    }

    /// Shuts the stream down in both directions, ignoring errors.
    pub fn shutdown(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    /// Returns the peer address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("peer", &self.peer)
            .field("local_addr", &self.stream.local_addr().ok())
            .finish()
    }
}
