//! Datagram transport adapter.
//!
//! [`Transport`] is the engine's only I/O boundary: send a datagram to an
//! address, receive the next datagram.  [`Socket`] implements it on top of
//! `tokio::net::UdpSocket`; [`crate::simulator::LossyTransport`] wraps any
//! transport with fault injection.
//!
//! A segment travels as **two** datagrams: the fixed-size header, then the
//! payload (only when non-empty).  [`send_segment`] and [`recv_segment`]
//! implement that framing.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::segment::{Header, Segment};

/// Receive buffer size; the largest datagram UDP can carry.
const MAX_DATAGRAM: usize = 65_535;

/// Raw addressed datagram I/O.
pub trait Transport: Send + Sync {
    /// Address this endpoint is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Send `buf` as one datagram to `dest`.
    fn send_to(
        &self,
        buf: &[u8],
        dest: SocketAddr,
    ) -> impl Future<Output = io::Result<usize>> + Send;

    /// Wait for the next datagram, returning its length and source.
    fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send;
}

/// UDP socket bound to a local address.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (ephemeral port resolved).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing port 0 lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }
}

impl Transport for Socket {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local_addr)
    }

    async fn send_to(&self, buf: &[u8], dest: SocketAddr) -> io::Result<usize> {
        self.inner.send_to(buf, dest).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.inner.recv_from(buf).await
    }
}

/// Send `segment` to `dest`: header datagram, then payload datagram.
pub async fn send_segment<T: Transport>(
    transport: &T,
    segment: &Segment,
    dest: SocketAddr,
) -> Result<()> {
    transport.send_to(&segment.header.encode(), dest).await?;
    if !segment.payload.is_empty() {
        transport.send_to(&segment.payload, dest).await?;
    }
    Ok(())
}

/// Receive one segment.
///
/// `wait` bounds the wait for the header (`None` blocks indefinitely);
/// `payload_wait` bounds the wait for the payload datagram that follows.
/// The checksum is verified before the segment is returned.
///
/// # Errors
///
/// - [`Error::Timeout`] when no header arrives within `wait`.
/// - [`Error::Malformed`] / [`Error::ProtocolViolation`] /
///   [`Error::ChecksumMismatch`] for datagrams that do not form a valid
///   segment; callers drop these and keep receiving.
pub async fn recv_segment<T: Transport>(
    transport: &T,
    wait: Option<Duration>,
    payload_wait: Duration,
) -> Result<(Segment, SocketAddr)> {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    let (n, from) = recv_within(transport, &mut buf, wait).await?;
    let header = Header::decode(&buf[..n])?;

    let payload = if header.payload_len > 0 {
        let (m, src) = match recv_within(transport, &mut buf, Some(payload_wait)).await {
            Ok(v) => v,
            Err(Error::Timeout) => {
                return Err(Error::ProtocolViolation(format!(
                    "payload of {} bytes from {from} never arrived",
                    header.payload_len
                )))
            }
            Err(e) => return Err(e),
        };
        if src != from {
            return Err(Error::ProtocolViolation(format!(
                "payload from {src} does not follow header from {from}"
            )));
        }
        buf[..m].to_vec()
    } else {
        Vec::new()
    };

    let segment = Segment::from_parts(header, payload)?;
    segment.verify()?;
    Ok((segment, from))
}

async fn recv_within<T: Transport>(
    transport: &T,
    buf: &mut [u8],
    wait: Option<Duration>,
) -> Result<(usize, SocketAddr)> {
    match wait {
        Some(d) => match timeout(d, transport.recv_from(buf)).await {
            Ok(res) => Ok(res?),
            Err(_elapsed) => Err(Error::Timeout),
        },
        None => Ok(transport.recv_from(buf).await?),
    }
}
