//! Datagram transport boundary
//!
//! The tunnel core only ever sees complete datagrams. Anything that can move
//! whole messages to and from peer addresses can carry it: a plain UDP
//! socket is the usual case.

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;

use crate::capacity::MAX_MESSAGE_SIZE;

/// Receive buffer size, large enough for any UDP payload
pub const MAX_UDP_PACKET_SIZE: usize = 65535;

/// Trait for datagram-based transports (UDP-like semantics)
#[async_trait]
pub trait DatagramTransport: Send + Sync {
    /// Send one complete message to `addr`
    async fn send_to(&self, data: &[u8], addr: SocketAddr) -> io::Result<()>;

    /// Receive one complete message and its sender
    async fn recv_from(&self) -> io::Result<(Vec<u8>, SocketAddr)>;

    /// Largest message the peer is expected to accept
    fn max_datagram_size(&self) -> usize;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl DatagramTransport for UdpSocket {
    async fn send_to(&self, data: &[u8], addr: SocketAddr) -> io::Result<()> {
        let sent = UdpSocket::send_to(self, data, addr).await?;
        if sent != data.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("sent {} of {} bytes", sent, data.len()),
            ));
        }
        Ok(())
    }

    async fn recv_from(&self) -> io::Result<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; MAX_UDP_PACKET_SIZE];
        let (len, addr) = UdpSocket::recv_from(self, &mut buf).await?;
        buf.truncate(len);
        Ok((buf, addr))
    }

    fn max_datagram_size(&self) -> usize {
        MAX_MESSAGE_SIZE
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}

#[async_trait]
impl<T: DatagramTransport + ?Sized> DatagramTransport for Arc<T> {
    async fn send_to(&self, data: &[u8], addr: SocketAddr) -> io::Result<()> {
        (**self).send_to(data, addr).await
    }

    async fn recv_from(&self) -> io::Result<(Vec<u8>, SocketAddr)> {
        (**self).recv_from().await
    }

    fn max_datagram_size(&self) -> usize {
        (**self).max_datagram_size()
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        (**self).local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_udp_socket_transport() {
        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let b_addr = DatagramTransport::local_addr(&b).unwrap();

        DatagramTransport::send_to(&a, b"ping", b_addr).await.unwrap();
        let (data, from) = DatagramTransport::recv_from(&b).await.unwrap();

        assert_eq!(data, b"ping");
        assert_eq!(from, DatagramTransport::local_addr(&a).unwrap());
        assert_eq!(b.max_datagram_size(), MAX_MESSAGE_SIZE);
    }
}
