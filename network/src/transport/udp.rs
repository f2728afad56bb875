use std::io;
use std::net::{SocketAddr, SocketAddrV4};

use tokio::net::UdpSocket;

use super::{Socket, Transport};

/// Plain UDP sockets.
#[derive(Debug, Default, Clone, Copy)]
pub struct UdpTransport;

impl Transport for UdpTransport {
    type Socket = UdpSocket;

    async fn bind(&self, addr: SocketAddrV4) -> io::Result<Self::Socket> {
        UdpSocket::bind(addr).await
    }
}

impl Socket for UdpSocket {
    fn local_addr(&self) -> io::Result<SocketAddrV4> {
        UdpSocket::local_addr(self).and_then(expect_v4)
    }

    async fn send_to(&self, data: &[u8], target: SocketAddrV4) -> io::Result<usize> {
        UdpSocket::send_to(self, data, target).await
    }

    async fn recv_from(&self, buffer: &mut [u8]) -> io::Result<(usize, SocketAddrV4)> {
        let (len, addr) = UdpSocket::recv_from(self, buffer).await?;
        Ok((len, expect_v4(addr)?))
    }
}

fn expect_v4(addr: SocketAddr) -> io::Result<SocketAddrV4> {
    match addr {
        SocketAddr::V4(addr) => Ok(addr),
        SocketAddr::V6(addr) => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("unexpected IPv6 address: {addr}"),
        )),
    }
}
