use std::future::Future;
use std::io;
use std::net::SocketAddrV4;

pub use self::memory::{MemoryNetwork, MemorySocket, MemoryTransport};
pub use self::udp::UdpTransport;

mod memory;
mod udp;

/// Datagram transport used by the DHT.
///
/// The node binds one socket for its listener and a fresh ephemeral
/// socket for every outbound request.
pub trait Transport: Send + Sync + 'static {
    type Socket: Socket;

    /// Binds a socket. Port `0` picks a free ephemeral port.
    fn bind(&self, addr: SocketAddrV4) -> impl Future<Output = io::Result<Self::Socket>> + Send;
}

pub trait Socket: Send + Sync + 'static {
    fn local_addr(&self) -> io::Result<SocketAddrV4>;

    fn send_to(
        &self,
        data: &[u8],
        target: SocketAddrV4,
    ) -> impl Future<Output = io::Result<usize>> + Send;

    /// Receives a single datagram. Excess bytes are discarded when `buffer`
    /// is too small.
    fn recv_from(
        &self,
        buffer: &mut [u8],
    ) -> impl Future<Output = io::Result<(usize, SocketAddrV4)>> + Send;
}
