use std::io;
use std::net::SocketAddrV4;
use std::sync::Arc;

use bytes::Bytes;
use kadnode_util::FastHashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{Socket, Transport};

const FIRST_EPHEMERAL_PORT: u16 = 49152;

type Datagram = (Bytes, SocketAddrV4);

/// In-process datagram network.
///
/// Every clone refers to the same network. Datagrams sent to an address
/// nobody is bound to are silently lost, like with UDP.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<Mutex<NetworkState>>,
}

#[derive(Default)]
struct NetworkState {
    sockets: FastHashMap<SocketAddrV4, mpsc::UnboundedSender<Datagram>>,
    next_ephemeral_port: u16,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            network: self.clone(),
        }
    }

    pub fn is_bound(&self, addr: &SocketAddrV4) -> bool {
        self.inner.lock().sockets.contains_key(addr)
    }

    fn bind(&self, mut addr: SocketAddrV4) -> io::Result<MemorySocket> {
        let mut state = self.inner.lock();

        if addr.port() == 0 {
            addr.set_port(state.allocate_port(addr)?);
        } else if state.sockets.contains_key(&addr) {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("address {addr} is already in use"),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.sockets.insert(addr, tx);

        Ok(MemorySocket {
            addr,
            network: self.clone(),
            rx: tokio::sync::Mutex::new(rx),
        })
    }

    fn deliver(&self, from: SocketAddrV4, target: &SocketAddrV4, data: &[u8]) {
        let tx = self.inner.lock().sockets.get(target).cloned();
        match tx {
            Some(tx) => {
                tx.send((Bytes::copy_from_slice(data), from)).ok();
            }
            None => tracing::trace!(%from, %target, "datagram lost"),
        }
    }
}

impl NetworkState {
    fn allocate_port(&mut self, addr: SocketAddrV4) -> io::Result<u16> {
        let range = u16::MAX - FIRST_EPHEMERAL_PORT;
        for _ in 0..=range {
            let offset = self.next_ephemeral_port % (range + 1);
            self.next_ephemeral_port = self.next_ephemeral_port.wrapping_add(1);

            let port = FIRST_EPHEMERAL_PORT + offset;
            if !self
                .sockets
                .contains_key(&SocketAddrV4::new(*addr.ip(), port))
            {
                return Ok(port);
            }
        }

        Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no free ephemeral ports on {}", addr.ip()),
        ))
    }
}

/// A [`Transport`] bound to a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryTransport {
    network: MemoryNetwork,
}

impl Transport for MemoryTransport {
    type Socket = MemorySocket;

    async fn bind(&self, addr: SocketAddrV4) -> io::Result<Self::Socket> {
        self.network.bind(addr)
    }
}

pub struct MemorySocket {
    addr: SocketAddrV4,
    network: MemoryNetwork,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Datagram>>,
}

impl Socket for MemorySocket {
    fn local_addr(&self) -> io::Result<SocketAddrV4> {
        Ok(self.addr)
    }

    async fn send_to(&self, data: &[u8], target: SocketAddrV4) -> io::Result<usize> {
        self.network.deliver(self.addr, &target, data);
        Ok(data.len())
    }

    async fn recv_from(&self, buffer: &mut [u8]) -> io::Result<(usize, SocketAddrV4)> {
        let (data, from) = match self.rx.lock().await.recv().await {
            Some(datagram) => datagram,
            None => return Err(io::ErrorKind::BrokenPipe.into()),
        };

        let len = data.len().min(buffer.len());
        buffer[..len].copy_from_slice(&data[..len]);
        Ok((len, from))
    }
}

impl Drop for MemorySocket {
    fn drop(&mut self) {
        self.network.inner.lock().sockets.remove(&self.addr);
    }
}
