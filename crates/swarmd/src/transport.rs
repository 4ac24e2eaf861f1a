//! Datagram transport abstraction. The real implementation is a bound
//! UDP socket; tests substitute an in-memory mock so the whole protocol
//! stack runs without a real network (spec §8's integration scenarios).

use std::net::SocketAddr;

use swarm_core::wire::MAX_DATAGRAM;
use tokio::net::UdpSocket;

/// Everything above this trait only ever sees whole datagrams — no
/// partial reads, no stream semantics.
pub trait Transport {
    async fn send_to(&self, data: &[u8], addr: SocketAddr) -> std::io::Result<()>;
    async fn recv_from(&self) -> std::io::Result<(Vec<u8>, SocketAddr)>;
}

pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr) -> std::io::Result<Self> {
        Ok(Self {
            socket: UdpSocket::bind(addr).await?,
        })
    }
}

impl Transport for UdpTransport {
    async fn send_to(&self, data: &[u8], addr: SocketAddr) -> std::io::Result<()> {
        self.socket.send_to(data, addr).await?;
        Ok(())
    }

    async fn recv_from(&self) -> std::io::Result<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (len, from) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(len);
        Ok((buf, from))
    }
}
