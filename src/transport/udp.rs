use std::net::SocketAddr;
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use tokio::net::{lookup_host, ToSocketAddrs, UdpSocket};
use tracing::{debug, info, trace};
use crate::transport::ByteTransport;

/// A UDP socket talking to a single peer. A socket that did not connect learns its peer from
///  the first datagram it receives, and ignores datagrams from anybody else afterwards.
pub struct UdpTransport {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
}

impl UdpTransport {
    pub async fn bind(addr: impl ToSocketAddrs) -> anyhow::Result<UdpTransport> {
        let socket = UdpSocket::bind(addr).await?;
        info!("bound UDP socket to {:?}", socket.local_addr()?);
        Ok(UdpTransport {
            socket,
            peer: None,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}

#[async_trait]
impl ByteTransport for UdpTransport {
    async fn connect(&mut self, address: &str, port: u16) -> anyhow::Result<()> {
        let peer = lookup_host((address, port)).await?
            .next()
            .ok_or_else(|| anyhow!("{}:{} does not resolve to an address", address, port))?;
        info!("UDP peer is {:?}", peer);
        self.peer = Some(peer);
        Ok(())
    }

    async fn send(&mut self, buf: &[u8]) -> anyhow::Result<usize> {
        let Some(peer) = self.peer else {
            bail!("UDP socket has no peer yet");
        };
        trace!("UDP socket: sending {} bytes to {:?}", buf.len(), peer);
        Ok(self.socket.send_to(buf, peer).await?)
    }

    async fn receive(&mut self, buf: &mut [u8]) -> anyhow::Result<usize> {
        loop {
            let (num_read, from) = self.socket.recv_from(buf).await?;
            match self.peer {
                None => {
                    info!("learned UDP peer {:?} from first datagram", from);
                    self.peer = Some(from);
                }
                Some(peer) if peer != from => {
                    debug!("datagram from {:?}, which is not the peer - dropping", from);
                    continue;
                }
                _ => {}
            }
            trace!("UDP socket: received {} bytes from {:?}", num_read, from);
            return Ok(num_read);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_receive() {
        let mut server = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let mut client = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        client.connect("127.0.0.1", server.local_addr().unwrap().port()).await.unwrap();

        assert_eq!(client.send(b"ping").await.unwrap(), 4);
        let mut buf = [0u8; 64];
        let n = server.receive(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(server.peer_addr(), Some(client.local_addr().unwrap()));

        server.send(b"pong").await.unwrap();
        let n = client.receive(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"pong");
    }

    #[tokio::test]
    async fn test_send_without_peer() {
        let mut transport = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        assert!(transport.send(b"x").await.is_err());
    }

    #[tokio::test]
    async fn test_ignores_strangers() {
        let mut server = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let mut client = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let mut stranger = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        client.connect("127.0.0.1", port).await.unwrap();
        stranger.connect("127.0.0.1", port).await.unwrap();

        let mut buf = [0u8; 64];
        client.send(b"first").await.unwrap();
        server.receive(&mut buf).await.unwrap();

        stranger.send(b"noise").await.unwrap();
        client.send(b"second").await.unwrap();
        let n = server.receive(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"second");
    }
}
