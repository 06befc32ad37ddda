use std::path::{Path, PathBuf};
use anyhow::bail;
use async_trait::async_trait;
use tokio::net::UnixDatagram;
use tracing::{debug, info, trace};
use crate::transport::ByteTransport;

/// A Unix domain datagram socket for peers on the same host. The peer is addressed by its socket
///  path; `connect` ignores the port.
///
/// Like [super::udp::UdpTransport], a socket that did not connect learns its peer from the first
///  datagram.
pub struct UnixDatagramTransport {
    socket: UnixDatagram,
    peer: Option<PathBuf>,
}

impl UnixDatagramTransport {
    pub fn bind(path: impl AsRef<Path>) -> anyhow::Result<UnixDatagramTransport> {
        let socket = UnixDatagram::bind(path.as_ref())?;
        info!("bound Unix datagram socket to {:?}", path.as_ref());
        Ok(UnixDatagramTransport {
            socket,
            peer: None,
        })
    }
}

#[async_trait]
impl ByteTransport for UnixDatagramTransport {
    async fn connect(&mut self, address: &str, _port: u16) -> anyhow::Result<()> {
        self.peer = Some(PathBuf::from(address));
        Ok(())
    }

    async fn send(&mut self, buf: &[u8]) -> anyhow::Result<usize> {
        let Some(peer) = &self.peer else {
            bail!("Unix datagram socket has no peer yet");
        };
        trace!("Unix socket: sending {} bytes to {:?}", buf.len(), peer);
        Ok(self.socket.send_to(buf, peer).await?)
    }

    async fn receive(&mut self, buf: &mut [u8]) -> anyhow::Result<usize> {
        loop {
            let (num_read, from) = self.socket.recv_from(buf).await?;
            let Some(from) = from.as_pathname().map(Path::to_path_buf) else {
                debug!("datagram from an unnamed socket - dropping");
                continue;
            };

            match &self.peer {
                None => {
                    info!("learned Unix socket peer {:?} from first datagram", from);
                    self.peer = Some(from);
                }
                Some(peer) if peer != &from => {
                    debug!("datagram from {:?}, which is not the peer - dropping", from);
                    continue;
                }
                _ => {}
            }
            return Ok(num_read);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn socket_path(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("rudp-{}-{}.sock", name, std::process::id()));
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn test_send_receive() {
        let server_path = socket_path("server");
        let client_path = socket_path("client");
        let mut server = UnixDatagramTransport::bind(&server_path).unwrap();
        let mut client = UnixDatagramTransport::bind(&client_path).unwrap();
        client.connect(server_path.to_str().unwrap(), 0).await.unwrap();

        client.send(b"ping").await.unwrap();
        let mut buf = [0u8; 16];
        let n = server.receive(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");

        server.send(b"pong").await.unwrap();
        let n = client.receive(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"pong");

        let _ = std::fs::remove_file(server_path);
        let _ = std::fs::remove_file(client_path);
    }
}
