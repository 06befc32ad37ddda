use anyhow::bail;
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, trace};
use crate::transport::ByteTransport;
use crate::util::safe_converter::SafeCast;

const FRAME_HEADER_LEN: usize = 4;

/// Packets over a TCP stream, each framed by its length (u32 BE).
///
/// TCP is reliable already, so the protocol's acknowledgements are redundant here; this
///  transport exists for networks where UDP is not an option.
///
/// Bytes are collected in a buffer until a frame is complete, so a `receive` that is cancelled
///  (e.g. by the handshake timeout) does not lose its place in the stream.
pub struct TcpTransport {
    stream: Option<TcpStream>,
    pending: BytesMut,
}

impl TcpTransport {
    pub fn new() -> TcpTransport {
        TcpTransport {
            stream: None,
            pending: BytesMut::with_capacity(4096),
        }
    }

    pub fn from_stream(stream: TcpStream) -> TcpTransport {
        TcpTransport {
            stream: Some(stream),
            pending: BytesMut::with_capacity(4096),
        }
    }

    /// waits for the next incoming connection on `listener`
    pub async fn accept(listener: &TcpListener) -> anyhow::Result<TcpTransport> {
        let (stream, from) = listener.accept().await?;
        info!("accepted TCP connection from {:?}", from);
        stream.set_nodelay(true)?;
        Ok(Self::from_stream(stream))
    }

    fn stream(&mut self) -> anyhow::Result<&mut TcpStream> {
        match &mut self.stream {
            Some(stream) => Ok(stream),
            None => bail!("TCP transport is not connected"),
        }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ByteTransport for TcpTransport {
    async fn connect(&mut self, address: &str, port: u16) -> anyhow::Result<()> {
        let stream = TcpStream::connect((address, port)).await?;
        stream.set_nodelay(true)?;
        info!("connected TCP stream to {:?}", stream.peer_addr()?);
        self.stream = Some(stream);
        self.pending.clear();
        Ok(())
    }

    async fn send(&mut self, buf: &[u8]) -> anyhow::Result<usize> {
        let len: u32 = buf.len().try_into()?;
        let stream = self.stream()?;
        stream.write_u32(len).await?;
        stream.write_all(buf).await?;
        trace!("TCP: sent frame of {} bytes", buf.len());
        Ok(buf.len())
    }

    async fn receive(&mut self, buf: &mut [u8]) -> anyhow::Result<usize> {
        loop {
            if self.pending.len() >= FRAME_HEADER_LEN {
                let len: usize = (&self.pending[..FRAME_HEADER_LEN]).get_u32().safe_cast();
                if len > buf.len() {
                    bail!("TCP frame of {} bytes exceeds the buffer of {} bytes", len, buf.len());
                }
                if self.pending.len() >= FRAME_HEADER_LEN + len {
                    self.pending.advance(FRAME_HEADER_LEN);
                    let frame = self.pending.split_to(len);
                    buf[..len].copy_from_slice(&frame);
                    trace!("TCP: received frame of {} bytes", len);
                    return Ok(len);
                }
            }

            let Some(stream) = &mut self.stream else {
                bail!("TCP transport is not connected");
            };
            // cancel safe: bytes are either appended to `pending` or left in the socket
            if stream.read_buf(&mut self.pending).await? == 0 {
                bail!("TCP stream was closed by the peer");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_frames_are_preserved() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut client = TcpTransport::new();
        let (connected, server) = tokio::join!(client.connect("127.0.0.1", port), TcpTransport::accept(&listener));
        connected.unwrap();
        let mut server = server.unwrap();

        client.send(b"abc").await.unwrap();
        client.send(b"").await.unwrap();
        client.send(b"defgh").await.unwrap();

        let mut buf = [0u8; 16];
        for expected in [b"abc".as_slice(), b"".as_slice(), b"defgh".as_slice()] {
            let n = server.receive(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], expected);
        }
    }

    #[tokio::test]
    async fn test_frame_too_big_for_buffer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut client = TcpTransport::new();
        let (connected, server) = tokio::join!(client.connect("127.0.0.1", port), TcpTransport::accept(&listener));
        connected.unwrap();
        let mut server = server.unwrap();

        client.send(&[1; 32]).await.unwrap();
        let mut buf = [0u8; 16];
        assert!(server.receive(&mut buf).await.is_err());
    }

    #[tokio::test]
    async fn test_cancelled_receive_keeps_partial_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let (raw, server) = tokio::join!(TcpStream::connect(("127.0.0.1", port)), TcpTransport::accept(&listener));
        let mut raw = raw.unwrap();
        let mut server = server.unwrap();

        raw.write_all(&[0, 0, 0, 5, b'a', b'b']).await.unwrap();
        let mut buf = [0u8; 16];
        assert!(tokio::time::timeout(Duration::from_millis(50), server.receive(&mut buf)).await.is_err());

        raw.write_all(b"cde").await.unwrap();
        let n = server.receive(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"abcde");
    }

    #[tokio::test]
    async fn test_peer_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let (raw, server) = tokio::join!(TcpStream::connect(("127.0.0.1", port)), TcpTransport::accept(&listener));
        drop(raw.unwrap());
        let mut server = server.unwrap();

        let mut buf = [0u8; 16];
        assert!(server.receive(&mut buf).await.is_err());
    }

    #[tokio::test]
    async fn test_not_connected() {
        let mut transport = TcpTransport::new();
        assert!(transport.send(b"x").await.is_err());
    }
}
