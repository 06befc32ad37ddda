//! Thin adapters that move opaque byte buffers to and from the peer. They know nothing about
//!  messages, sequencing or encryption.

use async_trait::async_trait;
#[cfg(test)] use mockall::automock;

pub mod tcp;
pub mod udp;
#[cfg(unix)]
pub mod unix;

/// One packet goes in, one packet comes out: implementations preserve the boundaries of what is
///  passed to [ByteTransport::send].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ByteTransport: Send + 'static {
    async fn connect(&mut self, address: &str, port: u16) -> anyhow::Result<()>;

    /// returns the number of bytes sent
    async fn send(&mut self, buf: &[u8]) -> anyhow::Result<usize>;

    /// Waits for the next packet and copies it into `buf`, returning its length.
    async fn receive(&mut self, buf: &mut [u8]) -> anyhow::Result<usize>;
}
