use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use anyhow::bail;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;
use crate::transport::ByteTransport;

/// What can happen to a packet on its way to the peer
enum Fate {
    Deliver,
    Drop,
    Corrupt(Box<dyn FnOnce(&mut Vec<u8>) + Send>),
}

/// Controls one direction of a [MemoryTransport] pair and records what was sent through it.
#[derive(Default)]
pub struct MemoryLink {
    fates: Mutex<VecDeque<Fate>>,
    sent: Mutex<Vec<Vec<u8>>>,
    connected_to: Mutex<Option<(String, u16)>>,
}

impl MemoryLink {
    fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// the next `n` packets are lost
    pub fn drop_next(&self, n: usize) {
        let mut fates = Self::lock(&self.fates);
        for _ in 0..n {
            fates.push_back(Fate::Drop);
        }
    }

    /// lets the next packet through, then applies the rest of the plan
    pub fn deliver_next(&self) {
        Self::lock(&self.fates).push_back(Fate::Deliver);
    }

    /// the next packet is modified by `f` before it is delivered
    pub fn corrupt_next(&self, f: impl FnOnce(&mut Vec<u8>) + Send + 'static) {
        Self::lock(&self.fates).push_back(Fate::Corrupt(Box::new(f)));
    }

    /// everything passed to `send`, including packets that were dropped
    pub fn sent_packets(&self) -> Vec<Vec<u8>> {
        Self::lock(&self.sent).clone()
    }

    pub fn num_sent(&self) -> usize {
        Self::lock(&self.sent).len()
    }

    pub fn connected_to(&self) -> Option<(String, u16)> {
        Self::lock(&self.connected_to).clone()
    }
}

/// One end of an in-memory packet pipe. Packets are delivered in order unless the sending side's
///  [MemoryLink] says otherwise.
pub struct MemoryTransport {
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    incoming: mpsc::UnboundedReceiver<Vec<u8>>,
    link: Arc<MemoryLink>,
}

impl MemoryTransport {
    pub fn pair() -> (MemoryTransport, MemoryTransport) {
        let (a_to_b, b_from_a) = mpsc::unbounded_channel();
        let (b_to_a, a_from_b) = mpsc::unbounded_channel();

        let a = MemoryTransport {
            outgoing: a_to_b,
            incoming: a_from_b,
            link: Default::default(),
        };
        let b = MemoryTransport {
            outgoing: b_to_a,
            incoming: b_from_a,
            link: Default::default(),
        };
        (a, b)
    }

    /// controls packets sent *from* this end
    pub fn link(&self) -> Arc<MemoryLink> {
        self.link.clone()
    }
}

#[async_trait]
impl ByteTransport for MemoryTransport {
    async fn connect(&mut self, address: &str, port: u16) -> anyhow::Result<()> {
        *MemoryLink::lock(&self.link.connected_to) = Some((address.to_string(), port));
        Ok(())
    }

    async fn send(&mut self, buf: &[u8]) -> anyhow::Result<usize> {
        MemoryLink::lock(&self.link.sent).push(buf.to_vec());

        let fate = MemoryLink::lock(&self.link.fates).pop_front()
            .unwrap_or(Fate::Deliver);
        let mut packet = buf.to_vec();
        match fate {
            Fate::Deliver => {}
            Fate::Drop => {
                trace!("memory transport: dropping packet of {} bytes", buf.len());
                return Ok(buf.len());
            }
            Fate::Corrupt(f) => f(&mut packet),
        }

        if self.outgoing.send(packet).is_err() {
            bail!("peer transport was dropped");
        }
        Ok(buf.len())
    }

    async fn receive(&mut self, buf: &mut [u8]) -> anyhow::Result<usize> {
        let Some(packet) = self.incoming.recv().await else {
            bail!("peer transport was dropped");
        };
        if packet.len() > buf.len() {
            bail!("packet of {} bytes exceeds the buffer of {} bytes", packet.len(), buf.len());
        }
        buf[..packet.len()].copy_from_slice(&packet);
        Ok(packet.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair() {
        let (mut a, mut b) = MemoryTransport::pair();
        a.connect("bob", 7).await.unwrap();
        assert_eq!(a.link().connected_to(), Some(("bob".to_string(), 7)));

        a.send(b"hi").await.unwrap();
        b.send(b"hello").await.unwrap();

        let mut buf = [0u8; 8];
        let n = b.receive(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hi");
        let n = a.receive(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[tokio::test]
    async fn test_loss_plan() {
        let (mut a, mut b) = MemoryTransport::pair();
        a.link().drop_next(1);
        a.link().deliver_next();
        a.link().corrupt_next(|p| p[0] = b'X');

        for packet in [b"one", b"two", b"six", b"ten"] {
            a.send(packet).await.unwrap();
        }
        assert_eq!(a.link().num_sent(), 4);

        let mut buf = [0u8; 8];
        let mut received = vec![];
        for _ in 0..3 {
            let n = b.receive(&mut buf).await.unwrap();
            received.push(buf[..n].to_vec());
        }
        assert_eq!(received, vec![b"two".to_vec(), b"Xix".to_vec(), b"ten".to_vec()]);
    }
}
