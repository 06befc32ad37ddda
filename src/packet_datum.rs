use bytes::Bytes;
use tokio::time::Instant;

/// One unit of reliably sent data: the payload handed to a single send call, and the
///  bookkeeping needed to bundle it until the peer acknowledges it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketDatum {
    pub acked: bool,
    pub sequence: u16,
    pub send_time: Instant,
    pub payload: Bytes,
}

impl PacketDatum {
    /// a fresh, unacknowledged datum; its sequence is assigned when it is sent
    pub fn new(payload: impl Into<Bytes>) -> PacketDatum {
        PacketDatum {
            acked: false,
            sequence: 0,
            send_time: Instant::now(),
            payload: payload.into(),
        }
    }

    /// a datum as reconstructed from the wire
    pub fn received(sequence: u16, payload: Bytes) -> PacketDatum {
        PacketDatum {
            acked: true,
            sequence,
            send_time: Instant::now(),
            payload,
        }
    }
}
