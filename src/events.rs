#[cfg(test)] use mockall::automock;
use std::time::Duration;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// an entry was delivered to the application for the first time
    PacketReceived { sequence: u16, payload_len: usize },
    AckSent { sequence: u16, last_acked_sequence: u16 },
    AckReceived { last_acked_sequence: u16 },
    /// a message went out bundling entries that were sent before and are still unacknowledged
    PacketLossDetected { sequence: u16, resent: Vec<u16> },
    RttCalculated { sample: Duration, average: Duration },
    ChecksumFailed { sequence: u16 },
    DecryptFailed,
    /// a packet that was neither a valid envelope nor a decodable plaintext message
    UnparsablePacket { len: usize },
}

/// Receives notifications about protocol activity. Notification is fire-and-forget: it must not
///  block, and it cannot influence protocol processing.
#[cfg_attr(test, automock)]
pub trait EventSink: Send + Sync + 'static {
    fn on_event(&self, event: ProtocolEvent);
}

/// logs every event at debug level
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn on_event(&self, event: ProtocolEvent) {
        match event {
            ProtocolEvent::PacketReceived { sequence, payload_len } => debug!("received #{} ({} bytes)", sequence, payload_len),
            ProtocolEvent::AckSent { sequence, last_acked_sequence } => debug!("sent ack #{} for #{}", sequence, last_acked_sequence),
            ProtocolEvent::AckReceived { last_acked_sequence } => debug!("received ack for #{}", last_acked_sequence),
            ProtocolEvent::PacketLossDetected { sequence, resent } => debug!("#{} re-sends unacknowledged {:?}", sequence, resent),
            ProtocolEvent::RttCalculated { sample, average } => debug!("rtt sample {:?}, average {:?}", sample, average),
            ProtocolEvent::ChecksumFailed { sequence } => debug!("checksum failure in #{} - dropped", sequence),
            ProtocolEvent::DecryptFailed => debug!("packet could not be decrypted - dropped"),
            ProtocolEvent::UnparsablePacket { len } => debug!("unparsable packet of {} bytes - dropped", len),
        }
    }
}
