/// Protocol-level failures. They are returned inside `anyhow::Error`, so callers that need to
///  react to a specific one use `downcast_ref`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RudpError {
    #[error("checksum mismatch in message #{sequence}")]
    ChecksumMismatch { sequence: u16 },
    #[error("could not decrypt packet")]
    DecryptFailure,
    #[error("sequence {sequence} is no longer buffered")]
    StaleSequence { sequence: u16 },
    #[error("handshake failed: {reason}")]
    HandshakeFailure { reason: String },
    #[error("payload of {len} bytes exceeds the maximum of {max}")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("connection is not ready for {operation}")]
    NotReady { operation: &'static str },
}
