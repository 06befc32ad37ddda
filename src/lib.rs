//! A reliable-delivery protocol on top of an unreliable datagram transport, in the spirit of
//!  acknowledging what was received rather than resending on timeout.
//!
//! ## Design goals
//!
//! * Peers send *messages* (defined-length chunks of data), not streams of bytes
//! * Every message has a 16 bit sequence number that wraps around
//! * There are no retransmission timers. Instead, every message carries everything its sender
//!   has sent but not seen acknowledged yet (as far back as the send buffer reaches), so a
//!   lost packet is recovered as soon as the next one arrives. Acknowledging a message also
//!   acknowledges everything it carried
//!   * NB: This trades bandwidth for latency, and works best for small, frequent messages
//! * Every received message is acknowledged, piggybacking the acknowledgement of the 31
//!   preceding sequences as a bit mask
//! * Payloads are delivered to the application once, when they are first seen. There is no
//!   ordering guarantee beyond that: whatever a packet carries is delivered oldest first
//! * There should be a reliable checksum per message (CRC-32), and (optional, but enabled by
//!   default) strong encryption at the packet level
//! * The byte transport is pluggable: UDP, Unix datagram sockets, or TCP with length-prefixed
//!   frames (see [transport])
//!
//! ## Encryption
//!
//! Packets are AES-GCM-256 encrypted with per-direction session keys that are established by a
//!  handshake. The resulting packet structure is as follows:
//!
//! ```ascii
//!  0: envelope kind (u8): 0 plaintext (handshake, or encryption disabled), 1 sealed
//!  1: nonce (12 bytes)
//! 13: encrypted message (including the 16 byte AES-GCM tag)
//! ```
//!
//! This outer wrapper adds a total of 1 + 12 + 16 = 29 bytes to the encoded message length.
//!
//! ## Message
//!
//! Messages are bit packed into big-endian 32 bit words, see [bits]:
//!
//! ```ascii
//!  0: sequence (u16)
//!  2: last acked sequence (u16)
//!  4: acked bits (u32) - bit n set means 'last acked sequence - n' was received, n = 1..=31
//!  8: message type (3 bits): 0 general, 1 ack, 2 request public key, 3 send public key
//!     protocol id (16 bits)
//!     high 13 bits of the checksum
//! 12: low 19 bits of the checksum, padding
//! 16: number of backlog entries (6 bits)
//!     per entry: sequence (16 bits), payload length (16 bits), payload zero-padded to words
//! ```
//!
//! ## Handshake
//!
//! With encryption enabled, the client sends its public key in a plaintext 'request public key'
//!  message and retries until the server replies with its own public key in a 'send public key'
//!  message. Both sides derive their session keys from the two public keys, see [security].

pub mod bits;
pub mod config;
pub mod envelope;
pub mod error;
pub mod events;
pub mod message;
pub mod message_header;
pub mod packet_datum;
pub mod protocol_manager;
pub mod reliable_delivery;
pub mod security;
pub mod sequence_buffer;
pub mod transport;
pub mod util;
pub mod test_util;
