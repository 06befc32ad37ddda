use anyhow::anyhow;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use crate::bits::bit_fiddler::bits_required;
use crate::bits::{WordPacker, WordReader};

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum MessageType {
    /// application payload, sequenced and acknowledged
    General = 0,
    /// acknowledges received sequences; never bundled or acknowledged itself
    Ack = 1,
    /// handshake: the client's public key
    RequestPubKey = 2,
    /// handshake: the server's public key in reply
    SendPubKey = 3,
}

impl MessageType {
    /// The wire field covers `0..=4`, leaving room for one more kind without changing the
    ///  header layout.
    pub const NUM_BITS: u32 = bits_required(0, 4);

    pub fn is_handshake(self) -> bool {
        matches!(self, MessageType::RequestPubKey | MessageType::SendPubKey)
    }
}

/// The bit-packed header at the start of every message:
///
/// ```ascii
/// word 0: sequence (16) | last acked sequence (16)
/// word 1: bitmask of acked sequences before the last acked one (32)
/// word 2: message type (3) | protocol id (16) | checksum high bits (13)
/// word 3: checksum low bits (19) | padding (13)
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageHeader {
    pub sequence: u16,
    pub last_acked_sequence: u16,
    /// bit `i` set means that `last_acked_sequence - i` was received; bit 0 is unused
    pub last_acked_bits: u32,
    pub message_type: MessageType,
    pub protocol_id: u16,
    /// zero if checksums are disabled
    pub checksum: u32,
}

impl MessageHeader {
    pub const SERIALIZED_LEN: usize = 16;

    pub fn ser(&self, packer: &mut WordPacker<u32>) -> anyhow::Result<()> {
        packer.pack(16, self.sequence as u64)?;
        packer.pack(16, self.last_acked_sequence as u64)?;
        packer.pack(32, self.last_acked_bits as u64)?;
        packer.pack(MessageType::NUM_BITS, u8::from(self.message_type) as u64)?;
        packer.pack(16, self.protocol_id as u64)?;
        packer.pack(32, self.checksum as u64)?;
        packer.finish()?;
        Ok(())
    }

    pub fn deser(reader: &mut WordReader<u32>) -> anyhow::Result<MessageHeader> {
        let sequence = reader.read_next(16)? as u16;
        let last_acked_sequence = reader.read_next(16)? as u16;
        let last_acked_bits = reader.read_next(32)? as u32;
        let raw_message_type = reader.read_next(MessageType::NUM_BITS)? as u8;
        let message_type = MessageType::try_from(raw_message_type)
            .map_err(|_| anyhow!("invalid message type {}", raw_message_type))?;
        let protocol_id = reader.read_next(16)? as u16;
        let checksum = reader.read_next(32)? as u32;
        reader.finish();

        Ok(MessageHeader {
            sequence,
            last_acked_sequence,
            last_acked_bits,
            message_type,
            protocol_id,
            checksum,
        })
    }
}
