use std::fmt::{Debug, Formatter};
use anyhow::bail;
use bytes::Bytes;
use crc::Crc;
use tracing::trace;
use crate::bits::bit_fiddler::bits_required;
use crate::bits::{padded_len, WordPacker, WordReader};
use crate::error::RudpError;
use crate::message_header::{MessageHeader, MessageType};
use crate::packet_datum::PacketDatum;
use crate::util::safe_converter::{PrecheckedCast, SafeCast};

/// The most entries a message can carry: the current datum plus everything the ack bitmask
///  reaches back.
pub const MAX_BACKLOG_LEN: usize = 32;

const BACKLOG_COUNT_BITS: u32 = bits_required(0, MAX_BACKLOG_LEN as u64);

static CRC: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Checksum(pub u32);
impl Debug for Checksum {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08x?}", self.0)
    }
}

/// The unit that goes onto the wire: a header followed by the backlog of not-yet-acknowledged
///  data, newest first.
///
/// ```ascii
/// header (4 words, see MessageHeader)
/// backlog count (6 bits)
/// per entry:
///   sequence (16) | payload length (16)
///   payload, zero-padded to whole words
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub header: MessageHeader,
    pub backlog: Vec<PacketDatum>,
}

impl Message {
    /// Computes the checksum over everything that is covered by it, i.e. the header without its
    ///  checksum field, and all backlog entries in wire order.
    pub fn checksum(&self) -> Checksum {
        let mut digest = CRC.digest();

        digest.update(&self.header.sequence.to_be_bytes());
        digest.update(&self.header.last_acked_sequence.to_be_bytes());
        digest.update(&self.header.last_acked_bits.to_be_bytes());
        digest.update(&[u8::from(self.header.message_type)]);
        digest.update(&self.header.protocol_id.to_be_bytes());
        for datum in &self.backlog {
            digest.update(&datum.sequence.to_be_bytes());
            digest.update(&(datum.payload.len() as u16).to_be_bytes());
            digest.update(&datum.payload);
        }

        Checksum(digest.finalize())
    }

    pub fn set_checksum(&mut self) {
        self.header.checksum = self.checksum().0;
    }

    pub fn has_valid_checksum(&self) -> bool {
        self.checksum().0 == self.header.checksum
    }

    pub fn verify_checksum(&self) -> Result<(), RudpError> {
        if self.has_valid_checksum() {
            Ok(())
        }
        else {
            Err(RudpError::ChecksumMismatch { sequence: self.header.sequence })
        }
    }

    /// The number of bytes a message with entries of the given payload lengths occupies on the
    ///  wire.
    pub fn encoded_len_for(payload_lens: impl IntoIterator<Item = usize>) -> usize {
        let mut bytes = MessageHeader::SERIALIZED_LEN;
        let mut pending_bits = BACKLOG_COUNT_BITS as usize;
        for len in payload_lens {
            pending_bits += 32;
            bytes += pending_bits.div_ceil(32) * 4 + padded_len::<u32>(len);
            pending_bits = 0;
        }
        bytes + pending_bits.div_ceil(32) * 4
    }

    pub fn encoded_len(&self) -> usize {
        Self::encoded_len_for(self.backlog.iter().map(|d| d.payload.len()))
    }

    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        if self.backlog.len() > MAX_BACKLOG_LEN {
            bail!("backlog of {} entries exceeds the maximum of {}", self.backlog.len(), MAX_BACKLOG_LEN);
        }

        let mut packer = WordPacker::<u32>::with_capacity(self.encoded_len());
        self.header.ser(&mut packer)?;

        packer.pack(BACKLOG_COUNT_BITS, self.backlog.len().prechecked_cast())?;
        for datum in &self.backlog {
            if datum.payload.len() > u16::MAX as usize {
                bail!("payload of {} bytes is too long for a single entry", datum.payload.len());
            }
            packer.pack(16, datum.sequence as u64)?;
            packer.pack(16, datum.payload.len().prechecked_cast())?;
            packer.push_bytes(&datum.payload)?;
        }
        packer.finish()?;

        trace!("encoded message #{} ({:?}) with {} entries into {} bytes", self.header.sequence, self.header.message_type, self.backlog.len(), packer.total_bytes_packed());
        Ok(packer.into_bytes())
    }

    /// Entries are reconstructed as acked, with the current time as their timestamp.
    pub fn decode(buf: &[u8]) -> anyhow::Result<Message> {
        let mut reader = WordReader::<u32>::new(buf);
        let header = MessageHeader::deser(&mut reader)?;

        let count = (reader.read_next(BACKLOG_COUNT_BITS)? as u16).safe_cast();
        if count > MAX_BACKLOG_LEN {
            bail!("message #{} claims {} backlog entries, maximum is {}", header.sequence, count, MAX_BACKLOG_LEN);
        }

        let mut backlog = Vec::with_capacity(count);
        for _ in 0..count {
            let sequence = reader.read_next(16)? as u16;
            let len = (reader.read_next(16)? as u16).safe_cast();
            let payload = Bytes::copy_from_slice(reader.fetch_bytes(len)?);
            backlog.push(PacketDatum::received(sequence, payload));
        }
        reader.finish();

        if reader.remaining_bytes() > 0 {
            trace!("ignoring {} trailing bytes after message #{}", reader.remaining_bytes(), header.sequence);
        }

        Ok(Message {
            header,
            backlog,
        })
    }

    /// a message outside the sequence space, carrying a single payload (used for the handshake)
    pub fn unsequenced(message_type: MessageType, protocol_id: u16, payload: Bytes) -> Message {
        Message {
            header: MessageHeader {
                sequence: 0,
                last_acked_sequence: 0,
                last_acked_bits: 0,
                message_type,
                protocol_id,
                checksum: 0,
            },
            backlog: vec![PacketDatum::received(0, payload)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use crate::bits::BitsError;

    fn message(message_type: MessageType, entries: Vec<(u16, &[u8])>) -> Message {
        Message {
            header: MessageHeader {
                sequence: entries.first().map(|e| e.0).unwrap_or(7),
                last_acked_sequence: 5,
                last_acked_bits: 0b1010,
                message_type,
                protocol_id: 0x4242,
                checksum: 0,
            },
            backlog: entries.into_iter()
                .map(|(seq, payload)| PacketDatum::received(seq, Bytes::copy_from_slice(payload)))
                .collect(),
        }
    }

    #[test]
    fn test_backlog_count_bits() {
        assert_eq!(BACKLOG_COUNT_BITS, 6);
    }

    #[rstest]
    #[case::empty(vec![], 20)]
    #[case::one_empty_payload(vec![(3, b"".as_slice())], 24)]
    #[case::one(vec![(3, b"abc".as_slice())], 28)]
    #[case::two(vec![(4, b"hello".as_slice()), (3, b"abc".as_slice())], 40)]
    fn test_encoded_len(#[case] entries: Vec<(u16, &[u8])>, #[case] expected: usize) {
        let msg = message(MessageType::General, entries);
        assert_eq!(msg.encoded_len(), expected);
        assert_eq!(msg.encode().unwrap().len(), expected);
    }

    #[test]
    fn test_encode_layout() {
        let msg = message(MessageType::General, vec![(3, b"abc")]);
        let buf = msg.encode().unwrap();

        assert_eq!(&buf[..4], &[0,3, 0,5]);
        // count 1 (6 bits), sequence 3 (16 bits), high 10 bits of length 3
        assert_eq!(&buf[16..20], &[0b0000_0100, 0, 0b0000_1100, 0]);
        // low 6 bits of the length
        assert_eq!(&buf[20..24], &[0b0000_1100, 0, 0, 0]);
        assert_eq!(&buf[24..28], b"abc\0");
    }

    #[rstest]
    #[case::general(MessageType::General, vec![(9, b"third".as_slice()), (8, b"".as_slice()), (7, b"first entry".as_slice())])]
    #[case::ack(MessageType::Ack, vec![(1, b"".as_slice())])]
    #[case::handshake(MessageType::RequestPubKey, vec![(0, [7u8; 32].as_slice())])]
    fn test_decode(#[case] message_type: MessageType, #[case] entries: Vec<(u16, &[u8])>) {
        let mut msg = message(message_type, entries);
        msg.set_checksum();

        let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded.header, msg.header);
        assert!(decoded.has_valid_checksum());
        assert_eq!(
            decoded.backlog.iter().map(|d| (d.sequence, d.payload.clone())).collect::<Vec<_>>(),
            msg.backlog.iter().map(|d| (d.sequence, d.payload.clone())).collect::<Vec<_>>(),
        );
    }

    #[test]
    fn test_decode_truncated() {
        let buf = message(MessageType::General, vec![(3, b"abcdefgh")]).encode().unwrap();
        let err = Message::decode(&buf[..buf.len() - 4]).unwrap_err();
        assert!(matches!(err.downcast_ref::<BitsError>(), Some(BitsError::SourceExhausted { .. })));
    }

    #[test]
    fn test_decode_excessive_count() {
        let mut buf = message(MessageType::General, vec![]).encode().unwrap();
        buf[16] = 0b1111_1100;
        assert!(Message::decode(&buf).is_err());
    }

    #[test]
    fn test_encode_rejects_oversized_backlog() {
        let entries = (0..=MAX_BACKLOG_LEN as u16).rev().map(|s| (s, b"".as_slice())).collect();
        assert!(message(MessageType::General, entries).encode().is_err());
    }

    #[rstest]
    #[case::sequence(|m: &mut Message| m.header.sequence += 1)]
    #[case::last_acked(|m: &mut Message| m.header.last_acked_sequence += 1)]
    #[case::bits(|m: &mut Message| m.header.last_acked_bits ^= 4)]
    #[case::message_type(|m: &mut Message| m.header.message_type = MessageType::Ack)]
    #[case::protocol_id(|m: &mut Message| m.header.protocol_id += 1)]
    #[case::entry_sequence(|m: &mut Message| m.backlog[0].sequence += 1)]
    #[case::payload(|m: &mut Message| m.backlog[0].payload = Bytes::from_static(b"abd"))]
    fn test_checksum_covers(#[case] tamper: fn(&mut Message)) {
        let mut msg = message(MessageType::General, vec![(3, b"abc")]);
        msg.set_checksum();
        assert!(msg.has_valid_checksum());

        tamper(&mut msg);
        assert!(!msg.has_valid_checksum());
    }

    #[test]
    fn test_verify_checksum() {
        let mut msg = message(MessageType::General, vec![(3, b"abc")]);
        assert_eq!(msg.verify_checksum(), Err(RudpError::ChecksumMismatch { sequence: 3 }));
        msg.set_checksum();
        assert_eq!(msg.verify_checksum(), Ok(()));
    }

    #[test]
    fn test_checksum_known_value() {
        // CRC-32/ISO-HDLC check value
        assert_eq!(CRC.checksum(b"123456789"), 0xcbf4_3926);
    }

    #[test]
    fn test_unsequenced() {
        let msg = Message::unsequenced(MessageType::SendPubKey, 3, Bytes::from_static(b"key"));
        assert_eq!(msg.header.sequence, 0);
        assert_eq!(msg.backlog.len(), 1);
        assert_eq!(msg.backlog[0].payload, Bytes::from_static(b"key"));
    }
}
