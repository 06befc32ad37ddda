use tracing::trace;
use crate::bits::bit_fiddler::{low_mask, set_bits};
use crate::bits::{padded_len, BitsError, Word};

/// Packs fields of arbitrary bit width into a pre-sized byte buffer of big-endian words `T`.
///
/// The buffer's capacity is fixed at construction; every write is checked against it, and
///  running out of room is a [BitsError::BufferOverflow]. Checks happen before any state is
///  modified, so a failed call leaves the packer as it was.
pub struct WordPacker<T: Word> {
    dest: Vec<u8>,
    /// offset of the next word to be flushed
    byte_pos: usize,
    /// the partially filled word, not yet written to `dest`
    scratch: T,
    bits_used: u32,
}

impl<T: Word> WordPacker<T> {
    pub fn with_capacity(capacity_bytes: usize) -> WordPacker<T> {
        WordPacker {
            dest: vec![0; capacity_bytes],
            byte_pos: 0,
            scratch: T::default(),
            bits_used: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.dest.len()
    }

    fn bits_left_in_word(&self) -> u32 {
        T::BITS - self.bits_used
    }

    fn ensure_capacity(&self, needed: usize) -> Result<(), BitsError> {
        if self.byte_pos + needed > self.dest.len() {
            return Err(BitsError::BufferOverflow {
                offset: self.byte_pos,
                needed,
                capacity: self.dest.len(),
            });
        }
        Ok(())
    }

    /// Appends the low-order `num_bits` bits of `value`. `value` must not have bits set beyond
    ///  that width.
    pub fn pack(&mut self, num_bits: u32, value: u64) -> Result<(), BitsError> {
        if num_bits > T::BITS {
            return Err(BitsError::FieldTooWide { num_bits, word_bits: T::BITS });
        }
        if value > low_mask(num_bits) {
            return Err(BitsError::ValueTooWide { value, num_bits });
        }
        if num_bits == 0 {
            return Ok(());
        }

        let bits_left = self.bits_left_in_word();
        if num_bits <= bits_left {
            self.ensure_capacity(T::BYTES)?;

            self.scratch = set_bits(self.scratch, bits_left - 1, num_bits, value);
            self.bits_used += num_bits;
            if self.bits_used == T::BITS {
                self.flush()?;
            }
        }
        else {
            // the field straddles the word boundary: high-order bits complete the current word,
            //  low-order bits start the next one
            self.ensure_capacity(2 * T::BYTES)?;

            let low_len = num_bits - bits_left;
            self.scratch = set_bits(self.scratch, bits_left - 1, bits_left, value >> low_len);
            self.bits_used = T::BITS;
            self.flush()?;

            self.scratch = set_bits(self.scratch, T::BITS - 1, low_len, value & low_mask(low_len));
            self.bits_used = low_len;
        }
        Ok(())
    }

    /// Writes the partially filled current word (unused bits are zero) and starts a new one.
    ///  This is a no-op on a word boundary.
    pub fn flush(&mut self) -> Result<(), BitsError> {
        if self.bits_used == 0 {
            return Ok(());
        }
        self.ensure_capacity(T::BYTES)?;

        self.scratch.write_be(&mut self.dest[self.byte_pos..self.byte_pos + T::BYTES]);
        self.byte_pos += T::BYTES;
        self.scratch = T::default();
        self.bits_used = 0;
        Ok(())
    }

    /// Terminates a bit-packed section. Must be called before the packed bytes are used, and
    ///  mirrored by [super::WordReader::finish] on the decoding side.
    pub fn finish(&mut self) -> Result<(), BitsError> {
        self.flush()
    }

    /// Copies opaque bytes, starting at the next word boundary and zero-padding to a whole
    ///  number of words.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Result<(), BitsError> {
        let padded = padded_len::<T>(bytes.len());
        let unflushed = if self.bits_used > 0 { T::BYTES } else { 0 };
        self.ensure_capacity(unflushed + padded)?;

        self.flush()?;

        let start = self.byte_pos;
        self.dest[start..start + bytes.len()].copy_from_slice(bytes);
        self.dest[start + bytes.len()..start + padded].fill(0);
        self.byte_pos += padded;

        trace!("pushed {} bytes ({} with padding) at offset {}", bytes.len(), padded, start);
        Ok(())
    }

    /// position in the packed stream, including padding and the unflushed current word
    pub fn total_bits_packed(&self) -> usize {
        self.byte_pos * 8 + self.bits_used as usize
    }

    /// number of bytes that are complete in the destination, i.e. what is to be sent after
    ///  [Self::finish]
    pub fn total_bytes_packed(&self) -> usize {
        self.byte_pos
    }

    /// Rewinds the cursors for reuse. The destination's contents are left as they are; they are
    ///  overwritten as new words are flushed.
    pub fn reset(&mut self) {
        self.byte_pos = 0;
        self.scratch = T::default();
        self.bits_used = 0;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.dest[..self.byte_pos]
    }

    pub fn into_bytes(mut self) -> Vec<u8> {
        self.dest.truncate(self.byte_pos);
        self.dest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_pack_within_word() {
        let mut packer = WordPacker::<u8>::with_capacity(4);
        packer.pack(3, 0b101).unwrap();
        packer.pack(2, 0b01).unwrap();
        assert_eq!(packer.total_bits_packed(), 5);
        assert_eq!(packer.total_bytes_packed(), 0);

        packer.finish().unwrap();
        assert_eq!(packer.as_bytes(), &[0b1010_1000]);
        assert_eq!(packer.total_bits_packed(), 8);
    }

    #[test]
    fn test_pack_straddling() {
        let mut packer = WordPacker::<u8>::with_capacity(4);
        packer.pack(3, 0b101).unwrap();
        packer.pack(7, 0b110_0110).unwrap();
        packer.finish().unwrap();

        assert_eq!(packer.as_bytes(), &[0b1011_1001, 0b1000_0000]);
    }

    #[test]
    fn test_exactly_full_word_is_flushed() {
        let mut packer = WordPacker::<u16>::with_capacity(4);
        packer.pack(16, 0xabcd).unwrap();
        assert_eq!(packer.total_bytes_packed(), 2);

        // finishing on a word boundary does not emit an empty word
        packer.finish().unwrap();
        assert_eq!(packer.as_bytes(), &[0xab, 0xcd]);
    }

    #[test]
    fn test_u32_header_layout() {
        let mut packer = WordPacker::<u32>::with_capacity(8);
        packer.pack(16, 0x0102).unwrap();
        packer.pack(16, 0x0304).unwrap();
        packer.pack(4, 0xf).unwrap();
        packer.finish().unwrap();

        assert_eq!(packer.into_bytes(), vec![1, 2, 3, 4, 0xf0, 0, 0, 0]);
    }

    #[rstest]
    #[case::too_wide_u8(8, 9)]
    #[case::too_wide_u16(16, 17)]
    fn test_field_too_wide(#[case] word_bits: u32, #[case] num_bits: u32) {
        let result = if word_bits == 8 {
            WordPacker::<u8>::with_capacity(8).pack(num_bits, 0)
        }
        else {
            WordPacker::<u16>::with_capacity(8).pack(num_bits, 0)
        };
        assert_eq!(result, Err(BitsError::FieldTooWide { num_bits, word_bits }));
    }

    #[test]
    fn test_value_too_wide() {
        let mut packer = WordPacker::<u32>::with_capacity(8);
        assert_eq!(packer.pack(3, 8), Err(BitsError::ValueTooWide { value: 8, num_bits: 3 }));
    }

    #[test]
    fn test_overflow_leaves_state_untouched() {
        let mut packer = WordPacker::<u8>::with_capacity(1);
        packer.pack(6, 0b11_1111).unwrap();

        // needs a second word that does not fit
        assert_eq!(packer.pack(4, 0b1010), Err(BitsError::BufferOverflow { offset: 0, needed: 2, capacity: 1 }));

        packer.pack(2, 0b01).unwrap();
        assert_eq!(packer.as_bytes(), &[0b1111_1101]);
        assert!(matches!(packer.pack(1, 1), Err(BitsError::BufferOverflow { .. })));
    }

    #[rstest]
    #[case::aligned(vec![], vec![1,2,3], vec![1,2,3,0])]
    #[case::exact_word(vec![], vec![1,2,3,4], vec![1,2,3,4])]
    #[case::empty(vec![], vec![], vec![])]
    #[case::mid_word(vec![(4, 0xa)], vec![9], vec![0xa0,0,0,0, 9,0,0,0])]
    fn test_push_bytes(#[case] fields: Vec<(u32, u64)>, #[case] bytes: Vec<u8>, #[case] expected: Vec<u8>) {
        let mut packer = WordPacker::<u32>::with_capacity(16);
        for (num_bits, value) in fields {
            packer.pack(num_bits, value).unwrap();
        }
        packer.push_bytes(&bytes).unwrap();
        packer.finish().unwrap();
        assert_eq!(packer.as_bytes(), expected.as_slice());
    }

    #[test]
    fn test_push_bytes_overflow() {
        let mut packer = WordPacker::<u32>::with_capacity(8);
        packer.pack(1, 1).unwrap();
        assert_eq!(packer.push_bytes(&[1, 2, 3, 4, 5]), Err(BitsError::BufferOverflow { offset: 0, needed: 12, capacity: 8 }));

        // the failed call changed nothing
        assert_eq!(packer.total_bits_packed(), 1);
        assert_eq!(packer.total_bytes_packed(), 0);
        packer.push_bytes(&[9]).unwrap();
        assert_eq!(packer.as_bytes(), &[0x80, 0, 0, 0, 9, 0, 0, 0]);
    }

    #[test]
    fn test_reset() {
        let mut packer = WordPacker::<u8>::with_capacity(2);
        packer.pack(8, 0xff).unwrap();
        packer.pack(4, 0xf).unwrap();
        packer.reset();
        assert_eq!(packer.total_bits_packed(), 0);

        packer.pack(8, 0x11).unwrap();
        packer.pack(8, 0x22).unwrap();
        assert_eq!(packer.as_bytes(), &[0x11, 0x22]);
    }
}
