use crate::bits::bit_fiddler::get_bits_value;
use crate::bits::{padded_len, BitsError, Word};

/// Reads back what a [super::WordPacker] with the same word type wrote, call for call.
///
/// Words are loaded lazily from the source slice; reading past its end is a
///  [BitsError::SourceExhausted] and leaves the reader's position unchanged.
pub struct WordReader<'a, T: Word> {
    src: &'a [u8],
    /// offset of the next word to be loaded
    byte_pos: usize,
    current: T,
    /// unread bits in `current`, zero if the next read needs a fresh word
    bits_left: u32,
}

impl<'a, T: Word> WordReader<'a, T> {
    pub fn new(src: &'a [u8]) -> WordReader<'a, T> {
        WordReader {
            src,
            byte_pos: 0,
            current: T::default(),
            bits_left: 0,
        }
    }

    fn ensure_available(&self, needed: usize) -> Result<(), BitsError> {
        if self.byte_pos + needed > self.src.len() {
            return Err(BitsError::SourceExhausted {
                offset: self.byte_pos,
                needed,
                len: self.src.len(),
            });
        }
        Ok(())
    }

    fn load_next_word(&mut self) -> Result<(), BitsError> {
        self.ensure_available(T::BYTES)?;
        self.current = T::read_be(&self.src[self.byte_pos..self.byte_pos + T::BYTES]);
        self.byte_pos += T::BYTES;
        self.bits_left = T::BITS;
        Ok(())
    }

    /// Returns the next `num_bits` bits in the order they were packed.
    pub fn read_next(&mut self, num_bits: u32) -> Result<u64, BitsError> {
        if num_bits >= 2 * T::BITS || num_bits > u64::BITS {
            return Err(BitsError::FieldTooWide { num_bits, word_bits: T::BITS });
        }
        if num_bits == 0 {
            return Ok(0);
        }

        if self.bits_left == 0 {
            self.load_next_word()?;
        }

        if num_bits <= self.bits_left {
            let value = get_bits_value(self.current, self.bits_left - 1, num_bits).to_u64();
            self.bits_left -= num_bits;
            return Ok(value);
        }

        // The value continues past the end of the current word: its high-order part is the tail
        //  of the current word, the remainder comes from the head of the following word(s).
        let tail_len = self.bits_left;
        let mut remaining = num_bits - tail_len;
        self.ensure_available(remaining.div_ceil(T::BITS) as usize * T::BYTES)?;

        let mut value = get_bits_value(self.current, tail_len - 1, tail_len).to_u64();
        while remaining > 0 {
            self.load_next_word()?;
            let head_len = remaining.min(T::BITS);
            value = (value << head_len) | get_bits_value(self.current, T::BITS - 1, head_len).to_u64();
            self.bits_left -= head_len;
            remaining -= head_len;
        }
        Ok(value)
    }

    /// Reads the `num_bits` bits ending at `start_high_bit` of the word under the cursor without
    ///  moving the cursor. If the current word is used up, this is the next word in the source.
    pub fn read_interval(&self, start_high_bit: u32, num_bits: u32) -> Result<u64, BitsError> {
        if start_high_bit >= T::BITS || num_bits == 0 || num_bits > start_high_bit + 1 {
            return Err(BitsError::InvalidInterval { start_high_bit, num_bits, word_bits: T::BITS });
        }

        let word = if self.bits_left > 0 {
            self.current
        }
        else {
            self.ensure_available(T::BYTES)?;
            T::read_be(&self.src[self.byte_pos..self.byte_pos + T::BYTES])
        };
        Ok(get_bits_value(word, start_high_bit, num_bits).to_u64())
    }

    /// Skips the unread rest of the current word, mirroring [super::WordPacker::finish].
    pub fn finish(&mut self) {
        self.bits_left = 0;
    }

    /// Returns `len` opaque bytes written by [super::WordPacker::push_bytes], skipping the
    ///  padding to the next word boundary.
    pub fn fetch_bytes(&mut self, len: usize) -> Result<&'a [u8], BitsError> {
        self.finish();

        let padded = padded_len::<T>(len);
        self.ensure_available(padded)?;

        let start = self.byte_pos;
        self.byte_pos += padded;
        Ok(&self.src[start..start + len])
    }

    pub fn total_bits_read(&self) -> usize {
        self.byte_pos * 8 - self.bits_left as usize
    }

    /// number of source bytes that were not loaded yet
    pub fn remaining_bytes(&self) -> usize {
        self.src.len() - self.byte_pos
    }
}
