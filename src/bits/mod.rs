//! Word-oriented bit packing: fields of arbitrary width are laid into fixed-width words that are
//!  serialized in network byte order (BE).
//!
//! Within a word, fields are written starting at the most significant bit. A field that does not
//!  fit into the rest of the current word is split: its high-order bits fill the current word,
//!  its low-order bits start the next one. Opaque byte runs ([WordPacker::push_bytes]) always
//!  start and end on a word boundary, so both sides resynchronize at identical offsets.
//!
//! ```ascii
//! pack(3, 0b101); pack(7, 0b1100110); finish()      with u8 words
//!
//!   word 0: 101 11001        word 1: 10 000000
//!           ^^^ ^^^^^                ^^ ^^^^^^
//!            |  high 5 bits of 2nd    |  padding
//!            1st field                low 2 bits of 2nd
//! ```

pub mod bit_fiddler;
pub mod word;
pub mod word_packer;
pub mod word_reader;

pub use word::Word;
pub use word_packer::WordPacker;
pub use word_reader::WordReader;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BitsError {
    #[error("a field of {num_bits} bits is too wide for {word_bits}-bit words")]
    FieldTooWide { num_bits: u32, word_bits: u32 },
    #[error("value {value:#x} does not fit into {num_bits} bits")]
    ValueTooWide { value: u64, num_bits: u32 },
    #[error("buffer overflow: {needed} bytes needed at offset {offset}, capacity is {capacity}")]
    BufferOverflow { offset: usize, needed: usize, capacity: usize },
    #[error("source exhausted: {needed} bytes needed at offset {offset}, source length is {len}")]
    SourceExhausted { offset: usize, needed: usize, len: usize },
    #[error("invalid interval of {num_bits} bits ending at bit {start_high_bit} of a {word_bits}-bit word")]
    InvalidInterval { start_high_bit: u32, num_bits: u32, word_bits: u32 },
}

/// number of bytes that `len` bytes occupy when padded to whole words
pub(crate) fn padded_len<T: Word>(len: usize) -> usize {
    len.div_ceil(T::BYTES) * T::BYTES
}
