use std::fmt::Debug;

/// The fixed-width unsigned integer that [super::WordPacker] and [super::WordReader] use as
///  their unit of flushing and loading.
///
/// All bit arithmetic is done in `u64` and truncated back, so words wider than 64 bits are not
///  supported.
pub trait Word: Copy + Default + Eq + Debug + Send + Sync + 'static {
    const BITS: u32;
    const BYTES: usize = (Self::BITS / 8) as usize;

    fn to_u64(self) -> u64;

    /// truncates to the word's width
    fn from_u64(value: u64) -> Self;

    /// `dest` must be exactly [Self::BYTES] long
    fn write_be(self, dest: &mut [u8]);

    /// `src` must be exactly [Self::BYTES] long
    fn read_be(src: &[u8]) -> Self;
}

macro_rules! impl_word {
    ($ty:ty) => {
        impl Word for $ty {
            const BITS: u32 = <$ty>::BITS;

            fn to_u64(self) -> u64 {
                self as u64
            }

            fn from_u64(value: u64) -> Self {
                value as $ty
            }

            fn write_be(self, dest: &mut [u8]) {
                dest.copy_from_slice(&self.to_be_bytes());
            }

            fn read_be(src: &[u8]) -> Self {
                let mut raw = [0u8; <$ty>::BITS as usize / 8];
                raw.copy_from_slice(src);
                <$ty>::from_be_bytes(raw)
            }
        }
    }
}

impl_word!(u8);
impl_word!(u16);
impl_word!(u32);
impl_word!(u64);
