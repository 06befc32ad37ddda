//! Stateless bit primitives. Bit 0 is the least significant bit; intervals are addressed by
//!  their highest bit and their length.

use crate::bits::Word;

/// a mask with the lowest `num_bits` bits set
pub const fn low_mask(num_bits: u32) -> u64 {
    if num_bits >= u64::BITS {
        u64::MAX
    }
    else {
        (1u64 << num_bits) - 1
    }
}

/// The number of bits needed to represent every value in `min..=max`, i.e.
///  `ceil(log2(max - min + 1))`. This is how field widths are sized, e.g. an enum with values
///  `0..=4` needs 3 bits.
pub const fn bits_required(min: u64, max: u64) -> u32 {
    assert!(min <= max);
    let span = max - min;
    if span == 0 {
        0
    }
    else {
        u64::BITS - span.leading_zeros()
    }
}

/// Returns the `num_bits` wide value whose highest bit is `start_high_bit`.
pub fn get_bits_value<T: Word>(number: T, start_high_bit: u32, num_bits: u32) -> T {
    let raw = number.to_u64();
    let shifted = if start_high_bit > 0 && start_high_bit >= num_bits {
        raw >> (start_high_bit + 1 - num_bits)
    }
    else {
        raw
    };
    T::from_u64(shifted & low_mask(num_bits))
}

/// Overwrites the `bit_length` bits whose highest bit is `start_high_bit` with the low-order
///  bits of `new_value`, leaving all other bits untouched.
pub fn set_bits<T: Word>(number: T, start_high_bit: u32, bit_length: u32, new_value: u64) -> T {
    if bit_length == 0 {
        return number;
    }
    debug_assert!(start_high_bit < T::BITS);
    debug_assert!(bit_length <= start_high_bit + 1);

    let low_bit = start_high_bit + 1 - bit_length;
    let mask = low_mask(bit_length) << low_bit;
    T::from_u64((number.to_u64() & !mask) | ((new_value << low_bit) & mask))
}

pub fn set_bit<T: Word>(number: T, bit: u32) -> T {
    debug_assert!(bit < T::BITS);
    T::from_u64(number.to_u64() | (1 << bit))
}

pub fn clear_bit<T: Word>(number: T, bit: u32) -> T {
    debug_assert!(bit < T::BITS);
    T::from_u64(number.to_u64() & !(1 << bit))
}

pub fn toggle_bit<T: Word>(number: T, bit: u32) -> T {
    debug_assert!(bit < T::BITS);
    T::from_u64(number.to_u64() ^ (1 << bit))
}

pub fn bit_check<T: Word>(number: T, bit: u32) -> bool {
    bit < T::BITS && number.to_u64() & (1 << bit) != 0
}

/// MSB-first rendering with exactly `T::BITS` digits
pub fn to_binary_string<T: Word>(number: T) -> String {
    format!("{:0width$b}", number.to_u64(), width = T::BITS as usize)
}
