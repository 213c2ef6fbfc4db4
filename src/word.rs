//! 16-bit word utilities.
//!
//! All machine arithmetic is done on `u16` with wrapping semantics; these
//! helpers cover the two conversions the machine needs beyond that.

/// A machine word.
pub type Word = u16;

/// Sign-extend the low `bit_count` bits of `value` to a full word.
///
/// If bit `bit_count - 1` is set, every bit above it is set as well, so
/// the result is the same two's-complement number at 16-bit width.
#[inline]
pub fn sign_extend(value: Word, bit_count: u32) -> Word {
    debug_assert!((1..=16).contains(&bit_count), "bit count {} out of range", bit_count);
    if bit_count >= Word::BITS {
        return value;
    }

    let value = value & ((1 << bit_count) - 1);
    if (value >> (bit_count - 1)) & 1 == 1 {
        value | (0xFFFF << bit_count)
    } else {
        value
    }
}

/// Reverse the two bytes of a word.
#[inline]
pub const fn byte_swap(value: Word) -> Word {
    value.rotate_left(8)
}

/// Decode one big-endian word as stored in an image file.
#[inline]
pub fn from_wire(bytes: [u8; 2]) -> Word {
    byte_swap(Word::from_le_bytes(bytes))
}

/// Encode a word in image-file byte order.
#[inline]
pub fn to_wire(value: Word) -> [u8; 2] {
    byte_swap(value).to_le_bytes()
}
