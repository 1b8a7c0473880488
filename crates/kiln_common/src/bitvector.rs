//! Fixed-width, arbitrary-precision two-state bit vectors.
//!
//! [`BitVector`] is the value type carried by every node of the dataflow graph.
//! Storage and arithmetic are delegated to [`awint::ExtAwi`]. awint has no
//! zero-width integers, so a zero-width vector keeps a single cleared bit of
//! backing storage that no operation ever sets.

use std::cmp::Ordering;
use std::fmt;
use std::num::NonZeroUsize;
use std::ops::{BitAnd, BitOr, BitXor, Not};
use std::str::FromStr;

use awint::{Bits, ExtAwi};
use serde::{Deserialize, Serialize};

/// Number of bits per word in [`BitVector::words`] and the serialized form.
const WORD_BITS: u32 = 64;

/// A fixed-width vector of two-state bits.
///
/// Arithmetic is two's complement and wraps at the declared width. Binary
/// operations require both operands to have the same width and panic
/// otherwise; width checking for user-facing operations happens when graph
/// nodes are created, so a mismatch here is a bug in the caller.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "WordForm", from = "WordForm")]
pub struct BitVector {
    width: u32,
    bits: ExtAwi,
}

/// Serialized layout: the width and little-endian `u64` words.
#[derive(Serialize, Deserialize)]
struct WordForm {
    width: u32,
    words: Vec<u64>,
}

impl From<BitVector> for WordForm {
    fn from(v: BitVector) -> Self {
        WordForm {
            width: v.width,
            words: v.words(),
        }
    }
}

impl From<WordForm> for BitVector {
    fn from(form: WordForm) -> Self {
        BitVector::from_words(&form.words, form.width)
    }
}

/// Errors produced when parsing a bit-vector literal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseBitVectorError {
    /// The literal is empty or has no digits.
    #[error("empty bit-vector literal")]
    Empty,

    /// The trailing base character is not one of `b`, `o`, `d`, `h`.
    #[error("literal '{0}' is missing a base suffix (b, o, d or h)")]
    MissingBase(String),

    /// A digit is not valid for the selected base.
    #[error("invalid digit '{digit}' for base {base}")]
    InvalidDigit {
        /// The offending character.
        digit: char,
        /// The numeric base being parsed.
        base: u32,
    },

    /// The `e<N>` width suffix is not a decimal number.
    #[error("invalid width suffix '{0}'")]
    InvalidWidth(String),

    /// The value needs more bits than the explicit width allows.
    #[error("value needs {needed} bits but the literal width is {width}")]
    OutOfRange {
        /// Number of significant bits in the parsed value.
        needed: u32,
        /// The explicit width requested by the literal.
        width: u32,
    },

    /// The digits were rejected by the integer parser.
    #[error("malformed literal '{0}'")]
    Malformed(String),
}

impl BitVector {
    /// Creates a zero-valued vector of the given width.
    pub fn new(width: u32) -> Self {
        Self {
            width,
            bits: ExtAwi::zero(storage_width(width)),
        }
    }

    /// Creates a vector of the given width with every bit set.
    pub fn ones(width: u32) -> Self {
        Self::wrap(width, ExtAwi::umax(storage_width(width)))
    }

    /// Creates a single-bit vector from a boolean.
    pub fn from_bool(value: bool) -> Self {
        Self::wrap(1, ExtAwi::from_bool(value))
    }

    /// Creates a vector from a `u64`, truncating bits beyond `width`.
    pub fn from_u64(value: u64, width: u32) -> Self {
        let mut bits = ExtAwi::zero(storage_width(width));
        bits.u64_(value);
        Self::wrap(width, bits)
    }

    /// Creates a vector from a `u64`, or `None` if the value does not fit.
    pub fn try_from_u64(value: u64, width: u32) -> Option<Self> {
        (WORD_BITS - value.leading_zeros() <= width).then(|| Self::from_u64(value, width))
    }

    /// Creates a vector from a `u128`, truncating bits beyond `width`.
    pub fn from_u128(value: u128, width: u32) -> Self {
        let mut bits = ExtAwi::zero(storage_width(width));
        bits.u128_(value);
        Self::wrap(width, bits)
    }

    /// Creates a vector from little-endian words, truncating or zero-filling to `width`.
    pub fn from_words(words: &[u64], width: u32) -> Self {
        let mut out = Self::new(width);
        for (i, word) in words.iter().enumerate() {
            let offset = i as u32 * WORD_BITS;
            if offset >= width {
                break;
            }
            let len = (width - offset).min(WORD_BITS);
            out.write(offset, &Self::from_u64(*word, WORD_BITS), 0, len);
        }
        out
    }

    /// Creates a vector from little-endian bytes, truncating or zero-filling to `width`.
    pub fn from_le_bytes(bytes: &[u8], width: u32) -> Self {
        let mut bits = ExtAwi::zero(storage_width(width));
        bits.u8_slice_(bytes);
        Self::wrap(width, bits)
    }

    /// Parses a literal such as `"1010b"`, `"ff_h"`, `"5e8d"` or `"1'0000'0000b"`.
    ///
    /// The trailing character selects the base (`b`, `o`, `d`, `h`). Digit
    /// separators `'` and `_` are ignored. For bases `b`, `o` and `d`, an
    /// `e<N>` suffix before the base character sets an explicit width.
    /// Without it, binary/octal/hex literals are `digits * log2(base)` bits
    /// wide and decimal literals use the minimal width (at least one bit).
    pub fn parse(text: &str) -> Result<Self, ParseBitVectorError> {
        let cleaned: String = text.chars().filter(|c| *c != '\'' && *c != '_').collect();
        let base_char = cleaned.chars().last().ok_or(ParseBitVectorError::Empty)?;
        let base: u8 = match base_char.to_ascii_lowercase() {
            'b' => 2,
            'o' => 8,
            'd' => 10,
            'h' => 16,
            _ => return Err(ParseBitVectorError::MissingBase(text.to_string())),
        };
        let body = &cleaned[..cleaned.len() - 1];

        let (digits, explicit_width) = match body.find(['e', 'E']) {
            Some(pos) if base != 16 => {
                let suffix = &body[pos + 1..];
                let width = suffix
                    .parse::<u32>()
                    .map_err(|_| ParseBitVectorError::InvalidWidth(suffix.to_string()))?;
                (&body[..pos], Some(width))
            }
            _ => (body, None),
        };
        if digits.is_empty() {
            return Err(ParseBitVectorError::Empty);
        }
        if let Some(digit) = digits.chars().find(|c| !c.is_digit(u32::from(base))) {
            return Err(ParseBitVectorError::InvalidDigit {
                digit,
                base: u32::from(base),
            });
        }

        // Every decimal digit fits in four bits, so `4 * digits` bounds the
        // decimal value; power-of-two bases are exact.
        let digit_bits = match base {
            10 => 4,
            _ => base.trailing_zeros(),
        };
        let natural = digits.len() as u32 * digit_bits;
        let bits = ExtAwi::from_str_radix(None, digits, base, storage_width(natural))
            .map_err(|_| ParseBitVectorError::Malformed(text.to_string()))?;
        let value = Self::wrap(natural, bits);

        match explicit_width {
            Some(width) => {
                let needed = value.significant_bits();
                if needed > width {
                    return Err(ParseBitVectorError::OutOfRange { needed, width });
                }
                Ok(value.resize(width))
            }
            None if base == 10 => Ok(value.resize(value.significant_bits().max(1))),
            None => Ok(value),
        }
    }

    /// Returns the declared width in bits.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Returns the value as little-endian `u64` words, `width.div_ceil(64)` long.
    pub fn words(&self) -> Vec<u64> {
        (0..self.width.div_ceil(WORD_BITS))
            .map(|i| {
                let offset = i * WORD_BITS;
                let len = (self.width - offset).min(WORD_BITS);
                self.read(offset, len).bits.to_u64()
            })
            .collect()
    }

    /// Returns true if every bit is zero.
    pub fn is_zero(&self) -> bool {
        self.bits.is_zero()
    }

    /// Returns true if any bit is set.
    pub fn to_bool(&self) -> bool {
        !self.is_zero()
    }

    /// Returns the value as a `u64` if it fits.
    pub fn to_u64(&self) -> Option<u64> {
        (self.significant_bits() <= 64).then(|| self.bits.to_u64())
    }

    /// Returns the value as a `u128` if it fits.
    pub fn to_u128(&self) -> Option<u128> {
        (self.significant_bits() <= 128).then(|| self.bits.to_u128())
    }

    /// Returns the number of bits up to and including the highest set bit.
    pub fn significant_bits(&self) -> u32 {
        (self.bits.bw() - self.bits.lz()) as u32
    }

    /// Returns the bit at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.width()`.
    pub fn bit(&self, index: u32) -> bool {
        let bit = (index < self.width)
            .then(|| self.bits.get(index as usize))
            .flatten();
        match bit {
            Some(b) => b,
            None => panic!("bit index {index} out of bounds for width {}", self.width),
        }
    }

    /// Sets the bit at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.width()`.
    pub fn set_bit(&mut self, index: u32, value: bool) {
        assert!(
            index < self.width && self.bits.set(index as usize, value).is_some(),
            "bit index {index} out of bounds for width {}",
            self.width
        );
    }

    /// Returns the most significant bit, or `false` for a zero-width vector.
    pub fn msb(&self) -> bool {
        self.width > 0 && self.bits.msb()
    }

    /// Reads `length` bits starting at `offset` into a new vector.
    ///
    /// # Panics
    ///
    /// Panics if the range exceeds the vector's width.
    pub fn read(&self, offset: u32, length: u32) -> BitVector {
        let mut out = BitVector::new(length);
        out.write(0, self, offset, length);
        out
    }

    /// Copies `length` bits of `src` starting at `src_offset` into `self` at `dst_offset`.
    ///
    /// # Panics
    ///
    /// Panics if either range is out of bounds.
    pub fn write(&mut self, dst_offset: u32, src: &BitVector, src_offset: u32, length: u32) {
        assert!(
            u64::from(src_offset) + u64::from(length) <= u64::from(src.width),
            "source range [{src_offset}, +{length}) out of bounds for width {}",
            src.width
        );
        assert!(
            u64::from(dst_offset) + u64::from(length) <= u64::from(self.width),
            "destination range [{dst_offset}, +{length}) out of bounds for width {}",
            self.width
        );
        if length == 0 {
            return;
        }
        let copied = self.bits.field(
            dst_offset as usize,
            &src.bits,
            src_offset as usize,
            length as usize,
        );
        assert!(copied.is_some(), "bit field copy out of bounds");
    }

    /// Returns a copy zero-extended or truncated to `width`.
    pub fn resize(&self, width: u32) -> BitVector {
        let mut bits = ExtAwi::zero(storage_width(width));
        bits.zero_resize_(&self.bits);
        Self::wrap(width, bits)
    }

    /// Returns a copy sign-extended (or truncated) to `width`.
    pub fn sext(&self, width: u32) -> BitVector {
        let mut bits = ExtAwi::zero(storage_width(width));
        bits.sign_resize_(&self.bits);
        Self::wrap(width, bits)
    }

    /// Returns true if all bits are set (true for a zero-width vector).
    pub fn reduce_and(&self) -> bool {
        self.width == 0 || self.bits.is_umax()
    }

    /// Returns true if any bit is set.
    pub fn reduce_or(&self) -> bool {
        self.to_bool()
    }

    /// Returns the parity of the set bits.
    pub fn reduce_xor(&self) -> bool {
        self.bits.count_ones() % 2 == 1
    }

    /// Logical left shift by `dist` bits.
    pub fn shl(&self, dist: u64) -> BitVector {
        self.shifted(dist, |bits, s| bits.shl_(s))
    }

    /// Logical right shift by `dist` bits.
    pub fn shr(&self, dist: u64) -> BitVector {
        self.shifted(dist, |bits, s| bits.lshr_(s))
    }

    /// Arithmetic right shift by `dist` bits, replicating the sign bit.
    pub fn ashr(&self, dist: u64) -> BitVector {
        if dist >= u64::from(self.width) {
            return if self.msb() {
                BitVector::ones(self.width)
            } else {
                BitVector::new(self.width)
            };
        }
        self.shifted(dist, |bits, s| bits.ashr_(s))
    }

    /// Rotates left by `dist` bits.
    pub fn rotl(&self, dist: u64) -> BitVector {
        if self.width == 0 {
            return self.clone();
        }
        self.shifted(dist % u64::from(self.width), |bits, s| bits.rotl_(s))
    }

    /// Rotates right by `dist` bits.
    pub fn rotr(&self, dist: u64) -> BitVector {
        if self.width == 0 {
            return self.clone();
        }
        self.shifted(dist % u64::from(self.width), |bits, s| bits.rotr_(s))
    }

    /// Wrapping addition.
    pub fn add(&self, rhs: &BitVector) -> BitVector {
        self.binary(rhs, "add", |lhs, rhs| lhs.add_(rhs))
    }

    /// Wrapping subtraction.
    pub fn sub(&self, rhs: &BitVector) -> BitVector {
        self.binary(rhs, "sub", |lhs, rhs| lhs.sub_(rhs))
    }

    /// Two's complement negation.
    pub fn neg(&self) -> BitVector {
        let mut bits = self.bits.clone();
        bits.neg_(true);
        Self::wrap(self.width, bits)
    }

    /// Wrapping multiplication, truncated to the operand width.
    pub fn mul(&self, rhs: &BitVector) -> BitVector {
        self.check_width(rhs, "mul");
        let mut out = BitVector::new(self.width);
        let applied = out.bits.mul_add_(&self.bits, &rhs.bits);
        assert!(applied.is_some(), "BitVector width mismatch in mul");
        out
    }

    /// Unsigned division and remainder, or `None` when dividing by zero.
    pub fn checked_udivrem(&self, rhs: &BitVector) -> Option<(BitVector, BitVector)> {
        self.check_width(rhs, "udiv");
        let mut quo = BitVector::new(self.width);
        let mut rem = BitVector::new(self.width);
        Bits::udivide(&mut quo.bits, &mut rem.bits, &self.bits, &rhs.bits)?;
        Some((quo, rem))
    }

    /// Signed division (truncating toward zero) and remainder (sign of the
    /// dividend), or `None` when dividing by zero.
    pub fn checked_sdivrem(&self, rhs: &BitVector) -> Option<(BitVector, BitVector)> {
        self.check_width(rhs, "sdiv");
        if self.width == 0 {
            return None;
        }
        let mut quo = BitVector::new(self.width);
        let mut rem = BitVector::new(self.width);
        let mut duo = self.bits.clone();
        let mut div = rhs.bits.clone();
        Bits::idivide(&mut quo.bits, &mut rem.bits, &mut duo, &mut div)?;
        Some((quo, rem))
    }

    /// Compares two same-width vectors as unsigned integers.
    pub fn cmp_unsigned(&self, rhs: &BitVector) -> Ordering {
        self.check_width(rhs, "compare");
        self.ordering(rhs, self.bits.ult(&rhs.bits))
    }

    /// Compares two same-width vectors as two's complement integers.
    pub fn cmp_signed(&self, rhs: &BitVector) -> Ordering {
        self.check_width(rhs, "compare");
        if self.width == 0 {
            return Ordering::Equal;
        }
        self.ordering(rhs, self.bits.ilt(&rhs.bits))
    }

    /// Renders the value as an unsigned decimal number.
    pub fn to_decimal(&self) -> String {
        ExtAwi::bits_to_string_radix(&self.bits, false, 10, false, 1)
            .unwrap_or_else(|_| "0".to_string())
    }

    /// Wraps awint storage, keeping the backing bit of a zero-width vector clear.
    fn wrap(width: u32, mut bits: ExtAwi) -> Self {
        if width == 0 {
            bits.zero_();
        }
        Self { width, bits }
    }

    fn binary(
        &self,
        rhs: &BitVector,
        op: &str,
        apply: impl FnOnce(&mut Bits, &Bits) -> Option<()>,
    ) -> BitVector {
        self.check_width(rhs, op);
        let mut bits = self.bits.clone();
        let applied = apply(&mut *bits, &*rhs.bits);
        assert!(applied.is_some(), "BitVector width mismatch in {op}");
        Self::wrap(self.width, bits)
    }

    /// Applies a shift or rotate by `dist < width`; larger distances give zero.
    fn shifted(&self, dist: u64, apply: impl FnOnce(&mut Bits, usize) -> Option<()>) -> BitVector {
        let mut bits = self.bits.clone();
        let in_range = dist < u64::from(self.width) && apply(&mut *bits, dist as usize).is_some();
        if !in_range {
            bits.zero_();
        }
        Self::wrap(self.width, bits)
    }

    fn ordering(&self, rhs: &BitVector, less: Option<bool>) -> Ordering {
        if self.bits == rhs.bits {
            Ordering::Equal
        } else if less == Some(true) {
            Ordering::Less
        } else {
            Ordering::Greater
        }
    }

    fn check_width(&self, rhs: &BitVector, op: &str) {
        assert_eq!(
            self.width, rhs.width,
            "BitVector width mismatch in {op}: {} vs {}",
            self.width, rhs.width
        );
    }
}

impl FromStr for BitVector {
    type Err = ParseBitVectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BitVector::parse(s)
    }
}

impl fmt::Display for BitVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}'h{:x}", self.width, self)
    }
}

impl fmt::Debug for BitVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BitVector({self})")
    }
}

impl fmt::LowerHex for BitVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.width.div_ceil(4).max(1) as usize;
        let s = ExtAwi::bits_to_string_radix(&self.bits, false, 16, false, digits)
            .map_err(|_| fmt::Error)?;
        f.write_str(&s)
    }
}

impl fmt::Binary for BitVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.width == 0 {
            return Ok(());
        }
        let s = ExtAwi::bits_to_string_radix(&self.bits, false, 2, false, self.width as usize)
            .map_err(|_| fmt::Error)?;
        f.write_str(&s)
    }
}

impl BitAnd for &BitVector {
    type Output = BitVector;

    fn bitand(self, rhs: Self) -> BitVector {
        self.binary(rhs, "and", |lhs, rhs| lhs.and_(rhs))
    }
}

impl BitOr for &BitVector {
    type Output = BitVector;

    fn bitor(self, rhs: Self) -> BitVector {
        self.binary(rhs, "or", |lhs, rhs| lhs.or_(rhs))
    }
}

impl BitXor for &BitVector {
    type Output = BitVector;

    fn bitxor(self, rhs: Self) -> BitVector {
        self.binary(rhs, "xor", |lhs, rhs| lhs.xor_(rhs))
    }
}

impl Not for &BitVector {
    type Output = BitVector;

    fn not(self) -> BitVector {
        let mut bits = self.bits.clone();
        bits.not_();
        BitVector::wrap(self.width, bits)
    }
}

/// awint width backing a vector of `width` bits.
fn storage_width(width: u32) -> NonZeroUsize {
    NonZeroUsize::new(width as usize).unwrap_or(NonZeroUsize::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_is_zero() {
        let v = BitVector::new(100);
        assert_eq!(v.width(), 100);
        assert!(v.is_zero());
        assert_eq!(v.words().len(), 2);
    }

    #[test]
    fn ones_clears_unused_bits() {
        let v = BitVector::ones(65);
        assert_eq!(v.words(), vec![u64::MAX, 1]);
        assert!(v.reduce_and());
    }

    #[test]
    fn from_u64_truncates() {
        let v = BitVector::from_u64(0x1ff, 8);
        assert_eq!(v.to_u64(), Some(0xff));
        assert!(BitVector::try_from_u64(0x1ff, 8).is_none());
        assert!(BitVector::try_from_u64(0xff, 8).is_some());
    }

    #[test]
    fn read_write_across_word_boundary() {
        let mut v = BitVector::new(130);
        let src = BitVector::from_u64(0b1011_0111, 8);
        v.write(60, &src, 0, 8);
        assert_eq!(v.read(60, 8), src);
        assert_eq!(v.read(0, 60), BitVector::new(60));
        assert!(v.bit(60));
        assert!(!v.bit(63));
        assert!(v.bit(67));
    }

    #[test]
    fn write_partial_source() {
        let mut v = BitVector::ones(8);
        let src = BitVector::from_u64(0b0000_0100, 8);
        v.write(2, &src, 1, 3);
        assert_eq!(v.to_u64(), Some(0b1110_0011));
    }

    #[test]
    fn sext_and_resize() {
        let v = BitVector::from_u64(0b101, 3);
        assert_eq!(v.resize(6).to_u64(), Some(0b000101));
        assert_eq!(v.sext(6).to_u64(), Some(0b111101));
        assert_eq!(v.resize(2).to_u64(), Some(0b01));
    }

    #[test]
    fn add_carries_across_word_boundary() {
        let a = BitVector::from_u128(u64::MAX as u128, 65);
        let b = BitVector::from_u64(1, 65);
        assert_eq!(a.add(&b).to_u128(), Some(1u128 << 64));
    }

    #[test]
    fn add_width_33_carry() {
        let a = BitVector::from_u64(0xffff_ffff, 33);
        let b = BitVector::from_u64(1, 33);
        assert_eq!(a.add(&b).to_u64(), Some(0x1_0000_0000));
        let c = BitVector::from_u64(0x1_ffff_ffff, 33);
        assert_eq!(c.add(&b).to_u64(), Some(0));
    }

    #[test]
    fn sub_and_neg_wrap() {
        let a = BitVector::from_u64(0, 7);
        let b = BitVector::from_u64(1, 7);
        assert_eq!(a.sub(&b).to_u64(), Some(0x7f));
        assert_eq!(b.neg().to_u64(), Some(0x7f));
    }

    #[test]
    fn mul_truncates() {
        let a = BitVector::from_u64(200, 8);
        let b = BitVector::from_u64(3, 8);
        assert_eq!(a.mul(&b).to_u64(), Some(600 % 256));
        let x = BitVector::from_u128(1u128 << 63, 65);
        let two = BitVector::from_u64(2, 65);
        assert_eq!(x.mul(&two).to_u128(), Some(1u128 << 64));
    }

    #[test]
    fn division_by_zero_is_none() {
        let a = BitVector::from_u64(5, 8);
        let z = BitVector::new(8);
        assert!(a.checked_udivrem(&z).is_none());
        assert!(a.checked_sdivrem(&z).is_none());
    }

    #[test]
    fn wide_division() {
        let a = BitVector::from_u128((1u128 << 100) + 7, 101);
        let b = BitVector::from_u64(3, 101);
        let (q, r) = a.checked_udivrem(&b).unwrap();
        assert_eq!(q.to_u128(), Some(((1u128 << 100) + 7) / 3));
        assert_eq!(r.to_u128(), Some(((1u128 << 100) + 7) % 3));
    }

    #[test]
    fn signed_division_truncates_toward_zero() {
        let a = BitVector::from_u64((-7i64 as u64) & 0xff, 8);
        let b = BitVector::from_u64(2, 8);
        let (q, r) = a.checked_sdivrem(&b).unwrap();
        assert_eq!(q.to_u64(), Some((-3i64 as u64) & 0xff));
        assert_eq!(r.to_u64(), Some((-1i64 as u64) & 0xff));
    }

    #[test]
    fn shifts_and_rotates() {
        let v = BitVector::from_u64(0b1000_0001, 8);
        assert_eq!(v.shl(1).to_u64(), Some(0b0000_0010));
        assert_eq!(v.shr(1).to_u64(), Some(0b0100_0000));
        assert_eq!(v.ashr(1).to_u64(), Some(0b1100_0000));
        assert_eq!(v.ashr(100).to_u64(), Some(0xff));
        assert_eq!(v.shl(8).to_u64(), Some(0));
        assert_eq!(v.rotl(1).to_u64(), Some(0b0000_0011));
        assert_eq!(v.rotr(1).to_u64(), Some(0b1100_0000));
        assert_eq!(v.rotl(9), v.rotl(1));
    }

    #[test]
    fn compare_signed_and_unsigned() {
        let minus_one = BitVector::ones(4);
        let one = BitVector::from_u64(1, 4);
        assert_eq!(minus_one.cmp_unsigned(&one), Ordering::Greater);
        assert_eq!(minus_one.cmp_signed(&one), Ordering::Less);
    }

    #[test]
    fn reductions() {
        let v = BitVector::from_u64(0b0110, 4);
        assert!(!v.reduce_and());
        assert!(v.reduce_or());
        assert!(!v.reduce_xor());
        assert!(BitVector::from_u64(0b0111, 4).reduce_xor());
    }

    #[test]
    fn parse_bases() {
        assert_eq!(BitVector::parse("1010b").unwrap(), BitVector::from_u64(10, 4));
        assert_eq!(BitVector::parse("17o").unwrap(), BitVector::from_u64(15, 6));
        assert_eq!(BitVector::parse("f_h").unwrap(), BitVector::from_u64(15, 4));
        assert_eq!(BitVector::parse("255d").unwrap(), BitVector::from_u64(255, 8));
        assert_eq!(BitVector::parse("0d").unwrap(), BitVector::from_u64(0, 1));
    }

    #[test]
    fn parse_separators_and_width() {
        assert_eq!(
            BitVector::parse("1'0000'0000b").unwrap(),
            BitVector::from_u64(256, 9)
        );
        assert_eq!(BitVector::parse("5e8d").unwrap(), BitVector::from_u64(5, 8));
        assert_eq!(BitVector::parse("11e3b").unwrap(), BitVector::from_u64(3, 3));
    }

    #[test]
    fn parse_large_decimal() {
        let v = BitVector::parse("340282366920938463463374607431768211455d").unwrap();
        assert_eq!(v.width(), 128);
        assert_eq!(v.to_u128(), Some(u128::MAX));
    }

    #[test]
    fn parse_errors() {
        assert_eq!(BitVector::parse(""), Err(ParseBitVectorError::Empty));
        assert!(matches!(
            BitVector::parse("1010"),
            Err(ParseBitVectorError::MissingBase(_))
        ));
        assert!(matches!(
            BitVector::parse("102b"),
            Err(ParseBitVectorError::InvalidDigit { digit: '2', base: 2 })
        ));
        assert!(matches!(
            BitVector::parse("300e8d"),
            Err(ParseBitVectorError::OutOfRange { needed: 9, width: 8 })
        ));
    }

    #[test]
    fn display_formats() {
        let v = BitVector::from_u64(0xa5, 8);
        assert_eq!(format!("{v}"), "8'ha5");
        assert_eq!(format!("{v:b}"), "10100101");
        assert_eq!(format!("{v:?}"), "BitVector(8'ha5)");
    }

    #[test]
    fn from_le_bytes_packs_words() {
        let v = BitVector::from_le_bytes(&[0x01, 0x02, 0, 0, 0, 0, 0, 0, 0x03], 72);
        assert_eq!(v.words(), vec![0x0201, 0x03]);
    }

    #[test]
    fn serde_roundtrip() {
        let v = BitVector::from_u128(0xdead_beef_cafe_babe_1234, 80);
        let json = serde_json::to_string(&v).unwrap();
        let back: BitVector = serde_json::from_str(&json).unwrap();
        assert_eq!(v, back);
    }

    #[test]
    fn zero_width_values_stay_empty() {
        let z = BitVector::new(0);
        assert!(z.words().is_empty());
        assert_eq!(!&z, z);
        assert_eq!(BitVector::ones(0), z);
        assert!(z.reduce_and());
        assert!(!z.msb());
        assert_eq!(z.add(&z), z);
        assert_eq!(format!("{z}"), "0'h0");
        assert_eq!(format!("{z:b}"), "");
        assert_eq!(BitVector::ones(5).read(2, 0), z);
    }

    #[test]
    fn decimal_rendering() {
        assert_eq!(BitVector::new(3).to_decimal(), "0");
        assert_eq!(BitVector::from_u64(1234, 16).to_decimal(), "1234");
        let wide = BitVector::ones(128).resize(130);
        assert_eq!(wide.to_decimal(), u128::MAX.to_string());
    }
}
