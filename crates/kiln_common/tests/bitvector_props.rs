//! Property tests checking `BitVector` arithmetic against native `u128` math.

use kiln_common::BitVector;
use proptest::prelude::*;

fn mask(width: u32) -> u128 {
    if width >= 128 {
        u128::MAX
    } else {
        (1u128 << width) - 1
    }
}

fn widths() -> impl Strategy<Value = u32> {
    prop_oneof![Just(1u32), Just(7), Just(32), Just(33), Just(64), Just(65), Just(100), 1u32..=127]
}

fn to_signed(v: u128, width: u32) -> i128 {
    let shift = 128 - width;
    ((v << shift) as i128) >> shift
}

proptest! {
    #[test]
    fn add_sub_mul_match_u128(width in widths(), a in any::<u128>(), b in any::<u128>()) {
        let (a, b) = (a & mask(width), b & mask(width));
        let va = BitVector::from_u128(a, width);
        let vb = BitVector::from_u128(b, width);
        prop_assert_eq!(va.add(&vb).to_u128(), Some(a.wrapping_add(b) & mask(width)));
        prop_assert_eq!(va.sub(&vb).to_u128(), Some(a.wrapping_sub(b) & mask(width)));
        prop_assert_eq!(va.mul(&vb).to_u128(), Some(a.wrapping_mul(b) & mask(width)));
    }

    #[test]
    fn unsigned_division_matches_u128(width in widths(), a in any::<u128>(), b in any::<u128>()) {
        let (a, b) = (a & mask(width), b & mask(width));
        let va = BitVector::from_u128(a, width);
        let vb = BitVector::from_u128(b, width);
        match va.checked_udivrem(&vb) {
            None => prop_assert_eq!(b, 0),
            Some((q, r)) => {
                prop_assert_eq!(q.to_u128(), Some(a / b));
                prop_assert_eq!(r.to_u128(), Some(a % b));
            }
        }
    }

    #[test]
    fn signed_division_truncates(width in 2u32..=120, a in any::<u128>(), b in any::<u128>()) {
        let (a, b) = (a & mask(width), b & mask(width));
        prop_assume!(b != 0);
        let (sa, sb) = (to_signed(a, width), to_signed(b, width));
        let va = BitVector::from_u128(a, width);
        let vb = BitVector::from_u128(b, width);
        let (q, r) = va.checked_sdivrem(&vb).unwrap();
        prop_assert_eq!(q.to_u128(), Some((sa.wrapping_div(sb) as u128) & mask(width)));
        prop_assert_eq!(r.to_u128(), Some((sa.wrapping_rem(sb) as u128) & mask(width)));
    }

    #[test]
    fn shifts_match_u128(width in widths(), a in any::<u128>(), dist in 0u64..140) {
        let a = a & mask(width);
        let va = BitVector::from_u128(a, width);
        let expect_shl = if dist >= width as u64 { 0 } else { (a << dist) & mask(width) };
        let expect_shr = if dist >= width as u64 { 0 } else { a >> dist };
        prop_assert_eq!(va.shl(dist).to_u128(), Some(expect_shl));
        prop_assert_eq!(va.shr(dist).to_u128(), Some(expect_shr));
        let sa = to_signed(a, width);
        let expect_ashr = (sa >> dist.min(127)) as u128 & mask(width);
        prop_assert_eq!(va.ashr(dist).to_u128(), Some(expect_ashr));
    }

    #[test]
    fn write_then_read_returns_written_bits(
        width in 1u32..200,
        value in any::<u128>(),
        offset_seed in any::<u32>(),
        len_seed in any::<u32>(),
    ) {
        let offset = offset_seed % width;
        let len = 1 + len_seed % (width - offset).min(128);
        let src = BitVector::from_u128(value, len);
        let mut dst = BitVector::ones(width);
        dst.write(offset, &src, 0, len);
        prop_assert_eq!(dst.read(offset, len), src);
        // Bits outside the written window are untouched.
        if offset > 0 {
            prop_assert!(dst.read(0, offset).reduce_and());
        }
        if offset + len < width {
            prop_assert!(dst.read(offset + len, width - offset - len).reduce_and());
        }
    }

    #[test]
    fn unused_bits_stay_clear(width in 1u32..200, a in any::<u128>(), b in any::<u128>()) {
        let va = BitVector::from_u128(a, width);
        let vb = BitVector::from_u128(b, width);
        for v in [va.add(&vb), va.sub(&vb), va.mul(&vb), !&va, va.neg(), va.rotl(3), va.sext(width + 9)] {
            let extra = v.width() % 64;
            if extra != 0 {
                prop_assert_eq!(v.words().last().unwrap() >> extra, 0);
            }
        }
    }

    #[test]
    fn decimal_text_matches_u128(a in any::<u128>(), width in 1u32..=128) {
        let a = a & mask(width);
        let parsed = BitVector::parse(&format!("{a}e{width}d")).unwrap();
        prop_assert_eq!(parsed.width(), width);
        prop_assert_eq!(parsed.to_u128(), Some(a));
        prop_assert_eq!(parsed.to_decimal(), a.to_string());
        let minimal = BitVector::parse(&format!("{a}d")).unwrap();
        prop_assert_eq!(minimal.width(), (128 - a.leading_zeros()).max(1));
    }

    #[test]
    fn rotates_and_compares_match_u128(width in widths(), a in any::<u128>(), b in any::<u128>(), dist in 0u64..300) {
        let (a, b) = (a & mask(width), b & mask(width));
        let va = BitVector::from_u128(a, width);
        let vb = BitVector::from_u128(b, width);
        let d = (dist % width as u64) as u32;
        let expect = if d == 0 { a } else { ((a << d) | (a >> (width - d))) & mask(width) };
        prop_assert_eq!(va.rotl(dist).to_u128(), Some(expect));
        prop_assert_eq!(va.rotl(dist).rotr(dist), va.clone());
        prop_assert_eq!(va.cmp_unsigned(&vb), a.cmp(&b));
        prop_assert_eq!(va.cmp_signed(&vb), to_signed(a, width).cmp(&to_signed(b, width)));
    }
}
