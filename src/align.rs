//! Word alignment for variable-length segments.
//!
//! Every segment following an item header is padded with zero bytes so the
//! next field starts on a 64-bit word boundary.  The declared lengths never
//! include that padding; readers and writers recompute it from here.

/// Alignment of every segment, in bytes.
pub const ALIGNMENT: u64 = 8;

/// Largest input for which [`round_up_8`] has a representable result.
pub const MAX_ALIGNABLE: u64 = u64::MAX - (ALIGNMENT - 1);

/// Round `n` up to the next multiple of `ALIGN` (a power of two).
///
/// Returns `None` when the result does not fit in a `u64`.
#[inline]
pub const fn checked_round_up<const ALIGN: u64>(n: u64) -> Option<u64> {
    assert!(ALIGN.is_power_of_two());
    if n == 0 {
        return Some(0);
    }
    match ((n - 1) / ALIGN + 1).checked_mul(ALIGN) {
        Some(v) => Some(v),
        None    => None,
    }
}

/// Smallest multiple of 8 that is `>= n`.
///
/// # Panics
/// Panics when `n > MAX_ALIGNABLE`, since the result would not fit.  Decoders
/// working on untrusted lengths use [`checked_round_up_8`] instead.
#[inline]
pub const fn round_up_8(n: u64) -> u64 {
    match checked_round_up::<ALIGNMENT>(n) {
        Some(v) => v,
        None    => panic!("length too large to align"),
    }
}

#[inline]
pub const fn checked_round_up_8(n: u64) -> Option<u64> {
    checked_round_up::<ALIGNMENT>(n)
}

/// Number of zero bytes needed after `n` bytes to reach a word boundary.
#[inline]
pub const fn padding_8(n: u64) -> u64 {
    round_up_8(n) - n
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn known_values() {
        assert_eq!((round_up_8(0), padding_8(0)), (0, 0));
        assert_eq!((round_up_8(1), padding_8(1)), (8, 7));
        assert_eq!((round_up_8(8), padding_8(8)), (8, 0));
        assert_eq!((round_up_8(9), padding_8(9)), (16, 7));
        assert_eq!(round_up_8(MAX_ALIGNABLE), MAX_ALIGNABLE);
    }

    #[test]
    fn overflow_is_reported() {
        assert_eq!(checked_round_up_8(MAX_ALIGNABLE + 1), None);
        assert_eq!(checked_round_up_8(u64::MAX), None);
    }

    #[test]
    fn other_alignments() {
        assert_eq!(checked_round_up::<16>(17), Some(32));
        assert_eq!(checked_round_up::<1>(17), Some(17));
        assert_eq!(checked_round_up::<4096>(1), Some(4096));
    }

    proptest! {
        #[test]
        fn rounds_to_next_boundary(n in 0..=MAX_ALIGNABLE) {
            let r = round_up_8(n);
            prop_assert_eq!(r % 8, 0);
            prop_assert!(r >= n);
            prop_assert!(r - n < 8);
            prop_assert_eq!(padding_8(n), r - n);
        }
    }
}
