//! Packed last-writer timestamps stored in shadow cells.
//!
//! ```text
//!  63            44 43                        16 15            0
//! ┌────────────────┬────────────────────────────┬───────────────┐
//! │ instr_id (20)  │ iteration (28)             │ invocation(16)│
//! └────────────────┴────────────────────────────┴───────────────┘
//! ```
//!
//! A zero word means the cell was never written. The instruction field holds
//! `instr_id + 1`, so every encoded store is nonzero even for instruction 0
//! before the first invocation. Field values wider than their range are a
//! contract violation: debug builds assert, release builds reduce the
//! instruction id modulo `MAX_INSTR + 1` and keep only the low bits of the
//! other fields. Encoding and decoding have no branches.

use depscope_common::{TS_INSTR_BITS, TS_INVOC_BITS, TS_ITER_BITS};

const INVOC_SHIFT: u32 = 0;
const ITER_SHIFT: u32 = TS_INVOC_BITS;
const INSTR_SHIFT: u32 = TS_INVOC_BITS + TS_ITER_BITS;

const INSTR_FIELD: u64 = (1 << TS_INSTR_BITS) - 1;

/// Largest encodable instruction id (one field value is reserved for "unwritten")
#[allow(clippy::cast_possible_truncation)]
pub const MAX_INSTR: u32 = INSTR_FIELD as u32 - 1;

/// Largest encodable iteration
pub const MAX_ITER: u64 = (1 << TS_ITER_BITS) - 1;

/// Largest encodable invocation
pub const MAX_INVOC: u64 = (1 << TS_INVOC_BITS) - 1;

const _: () = assert!(TS_INSTR_BITS + TS_ITER_BITS + TS_INVOC_BITS == 64);

/// One shadow cell value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Value of a cell no store has touched
    pub const UNWRITTEN: Self = Self(0);

    #[inline]
    #[must_use]
    pub fn encode(instr: u32, iteration: u64, invocation: u64) -> Self {
        debug_assert!(instr <= MAX_INSTR, "instruction id {instr} exceeds {MAX_INSTR}");
        debug_assert!(iteration <= MAX_ITER, "iteration {iteration} exceeds {TS_ITER_BITS} bits");
        debug_assert!(
            invocation <= MAX_INVOC,
            "invocation {invocation} exceeds {TS_INVOC_BITS} bits"
        );
        Self(
            ((u64::from(instr % (MAX_INSTR + 1)) + 1) << INSTR_SHIFT)
                | ((iteration & MAX_ITER) << ITER_SHIFT)
                | ((invocation & MAX_INVOC) << INVOC_SHIFT),
        )
    }

    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn instr(self) -> u32 {
        ((self.0 >> INSTR_SHIFT) as u32).wrapping_sub(1)
    }

    #[inline]
    #[must_use]
    pub fn iteration(self) -> u64 {
        (self.0 >> ITER_SHIFT) & MAX_ITER
    }

    #[inline]
    #[must_use]
    pub fn invocation(self) -> u64 {
        (self.0 >> INVOC_SHIFT) & MAX_INVOC
    }

    #[inline]
    #[must_use]
    pub fn is_unwritten(self) -> bool {
        self.0 == 0
    }
}

/// Pack `(instr_id, iteration, invocation)` into one word.
#[inline]
#[must_use]
pub fn encode(instr: u32, iteration: u64, invocation: u64) -> Timestamp {
    Timestamp::encode(instr, iteration, invocation)
}

#[inline]
#[must_use]
pub fn decode_instr(ts: Timestamp) -> u32 {
    ts.instr()
}

#[inline]
#[must_use]
pub fn decode_iter(ts: Timestamp) -> u64 {
    ts.iteration()
}

#[inline]
#[must_use]
pub fn decode_invoc(ts: Timestamp) -> u64 {
    ts.invocation()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_boundaries() {
        let cases = [
            (1, 0, 1),
            (MAX_INSTR, MAX_ITER, MAX_INVOC),
            (10, 1, 1),
            (0, MAX_ITER, 0),
            (MAX_INSTR, 0, 0),
            (12_345, 98_765, 4_321),
        ];
        for (instr, iter, invoc) in cases {
            let ts = encode(instr, iter, invoc);
            assert_eq!(decode_instr(ts), instr);
            assert_eq!(decode_iter(ts), iter);
            assert_eq!(decode_invoc(ts), invoc);
        }
    }

    #[test]
    fn test_fields_do_not_overlap() {
        let base = encode(5, 6, 7);
        let instr_changed = encode(MAX_INSTR, 6, 7);
        let iter_changed = encode(5, MAX_ITER, 7);
        let invoc_changed = encode(5, 6, MAX_INVOC);

        assert_eq!((instr_changed.iteration(), instr_changed.invocation()), (6, 7));
        assert_eq!((iter_changed.instr(), iter_changed.invocation()), (5, 7));
        assert_eq!((invoc_changed.instr(), invoc_changed.iteration()), (5, 6));
        assert_eq!(base.0 >> INSTR_SHIFT, 6);
        assert_eq!(encode(MAX_INSTR, MAX_ITER, MAX_INVOC).0, u64::MAX);
    }

    #[test]
    fn test_written_store_is_nonzero() {
        // Instruction 0 stored before the first LOOP_INVOC
        let first = encode(0, 0, 0);
        assert!(!first.is_unwritten());
        assert_eq!((first.instr(), first.iteration(), first.invocation()), (0, 0, 0));
        assert!(Timestamp::UNWRITTEN.is_unwritten());
        assert_eq!(Timestamp::default(), Timestamp::UNWRITTEN);
    }

    #[test]
    fn test_decode_iter_ignores_other_fields() {
        let a = encode(1, 7, 1);
        let b = encode(MAX_INSTR, 7, MAX_INVOC);
        assert_eq!(decode_iter(a), decode_iter(b));
    }
}
