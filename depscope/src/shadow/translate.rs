//! Real-to-shadow address translation
//!
//! The shadow of a real address is found by a fixed bit transform, so no
//! lookup table is needed on the hot path:
//!
//! ```text
//! shadow(a) = ((a << RATIO_SHIFT) & SHADOW_MASK) ^ SHADOW_MARKER
//! ```
//!
//! The shift gives every real byte an 8-byte cell. The mask keeps the result
//! in the lower half of the canonical address space and the marker bit moves
//! it away from where real low addresses live. The transform is a bijection
//! over `[0, 2^44)`; real addresses above that alias their low 44 bits, which
//! the engine detects as a mapping conflict rather than silently sharing
//! cells.

use depscope_common::TS_SIZE_LOG2;

/// log2 of (shadow bytes per real byte)
pub const RATIO_SHIFT: u32 = TS_SIZE_LOG2;

/// Shadow bytes per real byte
pub const RATIO: u64 = 1 << RATIO_SHIFT;

/// Keeps shadow addresses within the 47-bit user half of the address space
pub const SHADOW_MASK: u64 = 0x0000_7fff_ffff_ffff;

/// Toggled in every shadow address
pub const SHADOW_MARKER: u64 = 0x0000_2000_0000_0000;

/// Size of the real address space the transform is injective on
pub const SHADOW_SPAN: u64 = (SHADOW_MASK + 1) >> RATIO_SHIFT;

#[inline]
#[must_use]
pub const fn real_to_shadow(addr: u64) -> u64 {
    ((addr << RATIO_SHIFT) & SHADOW_MASK) ^ SHADOW_MARKER
}

/// Inverse of [`real_to_shadow`] for addresses below [`SHADOW_SPAN`]
#[inline]
#[must_use]
pub const fn shadow_to_real(shadow: u64) -> u64 {
    (shadow ^ SHADOW_MARKER) >> RATIO_SHIFT
}

/// Whether `[addr, addr + len)` maps to one contiguous shadow range
#[inline]
#[must_use]
pub const fn is_contiguous(addr: u64, len: u64) -> bool {
    if len == 0 {
        return true;
    }
    match addr.checked_add(len - 1) {
        Some(last) => addr / SHADOW_SPAN == last / SHADOW_SPAN,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_translation() {
        assert_eq!(real_to_shadow(0x1000), 0x2000_0000_8000);
        assert_eq!(real_to_shadow(0), SHADOW_MARKER);
    }

    #[test]
    fn test_page_aligned_addresses_are_distinct() {
        let page = 4096u64;
        let probes = [
            0,
            page,
            2 * page,
            0x10_0000,
            0x5555_5555_4000 % SHADOW_SPAN,
            SHADOW_SPAN - page,
            SHADOW_SPAN / 2,
            SHADOW_SPAN / 2 - page,
        ];
        for (i, a) in probes.iter().enumerate() {
            for b in &probes[i + 1..] {
                assert_ne!(real_to_shadow(*a), real_to_shadow(*b), "0x{a:x} vs 0x{b:x}");
            }
        }
    }

    #[test]
    fn test_inverse_within_span() {
        for addr in [0u64, 1, 0x1000, 0xdead_beef, SHADOW_SPAN - 1] {
            assert_eq!(shadow_to_real(real_to_shadow(addr)), addr);
        }
    }

    #[test]
    fn test_consecutive_pages_have_adjacent_shadow() {
        let page = 4096u64;
        let base = 0x40_0000u64;
        assert_eq!(real_to_shadow(base + page) - real_to_shadow(base), page * RATIO);
    }

    #[test]
    fn test_high_addresses_alias_low_bits() {
        let stack_like = 0x7ffc_1234_5000u64;
        assert_eq!(real_to_shadow(stack_like), real_to_shadow(stack_like % SHADOW_SPAN));
    }

    #[test]
    fn test_contiguity() {
        assert!(is_contiguous(0x1000, 0));
        assert!(is_contiguous(0x1000, 0x1000));
        assert!(!is_contiguous(SHADOW_SPAN - 8, 16));
        assert!(!is_contiguous(u64::MAX, 2));
    }
}
