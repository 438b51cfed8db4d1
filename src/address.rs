//! Address arithmetic for level-ordered complete binary trees and the
//! bit-reversed register layout used to stage one node per level.
//!
//! Nodes are numbered in level order: the root is `0` and the children of
//! `a` are `2a + 1` and `2a + 2`. Level `n` therefore spans the addresses
//! `2^n - 1 ..= 2^(n+1) - 2`.
//!
//! Register groups are 128-bit vectors stored as four 32-bit words. Every
//! level owns one slot in each group. Slot positions are given as
//! `[msb, lsb]` counted from the *top* of the group's used width, so level 0
//! lands in the highest bits and deeper levels follow towards bit 0.

use crate::error::{Error, Result};

/// Width of one packed word.
pub const WORD_BITS: u32 = 32;

/// Number of words in one register group.
pub const GROUP_WORDS: usize = 4;

/// Capacity of one register group in bits.
pub const GROUP_BITS: u32 = WORD_BITS * GROUP_WORDS as u32;

// =============================================================================
// Level / offset
// =============================================================================

/// Level of a node address; the root is level 0.
///
/// This is the unique `n` with `2^n - 1 <= address < 2^(n+1) - 1`.
#[inline]
pub fn level_of(address: u32) -> u32 {
    (u64::from(address) + 1).ilog2()
}

/// First address on `level`.
#[inline]
pub fn level_start(level: u32) -> u32 {
    debug_assert!(level < 32);
    (1u32 << level) - 1
}

/// Position of `address` within its level, i.e. the RAM row of that level.
#[inline]
pub fn offset_in_level(address: u32, level: u32) -> u32 {
    debug_assert_eq!(level_of(address), level);
    address - level_start(level)
}

/// Inverse of [`level_of`] / [`offset_in_level`].
#[inline]
pub fn address_of(level: u32, offset: u32) -> u32 {
    debug_assert!(offset < 1u32 << level);
    level_start(level) + offset
}

/// Number of nodes in a complete tree with `num_levels` levels.
#[inline]
pub fn node_count(num_levels: u32) -> u32 {
    ((1u64 << num_levels) - 1) as u32
}

/// Address of the leftmost leaf; every address at or above it is a leaf.
#[inline]
pub fn first_leaf(num_levels: u32) -> u32 {
    debug_assert!(num_levels >= 1);
    level_start(num_levels - 1)
}

/// Bits needed to store a field index for a catalog of `num_fields` fields.
///
/// A single-field catalog still gets one bit so that every level slot is
/// non-empty.
#[inline]
pub fn field_index_width(num_fields: u32) -> u32 {
    debug_assert!(num_fields >= 1);
    if num_fields <= 2 {
        1
    } else {
        (num_fields - 1).ilog2() + 1
    }
}

// =============================================================================
// Bit ranges
// =============================================================================

/// Inclusive slot `[msb, lsb]` inside a register group, counted from the top
/// of the group's used width (`msb <= lsb`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitRange {
    pub msb: u32,
    pub lsb: u32,
}

impl BitRange {
    #[inline]
    pub fn new(msb: u32, lsb: u32) -> Self {
        debug_assert!(msb <= lsb);
        Self { msb, lsb }
    }

    #[inline]
    pub fn width(self) -> u32 {
        self.lsb - self.msb + 1
    }

    /// Low bit of the slot, counted from bit 0 of the combined group.
    #[inline]
    pub fn shift(self, total_bits: u32) -> u32 {
        debug_assert!(self.lsb < total_bits);
        total_bits - self.lsb - 1
    }

    /// Mask covering bits `total - lsb - 1 ..= total - msb - 1`.
    #[inline]
    pub fn mask(self, total_bits: u32) -> u128 {
        low_mask(self.width()) << self.shift(total_bits)
    }

    #[inline]
    fn overlaps(self, other: BitRange) -> bool {
        self.msb <= other.lsb && other.msb <= self.lsb
    }
}

#[inline]
fn low_mask(width: u32) -> u128 {
    if width >= 128 {
        u128::MAX
    } else {
        (1u128 << width) - 1
    }
}

/// Triangular slot of a level's RAM row: level `n > 0` gets `n` bits
/// starting at `1 + (0 + 1 + .. + (n-1))`; level 0 gets the single bit 0.
#[inline]
pub fn address_slot(level: u32) -> BitRange {
    if level == 0 {
        BitRange::new(0, 0)
    } else {
        let start = 1 + level * (level - 1) / 2;
        BitRange::new(start, start + level - 1)
    }
}

/// Slot of the RAM-row encoding for `address` in a tree of `num_levels`.
pub fn bit_range_for_address(address: u32, num_levels: u32) -> Result<BitRange> {
    let level = level_of(address);
    if level >= num_levels {
        return Err(Error::out_of_range("level", level, num_levels));
    }
    Ok(address_slot(level))
}

/// Slot of a level's field index.
#[inline]
pub fn bit_range_for_field(level: u32, field_index_width: u32) -> BitRange {
    per_level_slot(level, field_index_width)
}

/// Slot of a level's node value.
#[inline]
pub fn bit_range_for_value(level: u32, value_width: u32) -> BitRange {
    per_level_slot(level, value_width)
}

#[inline]
fn per_level_slot(level: u32, width: u32) -> BitRange {
    debug_assert!(width >= 1);
    BitRange::new(level * width, (level + 1) * width - 1)
}

/// Used width of the address group for a tree of `num_levels`.
#[inline]
pub fn address_total_bits(num_levels: u32) -> u32 {
    debug_assert!(num_levels >= 1);
    address_slot(num_levels - 1).lsb + 1
}

/// Used width of a uniformly sliced group (field index or node value).
#[inline]
pub fn sliced_total_bits(num_levels: u32, width: u32) -> u32 {
    per_level_slot(num_levels - 1, width).lsb + 1
}

/// Whether any two distinct levels share a bit under `slot`.
pub fn slots_disjoint(num_levels: u32, slot: impl Fn(u32) -> BitRange) -> bool {
    (0..num_levels).all(|a| ((a + 1)..num_levels).all(|b| !slot(a).overlaps(slot(b))))
}

// =============================================================================
// Word assembly
// =============================================================================

/// Combine four words into one integer: `word[i]` holds bits `32i .. 32i+31`.
#[inline]
pub fn join_words(words: &[u32; GROUP_WORDS]) -> u128 {
    words
        .iter()
        .enumerate()
        .fold(0u128, |acc, (i, &w)| acc | (u128::from(w) << (WORD_BITS * i as u32)))
}

/// Inverse of [`join_words`]: `word[i] = (combined >> 32i) & 0xFFFF_FFFF`.
#[inline]
pub fn split_words(combined: u128) -> [u32; GROUP_WORDS] {
    let mut words = [0u32; GROUP_WORDS];
    for (i, w) in words.iter_mut().enumerate() {
        *w = (combined >> (WORD_BITS * i as u32)) as u32;
    }
    words
}

/// Replace the slot `range` of a group whose used width is `total_bits`.
///
/// Bits outside the slot are returned unchanged. Bits of `value` above the
/// slot width are dropped.
pub fn pack_into(
    existing: &[u32; GROUP_WORDS],
    value: u64,
    range: BitRange,
    total_bits: u32,
) -> [u32; GROUP_WORDS] {
    debug_assert!(total_bits <= GROUP_BITS);
    let mask = range.mask(total_bits);
    let placed = (u128::from(value) << range.shift(total_bits)) & mask;
    split_words((join_words(existing) & !mask) | placed)
}

/// Read back the slot `range` written by [`pack_into`].
pub fn extract_from(words: &[u32; GROUP_WORDS], range: BitRange, total_bits: u32) -> u64 {
    debug_assert!(range.width() <= 64);
    ((join_words(words) & range.mask(total_bits)) >> range.shift(total_bits)) as u64
}
