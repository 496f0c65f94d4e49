//! Debug assertion macros for the ring index protocol.
//!
//! Active only in debug builds; release builds pay nothing. The checks
//! mirror the sequence-number discipline documented in `ring.rs`: the
//! occupancy of a ring is `tail - head` in wrapping 32-bit arithmetic,
//! both indices move forward only, and the consumer never observes a head
//! past the producer's published tail.

/// Assert that ring occupancy does not exceed capacity.
///
/// Invariant: `0 <= tail.wrapping_sub(head) <= capacity`
macro_rules! debug_assert_bounded_count {
    ($count:expr, $capacity:expr) => {
        debug_assert!(
            $count <= $capacity,
            "ring occupancy {} exceeds capacity {}",
            $count,
            $capacity
        )
    };
}

/// Assert that head does not advance past tail.
macro_rules! debug_assert_head_not_past_tail {
    ($new_head:expr, $tail:expr) => {
        debug_assert!(
            $tail.wrapping_sub($new_head) < u32::MAX / 2,
            "head {} advanced past tail {}",
            $new_head,
            $tail
        )
    };
}

/// Assert that a sequence index only moves forward.
///
/// Uses the wrapping distance so the check stays valid across the 32-bit
/// wrap: a forward move of less than half the sequence space is progress,
/// anything else is a bug.
macro_rules! debug_assert_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new.wrapping_sub($old) < u32::MAX / 2,
            "{} moved backwards from {} to {}",
            $name,
            $old,
            $new
        )
    };
}

pub(crate) use debug_assert_bounded_count;
pub(crate) use debug_assert_head_not_past_tail;
pub(crate) use debug_assert_monotonic;
