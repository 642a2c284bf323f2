//! Debug assertion macros for ring invariants.
//!
//! Only active in debug builds (`#[cfg(debug_assertions)]`), so there is
//! zero overhead in release builds.
//!
//! Used by the slot protocols in `protocol.rs` and the region accessors.

// =============================================================================
// Bounded occupancy
// =============================================================================

/// Assert that a claim never runs more than `capacity` ahead of the consumer.
///
/// **Invariant**: `consumer_index ≤ producer_index ≤ consumer_index + capacity`
///
/// Used in: `write_acquire()` after a successful claim
macro_rules! debug_assert_bounded_occupancy {
    ($producer:expr, $consumer:expr, $capacity:expr) => {
        debug_assert!(
            $consumer <= $producer && $producer - $consumer <= $capacity as u64,
            "bounded occupancy violated: producer {} consumer {} capacity {}",
            $producer,
            $consumer,
            $capacity
        )
    };
}

// =============================================================================
// Monotonic progress
// =============================================================================

/// Assert that an index counter only moves forward.
///
/// Used in: index stores on both sides
macro_rules! debug_assert_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new > $old,
            "monotonic progress violated: {} went from {} to {}",
            $name,
            $old,
            $new
        )
    };
}

// =============================================================================
// Indicator states
// =============================================================================

/// Assert that a slot handed to a producer is free.
///
/// Used in: `write_acquire()` before returning a slot
macro_rules! debug_assert_slot_free {
    ($indicator:expr, $index:expr) => {
        debug_assert!(
            $indicator == 0,
            "claimed slot for index {} still holds call type {}",
            $index,
            $indicator
        )
    };
}

/// Assert that a committed tag is a real call type.
///
/// Used in: `write_release()`
macro_rules! debug_assert_committed_tag {
    ($tag:expr) => {
        debug_assert!($tag != 0, "committing a slot with the empty tag 0")
    };
}

pub(crate) use debug_assert_bounded_occupancy;
pub(crate) use debug_assert_committed_tag;
pub(crate) use debug_assert_monotonic;
pub(crate) use debug_assert_slot_free;
