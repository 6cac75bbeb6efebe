//! Debug assertion macros for the credit and slot-state invariants.
//!
//! Active only in debug builds; release builds compile them to nothing.
//! Used by the credit stores and the cell buffer.

/// Assert that a credit count stays within its representable band.
///
/// The counter must never exceed `MAX_CREDITS` (half the signed range, so
/// that concurrent adds cannot push it over the top) and, on non-waitable
/// sides, must never go negative.
macro_rules! debug_assert_credit_band {
    ($count:expr, $max:expr) => {
        debug_assert!(
            $count <= $max,
            "credit count {} exceeds the maximum of {}",
            $count,
            $max
        )
    };
}

/// Assert that a slot-state byte holds one of the three encoded states.
///
/// Anything else means a torn or stray write to the state atomic.
macro_rules! debug_assert_slot_state {
    ($state:expr) => {
        debug_assert!(
            (-1..=1).contains(&$state),
            "slot state {} is not EMPTY (1), VOLATILE (0) or FULL (-1)",
            $state
        )
    };
}

pub(crate) use debug_assert_credit_band;
pub(crate) use debug_assert_slot_state;
