//! Debug assertion macros for invariants that must hold across every
//! primitive in this crate: bounded occupancy, watermark ordering, and slot
//! conservation.
//!
//! These are only active in debug builds (`#[cfg(debug_assertions)]`), so there
//! is zero overhead in release builds.

// =============================================================================
// INV-RING-01: Bounded Occupancy
// =============================================================================

/// Assert that a ring's occupancy never exceeds its capacity.
///
/// **Invariant**: `puts_completed - gets_completed ∈ [0, capacity]`
macro_rules! debug_assert_ring_bounded {
    ($len:expr, $capacity:expr) => {
        debug_assert!(
            $len <= $capacity,
            "INV-RING-01 violated: occupancy {} exceeds capacity {}",
            $len,
            $capacity
        )
    };
}

// =============================================================================
// INV-SEM-01: Available Count Never Exceeds u32::MAX
// =============================================================================

/// Assert that the semaphore's available count has not overflowed its 32-bit
/// representation after a notify.
macro_rules! debug_assert_sem_available_bounded {
    ($available:expr) => {
        debug_assert!(
            $available <= u32::MAX as u64,
            "INV-SEM-01 violated: available_count {} exceeds u32::MAX",
            $available
        )
    };
}

// =============================================================================
// INV-POOL-01: Outstanding + Free == Capacity
// =============================================================================

/// Assert that outstanding handles plus free slots equals capacity.
///
/// **Invariant**: `outstanding_handles(t) + free_slots(t) = capacity`
macro_rules! debug_assert_pool_conserves_capacity {
    ($running:expr, $free:expr, $capacity:expr) => {
        debug_assert!(
            $running + $free == $capacity,
            "INV-POOL-01 violated: running {} + free {} != capacity {}",
            $running,
            $free,
            $capacity
        )
    };
}

// =============================================================================
// INV-POOL-02: Watermark Ordering
// =============================================================================

/// Assert that a pool's low watermark never exceeds its current running count.
macro_rules! debug_assert_low_watermark_bound {
    ($low_watermark:expr, $running_count:expr) => {
        debug_assert!(
            $low_watermark <= $running_count,
            "INV-POOL-02 violated: low_watermark {} exceeds running_count {}",
            $low_watermark,
            $running_count
        )
    };
}

// =============================================================================
// INV-Q-01: High Watermark Ordering
// =============================================================================

/// Assert that a queue's high watermark never falls below its current running
/// count.
macro_rules! debug_assert_high_watermark_bound {
    ($high_watermark:expr, $running_count:expr) => {
        debug_assert!(
            $high_watermark >= $running_count,
            "INV-Q-01 violated: high_watermark {} is below running_count {}",
            $high_watermark,
            $running_count
        )
    };
}

// =============================================================================
// INV-Q-02: Slot Conservation Across Raw/Cooked/In-Flight
// =============================================================================

/// Assert that raw + cooked + in-flight reservations never exceed capacity.
macro_rules! debug_assert_queue_conserves_capacity {
    ($raw_len:expr, $cooked_len:expr, $in_flight:expr, $capacity:expr) => {
        debug_assert!(
            $raw_len + $cooked_len + $in_flight <= $capacity,
            "INV-Q-02 violated: raw {} + cooked {} + in_flight {} exceeds capacity {}",
            $raw_len,
            $cooked_len,
            $in_flight,
            $capacity
        )
    };
}

// =============================================================================
// Re-exports for crate-internal use
// =============================================================================

pub(crate) use debug_assert_high_watermark_bound;
pub(crate) use debug_assert_low_watermark_bound;
pub(crate) use debug_assert_pool_conserves_capacity;
pub(crate) use debug_assert_queue_conserves_capacity;
pub(crate) use debug_assert_ring_bounded;
pub(crate) use debug_assert_sem_available_bounded;
