//! The shared arena/ring/watermark machinery underneath [`crate::pool::object_pool::ObjectPool`]
//! and [`crate::pool::block_pool::BlockPool`].

pub mod block_pool;
pub mod object_pool;

use crate::config::{PoolConfig, RingConfig};
use crate::error::{CoreError, Result};
use crate::invariants::{debug_assert_low_watermark_bound, debug_assert_pool_conserves_capacity};
use crate::mutex::Mutex;
use crate::ring_simple::RingBufferSimple;
use crate::stats::PackedCounters;

/// A `{capacity, running_count, low_watermark}` snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Total number of slots the pool was constructed with.
    pub capacity: usize,
    /// Slots currently checked out.
    pub running_count: u32,
    /// The lowest `capacity - running_count` has reached (i.e. the deepest
    /// exhaustion) since construction.
    pub low_watermark: u32,
}

/// An address into the pool's arena, identifying one slot.
///
/// Modeled as an index rather than a raw pointer: the slot's byte address is
/// recomputed from the index on demand via [`MemoryPoolBase::slot_ptr`],
/// which keeps the free list itself free of raw pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RawBlock {
    pub index: usize,
}

/// Arena + free-slot ring + packed watermark word, shared by the object and
/// block pool flavors.
pub(crate) struct MemoryPoolBase {
    arena: Box<[u8]>,
    free_slots: Mutex<RingBufferSimple<usize>>,
    counters: PackedCounters,
    padded_element_size: usize,
    capacity: usize,
}

impl MemoryPoolBase {
    pub(crate) fn new(config: PoolConfig) -> Self {
        let capacity = config.capacity();
        let padded_element_size = config.padded_element_size();

        let arena = vec![0_u8; capacity * padded_element_size].into_boxed_slice();

        let mut free_slots = RingBufferSimple::new(RingConfig::new(capacity, false));
        for index in 0..capacity {
            free_slots
                .put(index)
                .expect("freshly constructed ring can hold exactly `capacity` slots");
        }

        Self {
            arena,
            free_slots: Mutex::new(free_slots),
            counters: PackedCounters::new(u32::try_from(capacity).unwrap_or(u32::MAX)),
            padded_element_size,
            capacity,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn padded_element_size(&self) -> usize {
        self.padded_element_size
    }

    /// Checks out a free slot, zeroing its bytes before returning.
    ///
    /// # Errors
    /// [`CoreError::Exhausted`] if every slot is currently checked out.
    pub(crate) fn get_raw_block(&self) -> Result<RawBlock> {
        let (index, free_after) = {
            let mut guard = self.free_slots.lock()?;
            let index = guard.get().map_err(|_| {
                tracing::warn!(capacity = self.capacity, "pool exhausted");
                CoreError::Exhausted { capacity: self.capacity }
            })?;
            (index, guard.len())
        };

        let snapshot = self.counters.decrement_tracking_low();
        debug_assert_low_watermark_bound!(snapshot.extreme, snapshot.running_count);
        debug_assert_pool_conserves_capacity!(
            snapshot.running_count as usize,
            free_after,
            self.capacity
        );

        // SAFETY: `index` was just taken from the free list, so no other
        // owner holds a reference to this slot right now.
        unsafe {
            std::ptr::write_bytes(self.slot_ptr(index), 0, self.padded_element_size);
        }

        Ok(RawBlock { index })
    }

    /// Returns a slot to the free list. Infallible: the free list can never
    /// overflow because every outstanding block originated from it.
    pub(crate) fn return_raw_block(&self, block: RawBlock) {
        let free_after = {
            let mut guard = self
                .free_slots
                .lock()
                .expect("pool internal mutex should never be poisoned in correct use");
            guard
                .put(block.index)
                .expect("returning a checked-out slot can never overflow the free list");
            guard.len()
        };
        let snapshot = self.counters.increment();
        debug_assert_pool_conserves_capacity!(
            snapshot.running_count as usize,
            free_after,
            self.capacity
        );
    }

    /// The byte address of `block`'s slot within the arena.
    ///
    /// # Safety
    /// `block.index` must be a slot currently checked out to the caller (not
    /// resident in the free list), so no other owner aliases the resulting pointer.
    pub(crate) unsafe fn slot_ptr(&self, index: usize) -> *mut u8 {
        self.arena.as_ptr().add(index * self.padded_element_size).cast_mut()
    }

    /// Recovers the slot index backing `ptr`, the inverse of `slot_ptr`.
    ///
    /// # Panics
    /// If `ptr` does not fall within this pool's arena.
    pub(crate) fn index_of(&self, ptr: *mut u8) -> usize {
        let base = self.arena.as_ptr() as usize;
        let addr = ptr as usize;
        let offset = addr
            .checked_sub(base)
            .expect("pointer does not belong to this pool's arena");
        offset / self.padded_element_size
    }

    pub(crate) fn stats(&self) -> PoolStats {
        let snapshot = self.counters.snapshot();
        PoolStats {
            capacity: self.capacity,
            running_count: snapshot.running_count,
            low_watermark: snapshot.extreme,
        }
    }
}

/// Scoped commit guard: returns a checked-out block to the pool on drop
/// unless [`Self::defuse`] was called first. Used by [`object_pool`] and
/// [`block_pool`] so a construction failure partway through in-place
/// emplacement can't leak the slot.
pub(crate) struct BlockReturnGuard<'a> {
    pool: &'a MemoryPoolBase,
    block: Option<RawBlock>,
}

impl<'a> BlockReturnGuard<'a> {
    pub(crate) fn new(pool: &'a MemoryPoolBase, block: RawBlock) -> Self {
        Self { pool, block: Some(block) }
    }

    /// Commits: the block is now owned by a live handle, so drop must not
    /// return it to the free list.
    pub(crate) fn defuse(&mut self) {
        self.block.take();
    }
}

impl Drop for BlockReturnGuard<'_> {
    fn drop(&mut self) {
        if let Some(block) = self.block.take() {
            self.pool.return_raw_block(block);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_and_return_round_trip_preserves_capacity() {
        let pool = MemoryPoolBase::new(PoolConfig::new(4, 8));
        let blocks: Vec<_> = (0..4).map(|_| pool.get_raw_block().unwrap()).collect();
        assert!(matches!(
            pool.get_raw_block(),
            Err(CoreError::Exhausted { capacity: 4 })
        ));

        let stats = pool.stats();
        assert_eq!(stats.running_count, 0);
        assert_eq!(stats.low_watermark, 0);

        for block in blocks {
            pool.return_raw_block(block);
        }
        let stats = pool.stats();
        assert_eq!(stats.running_count, 4);
        assert_eq!(stats.low_watermark, 0);
    }

    #[test]
    fn blocks_are_zeroed_on_checkout() {
        let pool = MemoryPoolBase::new(PoolConfig::new(2, 8));
        let block = pool.get_raw_block().unwrap();
        let bytes =
            unsafe { std::slice::from_raw_parts(pool.slot_ptr(block.index), pool.padded_element_size) };
        assert!(bytes.iter().all(|&b| b == 0));
        pool.return_raw_block(block);
    }
}
