//! A bounded, power-of-two circular buffer over scalar slots.
//!
//! `RingBufferSimple` is **not** thread-safe on its own: it is the inner
//! machinery that [`crate::ring_guarded::RingBufferGuarded`] wraps with a
//! semaphore to get safe concurrent single-producer/single-consumer access.
//! Used bare, it is for callers who already serialize access some other way.

use std::mem::MaybeUninit;

use crate::config::RingConfig;
use crate::error::{CoreError, Result};
use crate::invariants::debug_assert_ring_bounded;

/// A scalar-slot ring buffer that raises on overflow/underflow rather than
/// blocking.
///
/// `T` is expected to be a small `Copy`-ish scalar (an integer, or an opaque
/// pointer/address used as a slot handle). For heterogeneous payloads, use a
/// pointer-typed ring and let the owner carry the type.
pub struct RingBufferSimple<T> {
    slots: Box<[MaybeUninit<T>]>,
    mask: usize,
    /// `u32::MAX`-initialized wrapping counter: the first `put` advances this
    /// to 0.
    get_count: u32,
    put_count: u32,
}

impl<T> RingBufferSimple<T> {
    /// Constructs a ring with `config.capacity()` slots, all empty.
    #[must_use]
    pub fn new(config: RingConfig) -> Self {
        let capacity = config.capacity();
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, MaybeUninit::uninit);
        Self {
            slots: slots.into_boxed_slice(),
            mask: config.mask(),
            get_count: u32::MAX,
            put_count: u32::MAX,
        }
    }

    /// Backing capacity (always a power of two in `[2, 2^20]`).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Number of items currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        (self.put_count.wrapping_sub(self.get_count)) as usize
    }

    /// Whether the ring holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the ring is at capacity.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() > self.mask
    }

    /// Removes and returns the oldest item.
    ///
    /// # Errors
    /// [`CoreError::Underflow`] if the ring is empty.
    pub fn get(&mut self) -> Result<T> {
        if self.is_empty() {
            return Err(CoreError::underflow("RingBufferSimple::get on empty ring"));
        }
        self.get_count = self.get_count.wrapping_add(1);
        let index = (self.get_count as usize) & self.mask;
        // SAFETY: `index` holds a value published by a prior `put` that has
        // not yet been consumed by `get` (occupancy accounting above proves
        // this slot is in the initialized range).
        let value = unsafe { self.slots[index].assume_init_read() };
        debug_assert_ring_bounded!(self.len(), self.mask + 1);
        Ok(value)
    }

    /// Appends `value` as the newest item.
    ///
    /// # Errors
    /// [`CoreError::Overflow`] if the ring is full.
    pub fn put(&mut self, value: T) -> Result<()> {
        if self.is_full() {
            return Err(CoreError::overflow("RingBufferSimple::put on full ring"));
        }
        self.put_count = self.put_count.wrapping_add(1);
        let index = (self.put_count as usize) & self.mask;
        self.slots[index] = MaybeUninit::new(value);
        debug_assert_ring_bounded!(self.len(), self.mask + 1);
        Ok(())
    }
}

impl<T> Drop for RingBufferSimple<T> {
    fn drop(&mut self) {
        // Drain and drop any items still resident so `T: Drop` types don't leak.
        while !self.is_empty() {
            let _ = self.get();
        }
    }
}
