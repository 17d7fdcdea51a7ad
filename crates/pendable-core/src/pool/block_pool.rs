//! A pool that in-place default-constructs an array of `N` `T`s per
//! checked-out slot, returned as one [`ArrayHandle`].
//!
//! A type whose `Default::default()` can panic partway through the array
//! needs the already-constructed prefix destroyed and the slot rolled back.
//! `T::default()` is cheap for scalar types too (it's just writing zero over
//! already-zero bytes), so one loop handles both cases; what differs between
//! them is only whether `T::default()` can panic.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::{BlockReturnGuard, MemoryPoolBase, PoolStats};
use crate::config::PoolConfig;
use crate::error::{CoreError, Result};
use crate::handles::ArrayHandle;

/// A fixed-capacity pool of in-place-constructed `[T; N]` blocks.
pub struct BlockPool<T, const N: usize> {
    base: Arc<MemoryPoolBase>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: Default + 'static, const N: usize> BlockPool<T, N> {
    /// Constructs a pool with room for `capacity` live blocks of `N` `T`s at once.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let config = PoolConfig::new(capacity, std::mem::size_of::<T>() * N);
        Self {
            base: Arc::new(MemoryPoolBase::new(config)),
            _marker: std::marker::PhantomData,
        }
    }

    /// Checks out a slot and default-constructs all `N` elements in order.
    ///
    /// If `T::default()` panics partway through, every element constructed so
    /// far is destroyed (in reverse order) before the slot is returned and
    /// the panic payload surfaces as [`CoreError::UserPanic`] — no destructor
    /// ever runs on an uninitialized element.
    ///
    /// # Errors
    /// [`CoreError::Exhausted`] if every slot is checked out.
    pub fn get_block(&self) -> Result<ArrayHandle<T, N>> {
        let block = self.base.get_raw_block()?;
        let mut guard = BlockReturnGuard::new(&self.base, block);
        // SAFETY: `block` was just checked out, so no other owner aliases this slot.
        let ptr = unsafe { self.base.slot_ptr(block.index) }.cast::<T>();

        for i in 0..N {
            match catch_unwind(AssertUnwindSafe(T::default)) {
                // SAFETY: slot `i` of `N` freshly zeroed, exclusively-owned elements.
                Ok(value) => unsafe { ptr.add(i).write(value) },
                Err(payload) => {
                    for j in (0..i).rev() {
                        // SAFETY: elements `0..i` were constructed above and
                        // nothing else has touched them since.
                        unsafe { std::ptr::drop_in_place(ptr.add(j)) };
                    }
                    drop(guard);
                    return Err(CoreError::UserPanic(payload));
                }
            }
        }

        guard.defuse();
        Ok(ArrayHandle::new(Arc::clone(&self.base), block, ptr))
    }

    /// `{capacity, running_count, low_watermark}` snapshot.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.base.stats()
    }
}
