//! A pool that in-place constructs exactly one `T` per checked-out slot.
//!
//! This only handles the monomorphic case: constructing a `T` into a slot
//! sized for that same `T`. A polymorphic pool — constructing some `D` into
//! a slot sized for a trait object base `T: ?Sized` — needs unsized-coercion
//! machinery (`CoerceUnsized`/`Unsize`) that is nightly-only on an
//! unconstrained generic `T`, so it has no stable equivalent here. The one
//! place this crate actually needs polymorphic in-place construction —
//! [`crate::message::MessageBase`] trait objects inside
//! [`crate::queue::MessageQueue`] — is implemented directly against that one
//! concrete trait, where the unsized coercion is ordinary and stable (see
//! DESIGN.md).

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::{BlockReturnGuard, MemoryPoolBase, PoolStats};
use crate::config::PoolConfig;
use crate::error::{CoreError, Result};
use crate::handles::ObjectHandle;

/// A fixed-capacity pool of in-place-constructed `T`s.
pub struct ObjectPool<T> {
    base: Arc<MemoryPoolBase>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: 'static> ObjectPool<T> {
    /// Constructs a pool with room for `capacity` live `T`s at once.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let config = PoolConfig::new(capacity, std::mem::size_of::<T>());
        Self {
            base: Arc::new(MemoryPoolBase::new(config)),
            _marker: std::marker::PhantomData,
        }
    }

    /// Checks out a slot and move-constructs `value` into it.
    ///
    /// # Errors
    /// [`CoreError::Exhausted`] if every slot is checked out.
    /// [`CoreError::ElementSizeError`] if `T` doesn't fit the pool's slots
    /// (only possible if this pool was built with a smaller `T` than the one
    /// requested here, which the type parameter otherwise rules out).
    pub fn create(&self, value: T) -> Result<ObjectHandle<T>> {
        self.create_with(move || value)
    }

    /// As [`Self::create`], but constructs via a closure run under a
    /// `catch_unwind`. If `ctor` panics, the checked-out slot is returned to
    /// the pool before the panic payload is surfaced as
    /// [`CoreError::UserPanic`].
    pub fn create_with<F>(&self, ctor: F) -> Result<ObjectHandle<T>>
    where
        F: FnOnce() -> T,
    {
        let requested = std::mem::size_of::<T>();
        let padded = self.base.padded_element_size();
        if requested > padded {
            return Err(CoreError::ElementSizeError {
                requested,
                capacity: padded,
            });
        }

        let block = self.base.get_raw_block()?;
        let mut guard = BlockReturnGuard::new(&self.base, block);
        // SAFETY: `block` was just checked out, so no other owner aliases this slot.
        let ptr = unsafe { self.base.slot_ptr(block.index) }.cast::<T>();

        match catch_unwind(AssertUnwindSafe(ctor)) {
            Ok(value) => {
                // SAFETY: `ptr` points at `padded >= size_of::<T>()` freshly
                // zeroed, exclusively-owned bytes.
                unsafe { ptr.write(value) };
                guard.defuse();
                Ok(ObjectHandle::new(Arc::clone(&self.base), block, ptr))
            }
            Err(payload) => {
                tracing::warn!("object pool constructor panicked; slot rolled back");
                Err(CoreError::UserPanic(payload))
            }
        }
    }

    /// `{capacity, running_count, low_watermark}` snapshot.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.base.stats()
    }
}
