//! Owning smart handles returned by the pools: RAII wrappers that run the
//! element's destructor and return its slot to the pool on drop — "the drop
//! is the commit" pattern, applied to an arena slot instead of a ring slot.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::pool::{MemoryPoolBase, RawBlock};

/// An owning handle to a single in-place-constructed `T` living in a pool's
/// arena. Dropping it runs `T`'s destructor and returns the slot.
pub struct ObjectHandle<T> {
    pool: Arc<MemoryPoolBase>,
    block: Option<RawBlock>,
    ptr: *mut T,
}

impl<T> ObjectHandle<T> {
    pub(crate) fn new(pool: Arc<MemoryPoolBase>, block: RawBlock, ptr: *mut T) -> Self {
        Self { pool, block: Some(block), ptr }
    }
}

impl<T> Deref for ObjectHandle<T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: `ptr` was written by `ObjectPool::create_with` and remains
        // live until this handle's `Drop`, which is the only other place that
        // touches it.
        unsafe { &*self.ptr }
    }
}

impl<T> DerefMut for ObjectHandle<T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see `Deref`; `&mut self` here proves exclusive access.
        unsafe { &mut *self.ptr }
    }
}

impl<T> Drop for ObjectHandle<T> {
    fn drop(&mut self) {
        if let Some(block) = self.block.take() {
            // SAFETY: `ptr` points at a live, fully-constructed `T` that
            // nothing else references once this handle is being dropped.
            unsafe { std::ptr::drop_in_place(self.ptr) };
            self.pool.return_raw_block(block);
        }
    }
}

// SAFETY: the handle provides exclusive access to its `T`, so sending it
// across threads is sound exactly when `T` itself is `Send`.
unsafe impl<T: Send> Send for ObjectHandle<T> {}
unsafe impl<T: Sync> Sync for ObjectHandle<T> {}

/// An owning handle to a block of `N` in-place-constructed `T`s living in a
/// pool's arena, as returned by [`crate::pool::block_pool::BlockPool`].
/// Dropping it destroys all `N` elements (in reverse construction order) and
/// returns the slot.
pub struct ArrayHandle<T, const N: usize> {
    pool: Arc<MemoryPoolBase>,
    block: Option<RawBlock>,
    ptr: *mut T,
}

impl<T, const N: usize> ArrayHandle<T, N> {
    pub(crate) fn new(pool: Arc<MemoryPoolBase>, block: RawBlock, ptr: *mut T) -> Self {
        Self { pool, block: Some(block), ptr }
    }

    /// The number of elements in the block (the `N` type parameter, as a value).
    #[must_use]
    pub fn len(&self) -> usize {
        N
    }

    /// Whether the block is empty — always `false` since `N >= 1` in practice,
    /// provided for API symmetry with slice-like types.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        N == 0
    }

    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        // SAFETY: `N` elements were constructed by `BlockPool::get_block` and
        // remain live until `Drop`.
        unsafe { std::slice::from_raw_parts(self.ptr, N) }
    }

    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: see `as_slice`; `&mut self` proves exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, N) }
    }
}

impl<T, const N: usize> Deref for ArrayHandle<T, N> {
    type Target = [T];
    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T, const N: usize> DerefMut for ArrayHandle<T, N> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.as_mut_slice()
    }
}

impl<T, const N: usize> Drop for ArrayHandle<T, N> {
    fn drop(&mut self) {
        if let Some(block) = self.block.take() {
            for i in (0..N).rev() {
                // SAFETY: all `N` elements were constructed and none have
                // been touched since; dropping in reverse construction order.
                unsafe { std::ptr::drop_in_place(self.ptr.add(i)) };
            }
            self.pool.return_raw_block(block);
        }
    }
}

unsafe impl<T: Send, const N: usize> Send for ArrayHandle<T, N> {}
unsafe impl<T: Sync, const N: usize> Sync for ArrayHandle<T, N> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::pool::MemoryPoolBase;

    #[test]
    fn object_handle_runs_destructor_and_returns_slot() {
        use std::rc::Rc;
        struct Droppy(Rc<()>);
        impl Drop for Droppy {
            fn drop(&mut self) {}
        }

        let pool = Arc::new(MemoryPoolBase::new(PoolConfig::new(2, std::mem::size_of::<Droppy>())));
        let marker = Rc::new(());
        let block = pool.get_raw_block().unwrap();
        // SAFETY: test-only direct use of the crate-private pool API.
        let ptr = unsafe { pool.slot_ptr(block.index) }.cast::<Droppy>();
        unsafe { ptr.write(Droppy(Rc::clone(&marker))) };
        let handle = ObjectHandle::new(Arc::clone(&pool), block, ptr);

        assert_eq!(Rc::strong_count(&marker), 2);
        drop(handle);
        assert_eq!(Rc::strong_count(&marker), 1);
        assert_eq!(pool.stats().running_count, 2);
    }

    #[test]
    fn array_handle_exposes_len_and_slice() {
        let pool = Arc::new(MemoryPoolBase::new(PoolConfig::new(1, std::mem::size_of::<[u32; 4]>())));
        let block = pool.get_raw_block().unwrap();
        let ptr = unsafe { pool.slot_ptr(block.index) }.cast::<u32>();
        for i in 0..4u32 {
            unsafe { ptr.add(i as usize).write(i) };
        }
        let handle: ArrayHandle<u32, 4> = ArrayHandle::new(Arc::clone(&pool), block, ptr);
        assert_eq!(handle.len(), 4);
        assert_eq!(&*handle, &[0, 1, 2, 3]);
    }
}
