//! A bounded MPSC message queue composing a message arena with two guarded
//! rings: a "raw" ring of free slots and a "cooked" ring of constructed,
//! ready-to-dispatch messages.
//!
//! Reservation, in-place construction, and dispatch are three separate
//! steps (`reserve_put` / `emplace_on_reserved` / `get_and_dispatch`) so a
//! caller can build a message directly into its final slot instead of
//! constructing it elsewhere and copying it in. Dispatch can optionally be
//! serialized against an external caller via a held-open mutex
//! (`auto_dispatch_lock`).

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::sync::{Arc, MutexGuard};

use crate::config::QueueConfig;
use crate::error::{CoreError, Result};
use crate::invariants::{debug_assert_high_watermark_bound, debug_assert_queue_conserves_capacity};
use crate::message::MessageBase;
use crate::mutex::Mutex;
use crate::pool::MemoryPoolBase;
use crate::ring_guarded::RingBufferGuarded;
use crate::stats::PackedCounters;

/// A `{capacity, running_count, high_watermark}` snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    /// Total number of message slots the queue was constructed with.
    pub capacity: usize,
    /// Messages currently reserved, in flight, or awaiting dispatch.
    pub running_count: u32,
    /// The highest `running_count` has reached since construction.
    pub high_watermark: u32,
}

/// A trait object pointer into a message slot, newtype-wrapped so it can
/// travel through a [`RingBufferGuarded`] (raw pointers aren't `Send` by
/// default; this one is, because the ring hands each value to exactly one
/// consumer at a time — see the `unsafe impl` below).
struct CookedSlot(*mut dyn MessageBase);

// SAFETY: a `CookedSlot` is produced by exactly one producer
// (`emplace_on_reserved`) and consumed by exactly one consumer
// (`get_and_dispatch`/`purge`), handed off through the cooked ring's own
// synchronization; no two threads ever hold the same `CookedSlot` at once.
unsafe impl Send for CookedSlot {}

/// Best-effort diagnostic: the `name()` of the most recently dispatched
/// message, as a `(pointer, length)` pair into a `'static` string. Readers
/// only need eventual visibility, so the pair is updated/read with
/// `Release`/`Acquire` on the pointer and `Relaxed` on the length — a reader
/// racing a writer may observe a length that doesn't match the pointer's
/// *previous* string, which is a display glitch, not unsafety, since every
/// value either atomic has ever held originated from a `&'static str`.
struct LastDispatchedName {
    ptr: AtomicPtr<u8>,
    len: AtomicUsize,
}

impl LastDispatchedName {
    fn new(initial: &'static str) -> Self {
        Self {
            ptr: AtomicPtr::new(initial.as_ptr().cast_mut()),
            len: AtomicUsize::new(initial.len()),
        }
    }

    fn store(&self, s: &'static str) {
        self.len.store(s.len(), Ordering::Relaxed);
        self.ptr.store(s.as_ptr().cast_mut(), Ordering::Release);
    }

    fn snapshot(&self) -> &'static str {
        let ptr = self.ptr.load(Ordering::Acquire);
        let len = self.len.load(Ordering::Relaxed);
        // SAFETY: every `(ptr, len)` ever stored came from a `&'static str`
        // via `store`, so the slice is valid UTF-8 for the `'static` lifetime.
        unsafe { std::str::from_utf8_unchecked(std::slice::from_raw_parts(ptr, len)) }
    }
}

struct QueueInner {
    pool: MemoryPoolBase,
    raw_ring: RingBufferGuarded<usize>,
    cooked_ring: RingBufferGuarded<CookedSlot>,
    dispatch_mutex: Option<Mutex<()>>,
    aborted: AtomicBool,
    counters: PackedCounters,
    last_dispatched_name: LastDispatchedName,
}

/// A reservation for one message slot, obtained from
/// [`MessageQueue::reserve_put`]. Must be consumed by
/// [`MessageQueue::emplace_on_reserved`]; if dropped unconsumed (the producer
/// gave up), the slot and the watermark accounting are rolled back.
pub struct ReservedPut {
    queue: Arc<QueueInner>,
    slot: Option<usize>,
}

impl Drop for ReservedPut {
    fn drop(&mut self) {
        if let Some(index) = self.slot.take() {
            if !self.queue.aborted.load(Ordering::Acquire) {
                let _ = self.queue.raw_ring.put(index);
                self.queue.counters.decrement();
            }
        }
    }
}

/// Held while a consumer is inside [`MessageQueue::get_and_dispatch`], when
/// the queue was constructed with `enable_dispatch_locking`. Returned by
/// [`MessageQueue::auto_dispatch_lock`] for a caller that wants to serialize
/// its own work against message dispatch.
pub type DispatchLockGuard<'a> = MutexGuard<'a, ()>;

/// A bounded, multi-producer single-consumer message queue.
///
/// Cloning shares the same underlying queue (it's an `Arc` handle), so each
/// producer/consumer thread can hold its own cheap clone.
#[derive(Clone)]
pub struct MessageQueue {
    inner: Arc<QueueInner>,
}

impl MessageQueue {
    /// Checks `raw_ring + cooked_ring + in_flight <= capacity`, where
    /// `in_flight` is whatever `running_count` doesn't yet account for as
    /// cooked (i.e. reservations still being emplaced or dispatched).
    fn debug_assert_conserves_capacity(&self, running_count: u32) {
        let raw_len = self.inner.raw_ring.len_hint();
        let cooked_len = self.inner.cooked_ring.len_hint();
        let in_flight = (running_count as usize).saturating_sub(cooked_len);
        debug_assert_queue_conserves_capacity!(
            raw_len,
            cooked_len,
            in_flight,
            self.inner.pool.capacity()
        );
    }

    /// Constructs a queue per `config`: `config.capacity()` message slots,
    /// each padded to `config.padded_max_message_size()` bytes.
    #[must_use]
    pub fn new(config: QueueConfig) -> Self {
        let capacity = config.capacity();
        let pool_config =
            crate::config::PoolConfig::new(capacity, config.requested_max_message_size);
        let pool = MemoryPoolBase::new(pool_config);

        let raw_ring = RingBufferGuarded::new(crate::config::RingConfig::new(capacity, true));
        raw_ring
            .prime(|i| i)
            .expect("priming a freshly constructed ring cannot fail");

        let cooked_ring = RingBufferGuarded::new(crate::config::RingConfig::new(capacity, false));

        let dispatch_mutex = config.enable_dispatch_locking.then(|| Mutex::new(()));

        Self {
            inner: Arc::new(QueueInner {
                pool,
                raw_ring,
                cooked_ring,
                dispatch_mutex,
                aborted: AtomicBool::new(false),
                counters: PackedCounters::new(0),
                last_dispatched_name: LastDispatchedName::new("Unforgiven"),
            }),
        }
    }

    /// Blocks until a message slot is free, then reserves it.
    ///
    /// # Errors
    /// [`CoreError::Aborted`] if the queue was (or becomes) aborted.
    #[tracing::instrument(skip(self))]
    pub fn reserve_put(&self) -> Result<ReservedPut> {
        let index = self.inner.raw_ring.get()?;
        let snapshot = self.inner.counters.increment_tracking_high();
        debug_assert_high_watermark_bound!(snapshot.extreme, snapshot.running_count);
        self.debug_assert_conserves_capacity(snapshot.running_count);
        Ok(ReservedPut {
            queue: Arc::clone(&self.inner),
            slot: Some(index),
        })
    }

    /// Constructs `M` in `reserved`'s slot via `ctor`, then publishes it to
    /// the cooked ring for a consumer to dispatch.
    ///
    /// If `ctor` panics or `M` doesn't fit the queue's padded message size,
    /// the slot is rolled back (as if `reserved` had simply been dropped
    /// unconsumed) and the failure propagates.
    ///
    /// # Errors
    /// [`CoreError::ElementSizeError`] if `size_of::<M>()` exceeds the
    /// queue's padded message size. [`CoreError::UserPanic`] if `ctor` panics.
    pub fn emplace_on_reserved<M, F>(&self, mut reserved: ReservedPut, ctor: F) -> Result<()>
    where
        M: MessageBase + 'static,
        F: FnOnce() -> M,
    {
        let index = reserved
            .slot
            .take()
            .expect("a ReservedPut always holds a slot until consumed or dropped");

        let requested = std::mem::size_of::<M>();
        let padded = self.inner.pool.padded_element_size();
        if requested > padded {
            let _ = self.inner.raw_ring.put(index);
            self.inner.counters.decrement();
            return Err(CoreError::ElementSizeError {
                requested,
                capacity: padded,
            });
        }

        // SAFETY: `index` is exclusively owned by this reservation.
        let raw_ptr = unsafe { self.inner.pool.slot_ptr(index) }.cast::<M>();

        match catch_unwind(AssertUnwindSafe(ctor)) {
            Ok(message) => {
                // SAFETY: `raw_ptr` points at `padded >= size_of::<M>()`
                // freshly zeroed, exclusively-owned bytes.
                unsafe { raw_ptr.write(message) };
                // `M` is a concrete, named type here (not a generic `T`), so
                // this unsized coercion to `*mut dyn MessageBase` is ordinary
                // stable Rust — see the module doc on why `pool::object_pool`
                // can't do the same thing generically.
                let trait_ptr: *mut dyn MessageBase = raw_ptr;
                self.inner.cooked_ring.put(CookedSlot(trait_ptr))?;
                self.debug_assert_conserves_capacity(self.inner.counters.snapshot().running_count);
                Ok(())
            }
            Err(payload) => {
                let _ = self.inner.raw_ring.put(index);
                self.inner.counters.decrement();
                Err(CoreError::UserPanic(payload))
            }
        }
    }

    /// Convenience: `reserve_put` followed by `emplace_on_reserved` with a
    /// move of `message`.
    ///
    /// # Errors
    /// See [`Self::reserve_put`] and [`Self::emplace_on_reserved`].
    pub fn put<M: MessageBase + 'static>(&self, message: M) -> Result<()> {
        let reserved = self.reserve_put()?;
        self.emplace_on_reserved(reserved, move || message)
    }

    /// Blocks until a cooked message is available, dispatches it, then runs
    /// cleanup (destructor + slot return) regardless of whether dispatch
    /// panicked.
    ///
    /// # Errors
    /// [`CoreError::Aborted`] if the queue was (or becomes) aborted.
    /// [`CoreError::UserPanic`] if the message's `dispatch` panicked — the
    /// slot is still cleaned up before this is returned.
    #[tracing::instrument(skip(self))]
    pub fn get_and_dispatch(&self) -> Result<()> {
        self.get_and_dispatch_with(None::<fn()>)
    }

    /// As [`Self::get_and_dispatch`], calling `wakeup` (if any) right after a
    /// message is claimed but before dispatching it — e.g. to signal a
    /// companion thread that this consumer is now busy.
    ///
    /// # Errors
    /// See [`Self::get_and_dispatch`].
    #[tracing::instrument(skip(self, wakeup))]
    pub fn get_and_dispatch_with<F: FnOnce()>(&self, wakeup: Option<F>) -> Result<()> {
        let CookedSlot(trait_ptr) = self.inner.cooked_ring.get()?;
        // SAFETY: `trait_ptr` was published by `emplace_on_reserved` and has
        // not yet been claimed by any other `get`.
        let message: &mut dyn MessageBase = unsafe { &mut *trait_ptr };
        self.inner.last_dispatched_name.store(message.name());

        if let Some(f) = wakeup {
            f();
        }

        let dispatch_guard = match &self.inner.dispatch_mutex {
            Some(lock) => Some(lock.lock()?),
            None => None,
        };
        let dispatch_result = catch_unwind(AssertUnwindSafe(|| message.dispatch()));
        drop(dispatch_guard);
        if dispatch_result.is_err() {
            tracing::warn!(
                name = self.inner.last_dispatched_name.snapshot(),
                "message dispatch panicked"
            );
        }

        let index = self.inner.pool.index_of(trait_ptr.cast());
        // SAFETY: this consumer holds the only reference to `trait_ptr`;
        // dispatch (however it ended) has returned, so the value is no
        // longer in use.
        unsafe { std::ptr::drop_in_place(trait_ptr) };
        let snapshot = self.inner.counters.decrement();
        self.inner.raw_ring.put(index)?;
        self.debug_assert_conserves_capacity(snapshot.running_count);

        dispatch_result.map_err(CoreError::UserPanic)
    }

    /// Drains the cooked ring of whatever is currently resident, destroying
    /// each message without dispatching it and returning its slot. Safe to
    /// call on an empty queue, and safe to call both before and after
    /// [`Self::abort`].
    ///
    /// # Errors
    /// [`CoreError::StateError`] if called before the queue finishes
    /// constructing internally (never observable from outside this module).
    pub fn purge(&self) -> Result<()> {
        while let Some(CookedSlot(trait_ptr)) = self.inner.cooked_ring.try_get()? {
            // SAFETY: see `get_and_dispatch`; `try_get` hands off exclusive
            // ownership the same way `get` does.
            unsafe { std::ptr::drop_in_place(trait_ptr) };
            let index = self.inner.pool.index_of(trait_ptr.cast());
            let snapshot = self.inner.counters.decrement();
            // Best-effort: if the raw ring is already Terminal (abort ran
            // concurrently), there's nothing useful left to put it back into.
            let _ = self.inner.raw_ring.put(index);
            self.debug_assert_conserves_capacity(snapshot.running_count);
        }
        Ok(())
    }

    /// Irreversibly aborts the queue: every blocked or future `reserve_put` /
    /// `get_and_dispatch` fails with [`CoreError::Aborted`]. Idempotent.
    pub fn abort(&self) {
        self.inner.aborted.store(true, Ordering::Release);
        self.inner.raw_ring.abort();
        self.inner.cooked_ring.abort();
        tracing::debug!(capacity = self.inner.pool.capacity(), "message queue aborted");
    }

    /// Whether `abort` has been called.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::Acquire)
    }

    /// Acquires the dispatch-serialization lock held by `get_and_dispatch`
    /// while a message is being dispatched — for a caller that wants to
    /// perform its own work mutually exclusive with dispatch.
    ///
    /// # Errors
    /// [`CoreError::DispatchLockingDisabled`] if this queue was constructed
    /// with `enable_dispatch_locking = false`.
    pub fn auto_dispatch_lock(&self) -> Result<DispatchLockGuard<'_>> {
        self.inner
            .dispatch_mutex
            .as_ref()
            .ok_or(CoreError::DispatchLockingDisabled)?
            .lock()
    }

    /// `{capacity, running_count, high_watermark}` snapshot.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let snapshot = self.inner.counters.snapshot();
        QueueStats {
            capacity: self.inner.pool.capacity(),
            running_count: snapshot.running_count,
            high_watermark: snapshot.extreme,
        }
    }

    /// The `name()` of the most recently dispatched message, or
    /// `"Unforgiven"` if none has dispatched yet.
    #[must_use]
    pub fn last_dispatched_name(&self) -> &'static str {
        self.inner.last_dispatched_name.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use std::sync::atomic::AtomicU32;
    use std::thread;

    struct Increment<'a>(&'a AtomicU32);
    impl MessageBase for Increment<'_> {
        fn dispatch(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        fn name(&self) -> &'static str {
            "Increment"
        }
    }

    #[test]
    fn put_and_get_and_dispatch_round_trip() {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let queue = MessageQueue::new(QueueConfig::new(4, 32, false));
        queue.put(Increment(&COUNTER)).unwrap();
        queue.get_and_dispatch().unwrap();
        assert_eq!(COUNTER.load(Ordering::SeqCst), 1);
        assert_eq!(queue.last_dispatched_name(), "Increment");
        assert_eq!(queue.stats().running_count, 0);
    }

    /// S4-shaped smoke test: several producer threads put messages
    /// concurrently while one consumer thread drains and dispatches them.
    #[test]
    fn concurrent_producers_single_consumer() {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 256;

        let queue = MessageQueue::new(QueueConfig::new(16, 32, false));
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || {
                for _ in 0..PRODUCERS * PER_PRODUCER {
                    queue.get_and_dispatch().unwrap();
                }
            })
        };

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|_| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for _ in 0..PER_PRODUCER {
                        queue.put(Increment(&COUNTER)).unwrap();
                    }
                })
            })
            .collect();

        for p in producers {
            p.join().unwrap();
        }
        consumer.join().unwrap();

        assert_eq!(COUNTER.load(Ordering::SeqCst) as usize, PRODUCERS * PER_PRODUCER);
        assert_eq!(queue.stats().running_count, 0);
    }

    /// S5 — dispatch locking serializes `get_and_dispatch` against a caller
    /// holding `auto_dispatch_lock`.
    #[test]
    fn auto_dispatch_lock_serializes_against_dispatch() {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let queue = MessageQueue::new(QueueConfig::new(4, 32, true));
        queue.put(Increment(&COUNTER)).unwrap();

        {
            let _guard = queue.auto_dispatch_lock().unwrap();
            // While held, a concurrent get_and_dispatch would block on this
            // same mutex before touching the message; verify sequentially
            // that the guard type is usable and releases cleanly.
        }
        queue.get_and_dispatch().unwrap();
        assert_eq!(COUNTER.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn auto_dispatch_lock_rejected_when_disabled() {
        let queue = MessageQueue::new(QueueConfig::new(4, 32, false));
        assert!(matches!(
            queue.auto_dispatch_lock(),
            Err(CoreError::DispatchLockingDisabled)
        ));
    }

    /// S6 — purge drains cooked messages without dispatching them, before
    /// any consumer runs, and is safe to call again on an empty queue.
    #[test]
    fn s6_purge_drains_without_dispatching() {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let queue = MessageQueue::new(QueueConfig::new(4, 32, false));
        queue.put(Increment(&COUNTER)).unwrap();
        queue.put(Increment(&COUNTER)).unwrap();

        queue.purge().unwrap();
        assert_eq!(COUNTER.load(Ordering::SeqCst), 0);
        assert_eq!(queue.stats().running_count, 0);

        // Safe on an already-empty queue.
        queue.purge().unwrap();
    }

    #[test]
    fn abort_unblocks_a_blocked_reserve_put() {
        let queue = MessageQueue::new(QueueConfig::new(2, 32, false));
        let _a = queue.reserve_put().unwrap();
        let _b = queue.reserve_put().unwrap();

        let waiter = {
            let queue = queue.clone();
            thread::spawn(move || queue.reserve_put().map(|_| ()))
        };
        thread::sleep(std::time::Duration::from_millis(20));
        queue.abort();
        assert!(matches!(waiter.join().unwrap(), Err(CoreError::Aborted)));
    }

    #[test]
    fn oversized_message_rolls_back_the_reservation() {
        struct Oversized([u8; 64]);
        impl MessageBase for Oversized {
            fn dispatch(&mut self) {}
        }

        let queue = MessageQueue::new(QueueConfig::new(4, 8, false));
        let reserved = queue.reserve_put().unwrap();
        let result = queue.emplace_on_reserved(reserved, || Oversized([0; 64]));
        assert!(matches!(result, Err(CoreError::ElementSizeError { .. })));
        assert_eq!(queue.stats().running_count, 0);
    }
}
