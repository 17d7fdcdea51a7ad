//! A ring buffer guarded by a [`Semaphore`] so `get()` blocks on empty instead
//! of raising `Underflow`, plus a priming/flushing lifecycle for controlled
//! startup and teardown.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::config::RingConfig;
use crate::error::{CoreError, Result};
use crate::ring_simple::RingBufferSimple;
use crate::semaphore::Semaphore;

/// The guarded ring's lifecycle. Transitions are one-directional toward
/// `Terminal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardedRingState {
    /// Constructed with `will_prime = true`; must receive exactly one
    /// [`RingBufferGuarded::prime`] call before `get`/`put` are usable.
    NeedsPriming,
    /// Usable for `get`/`put`.
    Ready,
    /// Irreversibly aborted. Every further operation fails with `Aborted`.
    Terminal,
}

impl GuardedRingState {
    const fn from_tag(tag: u8) -> Self {
        match tag {
            0 => Self::NeedsPriming,
            1 => Self::Ready,
            _ => Self::Terminal,
        }
    }

    const fn tag(self) -> u8 {
        match self {
            Self::NeedsPriming => 0,
            Self::Ready => 1,
            Self::Terminal => 2,
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::NeedsPriming => "NeedsPriming",
            Self::Ready => "Ready",
            Self::Terminal => "Terminal",
        }
    }
}

/// A bounded ring buffer that blocks (rather than raises) when empty, wrapping
/// a [`RingBufferSimple`] with a [`Semaphore`] whose available count tracks
/// items ready for `get`.
///
/// `get`/`put` access the inner ring only from within the semaphore's own
/// `wait_with`/`notify_with` closures, which run under the semaphore's
/// internal lock — that lock is what serializes access to `inner`, not a
/// second mutex.
pub struct RingBufferGuarded<T> {
    inner: UnsafeCell<RingBufferSimple<T>>,
    sem: Semaphore,
    state: AtomicU8,
}

// SAFETY: all access to `inner` happens inside `sem.wait_with`/`notify_with`
// closures (mutually exclusive via the semaphore's own lock) or during
// `prime`/`flush`, which are only valid in lifecycle states (`NeedsPriming`,
// `Terminal`) that are mutually exclusive with concurrent `get`/`put` by
// construction of the state machine.
unsafe impl<T: Send> Send for RingBufferGuarded<T> {}
unsafe impl<T: Send> Sync for RingBufferGuarded<T> {}

impl<T> RingBufferGuarded<T> {
    /// Constructs a guarded ring. If `config.will_prime` the ring starts in
    /// [`GuardedRingState::NeedsPriming`] with its semaphore pre-loaded to
    /// `capacity` (so that, once primed, `capacity` items are immediately
    /// `get`-able); otherwise it starts `Ready` with an empty semaphore.
    #[must_use]
    pub fn new(config: RingConfig) -> Self {
        let capacity = config.capacity();
        let initial_count = if config.will_prime { capacity as u64 } else { 0 };
        let state = if config.will_prime {
            GuardedRingState::NeedsPriming
        } else {
            GuardedRingState::Ready
        };
        Self {
            inner: UnsafeCell::new(RingBufferSimple::new(config)),
            sem: Semaphore::new(initial_count),
            state: AtomicU8::new(state.tag()),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> GuardedRingState {
        GuardedRingState::from_tag(self.state.load(Ordering::Acquire))
    }

    /// Blocks until an item is available, then removes and returns it.
    ///
    /// # Errors
    /// [`CoreError::Aborted`] if aborted (at entry or while blocked).
    /// [`CoreError::StateError`] if called before priming completes.
    pub fn get(&self) -> Result<T> {
        match self.state() {
            GuardedRingState::NeedsPriming => {
                return Err(CoreError::StateError {
                    expected: GuardedRingState::Ready.name(),
                    found: GuardedRingState::NeedsPriming.name(),
                })
            }
            GuardedRingState::Terminal => return Err(CoreError::Aborted),
            GuardedRingState::Ready => {}
        }

        let inner_ptr = self.inner.get();
        self.sem
            // SAFETY: `wait_with` only invokes this closure while holding the
            // semaphore's internal lock, which is the sole synchronization for `inner`.
            .wait_with(|| unsafe { (*inner_ptr).get() })?
    }

    /// Stores `value` as the newest item and wakes one blocked `get` caller.
    ///
    /// A guarded ring filling up is treated as a fatal invariant violation
    /// (the semaphore sizing should make this unreachable in correct use)
    /// rather than an ordinary recoverable error: it is debug-asserted in
    /// addition to being propagated.
    ///
    /// # Errors
    /// [`CoreError::Aborted`] if aborted. [`CoreError::Overflow`] if the inner
    /// ring is unexpectedly full (see above).
    /// [`CoreError::StateError`] if called before priming completes.
    pub fn put(&self, value: T) -> Result<()> {
        match self.state() {
            GuardedRingState::NeedsPriming => {
                return Err(CoreError::StateError {
                    expected: GuardedRingState::Ready.name(),
                    found: GuardedRingState::NeedsPriming.name(),
                })
            }
            GuardedRingState::Terminal => return Err(CoreError::Aborted),
            GuardedRingState::Ready => {}
        }

        let inner_ptr = self.inner.get();
        let result = self
            .sem
            // SAFETY: see `get`.
            .notify_with(|| unsafe { (*inner_ptr).put(value) })?;

        if let Err(CoreError::Overflow { context }) = &result {
            debug_assert!(
                false,
                "guarded ring put overflowed despite semaphore sizing: {context}"
            );
        }
        result
    }

    /// Non-blocking `get`: if nothing is currently available, returns
    /// `Ok(None)` rather than waiting. Valid in `Ready` and `Terminal` (a
    /// `Terminal` ring can still be drained of whatever is left; there is
    /// simply nothing new arriving).
    ///
    /// # Errors
    /// [`CoreError::StateError`] if called before priming completes.
    pub fn try_get(&self) -> Result<Option<T>> {
        if self.state() == GuardedRingState::NeedsPriming {
            return Err(CoreError::StateError {
                expected: GuardedRingState::Ready.name(),
                found: GuardedRingState::NeedsPriming.name(),
            });
        }

        let inner_ptr = self.inner.get();
        match self.sem.try_wait_with(|| unsafe { (*inner_ptr).get() }) {
            Ok(Some(inner_result)) => inner_result.map(Some),
            Ok(None) => Ok(None),
            Err(CoreError::Aborted) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// One-time initial fill, valid only in [`GuardedRingState::NeedsPriming`].
    /// Calls `f(i)` for `i` in `0..capacity` and stores each result directly
    /// into the inner ring (bypassing the semaphore, whose count already
    /// reflects the primed capacity). Transitions to `Ready` on success.
    ///
    /// # Errors
    /// [`CoreError::StateError`] if not currently `NeedsPriming`.
    /// [`CoreError::Aborted`] if `abort()` is observed mid-prime.
    pub fn prime<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(usize) -> T,
    {
        if self.state() != GuardedRingState::NeedsPriming {
            return Err(CoreError::StateError {
                expected: GuardedRingState::NeedsPriming.name(),
                found: self.state().name(),
            });
        }

        let to_fill = self.sem.available_count()?;
        let inner_ptr = self.inner.get();
        for i in 0..to_fill as usize {
            if self.sem.is_aborted() {
                self.state.store(GuardedRingState::Terminal.tag(), Ordering::Release);
                return Err(CoreError::Aborted);
            }
            let value = f(i);
            // SAFETY: nothing else may call `get`/`put` while `NeedsPriming`.
            unsafe { (*inner_ptr).put(value) }?;
        }

        self.state.store(GuardedRingState::Ready.tag(), Ordering::Release);
        Ok(())
    }

    /// Drains every remaining item (valid only in [`GuardedRingState::Terminal`]),
    /// calling `f(v)` for each. Used to destroy cooked objects on teardown;
    /// only specified for the quiesced case (no concurrent `get`/`put` in flight).
    ///
    /// # Errors
    /// [`CoreError::StateError`] if not currently `Terminal`.
    pub fn flush<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(T),
    {
        if self.state() != GuardedRingState::Terminal {
            return Err(CoreError::StateError {
                expected: GuardedRingState::Terminal.name(),
                found: self.state().name(),
            });
        }

        let inner_ptr = self.inner.get();
        loop {
            // SAFETY: quiesced teardown; no other caller touches `inner` once Terminal.
            match unsafe { (*inner_ptr).get() } {
                Ok(value) => f(value),
                Err(CoreError::Underflow { .. }) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Irreversibly transitions to `Terminal` and wakes every blocked waiter.
    /// Idempotent.
    pub fn abort(&self) {
        self.state.store(GuardedRingState::Terminal.tag(), Ordering::Release);
        self.sem.abort();
        tracing::debug!("guarded ring transitioned to Terminal");
    }

    /// A snapshot of the number of items currently resident, for diagnostics.
    /// Only meaningful when `Ready` (reads racily otherwise).
    #[must_use]
    pub fn len_hint(&self) -> usize {
        self.sem.available_count().unwrap_or(0) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn ring(capacity: usize, will_prime: bool) -> RingBufferGuarded<u32> {
        RingBufferGuarded::new(RingConfig::new(capacity, will_prime))
    }

    #[test]
    fn ready_ring_blocks_get_until_put() {
        let ring = Arc::new(ring(4, false));
        let getter = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || ring.get())
        };
        thread::sleep(Duration::from_millis(20));
        ring.put(7).unwrap();
        assert_eq!(getter.join().unwrap().unwrap(), 7);
    }

    #[test]
    fn priming_fills_ring_before_any_get() {
        let ring = ring(4, true);
        assert_eq!(ring.state(), GuardedRingState::NeedsPriming);
        assert!(matches!(
            ring.get(),
            Err(CoreError::StateError { .. })
        ));

        let counter = AtomicUsize::new(0);
        ring.prime(|i| {
            counter.fetch_add(1, Ordering::SeqCst);
            i as u32
        })
        .unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 4);
        assert_eq!(ring.state(), GuardedRingState::Ready);
        assert_eq!(ring.get().unwrap(), 0);
        assert_eq!(ring.get().unwrap(), 1);
    }

    #[test]
    fn abort_unblocks_a_blocked_get() {
        let ring = Arc::new(ring(4, false));
        let getter = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || ring.get())
        };
        thread::sleep(Duration::from_millis(20));
        ring.abort();
        assert!(matches!(getter.join().unwrap(), Err(CoreError::Aborted)));
        assert_eq!(ring.state(), GuardedRingState::Terminal);
    }

    #[test]
    fn flush_requires_terminal_state() {
        let ring = ring(4, false);
        assert!(matches!(
            ring.flush(|_: u32| {}),
            Err(CoreError::StateError { .. })
        ));

        ring.put(1).unwrap();
        ring.put(2).unwrap();
        ring.abort();

        let mut drained = Vec::new();
        ring.flush(|v| drained.push(v)).unwrap();
        assert_eq!(drained, vec![1, 2]);

        // Safe to flush again on an already-empty terminal ring.
        ring.flush(|_: u32| panic!("nothing left to flush")).unwrap();
    }
}
