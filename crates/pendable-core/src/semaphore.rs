//! A counted, waitable semaphore with cooperative abort.
//!
//! Unlike a POSIX semaphore, `wait`/`notify` accept an optional callback that
//! runs under the semaphore's internal lock — giving callers a place to do
//! bookkeeping (e.g. popping a ring slot) atomically with the count change,
//! without a second lock. See [`Semaphore::wait_with`] / [`Semaphore::notify_with`].

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Condvar;

use crate::error::{CoreError, Result};
use crate::invariants::debug_assert_sem_available_bounded;
use crate::mutex::Mutex;

struct State {
    available_count: u32,
    pending_count: u16,
    aborted: bool,
}

/// A thread-safe counted semaphore.
///
/// `available_count` never exceeds `u32::MAX`; a `notify` that would push it
/// past that bound fails with [`CoreError::Overflow`] instead of wrapping.
pub struct Semaphore {
    state: Mutex<State>,
    condvar: Condvar,
}

impl Semaphore {
    /// Constructs a semaphore with `initial_count`, clamped to `u32::MAX`.
    #[must_use]
    pub fn new(initial_count: u64) -> Self {
        let available_count = u32::try_from(initial_count).unwrap_or(u32::MAX);
        Self {
            state: Mutex::new(State {
                available_count,
                pending_count: 0,
                aborted: false,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Decrements `available_count` when positive; otherwise blocks until a
    /// matching `notify` (or `abort`).
    ///
    /// # Errors
    /// [`CoreError::Aborted`] if the semaphore was already aborted, or becomes
    /// aborted while this call was blocked.
    pub fn wait(&self) -> Result<()> {
        self.wait_with(|| ())
    }

    /// As [`Self::wait`], then invokes `operation` while still holding the
    /// internal lock.
    ///
    /// If `operation` panics, the decrement is rolled back (available_count is
    /// restored to its pre-wait value) and the panic payload is returned as
    /// [`CoreError::UserPanic`] rather than allowed to unwind through the lock.
    pub fn wait_with<F, R>(&self, operation: F) -> Result<R>
    where
        F: FnOnce() -> R,
    {
        let mut guard = self.state.lock()?;
        loop {
            if guard.aborted {
                return Err(CoreError::Aborted);
            }
            if guard.available_count > 0 {
                guard.available_count -= 1;
                break;
            }
            guard.pending_count += 1;
            guard = self
                .condvar
                .wait(guard)
                .map_err(|_| CoreError::System("condvar wait failed".into()))?;
            guard.pending_count -= 1;
        }

        match catch_unwind(AssertUnwindSafe(operation)) {
            Ok(result) => Ok(result),
            Err(payload) => {
                // Roll back: the take never "happened" from the caller's perspective.
                guard.available_count += 1;
                Err(CoreError::UserPanic(payload))
            }
        }
    }

    /// Non-blocking variant of [`Self::wait_with`]: if `available_count` is
    /// zero, returns `Ok(None)` immediately instead of registering as a
    /// pending waiter. Used by [`crate::queue::MessageQueue::purge`], which
    /// must drain whatever is currently available without ever blocking.
    pub fn try_wait_with<F, R>(&self, operation: F) -> Result<Option<R>>
    where
        F: FnOnce() -> R,
    {
        let mut guard = self.state.lock()?;
        // Resident items are drained even past `abort`, so a caller can still
        // flush whatever was left (see `RingBufferGuarded::try_get`); only an
        // empty-and-aborted semaphore is reported as `Aborted`.
        if guard.available_count == 0 {
            return if guard.aborted {
                Err(CoreError::Aborted)
            } else {
                Ok(None)
            };
        }
        guard.available_count -= 1;

        match catch_unwind(AssertUnwindSafe(operation)) {
            Ok(result) => Ok(Some(result)),
            Err(payload) => {
                guard.available_count += 1;
                Err(CoreError::UserPanic(payload))
            }
        }
    }

    /// Increments `available_count` and wakes one waiter.
    ///
    /// # Errors
    /// [`CoreError::Aborted`] if already aborted. [`CoreError::Overflow`] if
    /// `available_count` is already `u32::MAX`.
    pub fn notify(&self) -> Result<()> {
        self.notify_with(|| ())
    }

    /// Invokes `operation` under the lock *before* incrementing the count.
    ///
    /// If `operation` panics, the increment and wakeup are skipped and the
    /// panic payload is returned as [`CoreError::UserPanic`].
    pub fn notify_with<F, R>(&self, operation: F) -> Result<R>
    where
        F: FnOnce() -> R,
    {
        let mut guard = self.state.lock()?;
        if guard.aborted {
            return Err(CoreError::Aborted);
        }
        if guard.available_count == u32::MAX {
            return Err(CoreError::overflow("semaphore available_count at u32::MAX"));
        }

        let result = match catch_unwind(AssertUnwindSafe(operation)) {
            Ok(result) => result,
            Err(payload) => return Err(CoreError::UserPanic(payload)),
        };

        guard.available_count += 1;
        debug_assert_sem_available_bounded!(u64::from(guard.available_count));
        drop(guard);
        self.condvar.notify_one();
        Ok(result)
    }

    /// Marks the semaphore aborted and wakes every waiter. Idempotent.
    #[tracing::instrument(skip(self))]
    pub fn abort(&self) {
        let Ok(mut guard) = self.state.lock() else {
            return;
        };
        if guard.aborted {
            return;
        }
        guard.aborted = true;
        let pending = guard.pending_count;
        drop(guard);
        self.condvar.notify_all();
        tracing::debug!(pending, "semaphore aborted");
    }

    /// A snapshot of `available_count`.
    ///
    /// # Errors
    /// [`CoreError::Aborted`] if the semaphore has been aborted.
    pub fn available_count(&self) -> Result<u32> {
        let guard = self.state.lock()?;
        if guard.aborted {
            return Err(CoreError::Aborted);
        }
        Ok(guard.available_count)
    }

    /// Whether `abort` has been called.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.state.lock().map(|g| g.aborted).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_succeeds_immediately_when_available() {
        let sem = Semaphore::new(1);
        assert!(sem.wait().is_ok());
        assert_eq!(sem.available_count().unwrap(), 0);
    }

    #[test]
    fn notify_wakes_a_blocked_waiter() {
        let sem = Arc::new(Semaphore::new(0));
        let waiter = {
            let sem = Arc::clone(&sem);
            thread::spawn(move || sem.wait())
        };
        thread::sleep(Duration::from_millis(20));
        sem.notify().unwrap();
        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn abort_unblocks_a_waiter_with_aborted_error() {
        let sem = Arc::new(Semaphore::new(0));
        let waiter = {
            let sem = Arc::clone(&sem);
            thread::spawn(move || sem.wait())
        };
        thread::sleep(Duration::from_millis(20));
        sem.abort();
        let result = waiter.join().unwrap();
        assert!(matches!(result, Err(CoreError::Aborted)));
        assert!(matches!(sem.available_count(), Err(CoreError::Aborted)));
    }

    #[test]
    fn abort_is_idempotent() {
        let sem = Semaphore::new(0);
        sem.abort();
        sem.abort();
        assert!(sem.is_aborted());
    }

    #[test]
    fn notify_overflow_is_rejected() {
        let sem = Semaphore::new(u64::from(u32::MAX));
        assert!(matches!(sem.notify(), Err(CoreError::Overflow { .. })));
    }

    #[test]
    fn wait_with_rolls_back_on_panic() {
        let sem = Semaphore::new(1);
        let result = sem.wait_with(|| panic!("boom"));
        assert!(matches!(result, Err(CoreError::UserPanic(_))));
        // The take was rolled back: the count is still 1.
        assert_eq!(sem.available_count().unwrap(), 1);
    }

    #[test]
    fn notify_with_skips_increment_on_panic() {
        let sem = Semaphore::new(0);
        let result = sem.notify_with(|| panic!("boom"));
        assert!(matches!(result, Err(CoreError::UserPanic(_))));
        assert_eq!(sem.available_count().unwrap(), 0);
    }
}
