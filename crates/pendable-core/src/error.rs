//! Error taxonomy for the core concurrency primitives.
//!
//! Every primitive in this crate surfaces failures through [`CoreError`]. Nothing
//! is swallowed: rollback happens locally (see `invariants.rs` and each module's
//! scope-guard types) and then the triggering call returns `Err`.

use std::any::Any;
use thiserror::Error;

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, CoreError>;

/// The failure kinds produced by this crate's primitives.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A ring buffer `put` was attempted while full, or a semaphore `notify`
    /// would have pushed `available_count` past `u32::MAX`.
    #[error("overflow: {context}")]
    Overflow {
        /// What overflowed.
        context: String,
    },

    /// A simple ring buffer `get` was attempted while empty. Guarded rings
    /// never produce this kind — they block instead.
    #[error("underflow: {context}")]
    Underflow {
        /// What underflowed.
        context: String,
    },

    /// A guarded ring (or the queue built on top of it) was asked to `get`,
    /// `put`, `prime`, or `flush` while in the wrong lifecycle state.
    #[error("invalid state: expected {expected}, found {found}")]
    StateError {
        /// The state the caller needed.
        expected: &'static str,
        /// The state the primitive was actually in.
        found: &'static str,
    },

    /// The primitive has been aborted. Sticky: every subsequent call on the
    /// same primitive fails the same way.
    #[error("aborted")]
    Aborted,

    /// `ObjectPool::create` or `MessageQueue::emplace_on_reserved` was asked
    /// to construct a type larger than the pool's padded element size.
    #[error("element of size {requested} exceeds pool slot size {capacity}")]
    ElementSizeError {
        /// The size of the type the caller tried to construct.
        requested: usize,
        /// The padded per-slot capacity of the pool.
        capacity: usize,
    },

    /// `MessageQueue::auto_dispatch_lock` was called on a queue constructed
    /// with `enable_dispatch_locking = false`.
    #[error("dispatch locking was not enabled for this queue")]
    DispatchLockingDisabled,

    /// The memory pool's backing ring underflowed: every slot is checked out.
    #[error("pool exhausted: all {capacity} slots are checked out")]
    Exhausted {
        /// Total pool capacity.
        capacity: usize,
    },

    /// An OS-level mutex/condvar failure. Not expected in correctly used code.
    #[error("system error: {0}")]
    System(String),

    /// A user-supplied constructor, dispatch implementation, or wait/notify
    /// callback panicked. The panic payload is captured rather than allowed
    /// to unwind across the primitive's internal lock.
    #[error("user callback panicked")]
    UserPanic(Box<dyn Any + Send + 'static>),
}

impl CoreError {
    pub(crate) fn overflow(context: impl Into<String>) -> Self {
        Self::Overflow {
            context: context.into(),
        }
    }

    pub(crate) fn underflow(context: impl Into<String>) -> Self {
        Self::Underflow {
            context: context.into(),
        }
    }
}

// `Box<dyn Any + Send>` has no useful `PartialEq`/`Clone`, so we hand-roll a
// minimal equality used only by tests that don't care about panic payloads.
#[cfg(test)]
impl PartialEq for CoreError {
    fn eq(&self, other: &Self) -> bool {
        use CoreError::{
            Aborted, DispatchLockingDisabled, ElementSizeError, Exhausted, Overflow, StateError,
            System, Underflow, UserPanic,
        };
        match (self, other) {
            (Aborted, Aborted) | (DispatchLockingDisabled, DispatchLockingDisabled) => true,
            (Overflow { context: a }, Overflow { context: b })
            | (Underflow { context: a }, Underflow { context: b })
            | (System(a), System(b)) => a == b,
            (
                StateError {
                    expected: a,
                    found: af,
                },
                StateError {
                    expected: b,
                    found: bf,
                },
            ) => a == b && af == bf,
            (
                ElementSizeError {
                    requested: a,
                    capacity: ac,
                },
                ElementSizeError {
                    requested: b,
                    capacity: bc,
                },
            ) => a == b && ac == bc,
            (Exhausted { capacity: a }, Exhausted { capacity: b }) => a == b,
            (UserPanic(_), UserPanic(_)) => true,
            _ => false,
        }
    }
}
