//! Real-time-friendly concurrency primitives: a blocking semaphore, bounded
//! ring buffers (panicking and blocking flavors), fixed-capacity arena pools
//! for object and array construction, and a bounded MPSC message queue built
//! on top of them.
//!
//! Every primitive here is bounded at construction and never grows: no
//! primitive in this crate allocates after `new`. Failures are reported
//! through [`error::CoreError`] rather than panicking, except where a caller
//! explicitly hands in a closure/constructor that itself panics — those
//! panics are caught at the primitive's boundary and re-surfaced as
//! [`error::CoreError::UserPanic`] instead of unwinding across a lock.
//!
//! # Modules
//!
//! - [`semaphore`] — a counted, abortable blocking semaphore.
//! - [`ring_simple`] — a bounded ring buffer that raises on overflow/underflow.
//! - [`ring_guarded`] — a bounded ring buffer that blocks on empty/full,
//!   layered on [`semaphore`], with a priming/flushing lifecycle.
//! - [`pool`] — fixed-capacity arenas: [`pool::object_pool`] (one `T` per
//!   slot) and [`pool::block_pool`] (an array of `N` `T`s per slot).
//! - [`queue`] — a bounded MPSC [`queue::MessageQueue`] of [`message::MessageBase`] objects.
//! - [`handles`] — the owning RAII handles the pools return.
//! - [`mutex`] — a thin `std::sync::Mutex` wrapper, with best-effort
//!   `PTHREAD_PRIO_INHERIT` configuration behind the `priority-inherit` feature.
//! - [`config`] — construction-time configuration for every primitive above.
//! - [`error`] — the shared error taxonomy ([`error::CoreError`]).

pub mod config;
pub mod error;
pub mod handles;
mod invariants;
pub mod message;
pub mod mutex;
pub mod pool;
pub mod queue;
pub mod ring_guarded;
pub mod ring_simple;
pub mod semaphore;
mod stats;

pub use config::{
    PoolConfig, QueueConfig, RingConfig, HIGH_THROUGHPUT_QUEUE_CONFIG, SMALL_MESSAGE_QUEUE_CONFIG,
};
pub use error::{CoreError, Result};
pub use handles::{ArrayHandle, ObjectHandle};
pub use message::MessageBase;
pub use mutex::Mutex;
pub use pool::block_pool::BlockPool;
pub use pool::object_pool::ObjectPool;
pub use pool::PoolStats;
pub use queue::{DispatchLockGuard, MessageQueue, QueueStats, ReservedPut};
pub use ring_guarded::{GuardedRingState, RingBufferGuarded};
pub use ring_simple::RingBufferSimple;
pub use semaphore::Semaphore;
