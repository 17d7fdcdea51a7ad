//! The packed `(running_count, extreme)` counter word shared by the pools and
//! the message queue.
//!
//! Both counters live in a single `AtomicU64` so a reader never observes a
//! torn pair: every update goes through a compare-and-swap loop that computes
//! the whole new word from the whole old word.

use std::sync::atomic::{AtomicU64, Ordering};

/// A snapshot of `(running_count, extreme)` read atomically as one word.
///
/// `extreme` is the low watermark for pool-like components and the high
/// watermark for queue-like components — which one it is is a property of how
/// the owner calls [`PackedCounters::decrement`] / [`PackedCounters::increment`]
/// below, not of this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Current number of live outstanding objects (pool) or pending messages (queue).
    pub running_count: u32,
    /// Low watermark (pools) or high watermark (queues) reached since construction.
    pub extreme: u32,
}

fn pack(running_count: u32, extreme: u32) -> u64 {
    (u64::from(running_count) << 32) | u64::from(extreme)
}

fn unpack(word: u64) -> CounterSnapshot {
    CounterSnapshot {
        running_count: (word >> 32) as u32,
        extreme: word as u32,
    }
}

/// The packed counter word itself.
pub struct PackedCounters {
    word: AtomicU64,
}

impl PackedCounters {
    /// Constructs the word with both fields set to `initial`.
    #[must_use]
    pub fn new(initial: u32) -> Self {
        Self {
            word: AtomicU64::new(pack(initial, initial)),
        }
    }

    /// A consistent snapshot of both counters.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        unpack(self.word.load(Ordering::SeqCst))
    }

    /// Decrements `running_count`, lowering `extreme` to match if the new
    /// running count is now below it. Used by pools on `get_raw_block`
    /// (`extreme` is the low watermark there).
    pub fn decrement_tracking_low(&self) -> CounterSnapshot {
        self.update(|running, extreme| {
            let new_running = running - 1;
            let new_extreme = extreme.min(new_running);
            (new_running, new_extreme)
        })
    }

    /// Increments `running_count` without touching `extreme`. Used by pools
    /// on `return_raw_block`.
    pub fn increment(&self) -> CounterSnapshot {
        self.update(|running, extreme| (running + 1, extreme))
    }

    /// Increments `running_count`, raising `extreme` to match if the new
    /// running count now exceeds it. Used by queues on `reserve_put`
    /// (`extreme` is the high watermark there).
    pub fn increment_tracking_high(&self) -> CounterSnapshot {
        self.update(|running, extreme| {
            let new_running = running + 1;
            let new_extreme = extreme.max(new_running);
            (new_running, new_extreme)
        })
    }

    /// Decrements `running_count` without touching `extreme`. Used by queues
    /// when a message finishes dispatch or a reservation rolls back.
    pub fn decrement(&self) -> CounterSnapshot {
        self.update(|running, extreme| (running - 1, extreme))
    }

    fn update(&self, f: impl Fn(u32, u32) -> (u32, u32)) -> CounterSnapshot {
        let mut old = self.word.load(Ordering::SeqCst);
        loop {
            let snapshot = unpack(old);
            let (new_running, new_extreme) = f(snapshot.running_count, snapshot.extreme);
            let new_word = pack(new_running, new_extreme);
            match self.word.compare_exchange_weak(
                old,
                new_word,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return unpack(new_word),
                Err(observed) => old = observed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_style_tracks_low_watermark() {
        let counters = PackedCounters::new(4);
        assert_eq!(
            counters.snapshot(),
            CounterSnapshot {
                running_count: 4,
                extreme: 4
            }
        );

        counters.decrement_tracking_low();
        counters.decrement_tracking_low();
        let snap = counters.snapshot();
        assert_eq!(snap.running_count, 2);
        assert_eq!(snap.extreme, 2);

        // Returning a block raises running_count but never the low watermark.
        counters.increment();
        let snap = counters.snapshot();
        assert_eq!(snap.running_count, 3);
        assert_eq!(snap.extreme, 2);
    }

    #[test]
    fn queue_style_tracks_high_watermark() {
        let counters = PackedCounters::new(0);
        counters.increment_tracking_high();
        counters.increment_tracking_high();
        let snap = counters.snapshot();
        assert_eq!(snap.running_count, 2);
        assert_eq!(snap.extreme, 2);

        counters.decrement();
        let snap = counters.snapshot();
        assert_eq!(snap.running_count, 1);
        // High watermark records peak demand and is never lowered by a decrement.
        assert_eq!(snap.extreme, 2);
    }
}
