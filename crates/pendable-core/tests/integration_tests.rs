//! Cross-module scenario tests — the multi-producer message queue under
//! concurrent load, dispatch-lock serialization against an outside caller,
//! and pool/queue teardown via `abort`.

use pendable_core::message::MessageBase;
use pendable_core::{CoreError, MessageQueue, ObjectPool, QueueConfig};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

struct Work(usize);
impl MessageBase for Work {
    fn dispatch(&mut self) {
        self.0 += 1;
    }
    fn name(&self) -> &'static str {
        "Work"
    }
}

/// S4-shaped scenario: several producer threads contend for a bounded queue
/// while one consumer drains and dispatches everything they send, with no
/// message lost or duplicated.
#[test]
fn four_producers_one_consumer_deliver_every_message() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 8192;

    static DISPATCHED: AtomicUsize = AtomicUsize::new(0);
    DISPATCHED.store(0, Ordering::SeqCst);

    let queue = MessageQueue::new(QueueConfig::new(256, 32, false));
    let barrier = Arc::new(Barrier::new(PRODUCERS + 1));

    let consumer = {
        let queue = queue.clone();
        thread::spawn(move || {
            for _ in 0..PRODUCERS * PER_PRODUCER {
                queue.get_and_dispatch().unwrap();
                DISPATCHED.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|_| {
            let queue = queue.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..PER_PRODUCER {
                    queue.put(Work(i)).unwrap();
                }
            })
        })
        .collect();

    barrier.wait();
    for p in producers {
        p.join().unwrap();
    }
    consumer.join().unwrap();

    assert_eq!(DISPATCHED.load(Ordering::SeqCst), PRODUCERS * PER_PRODUCER);
    let stats = queue.stats();
    assert_eq!(stats.running_count, 0);
    assert!(stats.high_watermark >= 1);
    assert!(stats.high_watermark <= stats.capacity as u32);
}

/// S5-shaped scenario: a caller holding `auto_dispatch_lock` genuinely
/// excludes the consumer thread from progressing through `get_and_dispatch`
/// until the lock is released.
#[test]
fn dispatch_lock_excludes_consumer_until_released() {
    let queue = MessageQueue::new(QueueConfig::new(4, 32, true));
    queue.put(Work(0)).unwrap();

    let guard = queue.auto_dispatch_lock().unwrap();
    let consumer = {
        let queue = queue.clone();
        thread::spawn(move || queue.get_and_dispatch())
    };

    // Give the consumer a chance to block on the dispatch mutex before we
    // release it; this is a timing-based smoke check, not a proof, but it
    // reliably catches a dispatch lock that doesn't actually exclude.
    std::thread::sleep(std::time::Duration::from_millis(30));
    assert!(!consumer.is_finished());

    drop(guard);
    assert!(consumer.join().unwrap().is_ok());
}

/// Aborting a queue while producers are blocked on a full reservation unwinds
/// every one of them with `Aborted` rather than hanging.
#[test]
fn abort_unblocks_every_waiting_producer() {
    let queue = MessageQueue::new(QueueConfig::new(2, 32, false));
    let _first = queue.reserve_put().unwrap();
    let _second = queue.reserve_put().unwrap();

    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let queue = queue.clone();
            thread::spawn(move || queue.reserve_put().map(|_| ()))
        })
        .collect();

    std::thread::sleep(std::time::Duration::from_millis(30));
    queue.abort();

    for w in waiters {
        assert!(matches!(w.join().unwrap(), Err(CoreError::Aborted)));
    }
}

/// The object pool's watermark survives a burst of concurrent
/// checkout/return cycles across threads: running_count always returns to
/// zero and the low watermark never goes negative (tracked as `u32`, so
/// "negative" would show up as wraparound to a huge number).
#[test]
fn object_pool_watermark_survives_concurrent_churn() {
    static COUNT: AtomicU32 = AtomicU32::new(0);
    struct Counted;
    impl Drop for Counted {
        fn drop(&mut self) {
            COUNT.fetch_sub(1, Ordering::SeqCst);
        }
    }

    let pool = Arc::new(ObjectPool::<Counted>::new(8));
    let threads: Vec<_> = (0..8)
        .map(|_| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for _ in 0..2000 {
                    COUNT.fetch_add(1, Ordering::SeqCst);
                    if let Ok(handle) = pool.create(Counted) {
                        drop(handle);
                    } else {
                        COUNT.fetch_sub(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();

    for t in threads {
        t.join().unwrap();
    }

    let stats = pool.stats();
    assert_eq!(stats.running_count, 8);
    assert!(stats.low_watermark <= 8);
}
