//! A minimal multi-producer/single-consumer message queue walkthrough:
//! several worker threads submit messages, one consumer thread dispatches
//! them, and `stats()`/`last_dispatched_name()` are inspected afterwards.

use pendable_core::message::MessageBase;
use pendable_core::{MessageQueue, QueueConfig};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

struct Reading {
    sensor_id: u32,
    value: f64,
}

impl MessageBase for Reading {
    fn dispatch(&mut self) {
        println!("sensor {} reported {:.2}", self.sensor_id, self.value);
    }

    fn name(&self) -> &'static str {
        "Reading"
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    const PRODUCERS: u32 = 4;
    const READINGS_PER_PRODUCER: usize = 25;

    let queue = MessageQueue::new(QueueConfig::new(64, 32, false));
    let dispatched = Arc::new(AtomicU64::new(0));

    let consumer = {
        let queue = queue.clone();
        let dispatched = Arc::clone(&dispatched);
        thread::spawn(move || {
            while dispatched.load(Ordering::Acquire) < u64::from(PRODUCERS) * READINGS_PER_PRODUCER as u64 {
                queue.get_and_dispatch().expect("queue was aborted mid-demo");
                dispatched.fetch_add(1, Ordering::AcqRel);
            }
        })
    };

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|sensor_id| {
            let queue = queue.clone();
            thread::spawn(move || {
                for i in 0..READINGS_PER_PRODUCER {
                    queue
                        .put(Reading {
                            sensor_id,
                            value: f64::from(sensor_id) * 100.0 + i as f64,
                        })
                        .expect("queue was aborted mid-demo");
                }
            })
        })
        .collect();

    for p in producers {
        p.join().unwrap();
    }
    consumer.join().unwrap();

    let stats = queue.stats();
    println!(
        "dispatched {} readings; capacity {}, high watermark {}",
        dispatched.load(Ordering::Acquire),
        stats.capacity,
        stats.high_watermark
    );
    println!("last dispatched: {}", queue.last_dispatched_name());
}
