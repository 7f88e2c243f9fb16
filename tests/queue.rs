// tests/queue.rs

mod common;
use crate::common::init_tracing;

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use watchdeploy::engine::BlockingQueue;

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn items_come_out_in_insertion_order() -> TestResult {
    init_tracing();

    let queue = BlockingQueue::new(8);
    for i in 0..5 {
        queue.put(i);
    }

    assert_eq!(queue.len(), 5);
    assert_eq!(queue.peek(), Some(0));
    let out: Vec<_> = (0..5).map(|_| queue.take()).collect();
    assert_eq!(out, vec![0, 1, 2, 3, 4]);
    assert!(queue.is_empty());
    Ok(())
}

#[test]
fn zero_capacity_is_clamped_to_one() -> TestResult {
    init_tracing();

    let queue: BlockingQueue<u8> = BlockingQueue::new(0);
    assert_eq!(queue.capacity(), 1);
    queue.put(7);
    assert_eq!(queue.try_take(), Some(7));
    Ok(())
}

#[test]
fn try_take_on_empty_queue_returns_none() -> TestResult {
    init_tracing();

    let queue: BlockingQueue<String> = BlockingQueue::new(4);
    assert_eq!(queue.try_take(), None);
    Ok(())
}

#[test]
fn try_put_hands_the_item_back_when_full() -> TestResult {
    init_tracing();

    let queue = BlockingQueue::new(2);
    assert_eq!(queue.try_put("a"), Ok(()));
    assert_eq!(queue.try_put("b"), Ok(()));
    assert_eq!(queue.try_put("c"), Err("c"));

    assert_eq!(queue.take(), "a");
    assert_eq!(queue.try_put("c"), Ok(()));
    assert_eq!(queue.len(), 2);
    Ok(())
}

#[test]
fn put_blocks_while_full_until_a_take() -> TestResult {
    init_tracing();

    let queue = Arc::new(BlockingQueue::new(1));
    queue.put("first");

    let done = Arc::new(AtomicBool::new(false));
    let producer = {
        let queue = Arc::clone(&queue);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            queue.put("second");
            done.store(true, Ordering::SeqCst);
        })
    };

    thread::sleep(Duration::from_millis(100));
    assert!(!done.load(Ordering::SeqCst), "put must wait for a free slot");
    assert_eq!(queue.len(), 1);

    assert_eq!(queue.take(), "first");
    producer.join().map_err(|_| "producer panicked")?;
    assert!(done.load(Ordering::SeqCst));
    assert_eq!(queue.take(), "second");
    Ok(())
}

#[test]
fn take_blocks_until_an_item_arrives() -> TestResult {
    init_tracing();

    let queue = Arc::new(BlockingQueue::new(4));
    let consumer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || queue.take())
    };

    thread::sleep(Duration::from_millis(50));
    queue.put(42u32);
    let got = consumer.join().map_err(|_| "consumer panicked")?;
    assert_eq!(got, 42);
    Ok(())
}

#[test]
fn drain_into_respects_max_and_order() -> TestResult {
    init_tracing();

    let queue = BlockingQueue::new(16);
    for i in 0..10 {
        queue.put(i);
    }

    let mut out = Vec::new();
    assert_eq!(queue.drain_into(&mut out, 4), 4);
    assert_eq!(out, vec![0, 1, 2, 3]);
    assert_eq!(queue.drain_into(&mut out, 100), 6);
    assert_eq!(out, (0..10).collect::<Vec<_>>());
    assert_eq!(queue.drain_into(&mut out, 100), 0);
    Ok(())
}

#[test]
fn many_producers_one_consumer_lose_nothing() -> TestResult {
    init_tracing();

    let queue = Arc::new(BlockingQueue::new(3));
    let producers: Vec<_> = (0..4)
        .map(|p| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..50 {
                    queue.put(p * 1000 + i);
                }
            })
        })
        .collect();

    let mut seen: Vec<u32> = (0..200).map(|_| queue.take()).collect();
    for producer in producers {
        producer.join().map_err(|_| "producer panicked")?;
    }

    // Per-producer order is preserved.
    for p in 0..4 {
        let mine: Vec<_> = seen.iter().copied().filter(|v| v / 1000 == p).collect();
        assert_eq!(mine, (0..50).map(|i| p * 1000 + i).collect::<Vec<_>>());
    }
    seen.sort_unstable();
    seen.dedup();
    assert_eq!(seen.len(), 200);
    Ok(())
}
