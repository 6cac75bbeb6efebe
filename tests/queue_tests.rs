use ringmpmc_rs::{MpmcQueue, Queue, Shared, SharedWaitable, SpscQueue};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_spsc_push_two_pop_two() {
    let queue = SpscQueue::<u64, 8>::new();
    let mut pusher = queue.pusher().unwrap();
    let mut popper = queue.popper().unwrap();

    pusher.try_push(100).unwrap();
    pusher.try_push(200).unwrap();

    assert_eq!(popper.try_pop(), Some(100));
    assert_eq!(popper.try_pop(), Some(200));

    assert_eq!(pusher.credits(), 8);
    assert_eq!(popper.credits(), 0);
}

#[test]
fn test_mpmc_two_producers_two_consumers() {
    const PER_PRODUCER: u64 = 10_000;
    const TOTAL: usize = 2 * PER_PRODUCER as usize;

    let queue = Arc::new(MpmcQueue::<u64, 16>::new());
    let received = Arc::new(AtomicUsize::new(0));

    let mut producers = Vec::new();
    for _ in 0..2 {
        let q = Arc::clone(&queue);
        producers.push(thread::spawn(move || {
            let mut pusher = q.pusher().unwrap();
            for i in 0..PER_PRODUCER {
                pusher.try_push_spin(i).unwrap();
            }
        }));
    }

    let mut consumers = Vec::new();
    for _ in 0..2 {
        let q = Arc::clone(&queue);
        let received = Arc::clone(&received);
        consumers.push(thread::spawn(move || {
            let mut popper = q.popper().unwrap();
            let mut mine = Vec::new();
            while received.load(Ordering::Relaxed) < TOTAL {
                if let Some(v) = popper.try_pop() {
                    mine.push(v);
                    received.fetch_add(1, Ordering::Relaxed);
                }
            }
            mine
        }));
    }

    for p in producers {
        p.join().unwrap();
    }
    let mut counts: HashMap<u64, usize> = HashMap::new();
    for c in consumers {
        for v in c.join().unwrap() {
            *counts.entry(v).or_default() += 1;
        }
    }

    // Every value 0..10_000 was pushed by both producers: exactly twice each
    assert_eq!(counts.len(), PER_PRODUCER as usize);
    for i in 0..PER_PRODUCER {
        assert_eq!(counts.get(&i), Some(&2), "value {} lost or duplicated", i);
    }

    // All credits returned to the push side
    let mut pusher = queue.pusher().unwrap();
    let mut popper = queue.popper().unwrap();
    assert_eq!(pusher.credits() + popper.credits(), 16);
    assert_eq!(popper.credits(), 0);
}

#[test]
fn test_waiting_consumers_rejected_on_dispose() {
    let queue = Arc::new(Queue::<u64, 4, Shared, SharedWaitable>::new());

    let mut consumers = Vec::new();
    for _ in 0..3 {
        let q = Arc::clone(&queue);
        consumers.push(thread::spawn(move || {
            let mut popper = q.popper().unwrap();
            popper.try_pop_wait()
        }));
    }

    thread::sleep(Duration::from_millis(10));
    queue.dispose();

    for c in consumers {
        assert_eq!(c.join().unwrap(), None, "waiter not rejected");
    }

    // No pop credit was consumed
    let mut popper = queue.popper().unwrap();
    assert_eq!(popper.credits(), 0);
}

#[test]
fn test_spin_backpressure_preserves_order() {
    const ITEMS: u64 = 1_000;

    let queue = Arc::new(SpscQueue::<u64, 2>::new());

    let q = Arc::clone(&queue);
    let producer = thread::spawn(move || {
        let mut pusher = q.pusher().unwrap();
        for i in 0..ITEMS {
            pusher.try_push_spin(i).unwrap();
        }
    });

    let mut popper = queue.popper().unwrap();
    for expected in 0..ITEMS {
        assert_eq!(popper.try_pop_spin(), Some(expected), "out of order");
    }

    producer.join().unwrap();
}

#[test]
fn test_rejected_when_full() {
    let queue = MpmcQueue::<u32, 4>::new();
    let mut pusher = queue.pusher().unwrap();

    for i in 0..4 {
        pusher.try_push(i).unwrap();
    }
    assert!(pusher.try_push(4).is_err());

    let mut popper = queue.popper().unwrap();
    assert_eq!(pusher.credits(), 0);
    assert_eq!(popper.credits(), 4);
}

#[test]
fn test_panicking_constructor_restores_state() {
    let queue = MpmcQueue::<String, 8>::new();
    let mut pusher = queue.pusher().unwrap();

    pusher.try_push(String::from("one")).unwrap();
    pusher.try_push(String::from("two")).unwrap();

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        pusher.try_push_with(|| panic!("third construction fails"))
    }));
    assert!(outcome.is_err(), "panic must propagate");

    let mut popper = queue.popper().unwrap();
    assert_eq!(popper.credits() + pusher.credits(), 8);
    assert_eq!(popper.try_pop().as_deref(), Some("one"));
    assert_eq!(popper.try_pop().as_deref(), Some("two"));
    assert_eq!(popper.try_pop(), None);
    assert_eq!(pusher.credits(), 8);
}

#[test]
fn test_mpmc_tickets_unique_under_contention() {
    // Distinct payloads in, distinct payloads out: duplicated slot handout
    // would surface as a lost or doubled value.
    const THREADS: usize = 4;
    const PER_THREAD: u64 = 2_000;

    let queue = Arc::new(MpmcQueue::<u64, 64>::new());
    let drained = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for t in 0..THREADS as u64 {
        let q = Arc::clone(&queue);
        handles.push(thread::spawn(move || {
            let mut pusher = q.pusher().unwrap();
            for i in 0..PER_THREAD {
                pusher.try_push_spin(t * PER_THREAD + i).unwrap();
            }
        }));
    }

    let mut collectors = Vec::new();
    for _ in 0..THREADS {
        let q = Arc::clone(&queue);
        let drained = Arc::clone(&drained);
        collectors.push(thread::spawn(move || {
            let mut popper = q.popper().unwrap();
            let mut seen = Vec::new();
            while drained.load(Ordering::Relaxed) < THREADS * PER_THREAD as usize {
                if let Some(v) = popper.try_pop() {
                    seen.push(v);
                    drained.fetch_add(1, Ordering::Relaxed);
                }
            }
            seen
        }));
    }

    for h in handles {
        h.join().unwrap();
    }
    let mut all: Vec<u64> = Vec::new();
    for c in collectors {
        all.extend(c.join().unwrap());
    }
    all.sort_unstable();
    let expected: Vec<u64> = (0..THREADS as u64 * PER_THREAD).collect();
    assert_eq!(all, expected);
}

#[test]
fn test_blocking_producer_consumer_pair() {
    let queue = Arc::new(Queue::<u64, 4, SharedWaitable, SharedWaitable>::new());

    let q = Arc::clone(&queue);
    let producer = thread::spawn(move || {
        let mut pusher = q.pusher().unwrap();
        for i in 0..200 {
            if pusher.try_push_wait(i).is_err() {
                panic!("producer rejected before dispose");
            }
        }
    });

    let q = Arc::clone(&queue);
    let consumer = thread::spawn(move || {
        let mut popper = q.popper().unwrap();
        for expected in 0..200 {
            match popper.try_pop_wait() {
                Some(v) => assert_eq!(v, expected),
                None => panic!("consumer rejected before dispose"),
            }
        }
    });

    producer.join().unwrap();
    consumer.join().unwrap();
}
