//! Miri-compatible tests for detecting undefined behavior.
//!
//! Run with: `cargo +nightly miri test --test miri_tests`
//!
//! These exercise the unsafe surfaces — the `MaybeUninit` payload cells,
//! the single-client `UnsafeCell` counters, the drop drains and the unwind
//! paths — with small capacities so miri finishes quickly.

use ringmpmc_rs::{MpmcQueue, Queue, Single, SpscQueue};

#[test]
fn miri_push_pop_heap_payload() {
    let queue = MpmcQueue::<String, 4>::new();
    let mut pusher = queue.pusher().unwrap();
    let mut popper = queue.popper().unwrap();

    pusher.try_push(String::from("alpha")).unwrap();
    pusher.try_push(String::from("beta")).unwrap();
    assert_eq!(popper.try_pop().as_deref(), Some("alpha"));
    assert_eq!(popper.try_pop().as_deref(), Some("beta"));
    assert_eq!(popper.try_pop(), None);
}

#[test]
fn miri_wrap_around_reuses_slots() {
    let queue = SpscQueue::<Box<u64>, 2>::new();
    let mut pusher = queue.pusher().unwrap();
    let mut popper = queue.popper().unwrap();

    for round in 0..5u64 {
        pusher.try_push(Box::new(round * 2)).unwrap();
        pusher.try_push(Box::new(round * 2 + 1)).unwrap();
        assert_eq!(popper.try_pop(), Some(Box::new(round * 2)));
        assert_eq!(popper.try_pop(), Some(Box::new(round * 2 + 1)));
    }
}

#[test]
fn miri_pop_directly_in_place_access() {
    let queue = MpmcQueue::<Vec<u32>, 4>::new();
    let mut pusher = queue.pusher().unwrap();
    let mut popper = queue.popper().unwrap();

    pusher.try_push(vec![1, 2, 3]).unwrap();
    let sum = popper.try_pop_directly(|v| v.iter().sum::<u32>());
    assert_eq!(sum, Some(6));
}

#[test]
fn miri_drop_drains_initialized_only() {
    let queue = Queue::<String, 4, Single, Single>::new();
    let mut pusher = queue.pusher().unwrap();
    let mut popper = queue.popper().unwrap();

    pusher.try_push(String::from("kept")).unwrap();
    pusher.try_push(String::from("popped")).unwrap();
    // Pop out of ticket order relative to the fill: first in, first out
    assert_eq!(popper.try_pop().as_deref(), Some("kept"));
    drop(popper);
    drop(pusher);
    // Queue drop must free exactly the one remaining payload
}

#[test]
fn miri_unwind_paths_release_storage() {
    let queue = MpmcQueue::<String, 4>::new();
    let mut pusher = queue.pusher().unwrap();
    let mut popper = queue.popper().unwrap();

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        pusher.try_push_with(|| panic!("boom"))
    }));
    assert!(result.is_err());

    pusher.try_push(String::from("survivor")).unwrap();
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        popper.try_pop_directly(|_| panic!("boom"))
    }));
    assert!(result.is_err());
    assert_eq!(popper.try_pop(), None);
}
