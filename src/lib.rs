//! RingMPMC - Bounded Lock-Free Multi-Producer Multi-Consumer Queue
//!
//! A fixed-capacity MPMC queue built from two cooperating pieces:
//!
//! - a **vacancies counter** per side, metering out credits ("one more
//!   operation of this kind may proceed") and monotonically increasing slot
//!   tickets, with a private credit cache that keeps the acquire fast path
//!   on its own cache line;
//! - a **cell ring buffer** whose per-slot three-state machine arbitrates
//!   the one producer and one consumer that were dealt the same slot, with
//!   a ticket-to-slot rotation that spreads consecutive tickets across
//!   cache lines.
//!
//! Completing a push grants a pop credit and vice versa, so the credits
//! conserve and the queue is bounded by construction.
//!
//! # Key Features
//!
//! - Lock-free `try_*` and adaptive-spin operation families
//! - Optional blocking `*_wait` operations behind a per-side type parameter
//! - Per-side single-client configurations with non-atomic fast paths
//! - Compile-time side selection — monomorphized, no virtual dispatch
//! - Cooperative shutdown via a one-way `dispose` latch
//!
//! # Example
//!
//! ```
//! use ringmpmc_rs::MpmcQueue;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let queue = Arc::new(MpmcQueue::<u64, 1024>::new());
//!
//! let q = Arc::clone(&queue);
//! let producer = thread::spawn(move || {
//!     let mut pusher = q.pusher().unwrap();
//!     for i in 0..100 {
//!         pusher.try_push_spin(i).unwrap();
//!     }
//! });
//!
//! let mut popper = queue.popper().unwrap();
//! let mut received = 0;
//! while received < 100 {
//!     if popper.try_pop().is_some() {
//!         received += 1;
//!     }
//! }
//! producer.join().unwrap();
//! ```

mod backoff;
mod cells;
pub mod config;
mod credits;
mod invariants;
mod queue;
mod vacancies;

pub use backoff::Backoff;
pub use config::{
    Shared, SharedPadded, SharedPaddedWaitable, SharedWaitable, Side, Single, SinglePadded,
    SinglePaddedWaitable, SingleWaitable,
};
pub use credits::{
    CreditStore, SharedCredits, SharedCreditsPadded, SingleCredits, SingleCreditsPadded,
};
pub use queue::{
    MpmcQueue, MpscQueue, Popper, PushError, Pusher, Queue, Rejected, SpmcQueue, SpscQueue,
};
pub use vacancies::{
    Acquirer, NoWait, Parking, SideClaimed, Vacancies, WaitPolicy, MAX_CREDITS,
};
