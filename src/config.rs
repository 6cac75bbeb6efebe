//! Side configuration for the queue.
//!
//! Each side of a queue (push and pop) is configured independently by a
//! marker type composing three orthogonal choices:
//!
//! - **shared vs. single**: may any number of threads operate on this side,
//!   or exactly one? The single-client variants replace the acquire-side
//!   atomics with plain integers.
//! - **waitable**: are the blocking `*_wait` operations available? Selecting
//!   them pulls in a mutex, a condition variable and waiter bookkeeping.
//! - **padded**: keep the side's add counter and acquire cache on distinct
//!   cache lines, trading memory for freedom from producer/consumer
//!   ping-pong on the counter line.
//!
//! Selection is entirely at compile time — each marker monomorphizes the
//! queue to a concrete counter layout and wait policy; no operation crosses
//! an indirect call.

use crate::credits::{
    CreditStore, SharedCredits, SharedCreditsPadded, SingleCredits, SingleCreditsPadded,
};
use crate::vacancies::{NoWait, Parking, WaitPolicy};

/// Compile-time description of one side of a queue.
///
/// Implemented by the eight marker types in this module; sealed by the
/// sealed-ness of [`CreditStore`] and [`WaitPolicy`].
pub trait Side {
    /// Counter layout backing this side's vacancies.
    type Credits: CreditStore;
    /// Whether callers on this side may park.
    type Wait: WaitPolicy;
}

/// Any number of threads, non-blocking operations only. The default.
pub struct Shared;

impl Side for Shared {
    type Credits = SharedCredits;
    type Wait = NoWait;
}

/// Any number of threads; the blocking `*_wait` operations are available.
pub struct SharedWaitable;

impl Side for SharedWaitable {
    type Credits = SharedCredits;
    type Wait = Parking;
}

/// Any number of threads, counter lines separated.
pub struct SharedPadded;

impl Side for SharedPadded {
    type Credits = SharedCreditsPadded;
    type Wait = NoWait;
}

/// Any number of threads, counter lines separated, blocking available.
pub struct SharedPaddedWaitable;

impl Side for SharedPaddedWaitable {
    type Credits = SharedCreditsPadded;
    type Wait = Parking;
}

/// Exactly one thread on this side; cheapest acquire path.
pub struct Single;

impl Side for Single {
    type Credits = SingleCredits;
    type Wait = NoWait;
}

/// Exactly one thread on this side; blocking available.
pub struct SingleWaitable;

impl Side for SingleWaitable {
    type Credits = SingleCredits;
    type Wait = Parking;
}

/// Exactly one thread on this side, counter lines separated.
pub struct SinglePadded;

impl Side for SinglePadded {
    type Credits = SingleCreditsPadded;
    type Wait = NoWait;
}

/// Exactly one thread on this side, counter lines separated, blocking
/// available.
pub struct SinglePaddedWaitable;

impl Side for SinglePaddedWaitable {
    type Credits = SingleCreditsPadded;
    type Wait = Parking;
}
