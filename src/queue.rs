use crate::cells::CellBuffer;
use crate::config::{Shared, Side, Single};
use crate::credits::CreditStore;
use crate::vacancies::{Acquirer, Parking, SideClaimed, Vacancies, WaitPolicy};
use std::fmt;
use thiserror::Error;

// =============================================================================
// QUEUE COMPOSITION
// =============================================================================
//
// The queue is two vacancies counters wrapped around one cell buffer:
//
//   - the push side starts with `N` credits (every slot is writable),
//   - the pop side starts with none.
//
// `try_push` spends a push credit, claims the dispensed ticket's slot
// through the producer protocol, writes the payload, and *grants a pop
// credit*. `try_pop` is the mirror image. The credits conserve: at
// quiescence `push_credits + pop_credits == N`, and the number of FULL
// slots equals the pop credit.
//
// Tickets are dispensed monotonically but the per-slot state machine is the
// actual rendezvous, so no FIFO order is promised across producers or
// across consumers.
//
// =============================================================================

/// Error returned by the value-taking push operations.
///
/// Carries the value back to the caller: the queue was full (non-blocking
/// variant) or disposed (spin and wait variants).
#[derive(Clone, Copy, PartialEq, Eq, Error)]
#[error("queue is full or disposed")]
pub struct PushError<T>(pub T);

impl<T> PushError<T> {
    /// Recover the value that was not enqueued.
    pub fn into_inner(self) -> T {
        self.0
    }
}

// Written out by hand so that `T: Debug` is not required.
impl<T> fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("PushError(..)")
    }
}

/// Rejection of an operation that never took a value from the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("queue is full or disposed")]
pub struct Rejected;

/// Bounded MPMC queue over a fixed ring of `N` cells.
///
/// `N` must be a power of two (checked at compile time). The `Push` and
/// `Pop` markers configure each side independently — see [`crate::config`].
/// All operations go through [`Pusher`] and [`Popper`] handles; sides
/// configured single-client hand out one live handle at a time.
///
/// # Example
///
/// ```
/// use ringmpmc_rs::MpmcQueue;
///
/// let queue = MpmcQueue::<u64, 8>::new();
/// let mut pusher = queue.pusher().unwrap();
/// let mut popper = queue.popper().unwrap();
///
/// pusher.try_push(7).unwrap();
/// assert_eq!(popper.try_pop(), Some(7));
/// assert_eq!(popper.try_pop(), None);
/// ```
pub struct Queue<T, const N: usize, Push: Side = Shared, Pop: Side = Shared> {
    cells: CellBuffer<T, N>,
    push: Vacancies<Push::Credits, Push::Wait>,
    pop: Vacancies<Pop::Credits, Pop::Wait>,
}

/// Queue with any number of producers and consumers.
pub type MpmcQueue<T, const N: usize> = Queue<T, N, Shared, Shared>;
/// Queue with one producer and one consumer.
pub type SpscQueue<T, const N: usize> = Queue<T, N, Single, Single>;
/// Queue with many producers and one consumer.
pub type MpscQueue<T, const N: usize> = Queue<T, N, Shared, Single>;
/// Queue with one producer and many consumers.
pub type SpmcQueue<T, const N: usize> = Queue<T, N, Single, Shared>;

impl<T, const N: usize, Push: Side, Pop: Side> Queue<T, N, Push, Pop> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            cells: CellBuffer::new(),
            push: Vacancies::with_credits(N as i64),
            pop: Vacancies::with_credits(0),
        }
    }

    /// Ring capacity in payloads.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Claims a push handle.
    ///
    /// On a `Single*` push side at most one handle is live at a time; the
    /// claim is released when the handle drops.
    pub fn pusher(&self) -> Result<Pusher<'_, T, N, Push, Pop>, SideClaimed> {
        Ok(Pusher {
            acquire: self.push.acquirer()?,
            queue: self,
        })
    }

    /// Claims a pop handle. Same claim rules as [`pusher`](Self::pusher).
    pub fn popper(&self) -> Result<Popper<'_, T, N, Push, Pop>, SideClaimed> {
        Ok(Popper {
            acquire: self.pop.acquirer()?,
            queue: self,
        })
    }

    /// Prepares the queue for teardown.
    ///
    /// Thread-safe and idempotent. Parked `*_wait` callers return rejected;
    /// spinning callers stop spinning and return rejected; plain `try_*`
    /// calls keep operating on whatever credit remains.
    pub fn dispose(&self) {
        self.push.dispose();
        self.pop.dispose();
    }

    /// Whether [`dispose`](Self::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.push.is_disposed() || self.pop.is_disposed()
    }
}

impl<T, const N: usize, Push: Side, Pop: Side> Default for Queue<T, N, Push, Pop> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize, Push: Side, Pop: Side> Drop for Queue<T, N, Push, Pop> {
    fn drop(&mut self) {
        self.dispose();
        // Remaining FULL slots are drained by the cell buffer's own drop.
    }
}

/// RAII credit grant: adds one credit to the target vacancies when dropped,
/// unless disarmed. Arms the panic paths — a failed payload constructor
/// refunds the push credit, an unwinding pop callback still completes the
/// pop by granting the push credit.
struct PendingCredit<'a, C: CreditStore, W: WaitPolicy> {
    vacancies: &'a Vacancies<C, W>,
    armed: bool,
}

impl<'a, C: CreditStore, W: WaitPolicy> PendingCredit<'a, C, W> {
    fn new(vacancies: &'a Vacancies<C, W>) -> Self {
        Self {
            vacancies,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<C: CreditStore, W: WaitPolicy> Drop for PendingCredit<'_, C, W> {
    fn drop(&mut self) {
        if self.armed {
            self.vacancies.add();
        }
    }
}

/// Push handle for a [`Queue`].
pub struct Pusher<'q, T, const N: usize, Push: Side = Shared, Pop: Side = Shared> {
    queue: &'q Queue<T, N, Push, Pop>,
    acquire: Acquirer<'q, Push::Credits, Push::Wait>,
}

impl<T, const N: usize, Push: Side, Pop: Side> Pusher<'_, T, N, Push, Pop> {
    /// Enqueues `value` without blocking.
    ///
    /// Fails with the value when no push credit is available.
    pub fn try_push(&mut self, value: T) -> Result<(), PushError<T>> {
        match self.acquire.try_acquire() {
            Some(ticket) => {
                self.complete_push(ticket, value);
                Ok(())
            }
            None => Err(PushError(value)),
        }
    }

    /// Enqueues `value`, spinning adaptively while the queue is full.
    ///
    /// Fails only when the queue is disposed.
    pub fn try_push_spin(&mut self, value: T) -> Result<(), PushError<T>> {
        match self.acquire.try_acquire_spin() {
            Some(ticket) => {
                self.complete_push(ticket, value);
                Ok(())
            }
            None => Err(PushError(value)),
        }
    }

    /// Constructs the payload in place without blocking.
    ///
    /// If `f` panics, the slot reverts to writable, the push credit is
    /// returned, no pop credit is granted, and the panic propagates.
    pub fn try_push_with(&mut self, f: impl FnOnce() -> T) -> Result<(), Rejected> {
        let Some(ticket) = self.acquire.try_acquire() else {
            return Err(Rejected);
        };
        let mut refund = PendingCredit::new(&self.queue.push);
        let mut slot = self.queue.cells.push_slot(ticket);
        slot.fill_with(f);
        refund.disarm();
        drop(slot); // publishes FULL
        self.queue.pop.add();
        Ok(())
    }

    /// Draining snapshot of the push credits currently available.
    pub fn credits(&mut self) -> i64 {
        self.acquire.current()
    }

    fn complete_push(&mut self, ticket: u64, value: T) {
        let mut slot = self.queue.cells.push_slot(ticket);
        slot.fill_with(|| value);
        drop(slot); // publishes FULL
        self.queue.pop.add();
    }
}

impl<T, const N: usize, Push, Pop> Pusher<'_, T, N, Push, Pop>
where
    Push: Side<Wait = Parking>,
    Pop: Side,
{
    /// Enqueues `value`, parking the thread while the queue is full.
    ///
    /// Fails only when the queue is disposed.
    pub fn try_push_wait(&mut self, value: T) -> Result<(), PushError<T>> {
        match self.acquire.try_acquire_wait() {
            Some(ticket) => {
                self.complete_push(ticket, value);
                Ok(())
            }
            None => Err(PushError(value)),
        }
    }
}

/// Pop handle for a [`Queue`].
pub struct Popper<'q, T, const N: usize, Push: Side = Shared, Pop: Side = Shared> {
    queue: &'q Queue<T, N, Push, Pop>,
    acquire: Acquirer<'q, Pop::Credits, Pop::Wait>,
}

impl<T, const N: usize, Push: Side, Pop: Side> Popper<'_, T, N, Push, Pop> {
    /// Dequeues a payload without blocking. `None` when the queue is empty.
    pub fn try_pop(&mut self) -> Option<T> {
        let ticket = self.acquire.try_acquire()?;
        Some(self.complete_pop(ticket))
    }

    /// Dequeues a payload, spinning adaptively while the queue is empty.
    ///
    /// `None` only when the queue is disposed.
    pub fn try_pop_spin(&mut self) -> Option<T> {
        let ticket = self.acquire.try_acquire_spin()?;
        Some(self.complete_pop(ticket))
    }

    /// Hands the payload to `f` in place, without blocking.
    ///
    /// The slot stays claimed for the whole callback; the reference dies
    /// when the callback returns. If `f` panics the payload is still
    /// destroyed and the slot released — the pop completes either way.
    /// Keep the callback short.
    pub fn try_pop_directly<R>(&mut self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let ticket = self.acquire.try_acquire()?;
        Some(self.complete_pop_directly(ticket, f))
    }

    /// Draining snapshot of the pop credits currently available.
    pub fn credits(&mut self) -> i64 {
        self.acquire.current()
    }

    fn complete_pop(&mut self, ticket: u64) -> T {
        let grant = PendingCredit::new(&self.queue.push);
        let mut slot = self.queue.cells.pop_slot(ticket);
        let value = slot.take();
        drop(slot); // releases the slot EMPTY
        drop(grant); // grants the push credit
        value
    }

    fn complete_pop_directly<R>(&mut self, ticket: u64, f: impl FnOnce(&mut T) -> R) -> R {
        // Declared before the slot so the unwind order is: destroy payload
        // and release the slot, then grant the push credit.
        let grant = PendingCredit::new(&self.queue.push);
        let mut slot = self.queue.cells.pop_slot(ticket);
        let result = f(slot.value_mut());
        drop(slot);
        drop(grant);
        result
    }
}

impl<T, const N: usize, Push, Pop> Popper<'_, T, N, Push, Pop>
where
    Push: Side,
    Pop: Side<Wait = Parking>,
{
    /// Dequeues a payload, parking the thread while the queue is empty.
    ///
    /// `None` only when the queue is disposed.
    pub fn try_pop_wait(&mut self) -> Option<T> {
        let ticket = self.acquire.try_acquire_wait()?;
        Some(self.complete_pop(ticket))
    }

    /// Like [`try_pop_directly`](Self::try_pop_directly), parking the
    /// thread while the queue is empty.
    pub fn try_pop_directly_wait<R>(&mut self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let ticket = self.acquire.try_acquire_wait()?;
        Some(self.complete_pop_directly(ticket, f))
    }
}
