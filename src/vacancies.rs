use crate::backoff::Backoff;
use crate::credits::CreditStore;
use crate::invariants::debug_assert_credit_band;
use std::sync::{Condvar, Mutex, PoisonError};
use thiserror::Error;

// =============================================================================
// VACANCIES COUNTER
// =============================================================================
//
// A vacancies counter gates operations on a shared quantity of credit and
// hands each successful acquisition a monotonically increasing ticket. The
// queue owns two of them: the push side starts with `N` credits, the pop side
// with none, and completing an operation on one side grants a credit to the
// other. Credits say *how many* operations may proceed; tickets say *which
// ring slot* each operation owns.
//
// ## Waiting
//
// Waiter bookkeeping lives in a mutex-protected count, not in a negative
// credit value: the harvest in `try_count` exchanges the add counter to zero,
// which would silently erase a negative waiter record. `add` always calls
// into `wake`, and `wake` takes the mutex even when nobody waits — that
// mutex pass is what orders the credit add before an about-to-park waiter's
// final re-check, closing the lost-wakeup window. On `NoWait` sides `wake`
// is an empty inline function and the whole ceremony compiles away.
//
// =============================================================================

/// Ceiling for a credit balance.
///
/// Half the signed range, so a burst of concurrent adds cannot carry the
/// counter over the top.
pub const MAX_CREDITS: i64 = i64::MAX / 2;

pub(crate) mod sealed {
    /// Wait-side hooks invoked by the vacancies counter.
    pub trait Wait {
        fn new() -> Self;

        /// Wake up to `k` parked waiters.
        fn wake(&self, k: usize);

        /// Latch disposal and release every parked waiter.
        fn dispose_waiters(&self);
    }
}

/// Marker trait for the wait policies. Sealed; see [`NoWait`] and [`Parking`].
pub trait WaitPolicy: sealed::Wait + Send + Sync {}

/// Wait policy for sides that never block: every hook is a no-op.
pub struct NoWait;

impl sealed::Wait for NoWait {
    #[inline(always)]
    fn new() -> Self {
        NoWait
    }

    #[inline(always)]
    fn wake(&self, _k: usize) {}

    #[inline(always)]
    fn dispose_waiters(&self) {}
}

impl WaitPolicy for NoWait {}

#[derive(Default)]
struct WaitState {
    waiters: usize,
    awakened: usize,
    disposed: bool,
}

/// Wait policy that parks callers on a condition variable.
///
/// Pulls in a mutex, a condvar and the waiter/awakened bookkeeping; selects
/// the `try_acquire_wait` operation.
pub struct Parking {
    state: Mutex<WaitState>,
    cv: Condvar,
}

impl Parking {
    fn lock(&self) -> std::sync::MutexGuard<'_, WaitState> {
        // No user code runs under this mutex, so a poisoned lock only means
        // another holder panicked between two of our own statements; the
        // state is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl sealed::Wait for Parking {
    fn new() -> Self {
        Self {
            state: Mutex::new(WaitState::default()),
            cv: Condvar::new(),
        }
    }

    fn wake(&self, k: usize) {
        let mut state = self.lock();
        if state.disposed {
            return;
        }
        let woken = k.min(state.waiters);
        if woken == 0 {
            return;
        }
        state.waiters -= woken;
        state.awakened += woken;
        drop(state);
        if woken == 1 {
            self.cv.notify_one();
        } else {
            self.cv.notify_all();
        }
    }

    fn dispose_waiters(&self) {
        let mut state = self.lock();
        state.disposed = true;
        drop(state);
        self.cv.notify_all();
    }
}

impl WaitPolicy for Parking {}

/// Error returned when a single-client side already has a live acquirer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("the single-client side already has a live acquirer")]
pub struct SideClaimed;

/// Credit counter plus index dispenser for one side of a queue.
///
/// `C` selects the counter layout (shared or single-client, compact or
/// cache-line separated) and `W` whether callers may park. Adding credit is
/// always allowed from any thread; acquiring goes through an [`Acquirer`]
/// handle obtained with [`Vacancies::acquirer`].
pub struct Vacancies<C: CreditStore, W: WaitPolicy = NoWait> {
    store: C,
    wait: W,
}

impl<C: CreditStore, W: WaitPolicy> Vacancies<C, W> {
    /// Creates a counter holding `init` credits.
    ///
    /// # Panics
    ///
    /// Panics if `init` is negative or exceeds [`MAX_CREDITS`].
    pub fn with_credits(init: i64) -> Self {
        assert!(
            (0..=MAX_CREDITS).contains(&init),
            "initial credits must be in 0..={MAX_CREDITS}"
        );
        Self {
            store: C::with_credits(init),
            wait: W::new(),
        }
    }

    /// Adds one credit, release-ordered, and wakes one parked waiter if the
    /// wait policy parks threads.
    pub fn add(&self) {
        let prior = self.store.add_count();
        debug_assert_credit_band!(prior + 1, MAX_CREDITS);
        self.wait.wake(1);
    }

    /// Adds `k` credits and wakes up to `min(k, waiters)` parked waiters.
    ///
    /// # Panics
    ///
    /// Panics if `k` is negative.
    pub fn add_bunch(&self, k: i64) {
        assert!(k >= 0, "cannot add a negative bunch of credits");
        if k == 0 {
            return;
        }
        let prior = self.store.add_bunch_count(k);
        debug_assert_credit_band!(prior + k, MAX_CREDITS);
        self.wait.wake(k as usize);
    }

    /// Latches the disposed flag and releases every parked waiter.
    ///
    /// One-way and idempotent. The credit counter is left untouched:
    /// non-waiting acquires that find leftover credit afterwards still
    /// succeed, while spinning and waiting acquires observe the latch and
    /// return rejected.
    pub fn dispose(&self) {
        self.store.set_disposed();
        self.wait.dispose_waiters();
    }

    /// Whether [`dispose`](Self::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.store.check_disposed()
    }

    /// Claims the acquire side of this counter.
    ///
    /// Shared layouts hand out any number of acquirers; single-client
    /// layouts admit one at a time (the claim is released when the acquirer
    /// drops).
    pub fn acquirer(&self) -> Result<Acquirer<'_, C, W>, SideClaimed> {
        if self.store.try_claim() {
            Ok(Acquirer { vacancies: self })
        } else {
            Err(SideClaimed)
        }
    }

    // ---------------------------------------------------------------------
    // Raw acquire paths. Only reachable through an `Acquirer` or from the
    // owning queue, which is what keeps the single-client layouts sound.
    // ---------------------------------------------------------------------

    /// Non-blocking acquire: drain the cache, then harvest the add counter.
    pub(crate) fn try_acquire_raw(&self) -> Option<u64> {
        let (ticket, surplus) = self.acquire_inner();
        if surplus > 0 {
            self.wait.wake(surplus as usize);
        }
        ticket
    }

    /// The drain/harvest core, without waking anyone.
    ///
    /// Returns the ticket and the number of credits the harvest banked in
    /// the cache beyond the one acquired. A harvest can satisfy waiters that
    /// parked while the add counter filled, so the caller must route the
    /// surplus into a wake — the split exists because the blocking path
    /// already holds the wait mutex when it re-checks.
    fn acquire_inner(&self) -> (Option<u64>, i64) {
        loop {
            if self.store.try_cache() {
                return (Some(self.store.next_index()), 0);
            }
            if !self.store.restore_cache() {
                break;
            }
        }
        let harvested = self.store.try_count();
        if harvested > 0 {
            (Some(self.store.next_index()), harvested - 1)
        } else {
            (None, 0)
        }
    }

    /// Spinning acquire: adaptive backoff over cheap relaxed probes, with
    /// the real try operations re-attempted only when a probe looks good.
    /// Returns `None` only when the counter is disposed.
    pub(crate) fn try_acquire_spin_raw(&self) -> Option<u64> {
        // Two re-entry points: a good add-counter probe jumps straight to
        // the harvest, a good cache probe back to the drain.
        let mut skip_cache = false;
        loop {
            if !skip_cache {
                loop {
                    if self.store.try_cache() {
                        return Some(self.store.next_index());
                    }
                    if !self.store.restore_cache() {
                        break;
                    }
                }
            }
            let harvested = self.store.try_count();
            if harvested > 0 {
                let ticket = self.store.next_index();
                if harvested > 1 {
                    self.wait.wake((harvested - 1) as usize);
                }
                return Some(ticket);
            }

            let mut backoff = Backoff::new();
            loop {
                backoff.pause();
                if self.store.check_disposed() {
                    return None;
                }
                if self.store.check_count() {
                    skip_cache = true;
                    break;
                }
                if self.store.check_cache() {
                    skip_cache = false;
                    break;
                }
            }
        }
    }

    /// Draining snapshot of the effective credit (add counter + cache).
    pub(crate) fn current_raw(&self) -> i64 {
        self.store.current()
    }
}

impl<C: CreditStore> Vacancies<C, Parking> {
    /// Blocking acquire: park on the condition variable until credit or
    /// disposal arrives. Returns `None` only when disposed.
    pub(crate) fn try_acquire_wait_raw(&self) -> Option<u64> {
        loop {
            if let Some(ticket) = self.try_acquire_raw() {
                return Some(ticket);
            }

            let mut state = self.wait.lock();
            if state.disposed {
                return None;
            }
            // Final re-check with the mutex held, using the real
            // fetch-and-modify path rather than relaxed probes: an RMW
            // cannot read a stale counter, and an add that completed before
            // we locked is ordered before this check by the mutex handoff
            // in `wake`. Either the credit is taken here, or the adder will
            // find us registered.
            let (ticket, surplus) = self.acquire_inner();
            if let Some(ticket) = ticket {
                if surplus > 0 {
                    let woken = (surplus as usize).min(state.waiters);
                    if woken > 0 {
                        state.waiters -= woken;
                        state.awakened += woken;
                        if woken == 1 {
                            self.wait.cv.notify_one();
                        } else {
                            self.wait.cv.notify_all();
                        }
                    }
                }
                return Some(ticket);
            }
            state.waiters += 1;
            loop {
                state = self
                    .wait
                    .cv
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
                if state.disposed {
                    return None;
                }
                if state.awakened > 0 {
                    state.awakened -= 1;
                    break;
                }
            }
            // Woken with a credit pending; loop around and race for it.
        }
    }
}

/// Claim handle for the acquire side of a [`Vacancies`] counter.
///
/// All acquisition goes through this handle so that the single-client
/// layouts, whose cache and index dispenser are not atomic, have a unique
/// owner. Shared layouts hand out as many acquirers as asked for.
pub struct Acquirer<'a, C: CreditStore, W: WaitPolicy = NoWait> {
    vacancies: &'a Vacancies<C, W>,
}

impl<C: CreditStore, W: WaitPolicy> Acquirer<'_, C, W> {
    /// Non-blocking acquire. `Some(ticket)` on success, `None` when no
    /// credit is available.
    pub fn try_acquire(&mut self) -> Option<u64> {
        self.vacancies.try_acquire_raw()
    }

    /// Adaptive-spin acquire. `None` only when the counter is disposed.
    pub fn try_acquire_spin(&mut self) -> Option<u64> {
        self.vacancies.try_acquire_spin_raw()
    }

    /// Draining snapshot of the effective credit.
    pub fn current(&mut self) -> i64 {
        self.vacancies.current_raw()
    }
}

impl<C: CreditStore> Acquirer<'_, C, Parking> {
    /// Blocking acquire. `None` only when the counter is disposed.
    pub fn try_acquire_wait(&mut self) -> Option<u64> {
        self.vacancies.try_acquire_wait_raw()
    }
}

impl<C: CreditStore, W: WaitPolicy> Drop for Acquirer<'_, C, W> {
    fn drop(&mut self) {
        self.vacancies.store.release_claim();
    }
}
