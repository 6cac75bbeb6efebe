use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

// =============================================================================
// CREDIT STORE PROTOCOL
// =============================================================================
//
// A credit store is the state behind a vacancies counter: a signed credit
// balance split across two counters, an index dispenser and a disposed latch.
//
// ## The two-counter split
//
// Credits are *added* by the opposite side of the queue (a consumer finishing
// a pop grants a push credit, and vice versa) and *acquired* by this side.
// Keeping one shared counter for both directions would bounce its cache line
// between the two sides on every operation. Instead:
//
// - `count` is the **add counter**: the opposite side's `fetch_add` target.
// - `cache` is the **acquire-side counter**: this side drains it privately.
//
// When the cache runs dry, the acquirer *harvests*: it exchanges the add
// counter to zero and moves the harvested amount (minus the credit being
// acquired) into the cache in a single step. The acquire fast path therefore
// touches only the cache line the acquiring side already owns.
//
// ## Memory ordering
//
// - Credit add: `Release` (publishes the slot release that freed the credit).
// - Harvest / cache drain on success: `Acquire` (pairs with the add).
// - Index dispense: `Relaxed` — ordering between tickets is established
//   through the per-slot state machine, not the dispenser.
// - Disposed latch: `Relaxed` loads and stores; the latch is a hint that is
//   re-checked on every spin iteration, not a synchronization point.
//
// ## Layouts
//
// Four stores cover the configuration space:
//
// - [`SharedCredits`] / [`SharedCreditsPadded`]: any number of acquiring
//   threads; everything atomic. The padded variant keeps the add counter and
//   the cache on distinct cache lines (`cache_optimised`).
// - [`SingleCredits`] / [`SingleCreditsPadded`]: exactly one acquiring
//   thread; the cache and the index dispenser degrade to plain integers in
//   `UnsafeCell`s. Exclusivity is enforced by the claim flag — see
//   [`crate::vacancies::Acquirer`].
//
// =============================================================================

pub(crate) mod sealed {
    /// Micro-operations shared by every credit store layout.
    ///
    /// These are the building blocks the vacancies counter composes into
    /// `try_acquire` and friends. They are deliberately unreachable from
    /// outside the crate: the single-client layouts rely on the claim
    /// discipline for soundness, so arbitrary callers must not get at them.
    pub trait Store {
        fn with_credits(init: i64) -> Self;

        /// Add one credit to the add counter. Returns the prior value.
        fn add_count(&self) -> i64;

        /// Add `k` credits to the add counter. Returns the prior value.
        fn add_bunch_count(&self, k: i64) -> i64;

        /// Take one credit from the cache. `false` if the cache was empty.
        fn try_cache(&self) -> bool;

        /// Undo the optimistic decrement of a failed `try_cache`.
        ///
        /// Returns `true` when the cache may have been refilled concurrently
        /// and `try_cache` is worth retrying. Single-client stores never
        /// decrement on failure, so they always return `false`.
        fn restore_cache(&self) -> bool;

        /// Harvest the add counter into the cache, keeping one credit.
        ///
        /// Returns the harvested amount; zero means the counter was empty.
        /// On success one credit is kept and `harvested - 1` land in the
        /// cache — the caller is responsible for waking that many parked
        /// waiters, if it has any.
        fn try_count(&self) -> i64;

        /// Cheap probe: does the add counter hold credits?
        fn check_count(&self) -> bool;

        /// Cheap probe: does the cache hold credits?
        fn check_cache(&self) -> bool;

        fn check_disposed(&self) -> bool;
        fn set_disposed(&self);

        /// Dispense the next ticket.
        fn next_index(&self) -> u64;

        /// Drain the add counter into the cache and report the total.
        fn current(&self) -> i64;

        /// Claim the acquire side. Shared stores always succeed; a
        /// single-client store admits one claim at a time.
        fn try_claim(&self) -> bool;
        fn release_claim(&self);
    }
}

use sealed::Store;

/// Marker trait for the credit store layouts.
///
/// Sealed: the four provided layouts are the complete set.
pub trait CreditStore: Store + Send + Sync {}

// -----------------------------------------------------------------------------
// Shared (multi-client) layouts
// -----------------------------------------------------------------------------

/// Multi-client credit store, compact layout.
///
/// Any number of threads may acquire concurrently; every field is atomic.
pub struct SharedCredits {
    count: AtomicI64,
    cache: AtomicI64,
    index: AtomicU64,
    disposed: AtomicBool,
}

impl Store for SharedCredits {
    fn with_credits(init: i64) -> Self {
        Self {
            count: AtomicI64::new(0),
            cache: AtomicI64::new(init),
            index: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
        }
    }

    #[inline(always)]
    fn add_count(&self) -> i64 {
        self.count.fetch_add(1, Ordering::Release)
    }

    #[inline(always)]
    fn add_bunch_count(&self, k: i64) -> i64 {
        self.count.fetch_add(k, Ordering::Release)
    }

    #[inline(always)]
    fn try_cache(&self) -> bool {
        self.cache.fetch_add(-1, Ordering::Acquire) > 0
    }

    #[inline(always)]
    fn restore_cache(&self) -> bool {
        self.cache.fetch_add(1, Ordering::Relaxed) >= 0
    }

    #[inline(always)]
    fn try_count(&self) -> i64 {
        let harvested = self.count.swap(0, Ordering::Acquire);
        if harvested > 0 {
            self.cache.fetch_add(harvested - 1, Ordering::Release);
        }
        harvested
    }

    #[inline(always)]
    fn check_count(&self) -> bool {
        self.count.load(Ordering::Relaxed) > 0
    }

    #[inline(always)]
    fn check_cache(&self) -> bool {
        self.cache.load(Ordering::Relaxed) > 0
    }

    #[inline(always)]
    fn check_disposed(&self) -> bool {
        self.disposed.load(Ordering::Relaxed)
    }

    #[inline(always)]
    fn set_disposed(&self) {
        self.disposed.store(true, Ordering::Relaxed);
    }

    #[inline(always)]
    fn next_index(&self) -> u64 {
        self.index.fetch_add(1, Ordering::Relaxed)
    }

    #[inline(always)]
    fn current(&self) -> i64 {
        let harvested = self.count.swap(0, Ordering::Acquire);
        let cached = self.cache.fetch_add(harvested, Ordering::Release);
        harvested + cached
    }

    #[inline(always)]
    fn try_claim(&self) -> bool {
        true
    }

    #[inline(always)]
    fn release_claim(&self) {}
}

impl CreditStore for SharedCredits {}

/// Multi-client credit store with the add counter and the cache on distinct
/// cache lines, so opposite-side adds never dirty the acquire-side line.
pub struct SharedCreditsPadded {
    count: CachePadded<AtomicI64>,
    cache: CachePadded<AtomicI64>,
    index: AtomicU64,
    disposed: AtomicBool,
}

impl Store for SharedCreditsPadded {
    fn with_credits(init: i64) -> Self {
        Self {
            count: CachePadded::new(AtomicI64::new(0)),
            cache: CachePadded::new(AtomicI64::new(init)),
            index: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
        }
    }

    #[inline(always)]
    fn add_count(&self) -> i64 {
        self.count.fetch_add(1, Ordering::Release)
    }

    #[inline(always)]
    fn add_bunch_count(&self, k: i64) -> i64 {
        self.count.fetch_add(k, Ordering::Release)
    }

    #[inline(always)]
    fn try_cache(&self) -> bool {
        self.cache.fetch_add(-1, Ordering::Acquire) > 0
    }

    #[inline(always)]
    fn restore_cache(&self) -> bool {
        self.cache.fetch_add(1, Ordering::Relaxed) >= 0
    }

    #[inline(always)]
    fn try_count(&self) -> i64 {
        let harvested = self.count.swap(0, Ordering::Acquire);
        if harvested > 0 {
            self.cache.fetch_add(harvested - 1, Ordering::Release);
        }
        harvested
    }

    #[inline(always)]
    fn check_count(&self) -> bool {
        self.count.load(Ordering::Relaxed) > 0
    }

    #[inline(always)]
    fn check_cache(&self) -> bool {
        self.cache.load(Ordering::Relaxed) > 0
    }

    #[inline(always)]
    fn check_disposed(&self) -> bool {
        self.disposed.load(Ordering::Relaxed)
    }

    #[inline(always)]
    fn set_disposed(&self) {
        self.disposed.store(true, Ordering::Relaxed);
    }

    #[inline(always)]
    fn next_index(&self) -> u64 {
        self.index.fetch_add(1, Ordering::Relaxed)
    }

    #[inline(always)]
    fn current(&self) -> i64 {
        let harvested = self.count.swap(0, Ordering::Acquire);
        let cached = self.cache.fetch_add(harvested, Ordering::Release);
        harvested + cached
    }

    #[inline(always)]
    fn try_claim(&self) -> bool {
        true
    }

    #[inline(always)]
    fn release_claim(&self) {}
}

impl CreditStore for SharedCreditsPadded {}

// -----------------------------------------------------------------------------
// Single-client layouts
// -----------------------------------------------------------------------------

/// Single-client credit store, compact layout.
///
/// The cache and the index dispenser are plain integers: with one acquiring
/// thread there is nothing to synchronize against on the acquire side. The
/// add counter stays atomic because the opposite side writes it.
pub struct SingleCredits {
    count: AtomicI64,
    cache: UnsafeCell<i64>,
    index: UnsafeCell<u64>,
    disposed: AtomicBool,
    claimed: AtomicBool,
}

// SAFETY: the `UnsafeCell` fields are only touched by the acquire-side
// micro-ops, which are reachable solely through a claimed `Acquirer` (unique
// by the `claimed` flag, methods taking `&mut self`) or through `&mut`
// access to the owning structure. Either way exactly one thread can be
// inside them at a time. The remaining fields are atomic.
unsafe impl Sync for SingleCredits {}

impl Store for SingleCredits {
    fn with_credits(init: i64) -> Self {
        Self {
            count: AtomicI64::new(0),
            cache: UnsafeCell::new(init),
            index: UnsafeCell::new(0),
            disposed: AtomicBool::new(false),
            claimed: AtomicBool::new(false),
        }
    }

    #[inline(always)]
    fn add_count(&self) -> i64 {
        self.count.fetch_add(1, Ordering::Release)
    }

    #[inline(always)]
    fn add_bunch_count(&self, k: i64) -> i64 {
        self.count.fetch_add(k, Ordering::Release)
    }

    #[inline(always)]
    fn try_cache(&self) -> bool {
        // SAFETY: acquire-side op; exclusive by the claim discipline.
        let cache = unsafe { &mut *self.cache.get() };
        if *cache > 0 {
            *cache -= 1;
            true
        } else {
            false
        }
    }

    #[inline(always)]
    fn restore_cache(&self) -> bool {
        // A failed `try_cache` did not decrement, so there is nothing to
        // restore and no concurrent refill to race with.
        false
    }

    #[inline(always)]
    fn try_count(&self) -> i64 {
        let harvested = self.count.swap(0, Ordering::Acquire);
        if harvested > 0 {
            // SAFETY: acquire-side op; exclusive by the claim discipline.
            unsafe { *self.cache.get() = harvested - 1 };
        }
        harvested
    }

    #[inline(always)]
    fn check_count(&self) -> bool {
        self.count.load(Ordering::Relaxed) > 0
    }

    #[inline(always)]
    fn check_cache(&self) -> bool {
        // SAFETY: acquire-side op; exclusive by the claim discipline.
        unsafe { *self.cache.get() > 0 }
    }

    #[inline(always)]
    fn check_disposed(&self) -> bool {
        self.disposed.load(Ordering::Relaxed)
    }

    #[inline(always)]
    fn set_disposed(&self) {
        self.disposed.store(true, Ordering::Relaxed);
    }

    #[inline(always)]
    fn next_index(&self) -> u64 {
        // SAFETY: acquire-side op; exclusive by the claim discipline.
        let index = unsafe { &mut *self.index.get() };
        let ticket = *index;
        *index += 1;
        ticket
    }

    #[inline(always)]
    fn current(&self) -> i64 {
        let harvested = self.count.swap(0, Ordering::Acquire);
        // SAFETY: acquire-side op; exclusive by the claim discipline.
        let cache = unsafe { &mut *self.cache.get() };
        *cache += harvested;
        *cache
    }

    #[inline(always)]
    fn try_claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    #[inline(always)]
    fn release_claim(&self) {
        self.claimed.store(false, Ordering::Release);
    }
}

impl CreditStore for SingleCredits {}

/// Single-client credit store with the add counter and the cache on distinct
/// cache lines.
pub struct SingleCreditsPadded {
    count: CachePadded<AtomicI64>,
    cache: CachePadded<UnsafeCell<i64>>,
    index: UnsafeCell<u64>,
    disposed: AtomicBool,
    claimed: AtomicBool,
}

// SAFETY: same argument as `SingleCredits` — the cell fields are confined to
// the claimed acquirer.
unsafe impl Sync for SingleCreditsPadded {}

impl Store for SingleCreditsPadded {
    fn with_credits(init: i64) -> Self {
        Self {
            count: CachePadded::new(AtomicI64::new(0)),
            cache: CachePadded::new(UnsafeCell::new(init)),
            index: UnsafeCell::new(0),
            disposed: AtomicBool::new(false),
            claimed: AtomicBool::new(false),
        }
    }

    #[inline(always)]
    fn add_count(&self) -> i64 {
        self.count.fetch_add(1, Ordering::Release)
    }

    #[inline(always)]
    fn add_bunch_count(&self, k: i64) -> i64 {
        self.count.fetch_add(k, Ordering::Release)
    }

    #[inline(always)]
    fn try_cache(&self) -> bool {
        // SAFETY: acquire-side op; exclusive by the claim discipline.
        let cache = unsafe { &mut *self.cache.get() };
        if *cache > 0 {
            *cache -= 1;
            true
        } else {
            false
        }
    }

    #[inline(always)]
    fn restore_cache(&self) -> bool {
        false
    }

    #[inline(always)]
    fn try_count(&self) -> i64 {
        let harvested = self.count.swap(0, Ordering::Acquire);
        if harvested > 0 {
            // SAFETY: acquire-side op; exclusive by the claim discipline.
            unsafe { *self.cache.get() = harvested - 1 };
        }
        harvested
    }

    #[inline(always)]
    fn check_count(&self) -> bool {
        self.count.load(Ordering::Relaxed) > 0
    }

    #[inline(always)]
    fn check_cache(&self) -> bool {
        // SAFETY: acquire-side op; exclusive by the claim discipline.
        unsafe { *self.cache.get() > 0 }
    }

    #[inline(always)]
    fn check_disposed(&self) -> bool {
        self.disposed.load(Ordering::Relaxed)
    }

    #[inline(always)]
    fn set_disposed(&self) {
        self.disposed.store(true, Ordering::Relaxed);
    }

    #[inline(always)]
    fn next_index(&self) -> u64 {
        // SAFETY: acquire-side op; exclusive by the claim discipline.
        let index = unsafe { &mut *self.index.get() };
        let ticket = *index;
        *index += 1;
        ticket
    }

    #[inline(always)]
    fn current(&self) -> i64 {
        let harvested = self.count.swap(0, Ordering::Acquire);
        // SAFETY: acquire-side op; exclusive by the claim discipline.
        let cache = unsafe { &mut *self.cache.get() };
        *cache += harvested;
        *cache
    }

    #[inline(always)]
    fn try_claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    #[inline(always)]
    fn release_claim(&self) {
        self.claimed.store(false, Ordering::Release);
    }
}

impl CreditStore for SingleCreditsPadded {}
