use crate::backoff::spin_until;
use crate::invariants::debug_assert_slot_state;
use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicI8, Ordering};

// =============================================================================
// CELL STATE MACHINE
// =============================================================================
//
// Every slot carries a three-state byte:
//
//     EMPTY (+1)  --prepush-->  VOLATILE (0)  --postpush-->  FULL (-1)
//     FULL  (-1)  --prepop--->  VOLATILE (0)  --postpop--->  EMPTY (+1)
//
// The signed encoding is load-bearing: after the acquire exchange to
// VOLATILE, a single signed comparison of the displaced value classifies the
// outcome (`> 0` means we took an EMPTY slot, `< 0` a FULL one), and the
// recovery path can restore whatever terminal state it displaced and wait
// for the *negation* of it — the state the opposite side will publish.
//
// A slot is VOLATILE only momentarily, held by exactly one thread, which
// must publish the opposite terminal state before letting go. Ring-wide
// sequencing is the vacancies counters' job; the state byte only arbitrates
// the two threads that were dealt the same slot.
//
// =============================================================================

/// Cache line the layout math targets. The stride and rotation constants
/// below are all derived from this.
pub(crate) const CACHE_LINE: usize = 64;

const EMPTY: i8 = 1;
const VOLATILE: i8 = 0;
const FULL: i8 = -1;

/// Per-slot state byte with the acquire/publish protocol.
pub(crate) struct CellState {
    state: AtomicI8,
}

impl CellState {
    fn new() -> Self {
        Self {
            state: AtomicI8::new(EMPTY),
        }
    }

    /// Recovery for an exchange that displaced the wrong state.
    ///
    /// Restores the displaced terminal state, then spins until the opposite
    /// side publishes the negation — the state that lets our exchange
    /// succeed. Displacing VOLATILE (the other thread's transient window)
    /// needs no restore and no wait beyond the re-try.
    #[cold]
    #[inline(never)]
    fn fix(&self, actual: i8) {
        debug_assert_slot_state!(actual);
        if actual != VOLATILE {
            self.state.store(actual, Ordering::Relaxed);
        }
        spin_until(|| self.state.load(Ordering::Relaxed) == -actual);
    }

    /// Producer prelude: take the slot for writing.
    ///
    /// Spins while the slot is in another thread's transient window, and
    /// backs off while the slot is still FULL (the consumer that was dealt
    /// it has not arrived yet).
    pub(crate) fn prepush(&self) {
        loop {
            let actual = self.state.swap(VOLATILE, Ordering::Acquire);
            if actual > VOLATILE {
                return;
            }
            self.fix(actual);
        }
    }

    /// Producer epilogue: publish the constructed payload.
    pub(crate) fn postpush(&self) {
        self.state.store(FULL, Ordering::Release);
    }

    /// Consumer prelude: take the slot for reading.
    pub(crate) fn prepop(&self) {
        loop {
            let actual = self.state.swap(VOLATILE, Ordering::Acquire);
            if actual < VOLATILE {
                return;
            }
            self.fix(actual);
        }
    }

    /// Consumer epilogue: hand the emptied slot back.
    pub(crate) fn postpop(&self) {
        self.state.store(EMPTY, Ordering::Release);
    }
}

struct Slot<T> {
    state: CellState,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Self {
            state: CellState::new(),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

/// Fixed array of `N` payload slots with per-slot access arbitration.
///
/// Stores up to `N` payloads in fixed positions. Slots are laid out at a
/// stride padded up to a power of two, and the ticket-to-slot mapping
/// rotates the low index bits so that consecutive tickets land on distinct
/// cache lines before any line is revisited (see [`Self::slot_index`]).
pub(crate) struct CellBuffer<T, const N: usize> {
    /// Raw storage: `N` slots at `STRIDE`-byte intervals. Manual layout
    /// rather than `Box<[Slot<T>]>` because the rotation needs a
    /// power-of-two number of slots per cache line, whatever the payload's
    /// natural size — so the stride itself must be forced to a power of
    /// two, which an ordinary slice of `Slot<T>` cannot express.
    storage: NonNull<u8>,
    _marker: PhantomData<T>,
}

// SAFETY: the payload cells are handed out under the per-slot state
// protocol — one side at a time, established by the acquire exchange and
// the release publish — so the buffer may be shared freely as long as the
// payload itself can move between threads.
unsafe impl<T: Send, const N: usize> Send for CellBuffer<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for CellBuffer<T, N> {}

impl<T, const N: usize> CellBuffer<T, N> {
    const SLOT_SIZE: usize = std::mem::size_of::<Slot<T>>();
    const SLOT_ALIGN: usize = std::mem::align_of::<Slot<T>>();

    /// Distance between consecutive slots.
    ///
    /// The slot's natural size rounded up to the next power of two, or to a
    /// cache-line multiple once it is a line or wider. This is what keeps
    /// the rotation's precondition true for *every* payload: a cache line
    /// always holds a power-of-two number of slots, no matter how oddly
    /// sized the payload is.
    const STRIDE: usize = if Self::SLOT_SIZE < CACHE_LINE {
        Self::SLOT_SIZE.next_power_of_two()
    } else {
        (Self::SLOT_SIZE + CACHE_LINE - 1) & !(CACHE_LINE - 1)
    };

    /// Allocation alignment: the stride up to a cache line, and never less
    /// than the slot's own alignment. Every `i * STRIDE` offset is then
    /// correctly aligned for `Slot<T>`.
    const ALIGN: usize = {
        let base = if Self::STRIDE < CACHE_LINE {
            Self::STRIDE
        } else {
            CACHE_LINE
        };
        if base > Self::SLOT_ALIGN {
            base
        } else {
            Self::SLOT_ALIGN
        }
    };

    pub(crate) fn new() -> Self {
        const {
            assert!(
                N > 0 && N.is_power_of_two(),
                "capacity must be a non-zero power of 2"
            );
        }

        let layout = Self::layout();
        // SAFETY: the layout has non-zero size (N > 0 and a slot holds at
        // least its state byte).
        let base = unsafe { alloc(layout) };
        let Some(storage) = NonNull::new(base) else {
            handle_alloc_error(layout);
        };
        for i in 0..N {
            // SAFETY: `i * STRIDE` stays inside the allocation and is
            // aligned for `Slot<T>` (STRIDE is a multiple of the slot's
            // alignment, the base is ALIGN-aligned).
            unsafe {
                ptr::write(
                    storage.as_ptr().add(i * Self::STRIDE).cast::<Slot<T>>(),
                    Slot::new(),
                );
            }
        }
        Self {
            storage,
            _marker: PhantomData,
        }
    }

    fn layout() -> Layout {
        let size = Self::STRIDE
            .checked_mul(N)
            .expect("cell buffer size overflows the address space");
        Layout::from_size_align(size, Self::ALIGN).expect("cell buffer layout is invalid")
    }

    #[inline]
    fn slot(&self, idx: usize) -> &Slot<T> {
        debug_assert!(idx < N);
        // SAFETY: `idx < N` keeps the offset inside the allocation; every
        // slot was initialized in `new`; the spot is aligned for `Slot<T>`.
        unsafe { &*self.storage.as_ptr().add(idx * Self::STRIDE).cast::<Slot<T>>() }
    }

    /// Ticket-to-slot mapping.
    ///
    /// When several slots share a cache line, incrementing the ticket must
    /// advance the cache-*line* coordinate before the in-line coordinate, or
    /// neighbouring operations pile onto one line. The low bits of the
    /// ticket are therefore rotated left by the in-line bit count:
    ///
    /// ```text
    ///         xxx[bbbaa]              aa — position inside the line
    ///             =                   bbb — which line
    /// xxx[bbbaa]     xxx[bbbaa]       xxx — wrapped-away garbage
    ///     >>             <<
    /// 000[xxxbb]     xbb[baa00]
    ///   & mask           |
    /// 000[000bb] --> xbb[baabb] & mask --> 000[baabb]
    /// ```
    ///
    /// The padded [`STRIDE`](Self::STRIDE) guarantees the slots-per-line
    /// count is a power of two, so the rotation applies whenever more than
    /// one slot shares a line and the ring has more than a line's worth of
    /// slots. For slots a cache line or wider the mapping is plain masking
    /// (there is nothing in-line to rotate past). All the branches fold at
    /// monomorphization time.
    #[inline]
    pub(crate) fn slot_index(ticket: u64) -> usize {
        let mask = (N - 1) as u64;
        if Self::STRIDE < CACHE_LINE && N > CACHE_LINE / Self::STRIDE {
            let per_line = CACHE_LINE / Self::STRIDE;
            let inner_bits = per_line.trailing_zeros();
            let outer_bits = N.trailing_zeros() - inner_bits;
            let inner_mask = (per_line - 1) as u64;
            ((((ticket >> outer_bits) & inner_mask) | (ticket << inner_bits)) & mask) as usize
        } else {
            (ticket & mask) as usize
        }
    }

    /// Run the producer prelude on the ticket's slot and return the write
    /// guard. Blocks by spinning only for the transient window described in
    /// [`CellState::prepush`].
    pub(crate) fn push_slot(&self, ticket: u64) -> PushSlot<'_, T> {
        let slot = self.slot(Self::slot_index(ticket));
        slot.state.prepush();
        PushSlot {
            slot,
            filled: false,
        }
    }

    /// Run the consumer prelude on the ticket's slot and return the read
    /// guard.
    pub(crate) fn pop_slot(&self, ticket: u64) -> PopSlot<'_, T> {
        let slot = self.slot(Self::slot_index(ticket));
        slot.state.prepop();
        PopSlot { slot, taken: false }
    }
}

impl<T, const N: usize> Drop for CellBuffer<T, N> {
    fn drop(&mut self) {
        // Drain whatever is still published, in index order. `&mut self`
        // means no slot can be mid-transition any more.
        for i in 0..N {
            let slot = self.slot(i);
            if slot.state.state.load(Ordering::Relaxed) == FULL {
                // SAFETY: FULL slots hold an initialized payload that
                // nothing else can reach past this point.
                unsafe { ptr::drop_in_place((*slot.value.get()).as_mut_ptr()) };
                slot.state.state.store(EMPTY, Ordering::Relaxed);
            }
        }
        // SAFETY: allocated in `new` with this exact layout; the slots
        // themselves have no drop glue beyond the payloads drained above.
        unsafe { dealloc(self.storage.as_ptr(), Self::layout()) };
    }
}

/// Write guard for one slot, produced by [`CellBuffer::push_slot`].
///
/// Holds the slot VOLATILE. Dropping it publishes FULL when the payload was
/// written, and reverts the slot to EMPTY when it was not — the unwind path
/// of a panicking payload constructor.
pub(crate) struct PushSlot<'b, T> {
    slot: &'b Slot<T>,
    filled: bool,
}

impl<T> PushSlot<'_, T> {
    /// Construct the payload in place.
    pub(crate) fn fill_with(&mut self, f: impl FnOnce() -> T) {
        debug_assert!(!self.filled, "slot filled twice");
        // SAFETY: the prepush exchange made this thread the slot's only
        // owner, and the slot was EMPTY, so the storage is vacant.
        unsafe { (*self.slot.value.get()).write(f()) };
        self.filled = true;
    }
}

impl<T> Drop for PushSlot<'_, T> {
    fn drop(&mut self) {
        if self.filled {
            self.slot.state.postpush();
        } else {
            // Nothing was written; hand the slot back as EMPTY.
            self.slot.state.postpop();
        }
    }
}

/// Read guard for one slot, produced by [`CellBuffer::pop_slot`].
///
/// Holds the slot VOLATILE for its whole lifetime. Dropping it destroys any
/// payload not moved out with [`take`](Self::take) and releases the slot
/// EMPTY — also when unwinding out of a caller's callback.
pub(crate) struct PopSlot<'b, T> {
    slot: &'b Slot<T>,
    taken: bool,
}

impl<T> PopSlot<'_, T> {
    /// In-place access to the payload. The reference dies with the guard.
    pub(crate) fn value_mut(&mut self) -> &mut T {
        debug_assert!(!self.taken, "slot already emptied");
        // SAFETY: the prepop exchange displaced FULL, so the storage holds
        // an initialized payload owned by this guard alone.
        unsafe { (*self.slot.value.get()).assume_init_mut() }
    }

    /// Move the payload out.
    pub(crate) fn take(&mut self) -> T {
        debug_assert!(!self.taken, "slot already emptied");
        self.taken = true;
        // SAFETY: as in `value_mut`; the `taken` flag keeps the drop glue
        // from seeing the moved-out value again.
        unsafe { (*self.slot.value.get()).assume_init_read() }
    }
}

impl<T> Drop for PopSlot<'_, T> {
    fn drop(&mut self) {
        if !self.taken {
            // SAFETY: still initialized, still exclusively ours.
            unsafe { ptr::drop_in_place((*self.slot.value.get()).as_mut_ptr()) };
        }
        self.slot.state.postpop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_state_round_trip() {
        let state = CellState::new();
        state.prepush();
        assert_eq!(state.state.load(Ordering::Relaxed), VOLATILE);
        state.postpush();
        assert_eq!(state.state.load(Ordering::Relaxed), FULL);
        state.prepop();
        assert_eq!(state.state.load(Ordering::Relaxed), VOLATILE);
        state.postpop();
        assert_eq!(state.state.load(Ordering::Relaxed), EMPTY);
    }

    #[test]
    fn test_stride_is_padded_to_power_of_two() {
        // A 5-byte, 1-aligned payload makes a 6-byte slot; the stride must
        // round up to 8 so eight slots tile a cache line exactly.
        assert_eq!(CellBuffer::<[u8; 5], 64>::STRIDE, 8);
        assert_eq!(CellBuffer::<u64, 64>::STRIDE, 16);
        assert_eq!(CellBuffer::<u8, 64>::STRIDE, 2);
        // A line-or-wider slot rounds to a cache-line multiple instead
        assert_eq!(CellBuffer::<[u8; 128], 16>::STRIDE, 192);
        assert!(CellBuffer::<[u8; 5], 64>::STRIDE.is_power_of_two());
    }

    #[test]
    fn test_slot_index_is_a_permutation() {
        fn check<T, const N: usize>() {
            let seen: HashSet<usize> = (0..N as u64).map(CellBuffer::<T, N>::slot_index).collect();
            assert_eq!(seen.len(), N, "mapping must be a bijection on 0..N");
            assert!(seen.into_iter().all(|idx| idx < N));
        }
        check::<u64, 64>();
        check::<u8, 256>();
        check::<[u8; 5], 64>();
        check::<[u8; 128], 16>();
        check::<u32, 4>();
    }

    #[test]
    fn test_slot_index_advances_lines_first() {
        fn check<T, const N: usize>() {
            let per_line = CACHE_LINE / CellBuffer::<T, N>::STRIDE;
            let line_count = N / per_line;
            let lines: Vec<usize> = (0..line_count as u64)
                .map(|t| CellBuffer::<T, N>::slot_index(t) / per_line)
                .collect();
            let distinct: HashSet<_> = lines.iter().collect();
            assert_eq!(distinct.len(), lines.len(), "early tickets share a line");
        }
        // 16-byte slots, 4 per line
        check::<u64, 64>();
        // 8-byte padded slots from a 6-byte natural size, 8 per line
        check::<[u8; 5], 64>();
    }

    #[test]
    fn test_slot_index_wraps() {
        type Buf = CellBuffer<u64, 8>;
        for t in 0..64u64 {
            assert_eq!(Buf::slot_index(t), Buf::slot_index(t + 8));
        }
    }

    #[test]
    fn test_push_then_pop_moves_value() {
        let buf = CellBuffer::<String, 4>::new();
        let mut push = buf.push_slot(0);
        push.fill_with(|| String::from("hello"));
        drop(push);

        let mut pop = buf.pop_slot(0);
        assert_eq!(pop.value_mut().as_str(), "hello");
        assert_eq!(pop.take(), "hello");
        drop(pop);

        // Slot cycled back to EMPTY and is writable again
        let mut push = buf.push_slot(8);
        push.fill_with(|| String::from("again"));
    }

    #[test]
    fn test_odd_sized_payload_round_trip() {
        let buf = CellBuffer::<[u8; 5], 64>::new();
        for t in 0..64u64 {
            buf.push_slot(t).fill_with(|| [t as u8; 5]);
        }
        for t in 0..64u64 {
            assert_eq!(buf.pop_slot(t).take(), [t as u8; 5]);
        }
    }

    #[test]
    fn test_unfilled_push_reverts_to_empty() {
        let buf = CellBuffer::<u32, 4>::new();
        let push = buf.push_slot(0);
        drop(push); // never filled

        // The slot must be EMPTY again, not FULL
        let mut push = buf.push_slot(0);
        push.fill_with(|| 7);
        drop(push);
        let mut pop = buf.pop_slot(0);
        assert_eq!(pop.take(), 7);
    }

    #[test]
    fn test_drop_drains_full_slots() {
        static DROPS: AtomicUsize = AtomicUsize::new(0);

        struct Tracked;
        impl Drop for Tracked {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::SeqCst);
            }
        }

        DROPS.store(0, Ordering::SeqCst);
        {
            let buf = CellBuffer::<Tracked, 8>::new();
            for t in 0..5 {
                buf.push_slot(t).fill_with(|| Tracked);
            }
            // One slot is popped by hand; four remain for the drain
            drop(buf.pop_slot(0).take());
            assert_eq!(DROPS.load(Ordering::SeqCst), 1);
        }
        assert_eq!(DROPS.load(Ordering::SeqCst), 5);
    }
}
