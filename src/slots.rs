//! Chunked slot arena backing a thread registry.
//!
//! Records live in slots with stable addresses so that any thread may
//! read a published record while the owner thread keeps inserting. The
//! arena grows by appending chunks of doubling size behind `OnceLock`s;
//! a chunk, once published, is never moved or freed, so `&Slot`
//! references stay valid for the arena's lifetime.
//!
//! Slots are reused. A generation counter per slot (odd while occupied,
//! even while vacant) invalidates keys to reclaimed records: a key whose
//! generation no longer matches is stale or belongs to a foreign
//! registry, which callers treat as fatal.

use crate::promise::{LineCell, PromiseId, State, StateCell, WaiterCell};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

/// Sentinel index meaning "no slot".
pub(crate) const NIL: u32 = u32::MAX;

const BASE_SLOTS: u32 = 32;
const MAX_CHUNKS: usize = 26;

/// Total slots an arena can hold.
pub(crate) const CAPACITY: u32 = BASE_SLOTS * ((1 << MAX_CHUNKS) - 1);

/// Immutable identity of a record, written before publication and taken
/// at reclamation.
#[derive(Debug)]
pub(crate) struct SlotPayload {
    pub(crate) id: PromiseId,
    pub(crate) file: &'static str,
    pub(crate) function: &'static str,
}

/// One record slot.
///
/// The link cells (`next`, `previous`, `next_to_free`) are index cells
/// with [`NIL`] as the null value; the mutator cells (`state`, `line`,
/// `waiter`) are the independently atomic fields a snapshot reads.
#[derive(Debug)]
pub(crate) struct Slot {
    /// Odd while occupied, even while vacant. Bumped on allocate and
    /// reclaim; keys carry the value observed at allocation.
    pub(crate) generation: AtomicU32,
    pub(crate) state: StateCell,
    pub(crate) line: LineCell,
    pub(crate) waiter: WaiterCell,
    /// Live-list successor. Written by the owner thread before the slot
    /// is published, and by garbage collection under the sweep lock.
    pub(crate) next: AtomicU32,
    /// Best-effort back-link, assigned when a successor is linked in
    /// front of this slot. May be observed stale; unlink tolerates that
    /// by leaving the record for a later collection pass.
    pub(crate) previous: AtomicU32,
    /// Free-list successor. Written only by the thread that links this
    /// slot onto the free list, read only by garbage collection.
    pub(crate) next_to_free: AtomicU32,
    /// Identity payload. Written at insertion before the slot is
    /// published, taken at reclamation after unlinking; readers hold
    /// the sweep lock. Never contended.
    pub(crate) payload: Mutex<Option<SlotPayload>>,
}

impl Slot {
    fn new() -> Self {
        Self {
            generation: AtomicU32::new(0),
            state: StateCell::new(State::Running),
            line: LineCell::new(),
            waiter: WaiterCell::new(),
            next: AtomicU32::new(NIL),
            previous: AtomicU32::new(NIL),
            next_to_free: AtomicU32::new(NIL),
            payload: Mutex::new(None),
        }
    }

    /// Returns true if the slot currently holds a record.
    pub(crate) fn is_occupied(&self) -> bool {
        self.generation.load(Ordering::Acquire) & 1 == 1
    }
}

#[derive(Debug)]
struct AllocState {
    vacant: Vec<u32>,
    next_fresh: u32,
}

/// Append-only chunked slot storage with slot reuse.
#[derive(Debug)]
pub(crate) struct SlotArena {
    chunks: [OnceLock<Box<[Slot]>>; MAX_CHUNKS],
    alloc: Mutex<AllocState>,
}

impl SlotArena {
    pub(crate) fn new() -> Self {
        Self {
            chunks: std::array::from_fn(|_| OnceLock::new()),
            alloc: Mutex::new(AllocState {
                vacant: Vec::new(),
                next_fresh: 0,
            }),
        }
    }

    /// Resolves a slot index. The index must have been allocated before;
    /// the publishing store that made it reachable also made its chunk
    /// visible.
    pub(crate) fn slot(&self, index: u32) -> &Slot {
        debug_assert!(index < CAPACITY);
        let (chunk, offset) = position_of(index);
        let slots = self.chunks[chunk].get().expect("slot chunk not published");
        &slots[offset]
    }

    /// Takes a vacant slot, marks it occupied, and returns its index,
    /// generation, and reference. Returns `None` when the arena is full.
    ///
    /// The returned slot is unreachable from any list until the caller
    /// publishes it, so the caller may initialize it with plain stores.
    pub(crate) fn allocate(&self) -> Option<(u32, u32, &Slot)> {
        let index = {
            let mut alloc = self.alloc.lock();
            if let Some(index) = alloc.vacant.pop() {
                index
            } else if alloc.next_fresh < CAPACITY {
                let index = alloc.next_fresh;
                alloc.next_fresh += 1;
                index
            } else {
                return None;
            }
        };

        let (chunk, offset) = position_of(index);
        let slots = self.chunks[chunk].get_or_init(|| make_chunk(chunk));
        let slot = &slots[offset];

        let generation = slot.generation.load(Ordering::Relaxed) + 1;
        debug_assert!(generation & 1 == 1, "allocated slot was occupied");
        slot.generation.store(generation, Ordering::Relaxed);
        Some((index, generation, slot))
    }

    /// Drops a slot's payload, invalidates outstanding keys, and makes
    /// the slot available for reuse. The caller must have unlinked the
    /// slot from the live list first.
    pub(crate) fn reclaim(&self, index: u32) {
        let slot = self.slot(index);
        let payload = slot.payload.lock().take();
        debug_assert!(payload.is_some(), "reclaimed a vacant slot");
        drop(payload);
        slot.generation.fetch_add(1, Ordering::Release);
        self.alloc.lock().vacant.push(index);
    }

    /// Number of occupied slots (live plus marked-but-uncollected).
    pub(crate) fn occupied(&self) -> usize {
        let alloc = self.alloc.lock();
        alloc.next_fresh as usize - alloc.vacant.len()
    }
}

fn make_chunk(chunk: usize) -> Box<[Slot]> {
    (0..chunk_len(chunk)).map(|_| Slot::new()).collect()
}

const fn chunk_len(chunk: usize) -> usize {
    (BASE_SLOTS as usize) << chunk
}

/// Maps a global slot index to its chunk and offset. Chunk `c` holds
/// `BASE_SLOTS << c` slots starting at `BASE_SLOTS * (2^c - 1)`.
fn position_of(index: u32) -> (usize, usize) {
    let chunk = (index / BASE_SLOTS + 1).ilog2() as usize;
    let start = BASE_SLOTS * ((1u32 << chunk) - 1);
    (chunk, (index - start) as usize)
}
