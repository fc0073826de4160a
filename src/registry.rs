//! Per-thread promise registry.
//!
//! A [`ThreadRegistry`] belongs to one owning thread and tracks the
//! promises living on it. The concurrency discipline:
//!
//! - **Insertion** happens only on the owning thread, so it never races
//!   with garbage collection (also owner-only) and needs no lock.
//! - **Mark-for-deletion** may happen on any thread. It flips the record
//!   to `Deleted` and pushes it onto a lock-free free list.
//! - **Iteration** may happen on any thread. The sweep lock keeps
//!   garbage collection from unlinking records under the walker; the
//!   acquire load of the live head guarantees every observed record is
//!   fully constructed.
//! - **Garbage collection** is driven manually on the owning thread. It
//!   takes the whole free list in one exchange, then unlinks and
//!   reclaims each record under the sweep lock.
//!
//! The registry retires itself when its reference count reaches zero:
//! the count holds one unit for the directory and one per live record,
//! and the final decrement runs a terminal collection pass on whichever
//! thread performed it.

use crate::error::RegistryError;
use crate::location::Location;
use crate::promise::{
    current_thread_id, PromiseId, PromiseSnapshot, SourceLocationSnapshot, State, ThreadInfo,
    Waiter,
};
use crate::slots::{Slot, SlotArena, SlotPayload, CAPACITY, NIL};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Keyed reference to a record in a specific registry.
///
/// Deliberately neither `Copy` nor `Clone`: a key is consumed by
/// [`ThreadRegistry::mark_for_deletion`], which makes "marked at most
/// once" a property of the type rather than a convention.
#[derive(Debug, PartialEq, Eq)]
pub struct SlotKey {
    registry: u64,
    index: u32,
    generation: u32,
}

/// A registry owned by a single thread.
#[derive(Debug)]
pub struct ThreadRegistry {
    id: u64,
    thread: ThreadInfo,
    slots: SlotArena,
    live_head: AtomicU32,
    free_head: AtomicU32,
    ref_count: AtomicUsize,
    /// Serializes iteration against garbage collection. Insertion and
    /// marking run outside it.
    sweep: Mutex<()>,
}

impl ThreadRegistry {
    /// Creates a registry owned by the calling thread.
    ///
    /// The reference count starts at zero; publication to the directory
    /// and record insertion add the units that keep it live.
    #[must_use]
    pub fn new() -> Arc<Self> {
        let thread = ThreadInfo::for_current();
        let id = NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed);
        debug!(registry = id, thread = %thread.name, "thread registry created");
        Arc::new(Self {
            id,
            thread,
            slots: SlotArena::new(),
            live_head: AtomicU32::new(NIL),
            free_head: AtomicU32::new(NIL),
            ref_count: AtomicUsize::new(0),
            sweep: Mutex::new(()),
        })
    }

    /// The thread this registry belongs to.
    #[must_use]
    pub fn owning_thread(&self) -> &ThreadInfo {
        &self.thread
    }

    /// Returns true if the calling thread owns this registry.
    #[must_use]
    pub fn is_owner(&self) -> bool {
        current_thread_id() == self.thread.id
    }

    /// Inserts a record for a promise at `location`.
    ///
    /// Errors only when the slot arena is exhausted; nothing is inserted
    /// in that case.
    ///
    /// # Panics
    ///
    /// Panics when called from a thread other than the owner.
    pub fn add(&self, id: PromiseId, location: Location) -> Result<SlotKey, RegistryError> {
        assert!(
            self.is_owner(),
            "promises may only be added on the registry's owning thread"
        );
        let Some((index, generation, slot)) = self.slots.allocate() else {
            return Err(RegistryError::CapacityExhausted {
                capacity: CAPACITY as usize,
            });
        };

        // The slot is unreachable until the head store below publishes it.
        slot.state.store(State::Running);
        slot.line.store(location.line);
        slot.waiter.store(Waiter::None);
        slot.previous.store(NIL, Ordering::Relaxed);
        slot.next_to_free.store(NIL, Ordering::Relaxed);
        *slot.payload.lock() = Some(SlotPayload {
            id,
            file: location.file,
            function: location.function,
        });

        let head = self.live_head.load(Ordering::Relaxed);
        slot.next.store(head, Ordering::Relaxed);
        if head != NIL {
            // The new predecessor is the sole writer of the old head's
            // back-link while it still owns the list head.
            self.slots.slot(head).previous.store(index, Ordering::Relaxed);
        }
        // Publishes the fully initialized slot; pairs with the acquire
        // load in for_promise.
        self.live_head.store(index, Ordering::Release);
        self.increment_ref();

        trace!(
            registry = self.id,
            promise = id.as_u64(),
            file = location.file,
            line = location.line,
            "promise registered"
        );
        Ok(SlotKey {
            registry: self.id,
            index,
            generation,
        })
    }

    /// Marks a record for deletion and links it onto the free list.
    ///
    /// May be called from any thread. The record stays visible to
    /// iteration, in state `Deleted`, until the owner runs
    /// [`garbage_collect`](Self::garbage_collect).
    ///
    /// # Panics
    ///
    /// Panics if the key belongs to a different registry or to a record
    /// that was already reclaimed.
    pub fn mark_for_deletion(&self, key: SlotKey) {
        assert_eq!(
            key.registry, self.id,
            "promise record belongs to a different registry"
        );
        let slot = self.slots.slot(key.index);
        assert_eq!(
            slot.generation.load(Ordering::Acquire),
            key.generation,
            "stale promise record key"
        );

        // Deleted goes in before the free-list link so a snapshot taken
        // between the two sees a coherent Deleted record still in the
        // live list.
        slot.state.store(State::Deleted);

        let mut head = self.free_head.load(Ordering::Relaxed);
        loop {
            slot.next_to_free.store(head, Ordering::Relaxed);
            // Pairs with the acquire exchange in garbage_collect.
            match self.free_head.compare_exchange_weak(
                head,
                key.index,
                Ordering::Release,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(current) => head = current,
            }
        }

        trace!(registry = self.id, "promise marked for deletion");
        self.decrement_ref();
    }

    /// Runs `f` for every record currently in the live list.
    ///
    /// May be called from any thread. Records marked for deletion but
    /// not yet collected are included, in state `Deleted`. Holding the
    /// sweep lock for the duration keeps collection from freeing records
    /// mid-walk.
    pub fn for_promise(&self, mut f: impl FnMut(PromiseView<'_>)) {
        let _guard = self.sweep.lock();
        // Pairs with the release stores of live_head in add and unlink.
        let mut current = self.live_head.load(Ordering::Acquire);
        while current != NIL {
            let slot = self.slots.slot(current);
            if !slot.is_occupied() {
                // Reachable only while a refcount-zero teardown races a
                // late inspector; nothing beyond this point is live.
                break;
            }
            let payload = slot.payload.lock();
            let Some(meta) = payload.as_ref() else {
                break;
            };
            f(PromiseView {
                thread: &self.thread,
                slot,
                meta,
            });
            drop(payload);
            current = slot.next.load(Ordering::Relaxed);
        }
    }

    /// Unlinks and destroys every record marked for deletion.
    ///
    /// # Panics
    ///
    /// Panics when called from a non-owner thread while the reference
    /// count is still positive.
    pub fn garbage_collect(&self) {
        assert!(
            self.ref_count.load(Ordering::Acquire) == 0 || self.is_owner(),
            "garbage collection may only run on the owning thread"
        );
        // Takes the whole chain; pairs with the release CAS in
        // mark_for_deletion.
        let mut chain = self.free_head.swap(NIL, Ordering::Acquire);
        let _guard = self.sweep.lock();
        let mut reclaimed = 0u64;
        while chain != NIL {
            let slot = self.slots.slot(chain);
            let next_to_free = slot.next_to_free.load(Ordering::Relaxed);
            self.unlink(slot);
            self.slots.reclaim(chain);
            reclaimed += 1;
            chain = next_to_free;
        }
        if reclaimed > 0 {
            debug!(registry = self.id, reclaimed, "garbage collection pass");
        }
    }

    /// Removes one record from the live list.
    ///
    /// The back-link may be stale (it only ever moves away from the
    /// value a reader observed), in which case the record's actual
    /// predecessor is in the same chain and the fix-ups below leave the
    /// list consistent for the following pass.
    fn unlink(&self, slot: &Slot) {
        let next = slot.next.load(Ordering::Relaxed);
        let previous = slot.previous.load(Ordering::Acquire);
        if previous == NIL {
            // Record is the current head; pairs with the acquire load in
            // for_promise.
            self.live_head.store(next, Ordering::Release);
        } else {
            self.slots.slot(previous).next.store(next, Ordering::Relaxed);
        }
        if next != NIL {
            self.slots.slot(next).previous.store(previous, Ordering::Relaxed);
        }
    }

    /// Adds one unit to the reference count.
    pub fn increment_ref(&self) {
        self.ref_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Drops one unit from the reference count. The final decrement runs
    /// a terminal collection pass on the calling thread.
    pub fn decrement_ref(&self) {
        let old = self.ref_count.fetch_sub(1, Ordering::AcqRel);
        assert!(old > 0, "promise registry reference count underflow");
        if old == 1 {
            self.garbage_collect();
            debug!(registry = self.id, "thread registry retired");
        }
    }

    /// Number of records currently reachable from the live head,
    /// including marked-but-uncollected ones.
    #[must_use]
    pub fn live_count(&self) -> usize {
        let mut count = 0;
        self.for_promise(|_| count += 1);
        count
    }

    /// Number of occupied slots. Differs from [`live_count`](Self::live_count)
    /// only transiently, during a teardown race.
    #[must_use]
    pub fn occupied_slots(&self) -> usize {
        self.slots.occupied()
    }

    pub(crate) fn set_waiter(&self, key: &SlotKey, waiter: Waiter) {
        self.slot_for(key).waiter.store(waiter);
    }

    pub(crate) fn update_line(&self, key: &SlotKey, line: u32) {
        self.slot_for(key).line.store(line);
    }

    /// # Panics
    ///
    /// Panics on a regressing transition, and on `Deleted`, which only
    /// mark-for-deletion may write.
    pub(crate) fn update_state(&self, key: &SlotKey, next: State) {
        assert_ne!(
            next,
            State::Deleted,
            "Deleted is reserved for mark_for_deletion"
        );
        let slot = self.slot_for(key);
        let current = slot.state.load();
        assert!(
            current.permits(next),
            "promise state may not regress from {current:?} to {next:?}"
        );
        slot.state.store(next);
    }

    fn slot_for(&self, key: &SlotKey) -> &Slot {
        debug_assert_eq!(key.registry, self.id);
        let slot = self.slots.slot(key.index);
        debug_assert_eq!(slot.generation.load(Ordering::Acquire), key.generation);
        slot
    }
}

/// Borrowed view of one live record, valid for the duration of a
/// [`ThreadRegistry::for_promise`] callback.
#[derive(Debug)]
pub struct PromiseView<'a> {
    thread: &'a ThreadInfo,
    slot: &'a Slot,
    meta: &'a SlotPayload,
}

impl PromiseView<'_> {
    /// The record's opaque identity.
    #[must_use]
    pub fn id(&self) -> PromiseId {
        self.meta.id
    }

    /// The record's lifecycle state at this instant.
    #[must_use]
    pub fn state(&self) -> State {
        self.slot.state.load()
    }

    /// Captures the record by value. Each field is read atomically with
    /// acquire semantics; the fields are not captured as one linearizable
    /// unit.
    #[must_use]
    pub fn snapshot(&self) -> PromiseSnapshot {
        PromiseSnapshot {
            owning_thread: self.thread.clone(),
            source_location: SourceLocationSnapshot {
                file_name: self.meta.file,
                line: self.slot.line.load(),
                function_name: self.meta.function,
            },
            id: self.meta.id,
            waiter: self.slot.waiter.load(),
            state: self.slot.state.load(),
        }
    }
}
