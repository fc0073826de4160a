//! Promise identity, lifecycle state, and snapshot types.
//!
//! A registered promise is described by three independently atomic cells
//! (state, waiter, current line) plus immutable identity captured at
//! registration. [`PromiseSnapshot`] is the by-value capture handed to
//! inspectors: each field is read with acquire semantics and is coherent
//! on its own, but the snapshot is not a linearizable cross-field view.
//! Inspectors tolerate that by design of the inspection protocol.

use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};
use std::cell::Cell;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

static NEXT_PROMISE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: Cell<u64> = const { Cell::new(0) };
}

/// Opaque identity of a registered promise.
///
/// Stable for the record's lifetime and unique within the process.
/// Serializes as a bare integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct PromiseId(pub(crate) u64);

impl PromiseId {
    /// Sentinel returned by detached handles.
    pub const NONE: Self = Self(0);

    /// Allocates the next process-unique promise identity.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_PROMISE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw identity value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// Crate-assigned identity of an OS thread.
///
/// Std's `ThreadId::as_u64` is unstable, so threads get a monotonic id
/// of our own on first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ThreadId(pub(crate) u64);

impl ThreadId {
    /// Returns the raw identity value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// Returns the calling thread's crate-assigned identity.
#[must_use]
pub fn current_thread_id() -> ThreadId {
    THREAD_ID.with(|cell| {
        let cached = cell.get();
        if cached != 0 {
            return ThreadId(cached);
        }
        let id = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
        cell.set(id);
        ThreadId(id)
    })
}

/// Name and identity of a registry's owning thread.
///
/// Captured once at registry construction; every record in that registry
/// shares it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    /// Thread name, or `thread-<id>` for unnamed threads.
    pub name: Arc<str>,
    /// Crate-assigned thread identity.
    pub id: ThreadId,
}

impl ThreadInfo {
    /// Captures the calling thread's name and identity.
    #[must_use]
    pub fn for_current() -> Self {
        let id = current_thread_id();
        let name = std::thread::current().name().map_or_else(
            || Arc::from(format!("thread-{}", id.0).as_str()),
            Arc::from,
        );
        Self { name, id }
    }
}

impl Serialize for ThreadInfo {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut out = serializer.serialize_struct("ThreadInfo", 2)?;
        out.serialize_field("name", &*self.name)?;
        out.serialize_field("id", &self.id.0)?;
        out.end()
    }
}

/// Lifecycle state of a promise.
///
/// Transitions only advance: `Running` and `Suspended` alternate freely,
/// both may move to `Resolved`, and `Deleted` is terminal. `Deleted` is
/// written exclusively by mark-for-deletion when the handle drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum State {
    /// The coroutine is executing.
    Running = 0,
    /// Parked at a suspension point.
    Suspended = 1,
    /// The promise produced its value.
    Resolved = 2,
    /// Marked for deletion, awaiting garbage collection.
    Deleted = 3,
}

impl State {
    /// Returns true if a mutator may move a record from `self` to `next`.
    ///
    /// `Deleted` is never a valid mutator target and is rejected before
    /// this check.
    #[must_use]
    pub(crate) fn permits(self, next: Self) -> bool {
        match self {
            Self::Running | Self::Suspended => {
                matches!(next, Self::Running | Self::Suspended | Self::Resolved)
            }
            Self::Resolved => matches!(next, Self::Resolved),
            Self::Deleted => false,
        }
    }
}

/// Atomic cell holding a [`State`].
#[derive(Debug)]
pub(crate) struct StateCell {
    inner: AtomicU8,
}

impl StateCell {
    pub(crate) fn new(state: State) -> Self {
        Self {
            inner: AtomicU8::new(state as u8),
        }
    }

    pub(crate) fn load(&self) -> State {
        match self.inner.load(Ordering::Acquire) {
            0 => State::Running,
            1 => State::Suspended,
            2 => State::Resolved,
            3 => State::Deleted,
            value => {
                debug_assert!(false, "invalid State value: {value}");
                State::Deleted
            }
        }
    }

    pub(crate) fn store(&self, state: State) {
        self.inner.store(state as u8, Ordering::Release);
    }
}

/// The entity a promise will notify on resolution.
///
/// Carried identities are bounded to 62 bits so the union packs into a
/// single atomic word; storing a larger identity panics. Both counters
/// start at 1, so the bound is unreachable in practice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waiter {
    /// Nothing is waiting.
    None,
    /// Another registered promise, by identity.
    Async(PromiseId),
    /// A thread parked synchronously.
    Sync(ThreadId),
}

impl Serialize for Waiter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::None => serializer.serialize_map(Some(0))?.end(),
            Self::Async(id) => {
                let mut out = serializer.serialize_map(Some(1))?;
                out.serialize_entry("async", &id.0)?;
                out.end()
            }
            Self::Sync(id) => {
                let mut out = serializer.serialize_map(Some(1))?;
                out.serialize_entry("sync", &id.0)?;
                out.end()
            }
        }
    }
}

const WAITER_TAG_SHIFT: u32 = 62;
const WAITER_TAG_NONE: u64 = 0;
const WAITER_TAG_ASYNC: u64 = 1;
const WAITER_TAG_SYNC: u64 = 2;
const WAITER_PAYLOAD_MASK: u64 = (1 << WAITER_TAG_SHIFT) - 1;

/// Atomic cell holding a [`Waiter`].
///
/// The three-way union packs into one word (2-bit tag, 62-bit payload),
/// so replacement is a single release store and concurrent snapshots are
/// never torn.
#[derive(Debug)]
pub(crate) struct WaiterCell {
    inner: AtomicU64,
}

impl WaiterCell {
    pub(crate) fn new() -> Self {
        Self {
            inner: AtomicU64::new(encode_waiter(Waiter::None)),
        }
    }

    pub(crate) fn load(&self) -> Waiter {
        decode_waiter(self.inner.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, waiter: Waiter) {
        self.inner.store(encode_waiter(waiter), Ordering::Release);
    }
}

fn encode_waiter(waiter: Waiter) -> u64 {
    let (tag, payload) = match waiter {
        Waiter::None => (WAITER_TAG_NONE, 0),
        Waiter::Async(id) => (WAITER_TAG_ASYNC, id.0),
        Waiter::Sync(id) => (WAITER_TAG_SYNC, id.0),
    };
    // Truncation here would decode to a wrong identity, so the bound
    // holds in release builds too.
    assert!(payload <= WAITER_PAYLOAD_MASK, "waiter payload exceeds 62 bits");
    (tag << WAITER_TAG_SHIFT) | payload
}

fn decode_waiter(bits: u64) -> Waiter {
    let payload = bits & WAITER_PAYLOAD_MASK;
    match bits >> WAITER_TAG_SHIFT {
        WAITER_TAG_ASYNC => Waiter::Async(PromiseId(payload)),
        WAITER_TAG_SYNC => Waiter::Sync(ThreadId(payload)),
        _ => Waiter::None,
    }
}

/// Atomic cell holding the current source line.
#[derive(Debug)]
pub(crate) struct LineCell {
    inner: AtomicU32,
}

impl LineCell {
    pub(crate) fn new() -> Self {
        Self {
            inner: AtomicU32::new(0),
        }
    }

    pub(crate) fn load(&self) -> u32 {
        self.inner.load(Ordering::Acquire)
    }

    pub(crate) fn store(&self, line: u32) {
        self.inner.store(line, Ordering::Release);
    }
}

/// By-value capture of a record's source location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceLocationSnapshot {
    /// Source file of the registration call site.
    pub file_name: &'static str,
    /// Line most recently reported by the coroutine.
    pub line: u32,
    /// Fully qualified enclosing function.
    pub function_name: &'static str,
}

/// By-value capture of one registered promise, as handed to inspectors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromiseSnapshot {
    /// The thread the promise runs on.
    pub owning_thread: ThreadInfo,
    /// Call-site provenance.
    pub source_location: SourceLocationSnapshot,
    /// Opaque promise identity.
    pub id: PromiseId,
    /// Who gets notified on resolution.
    pub waiter: Waiter,
    /// Lifecycle state at capture time.
    pub state: State,
}
