//! Scoped registration handle.
//!
//! A [`Registration`] is constructed when an instrumented coroutine
//! enters its frame and dropped when the frame is destroyed; the drop
//! marks the underlying record for deletion. In between, the handle is
//! the write side of the record: state, current line, and waiter.
//!
//! A handle can also be detached, either explicitly or because
//! registration is disabled ([`crate::config`]) or the registry is full.
//! Every operation on a detached handle is a no-op, so instrumented code
//! does not branch on whether it is being observed.

use crate::config::registry_enabled;
use crate::directory::with_current_registry;
use crate::error::RegistryError;
use crate::location::Location;
use crate::promise::{PromiseId, State, ThreadId, Waiter};
use crate::registry::{SlotKey, ThreadRegistry};
use std::sync::Arc;
use tracing::warn;

/// Write handle for one registered promise.
///
/// Not `Clone`: the handle owns the record's mark-for-deletion, which
/// must happen exactly once.
#[derive(Debug, Default)]
pub struct Registration {
    inner: Option<Attached>,
}

#[derive(Debug)]
struct Attached {
    registry: Arc<ThreadRegistry>,
    key: SlotKey,
    id: PromiseId,
}

impl Registration {
    /// Registers a promise at `location` in the current thread's
    /// registry.
    ///
    /// Falls back to a detached handle when the registry is full,
    /// logging a warning; instrumentation must never take the server
    /// down.
    #[must_use]
    pub fn new(location: Location) -> Self {
        match Self::try_new(location) {
            Ok(handle) => handle,
            Err(error) => {
                warn!(%error, "promise registration failed, continuing uninstrumented");
                Self::detached()
            }
        }
    }

    /// Registers a promise at `location`, propagating registry
    /// exhaustion to the caller.
    ///
    /// Returns a detached handle without touching the registry when
    /// registration is disabled process-wide.
    pub fn try_new(location: Location) -> Result<Self, RegistryError> {
        if !registry_enabled() {
            return Ok(Self::detached());
        }
        with_current_registry(|registry| {
            let id = PromiseId::next();
            let key = registry.add(id, location)?;
            Ok(Self {
                inner: Some(Attached {
                    registry: Arc::clone(registry),
                    key,
                    id,
                }),
            })
        })
    }

    /// A handle bound to nothing. All operations are no-ops.
    #[must_use]
    pub const fn detached() -> Self {
        Self { inner: None }
    }

    /// Returns true if this handle writes to a registered record.
    #[must_use]
    pub const fn is_attached(&self) -> bool {
        self.inner.is_some()
    }

    /// The record's identity, or [`PromiseId::NONE`] when detached.
    #[must_use]
    pub fn id(&self) -> PromiseId {
        self.inner.as_ref().map_or(PromiseId::NONE, |a| a.id)
    }

    /// Records that another promise waits on this one.
    pub fn set_async_waiter(&self, waiter: PromiseId) {
        if let Some(attached) = &self.inner {
            attached
                .registry
                .set_waiter(&attached.key, Waiter::Async(waiter));
        }
    }

    /// Records that a synchronously parked thread waits on this one.
    pub fn set_sync_waiter(&self, waiter: ThreadId) {
        if let Some(attached) = &self.inner {
            attached
                .registry
                .set_waiter(&attached.key, Waiter::Sync(waiter));
        }
    }

    /// Clears the waiter.
    pub fn clear_waiter(&self) {
        if let Some(attached) = &self.inner {
            attached.registry.set_waiter(&attached.key, Waiter::None);
        }
    }

    /// Reports the line the coroutine is currently at. File and function
    /// stay as captured at registration.
    pub fn update_line(&self, line: u32) {
        if let Some(attached) = &self.inner {
            attached.registry.update_line(&attached.key, line);
        }
    }

    /// Advances the record's lifecycle state.
    ///
    /// # Panics
    ///
    /// Panics on a regressing transition and on `Deleted` (written only
    /// by drop).
    pub fn update_state(&self, state: State) {
        if let Some(attached) = &self.inner {
            attached.registry.update_state(&attached.key, state);
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(attached) = self.inner.take() {
            attached.registry.mark_for_deletion(attached.key);
        }
    }
}
