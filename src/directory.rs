//! Process-wide directory of thread registries.
//!
//! Inspectors reach every live [`ThreadRegistry`] through the
//! [`Directory`]: worker threads publish their registry on first
//! registration and withdraw it at thread exit. The directory holds a
//! strong reference (and one protocol refcount unit) per registry, so an
//! enumerated registry cannot disappear under an inspector.

use crate::promise::PromiseSnapshot;
use crate::registry::ThreadRegistry;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Thread-safe set of strong references to every live thread registry.
#[derive(Debug, Default)]
pub struct Directory {
    registries: Mutex<Vec<Arc<ThreadRegistry>>>,
}

impl Directory {
    /// Creates an empty directory. Most callers want the process-wide
    /// instance from [`directory`] instead.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a registry and takes a protocol refcount unit on it.
    pub fn register(&self, registry: &Arc<ThreadRegistry>) {
        registry.increment_ref();
        self.registries.lock().push(Arc::clone(registry));
        debug!(
            thread = %registry.owning_thread().name,
            "thread registry published"
        );
    }

    /// Drops the directory's reference to `registry`.
    ///
    /// Releasing the refcount unit may run the terminal collection pass
    /// when no live records remain.
    pub fn unregister(&self, registry: &Arc<ThreadRegistry>) {
        let removed = {
            let mut registries = self.registries.lock();
            let before = registries.len();
            registries.retain(|entry| !Arc::ptr_eq(entry, registry));
            before != registries.len()
        };
        if removed {
            debug!(
                thread = %registry.owning_thread().name,
                "thread registry withdrawn"
            );
            registry.decrement_ref();
        }
    }

    /// Runs `f` on every registered registry.
    ///
    /// The set is captured under the directory lock and iterated outside
    /// it, each entry held by strong reference for the duration of `f`.
    pub fn for_each(&self, mut f: impl FnMut(&Arc<ThreadRegistry>)) {
        let registries = self.registries.lock().clone();
        for registry in &registries {
            f(registry);
        }
    }

    /// Number of currently registered registries.
    #[must_use]
    pub fn registry_count(&self) -> usize {
        self.registries.lock().len()
    }

    /// Captures a snapshot of every promise in every registered
    /// registry. Per-registry views are taken under that registry's
    /// sweep lock; the combined result is not a global atomic cut.
    #[must_use]
    pub fn collect_snapshots(&self) -> Vec<PromiseSnapshot> {
        let mut out = Vec::new();
        self.for_each(|registry| {
            registry.for_promise(|promise| out.push(promise.snapshot()));
        });
        out
    }
}

/// The process-wide directory.
#[must_use]
pub fn directory() -> &'static Directory {
    static DIRECTORY: OnceLock<Directory> = OnceLock::new();
    DIRECTORY.get_or_init(Directory::new)
}

/// Keeps the calling thread's registry alive and tears it down at
/// thread exit: a final owner-thread collection pass, then withdrawal
/// from the directory.
#[derive(Debug)]
struct RegistryGuard {
    registry: Arc<ThreadRegistry>,
}

impl Drop for RegistryGuard {
    fn drop(&mut self) {
        self.registry.garbage_collect();
        directory().unregister(&self.registry);
    }
}

thread_local! {
    static CURRENT_REGISTRY: RefCell<Option<RegistryGuard>> = const { RefCell::new(None) };
}

/// Runs `f` with the calling thread's registry, creating and publishing
/// it on first use.
pub(crate) fn with_current_registry<R>(f: impl FnOnce(&Arc<ThreadRegistry>) -> R) -> R {
    CURRENT_REGISTRY.with(|cell| {
        let mut guard = cell.borrow_mut();
        let guard = guard.get_or_insert_with(|| {
            let registry = ThreadRegistry::new();
            directory().register(&registry);
            RegistryGuard { registry }
        });
        f(&guard.registry)
    })
}

/// Returns the calling thread's registry, creating and publishing it on
/// first use.
#[must_use]
pub fn current_thread_registry() -> Arc<ThreadRegistry> {
    with_current_registry(Arc::clone)
}
