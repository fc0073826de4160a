//! Promise registry: per-thread tracking of in-flight async operations
//! for runtime diagnostics.
//!
//! # Overview
//!
//! Long-running servers accumulate thousands of concurrent coroutines,
//! and "what is this process doing right now" becomes unanswerable from
//! the outside. This crate keeps a registry of every instrumented
//! promise, per worker thread, so an inspector can snapshot identity,
//! owning thread, call site, lifecycle state, and waiter relationship
//! for all of them at any moment.
//!
//! # Core Guarantees
//!
//! - **Wait-free instrumentation**: registering, marking for deletion,
//!   and every mutator are finite sequences of atomic operations
//! - **Concurrent inspection**: any thread may iterate any registry; a
//!   record observed during iteration is fully constructed and is not
//!   freed mid-walk
//! - **Owner-driven reclamation**: storage is reclaimed only by the
//!   owning thread's garbage collection pass, or by the final reference
//!   holder at teardown
//! - **Fatal misuse**: wrong-thread insertion, foreign or stale record
//!   keys, and state regression panic instead of corrupting the registry
//!
//! # Module Structure
//!
//! - [`registry`]: the per-thread registry and its collection protocol
//! - [`handle`]: scoped registration handles for instrumented code
//! - [`directory`]: process-wide enumeration of all registries
//! - [`instrument`]: future wrapper driving lifecycle state from polls
//! - [`promise`]: identity, state, waiter, and snapshot types
//! - [`location`]: call-site capture
//! - [`config`]: process-wide instrumentation switch
//! - [`error`]: the one recoverable error
//!
//! # Example
//!
//! ```
//! use promise_registry::{directory, location, Registration, State};
//!
//! let handle = Registration::new(location!());
//! handle.update_state(State::Suspended);
//!
//! for snapshot in directory().collect_snapshots() {
//!     println!("{} at {}:{}", snapshot.id.as_u64(),
//!         snapshot.source_location.file_name, snapshot.source_location.line);
//! }
//! # drop(handle);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod directory;
pub mod error;
pub mod handle;
pub mod instrument;
pub mod location;
pub mod promise;
pub mod registry;
mod slots;
pub mod test_utils;

pub use config::{registry_enabled, set_registry_enabled};
pub use directory::{current_thread_registry, directory, Directory};
pub use error::RegistryError;
pub use handle::Registration;
pub use instrument::Instrumented;
pub use location::Location;
pub use promise::{
    current_thread_id, PromiseId, PromiseSnapshot, SourceLocationSnapshot, State, ThreadId,
    ThreadInfo, Waiter,
};
pub use registry::{PromiseView, SlotKey, ThreadRegistry};
