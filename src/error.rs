//! Error types for registration.
//!
//! Registration is the only fallible operation in the crate. Protocol
//! misuse (wrong-thread insertion, foreign or stale record keys, premature
//! garbage collection, state regression) is a programmer error in the
//! instrumentation and panics instead of returning an error, so that the
//! bug surfaces where it happens.

use thiserror::Error;

/// Error returned when a promise cannot be added to its thread's registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum RegistryError {
    /// The slot arena is full. The caller may proceed uninstrumented.
    #[error("promise slot capacity exhausted ({capacity} slots)")]
    CapacityExhausted {
        /// Total slot capacity of the registry that rejected the insert.
        capacity: usize,
    },
}
