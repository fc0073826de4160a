//! Future instrumentation.
//!
//! [`Instrumented`] wraps a future together with a [`Registration`] and
//! drives the record's lifecycle from the poll loop: `Running` while the
//! inner future is being polled, `Suspended` when it returns pending,
//! `Resolved` when it completes. Dropping the wrapper drops the
//! registration whether or not the future ever completed, so cancelled
//! coroutines leave the registry like resolved ones do.
//!
//! ```
//! # async fn example() {
//! let fut = promise_registry::observe!(async { 2 + 2 });
//! assert_eq!(fut.await, 4);
//! # }
//! ```

use crate::handle::Registration;
use crate::location::Location;
use crate::promise::State;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A future whose lifecycle is visible to the promise registry.
#[pin_project::pin_project]
pub struct Instrumented<F> {
    /// The wrapped future.
    #[pin]
    inner: F,
    /// The record this future drives; dropped with the wrapper.
    registration: Registration,
}

impl<F> Instrumented<F> {
    /// Wraps `inner`, registering a promise at `location`.
    #[must_use]
    pub fn new(inner: F, location: Location) -> Self {
        Self {
            inner,
            registration: Registration::new(location),
        }
    }

    /// The wrapped future's registration, for waiter and line updates.
    #[must_use]
    pub fn registration(&self) -> &Registration {
        &self.registration
    }
}

impl<F: Future> Future for Instrumented<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        this.registration.update_state(State::Running);
        match this.inner.poll(cx) {
            Poll::Pending => {
                this.registration.update_state(State::Suspended);
                Poll::Pending
            }
            Poll::Ready(output) => {
                this.registration.update_state(State::Resolved);
                Poll::Ready(output)
            }
        }
    }
}

/// Wraps a future so its lifecycle is visible to the promise registry,
/// capturing the call site.
#[macro_export]
macro_rules! observe {
    ($future:expr) => {
        $crate::Instrumented::new($future, $crate::location!())
    };
}
