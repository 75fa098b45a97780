//! # aquahub-rx
//!
//! Push-based reactive primitives used by the engine to wire device
//! pipelines.
//!
//! ## Responsibilities
//! - **Subjects**: multicast sources with per-subject serialized delivery
//! - **[`Rx`]**: cold observable handles with the operator set the engine needs
//! - **Timed operators**: debounce and buffering, scaled by the simulated clock
//! - **[`Publish`]**: connectable multicast with optional replay-of-last
//!
//! ## Delivery model
//! Callbacks run synchronously on the emitting thread. Each subject drains
//! a mailbox, so reentrant sends from inside a callback are queued and
//! delivered in order instead of recursing. A panic in a subscriber is the
//! subscriber's bug; operators that evaluate user-supplied comparers guard
//! them and fail open.
//!
//! ## Dependency rule
//! Depends only on `aquahub-domain` (for the simulated clock) and tokio.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub mod observable;
pub mod publish;
pub mod subject;
pub mod subscription;
mod timed;

pub use observable::Rx;
pub use publish::{Publish, take_first};
pub use subject::{BehaviorSubject, Subject};
pub use subscription::Subscription;

/// A shared subscriber callback.
pub type Callback<T> = Arc<Mutex<dyn FnMut(T) + Send>>;

/// Wrap a closure as a [`Callback`].
pub fn callback<T>(f: impl FnMut(T) + Send + 'static) -> Callback<T> {
    Arc::new(Mutex::new(f))
}

/// Lock a mutex, ignoring poisoning. A panicking subscriber must not take
/// the rest of the pipeline down with it.
pub fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
