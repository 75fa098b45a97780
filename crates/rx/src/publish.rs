//! Connectable multicast: one upstream subscription shared by any number
//! of downstream subscribers.

use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::lock;
use crate::observable::Rx;
use crate::subject::Core;
use crate::subscription::Subscription;

/// A multicast view over a source stream.
///
/// Subscribers attach through [`Publish::observe`]; nothing flows until
/// [`Publish::connect`] subscribes the single upstream subscription.
/// A replaying publish hands its latest value to new subscribers.
pub struct Publish<T> {
    source: Rx<T>,
    core: Core<T>,
    connected: Arc<Mutex<bool>>,
}

impl<T: Clone + Send + Sync + 'static> Publish<T> {
    /// A non-replaying publish.
    #[must_use]
    pub fn new(source: Rx<T>) -> Self {
        Self {
            source,
            core: Core::new(false, None),
            connected: Arc::new(Mutex::new(false)),
        }
    }

    /// A replaying publish, optionally seeded so subscribers see a value
    /// before the upstream first emits.
    #[must_use]
    pub fn replay(source: Rx<T>, seed: Option<T>) -> Self {
        Self {
            source,
            core: Core::new(true, seed),
            connected: Arc::new(Mutex::new(false)),
        }
    }

    /// The multicast view of the source.
    #[must_use]
    pub fn observe(&self) -> Rx<T> {
        self.core.rx()
    }

    /// Subscribe the upstream and start multicasting. Disposing the
    /// returned handle disconnects; a second connect while connected is a
    /// no-op handle.
    #[must_use]
    pub fn connect(&self) -> Subscription {
        {
            let mut connected = lock(&self.connected);
            if *connected {
                return Subscription::empty();
            }
            *connected = true;
        }
        let core = self.core.clone();
        let upstream = self.source.subscribe(move |value| core.send(value));
        let connected = Arc::clone(&self.connected);
        Subscription::new(move || {
            *lock(&connected) = false;
            upstream.dispose();
        })
    }

    /// Latest multicast value, when replaying.
    #[must_use]
    pub fn value(&self) -> Option<T> {
        self.core.last()
    }

    /// Release all subscribers and drop further values.
    pub fn close(&self) {
        self.core.close();
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.core.subscriber_count()
    }
}

/// Wait for the first value of a stream.
///
/// Returns `None` when the stream ends (or its subject closes) without
/// emitting.
pub async fn take_first<T: Clone + Send + Sync + 'static>(rx: &Rx<T>) -> Option<T> {
    let (tx, first) = oneshot::channel();
    let sender = Arc::new(Mutex::new(Some(tx)));
    let subscription = rx.subscribe(move |value| {
        if let Some(tx) = lock(&sender).take() {
            let _ = tx.send(value);
        }
    });
    let result = first.await.ok();
    subscription.dispose();
    result
}
