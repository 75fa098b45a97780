//! Multicast subjects with mailbox-serialized delivery.
//!
//! A send from inside a subscriber callback is queued and delivered after
//! the current emission finishes, so per-subject ordering holds even for
//! reentrant pipelines.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::observable::Rx;
use crate::subscription::Subscription;
use crate::{Callback, lock};

struct CoreInner<T> {
    subscribers: Vec<(u64, Callback<T>)>,
    next_key: u64,
    queue: VecDeque<T>,
    draining: bool,
    closed: bool,
    last: Option<T>,
}

/// Shared state behind [`Subject`], [`BehaviorSubject`], and
/// [`crate::Publish`].
pub(crate) struct Core<T> {
    inner: Arc<Mutex<CoreInner<T>>>,
    replay: bool,
}

impl<T> Clone for Core<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            replay: self.replay,
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Core<T> {
    pub(crate) fn new(replay: bool, last: Option<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CoreInner {
                subscribers: Vec::new(),
                next_key: 0,
                queue: VecDeque::new(),
                draining: false,
                closed: false,
                last,
            })),
            replay,
        }
    }

    /// Deliver `value` to all subscribers, in order, without holding the
    /// state lock across callbacks. Reentrant sends land in the queue and
    /// are drained by the emission already in progress.
    pub(crate) fn send(&self, value: T) {
        let mut inner = lock(&self.inner);
        if inner.closed {
            return;
        }
        inner.queue.push_back(value);
        if inner.draining {
            return;
        }
        inner.draining = true;
        loop {
            let Some(value) = inner.queue.pop_front() else {
                inner.draining = false;
                return;
            };
            if self.replay {
                inner.last = Some(value.clone());
            }
            let subscribers: Vec<Callback<T>> =
                inner.subscribers.iter().map(|(_, cb)| Arc::clone(cb)).collect();
            drop(inner);
            for subscriber in subscribers {
                (&mut *lock(&subscriber))(value.clone());
            }
            inner = lock(&self.inner);
        }
    }

    pub(crate) fn subscribe(&self, callback: Callback<T>) -> Subscription {
        let key;
        let replayed;
        {
            let mut inner = lock(&self.inner);
            if inner.closed {
                return Subscription::empty();
            }
            key = inner.next_key;
            inner.next_key += 1;
            inner.subscribers.push((key, Arc::clone(&callback)));
            replayed = if self.replay { inner.last.clone() } else { None };
        }
        if let Some(value) = replayed {
            (&mut *lock(&callback))(value);
        }
        let inner = Arc::clone(&self.inner);
        Subscription::new(move || {
            lock(&inner).subscribers.retain(|(k, _)| *k != key);
        })
    }

    pub(crate) fn last(&self) -> Option<T> {
        lock(&self.inner).last.clone()
    }

    pub(crate) fn close(&self) {
        let mut inner = lock(&self.inner);
        inner.closed = true;
        inner.subscribers.clear();
        inner.queue.clear();
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        lock(&self.inner).subscribers.len()
    }

    pub(crate) fn rx(&self) -> Rx<T> {
        let core = self.clone();
        Rx::new(move |callback| core.subscribe(callback))
    }
}

/// A plain multicast subject: subscribers see emissions from subscription
/// time onward.
pub struct Subject<T> {
    core: Core<T>,
}

impl<T: Clone + Send + Sync + 'static> Subject<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: Core::new(false, None),
        }
    }

    pub fn send(&self, value: T) {
        self.core.send(value);
    }

    /// Observable view of this subject.
    #[must_use]
    pub fn rx(&self) -> Rx<T> {
        self.core.rx()
    }

    /// Close the subject; further sends are dropped and subscribers released.
    pub fn close(&self) {
        self.core.close();
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.core.subscriber_count()
    }
}

impl<T: Clone + Send + Sync + 'static> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

/// A subject that replays its latest value to each new subscriber.
pub struct BehaviorSubject<T> {
    core: Core<T>,
}

impl<T: Clone + Send + Sync + 'static> BehaviorSubject<T> {
    #[must_use]
    pub fn new(initial: T) -> Self {
        Self {
            core: Core::new(true, Some(initial)),
        }
    }

    pub fn send(&self, value: T) {
        self.core.send(value);
    }

    /// The latest value.
    #[must_use]
    pub fn value(&self) -> T
    where
        T: Clone,
    {
        // The subject is seeded at construction and `last` is only ever
        // replaced, so it is always present.
        self.core.last().unwrap_or_else(|| unreachable!())
    }

    /// Observable view; subscribing replays the latest value first.
    #[must_use]
    pub fn rx(&self) -> Rx<T> {
        self.core.rx()
    }

    pub fn close(&self) {
        self.core.close();
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.core.subscriber_count()
    }
}

impl<T> Clone for BehaviorSubject<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::lock;

    fn collect<T: Clone + Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl FnMut(T) + Send + 'static)
    {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |value| lock(&sink).push(value))
    }

    #[test]
    fn should_deliver_to_all_subscribers_in_order() {
        let subject = Subject::new();
        let (seen_a, sink_a) = collect();
        let (seen_b, sink_b) = collect();
        let _sub_a = subject.rx().subscribe(sink_a);
        let _sub_b = subject.rx().subscribe(sink_b);
        subject.send(1);
        subject.send(2);
        assert_eq!(*lock(&seen_a), vec![1, 2]);
        assert_eq!(*lock(&seen_b), vec![1, 2]);
    }

    #[test]
    fn should_not_replay_on_plain_subjects() {
        let subject = Subject::new();
        subject.send(1);
        let (seen, sink) = collect();
        let _sub = subject.rx().subscribe(sink);
        subject.send(2);
        assert_eq!(*lock(&seen), vec![2]);
    }

    #[test]
    fn should_replay_latest_on_behavior_subjects() {
        let subject = BehaviorSubject::new(1);
        subject.send(2);
        assert_eq!(subject.value(), 2);
        let (seen, sink) = collect();
        let _sub = subject.rx().subscribe(sink);
        subject.send(3);
        assert_eq!(*lock(&seen), vec![2, 3]);
    }

    #[test]
    fn should_queue_reentrant_sends() {
        let subject = Subject::new();
        let reentrant = subject.clone();
        let (seen, mut sink) = collect();
        let _sub = subject.rx().subscribe(move |value: i32| {
            if value == 1 {
                // Sent mid-delivery; must arrive after the current value.
                reentrant.send(10);
            }
            sink(value);
        });
        subject.send(1);
        subject.send(2);
        assert_eq!(*lock(&seen), vec![1, 10, 2]);
    }

    #[test]
    fn should_stop_delivery_after_unsubscribe() {
        let subject = Subject::new();
        let (seen, sink) = collect();
        let sub = subject.rx().subscribe(sink);
        subject.send(1);
        assert_eq!(subject.subscriber_count(), 1);
        sub.dispose();
        assert_eq!(subject.subscriber_count(), 0);
        subject.send(2);
        assert_eq!(*lock(&seen), vec![1]);
    }

    #[test]
    fn should_drop_sends_after_close() {
        let subject = BehaviorSubject::new(0);
        let (seen, sink) = collect();
        let _sub = subject.rx().subscribe(sink);
        subject.send(1);
        subject.close();
        subject.send(2);
        assert_eq!(*lock(&seen), vec![0, 1]);
        assert_eq!(subject.subscriber_count(), 0);
    }
}
