//! Cold observable handles and the synchronous operator set.
//!
//! An [`Rx`] is a subscribe function; operators wrap it in another
//! subscribe function. Per-subscription operator state (distinct's last
//! value, combine's latest vector) is created inside the wrapper, so every
//! subscription gets its own copy.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

use crate::subscription::Subscription;
use crate::{Callback, callback, lock};

/// A subscribable stream of values.
pub struct Rx<T> {
    source: Arc<dyn Fn(Callback<T>) -> Subscription + Send + Sync>,
}

impl<T> Clone for Rx<T> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Rx<T> {
    /// Wrap a subscribe function.
    pub fn new(source: impl Fn(Callback<T>) -> Subscription + Send + Sync + 'static) -> Self {
        Self {
            source: Arc::new(source),
        }
    }

    /// A stream that emits `value` once to each subscriber.
    #[must_use]
    pub fn constant(value: T) -> Self {
        Self::new(move |callback| {
            (&mut *lock(&callback))(value.clone());
            Subscription::empty()
        })
    }

    /// A stream that never emits.
    #[must_use]
    pub fn never() -> Self {
        Self::new(|_| Subscription::empty())
    }

    /// Resolve the underlying stream at subscribe time.
    pub fn defer(factory: impl Fn() -> Rx<T> + Send + Sync + 'static) -> Self {
        Self::new(move |callback| factory().subscribe_raw(callback))
    }

    /// Subscribe with a plain closure.
    pub fn subscribe(&self, f: impl FnMut(T) + Send + 'static) -> Subscription {
        self.subscribe_raw(callback(f))
    }

    /// Subscribe with a shared callback.
    pub fn subscribe_raw(&self, callback: Callback<T>) -> Subscription {
        (self.source)(callback)
    }

    /// Transform each value.
    pub fn map<U: Clone + Send + Sync + 'static>(
        &self,
        f: impl Fn(T) -> U + Send + Sync + 'static,
    ) -> Rx<U> {
        let source = self.clone();
        let f = Arc::new(f);
        Rx::new(move |callback: Callback<U>| {
            let f = Arc::clone(&f);
            source.subscribe(move |value| (&mut *lock(&callback))(f(value)))
        })
    }

    /// Keep only values matching the predicate.
    pub fn filter(&self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Rx<T> {
        let source = self.clone();
        let predicate = Arc::new(predicate);
        Rx::new(move |callback: Callback<T>| {
            let predicate = Arc::clone(&predicate);
            source.subscribe(move |value| {
                if predicate(&value) {
                    (&mut *lock(&callback))(value);
                }
            })
        })
    }

    /// Suppress values equal to the previous one.
    #[must_use]
    pub fn distinct_until_changed(&self) -> Rx<T>
    where
        T: PartialEq,
    {
        self.distinct_until_changed_by(|previous, current| previous == current)
    }

    /// Suppress values the comparer deems equal to the previous one.
    ///
    /// The comparer is guarded: a panic inside it counts as "not equal",
    /// so a bad comparison lets the value through instead of wedging the
    /// pipeline.
    pub fn distinct_until_changed_by(
        &self,
        comparer: impl Fn(&T, &T) -> bool + Send + Sync + 'static,
    ) -> Rx<T> {
        let source = self.clone();
        let comparer = Arc::new(comparer);
        Rx::new(move |callback: Callback<T>| {
            let comparer = Arc::clone(&comparer);
            let last: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));
            source.subscribe(move |value| {
                let same = {
                    let last = lock(&last);
                    match last.as_ref() {
                        Some(previous) => {
                            catch_unwind(AssertUnwindSafe(|| comparer(previous, &value)))
                                .unwrap_or(false)
                        }
                        None => false,
                    }
                };
                if !same {
                    *lock(&last) = Some(value.clone());
                    (&mut *lock(&callback))(value);
                }
            })
        })
    }

    /// Interleave several streams into one.
    #[must_use]
    pub fn merge(sources: Vec<Rx<T>>) -> Rx<T> {
        Rx::new(move |callback: Callback<T>| {
            Subscription::merge(
                sources
                    .iter()
                    .map(|source| source.subscribe_raw(Arc::clone(&callback)))
                    .collect(),
            )
        })
    }

    /// Combine the latest value of every input: once all inputs have
    /// emitted, every further emission on any input produces the full
    /// latest vector, in input order.
    #[must_use]
    pub fn combine_latest_all(sources: Vec<Rx<T>>) -> Rx<Vec<T>> {
        Rx::new(move |callback: Callback<Vec<T>>| {
            let latest: Arc<Mutex<Vec<Option<T>>>> =
                Arc::new(Mutex::new(vec![None; sources.len()]));
            Subscription::merge(
                sources
                    .iter()
                    .enumerate()
                    .map(|(index, source)| {
                        let latest = Arc::clone(&latest);
                        let callback = Arc::clone(&callback);
                        source.subscribe(move |value| {
                            let ready = {
                                let mut latest = lock(&latest);
                                latest[index] = Some(value);
                                if latest.iter().all(Option::is_some) {
                                    Some(latest.iter().flatten().cloned().collect::<Vec<T>>())
                                } else {
                                    None
                                }
                            };
                            if let Some(values) = ready {
                                (&mut *lock(&callback))(values);
                            }
                        })
                    })
                    .collect(),
            )
        })
    }

    /// Emit the latest value of this stream whenever `on` fires. Trigger
    /// firings before the first value are dropped.
    pub fn sample<U: Clone + Send + Sync + 'static>(&self, on: &Rx<U>) -> Rx<T> {
        let source = self.clone();
        let on = on.clone();
        Rx::new(move |callback: Callback<T>| {
            let latest: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));
            let value_sub = {
                let latest = Arc::clone(&latest);
                source.subscribe(move |value| *lock(&latest) = Some(value))
            };
            let callback = Arc::clone(&callback);
            let trigger_sub = on.subscribe(move |_| {
                let current = lock(&latest).clone();
                if let Some(value) = current {
                    (&mut *lock(&callback))(value);
                }
            });
            Subscription::merge(vec![value_sub, trigger_sub])
        })
    }
}
