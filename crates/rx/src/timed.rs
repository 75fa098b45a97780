//! Timed operators, implemented as tokio tasks fed by an unbounded channel.
//!
//! Durations go through the simulated clock's scaling, so accelerated runs
//! debounce and buffer faster. Subscribing to a timed stream therefore
//! requires a tokio runtime.

use aquahub_domain::time;
use tokio::sync::mpsc;

use crate::observable::Rx;
use crate::subscription::Subscription;
use crate::{Callback, lock};

impl<T: Clone + Send + Sync + 'static> Rx<T> {
    /// Trailing-edge debounce: emit the newest pending value once the
    /// stream has been silent for `seconds`. The pending value is flushed
    /// when the subscription ends.
    #[must_use]
    pub fn debounce(&self, seconds: f64) -> Rx<T> {
        let source = self.clone();
        Rx::new(move |callback: Callback<T>| {
            let (tx, mut rx) = mpsc::unbounded_channel::<T>();
            let upstream = source.subscribe(move |value| {
                let _ = tx.send(value);
            });
            let handle = tokio::spawn(async move {
                let mut pending: Option<T> = None;
                loop {
                    match tokio::time::timeout(time::scaled_duration(seconds), rx.recv()).await {
                        Ok(Some(value)) => pending = Some(value),
                        Ok(None) => {
                            if let Some(value) = pending.take() {
                                (&mut *lock(&callback))(value);
                            }
                            return;
                        }
                        Err(_) => {
                            if let Some(value) = pending.take() {
                                (&mut *lock(&callback))(value);
                            }
                        }
                    }
                }
            });
            Subscription::merge(vec![
                upstream,
                Subscription::new(move || handle.abort()),
            ])
        })
    }

    /// Collect values into batches flushed every `seconds` or when `count`
    /// values arrived, whichever comes first. A zero `count` disables the
    /// count trigger. Empty windows flush an empty batch only when
    /// `emit_empty` is set.
    #[must_use]
    pub fn buffer_with_time_or_count(
        &self,
        seconds: f64,
        count: usize,
        emit_empty: bool,
    ) -> Rx<Vec<T>> {
        let source = self.clone();
        Rx::new(move |callback: Callback<Vec<T>>| {
            let (tx, mut rx) = mpsc::unbounded_channel::<T>();
            let upstream = source.subscribe(move |value| {
                let _ = tx.send(value);
            });
            let handle = tokio::spawn(async move {
                let mut batch: Vec<T> = Vec::new();
                loop {
                    let deadline = tokio::time::sleep(time::scaled_duration(seconds));
                    tokio::pin!(deadline);
                    loop {
                        tokio::select! {
                            received = rx.recv() => match received {
                                Some(value) => {
                                    batch.push(value);
                                    if count > 0 && batch.len() >= count {
                                        break;
                                    }
                                }
                                None => {
                                    if !batch.is_empty() || emit_empty {
                                        (&mut *lock(&callback))(std::mem::take(&mut batch));
                                    }
                                    return;
                                }
                            },
                            () = &mut deadline => break,
                        }
                    }
                    if !batch.is_empty() || emit_empty {
                        (&mut *lock(&callback))(std::mem::take(&mut batch));
                    }
                }
            });
            Subscription::merge(vec![
                upstream,
                Subscription::new(move || handle.abort()),
            ])
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::subject::Subject;

    fn collect<T: Clone + Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl FnMut(T) + Send + 'static)
    {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |value| lock(&sink).push(value))
    }

    #[tokio::test]
    async fn should_emit_only_the_trailing_value_of_a_burst() {
        let subject = Subject::new();
        let (seen, sink) = collect();
        let _sub = subject.rx().debounce(0.05).subscribe(sink);
        for value in 1..=3 {
            subject.send(value);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(*lock(&seen), vec![3]);

        subject.send(4);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(*lock(&seen), vec![3, 4]);
    }

    #[tokio::test]
    async fn should_suppress_repeats_when_debounce_feeds_distinct() {
        let subject = Subject::new();
        let (seen, sink) = collect();
        let _sub = subject
            .rx()
            .debounce(0.05)
            .distinct_until_changed()
            .subscribe(sink);
        // Separate quiet windows, same value: only the first gets through.
        subject.send(1);
        tokio::time::sleep(Duration::from_millis(120)).await;
        subject.send(1);
        tokio::time::sleep(Duration::from_millis(120)).await;
        subject.send(2);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(*lock(&seen), vec![1, 2]);
    }

    #[tokio::test]
    async fn should_stop_debouncing_after_dispose() {
        let subject = Subject::new();
        let (seen, sink) = collect();
        let sub = subject.rx().debounce(0.05).subscribe(sink);
        subject.send(1);
        tokio::time::sleep(Duration::from_millis(120)).await;
        sub.dispose();
        subject.send(2);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(*lock(&seen), vec![1]);
    }

    #[tokio::test]
    async fn should_flush_buffers_on_count() {
        let subject = Subject::new();
        let (seen, sink) = collect();
        let _sub = subject
            .rx()
            .buffer_with_time_or_count(10.0, 2, false)
            .subscribe(sink);
        for value in 1..=5 {
            subject.send(value);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*lock(&seen), vec![vec![1, 2], vec![3, 4]]);
    }

    #[tokio::test]
    async fn should_flush_buffers_on_time() {
        let subject = Subject::new();
        let (seen, sink) = collect();
        let _sub = subject
            .rx()
            .buffer_with_time_or_count(0.05, 100, false)
            .subscribe(sink);
        subject.send(1);
        subject.send(2);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(*lock(&seen), vec![vec![1, 2]]);
        // Silent window with emit_empty off: no batch.
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(lock(&seen).len(), 1);
    }

    #[tokio::test]
    async fn should_flush_empty_batches_when_asked() {
        let subject: Subject<i32> = Subject::new();
        let (seen, sink) = collect();
        let _sub = subject
            .rx()
            .buffer_with_time_or_count(0.04, 0, true)
            .subscribe(sink);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let seen = lock(&seen);
        assert!(!seen.is_empty());
        assert!(seen.iter().all(Vec::is_empty));
    }
}
