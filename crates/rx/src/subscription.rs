//! Subscription handles. Dropping a handle cancels the subscription, so
//! long-lived subscriptions must be stored.

/// Handle to an active subscription.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// A subscription cancelled by running `cancel`.
    #[must_use]
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to cancel.
    #[must_use]
    pub fn empty() -> Self {
        Self { cancel: None }
    }

    /// Combine several subscriptions into one handle.
    #[must_use]
    pub fn merge(subscriptions: Vec<Subscription>) -> Self {
        Self::new(move || {
            for subscription in subscriptions {
                subscription.dispose();
            }
        })
    }

    /// Cancel the subscription now.
    pub fn dispose(mut self) {
        self.cancel_inner();
    }

    fn cancel_inner(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_inner();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
