//! The driver port and the shared driver core.
//!
//! A driver exposes one emit stream per channel key plus a status stream.
//! Adapter crates implement [`Driver`] on top of [`DriverCore`], which owns
//! the subjects and the parameter/status plumbing, and register through a
//! [`DriverFactory`].

use std::collections::HashMap;
use std::sync::Arc;

use aquahub_domain::emit::Emit;
use aquahub_domain::error::{AquaHubError, NotFoundError};
use aquahub_domain::model::DriverRef;
use aquahub_domain::status::DriverStatus;
use aquahub_rx::{BehaviorSubject, Rx, Subject};

/// The channel key an observable with its own driver reads from.
pub const PRIMARY_CHANNEL: &str = "A";

/// Port implemented by every driver adapter.
pub trait Driver: Send + Sync {
    /// Driver type id, as referenced by descriptors.
    fn id(&self) -> &str;

    /// Begin producing; the status stream must reach a running state on
    /// success.
    ///
    /// # Errors
    ///
    /// Returns [`AquaHubError::Driver`] when the underlying device cannot
    /// be brought up.
    fn start(&self) -> Result<(), AquaHubError>;

    /// Stop producing; restartable.
    fn stop(&self);

    /// Release everything; the driver is not reusable afterwards.
    fn close(&self);

    /// The emit stream for a channel key, if the driver has that channel.
    fn channel(&self, key: &str) -> Option<Rx<Emit>>;

    /// The driver status stream. Replays the current status on subscribe.
    fn rx_status(&self) -> Rx<Emit>;

    /// Write a value towards the underlying device on a channel.
    ///
    /// # Errors
    ///
    /// [`AquaHubError::NotImplemented`] for read-only drivers.
    fn set(&self, key: &str, emit: Emit) -> Result<(), AquaHubError> {
        let _ = (key, emit);
        Err(AquaHubError::NotImplemented)
    }

    /// Request an immediate reading from a polled device.
    ///
    /// # Errors
    ///
    /// [`AquaHubError::NotImplemented`] for push-based drivers.
    fn poll(&self) -> Result<(), AquaHubError> {
        Err(AquaHubError::NotImplemented)
    }
}

/// Shared state for driver implementations: identity, parameters, the
/// status subject, and one subject per channel key.
pub struct DriverCore {
    id: String,
    path: Option<String>,
    params: HashMap<String, String>,
    status: BehaviorSubject<Emit>,
    channels: HashMap<String, Subject<Emit>>,
}

impl DriverCore {
    /// Build a core from a descriptor reference with the given channel keys.
    /// The status stream starts at `not_started`.
    #[must_use]
    pub fn new(reference: &DriverRef, channel_keys: &[String]) -> Self {
        Self {
            id: reference.id.clone(),
            path: reference.path.clone(),
            params: reference
                .params
                .iter()
                .map(|p| (p.key.clone(), p.value.clone()))
                .collect(),
            status: BehaviorSubject::new(DriverStatus::NotStarted.emit()),
            channels: channel_keys
                .iter()
                .map(|key| (key.clone(), Subject::new()))
                .collect(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn set_status(&self, status: DriverStatus) {
        self.status.send(status.emit());
    }

    /// Report an error state with a diagnostic note.
    pub fn set_error(&self, note: impl Into<String>) {
        self.status
            .send(DriverStatus::InError.emit().with_note(note));
    }

    #[must_use]
    pub fn rx_status(&self) -> Rx<Emit> {
        self.status.rx()
    }

    #[must_use]
    pub fn channel(&self, key: &str) -> Option<Rx<Emit>> {
        self.channels.get(key).map(Subject::rx)
    }

    #[must_use]
    pub fn channel_keys(&self) -> Vec<&str> {
        self.channels.keys().map(String::as_str).collect()
    }

    /// Push a reading into a channel.
    ///
    /// # Errors
    ///
    /// [`NotFoundError`] when the driver has no such channel.
    pub fn emit(&self, key: &str, emit: Emit) -> Result<(), AquaHubError> {
        let channel = self
            .channels
            .get(key)
            .ok_or_else(|| NotFoundError::new("channel", key))?;
        channel.send(emit);
        Ok(())
    }

    /// Close the status and all channel subjects.
    pub fn close(&self) {
        self.status.close();
        for channel in self.channels.values() {
            channel.close();
        }
    }
}

/// Creates drivers from descriptor references.
pub trait DriverFactory: Send + Sync {
    /// Instantiate the driver a descriptor refers to.
    ///
    /// # Errors
    ///
    /// [`AquaHubError::Configuration`] for unknown driver ids or invalid
    /// parameters.
    fn create(&self, reference: &DriverRef) -> Result<Arc<dyn Driver>, AquaHubError>;
}
