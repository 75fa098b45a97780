//! The in-memory echo driver: `set` writes come straight back out of the
//! matching channel. Backs manual devices and most tests.

use aquahub_domain::emit::Emit;
use aquahub_domain::error::AquaHubError;
use aquahub_domain::model::DriverRef;
use aquahub_domain::status::DriverStatus;
use aquahub_engine::driver::{Driver, DriverCore, PRIMARY_CHANNEL};
use aquahub_rx::Rx;

/// Echo driver. Channel keys come from the comma-separated `channels`
/// parameter, defaulting to the primary channel.
pub struct MemoryDriver {
    core: DriverCore,
}

impl MemoryDriver {
    pub const ID: &'static str = "memory";

    #[must_use]
    pub fn new(reference: &DriverRef) -> Self {
        let channels: Vec<String> = reference.param("channels").map_or_else(
            || vec![PRIMARY_CHANNEL.to_string()],
            |keys| keys.split(',').map(|key| key.trim().to_string()).collect(),
        );
        Self {
            core: DriverCore::new(reference, &channels),
        }
    }
}

impl Driver for MemoryDriver {
    fn id(&self) -> &str {
        self.core.id()
    }

    fn start(&self) -> Result<(), AquaHubError> {
        self.core.set_status(DriverStatus::Running);
        Ok(())
    }

    fn stop(&self) {
        self.core.set_status(DriverStatus::NotStarted);
    }

    fn close(&self) {
        self.core.set_status(DriverStatus::Closing);
        self.core.close();
    }

    fn channel(&self, key: &str) -> Option<Rx<Emit>> {
        self.core.channel(key)
    }

    fn rx_status(&self) -> Rx<Emit> {
        self.core.rx_status()
    }

    fn set(&self, key: &str, emit: Emit) -> Result<(), AquaHubError> {
        self.core.emit(key, emit)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use aquahub_rx::lock;

    use super::*;

    fn reference(channels: Option<&str>) -> DriverRef {
        DriverRef {
            id: MemoryDriver::ID.to_string(),
            path: None,
            params: channels
                .map(|value| aquahub_domain::model::Param {
                    key: "channels".to_string(),
                    value: value.to_string(),
                })
                .into_iter()
                .collect(),
        }
    }

    #[test]
    fn should_echo_writes_back_on_the_channel() {
        let driver = MemoryDriver::new(&reference(None));
        driver.start().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = driver
            .channel(PRIMARY_CHANNEL)
            .unwrap()
            .subscribe(move |emit: Emit| lock(&sink).push(emit));
        driver.set(PRIMARY_CHANNEL, Emit::value(7.5)).unwrap();
        assert_eq!(*lock(&seen), vec![Emit::value(7.5)]);
    }

    #[test]
    fn should_create_configured_channels() {
        let driver = MemoryDriver::new(&reference(Some("temp, ph")));
        assert!(driver.channel("temp").is_some());
        assert!(driver.channel("ph").is_some());
        assert!(driver.channel(PRIMARY_CHANNEL).is_none());
        assert!(driver.set("level", Emit::value(1.0)).is_err());
    }

    #[test]
    fn should_walk_the_status_lifecycle() {
        let driver = MemoryDriver::new(&reference(None));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = driver
            .rx_status()
            .subscribe(move |emit: Emit| lock(&sink).push(emit));
        driver.start().unwrap();
        driver.stop();
        driver.close();
        let statuses: Vec<_> = lock(&seen)
            .iter()
            .filter_map(|emit| emit.enum_value.clone())
            .collect();
        assert_eq!(
            statuses,
            vec!["not_started", "running", "not_started", "closing"]
        );
    }
}
