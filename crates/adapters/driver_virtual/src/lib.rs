//! # aquahub-driver-virtual
//!
//! Virtual driver implementations: no hardware, no IO.
//!
//! ## Responsibilities
//! - [`MemoryDriver`]: echoes written values back onto its channels, for
//!   manual devices and tests
//! - [`SimulatedSensorDriver`]: produces synthetic periodic readings
//! - [`VirtualDriverFactory`]: the [`DriverFactory`] wiring both into the
//!   registry

use std::sync::Arc;

use aquahub_domain::error::{AquaHubError, ConfigurationError};
use aquahub_domain::model::DriverRef;
use aquahub_engine::driver::{Driver, DriverFactory};

mod memory;
mod sensor;

pub use memory::MemoryDriver;
pub use sensor::SimulatedSensorDriver;

/// Factory for the virtual driver family.
pub struct VirtualDriverFactory;

impl DriverFactory for VirtualDriverFactory {
    fn create(&self, reference: &DriverRef) -> Result<Arc<dyn Driver>, AquaHubError> {
        match reference.id.as_str() {
            MemoryDriver::ID => Ok(Arc::new(MemoryDriver::new(reference))),
            SimulatedSensorDriver::ID => Ok(Arc::new(SimulatedSensorDriver::new(reference)?)),
            other => {
                Err(ConfigurationError(format!("unknown virtual driver {other}")).into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use aquahub_domain::model::Param;

    use super::*;

    #[test]
    fn should_create_known_drivers() {
        let factory = VirtualDriverFactory;
        let memory = factory
            .create(&DriverRef {
                id: "memory".to_string(),
                path: None,
                params: vec![],
            })
            .unwrap();
        assert_eq!(memory.id(), "memory");

        let sensor = factory
            .create(&DriverRef {
                id: "sensor".to_string(),
                path: None,
                params: vec![Param {
                    key: "initial".to_string(),
                    value: "7.2".to_string(),
                }],
            })
            .unwrap();
        assert_eq!(sensor.id(), "sensor");
    }

    #[test]
    fn should_reject_unknown_driver_ids() {
        let factory = VirtualDriverFactory;
        let error = factory
            .create(&DriverRef {
                id: "zigbee".to_string(),
                path: None,
                params: vec![],
            })
            .map(|_| ())
            .unwrap_err();
        assert!(error.to_string().contains("unknown virtual driver"));
    }

    #[test]
    fn should_reject_malformed_parameters() {
        let factory = VirtualDriverFactory;
        let error = factory
            .create(&DriverRef {
                id: "sensor".to_string(),
                path: None,
                params: vec![Param {
                    key: "period".to_string(),
                    value: "fast".to_string(),
                }],
            })
            .map(|_| ())
            .unwrap_err();
        assert!(error.to_string().contains("period"));
    }
}
