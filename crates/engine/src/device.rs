//! Live devices: driver ownership, the device status stream, and fan-out
//! of lifecycle operations over child observables.

use std::sync::{Arc, Mutex, OnceLock};

use aquahub_domain::emit::{self, Emit, ObservableEmit};
use aquahub_domain::error::{AquaHubError, NotFoundError};
use aquahub_domain::model::{self, DeviceSpec};
use aquahub_domain::status::Status;
use aquahub_rx::{BehaviorSubject, Publish, Rx, Subscription, lock};

use crate::driver::Driver;
use crate::observable::Observable;
use crate::registry::Registry;

/// A live device built from a descriptor.
pub struct Device {
    spec: DeviceSpec,
    id: String,
    status_id: String,
    driver: Option<Arc<dyn Driver>>,
    paused: Mutex<bool>,
    rx_paused: BehaviorSubject<Emit>,
    status_publish: Publish<ObservableEmit>,
    observables: OnceLock<Vec<Arc<Observable>>>,
    rx_all: OnceLock<Rx<ObservableEmit>>,
    subs: Mutex<Vec<Subscription>>,
}

impl Device {
    /// Build a device and its observables. The descriptor must carry an id
    /// (the registry assigns one). Nothing flows until [`Device::start`].
    pub(crate) fn init(
        spec: DeviceSpec,
        registry: &Arc<Registry>,
    ) -> Result<Arc<Self>, AquaHubError> {
        spec.validate()?;
        let id = spec
            .id
            .clone()
            .ok_or_else(|| NotFoundError::new("device id", spec.name.clone()))?;
        let status_id = model::status_id(&id);
        let active = spec.enablement.is_active();

        let driver = if active {
            spec.driver
                .as_ref()
                .map(|reference| registry.driver_factory().create(reference))
                .transpose()?
        } else {
            None
        };

        let rx_paused = BehaviorSubject::new(Emit::value(0.0));
        let status_stream: Rx<Emit> = if active {
            let driver_status = driver
                .as_ref()
                .map_or_else(|| Rx::constant(Emit::default()), |d| d.rx_status());
            Rx::combine_latest_all(vec![rx_paused.rx(), driver_status])
                .map(|inputs: Vec<Emit>| device_status(inputs[0].truthy(), &inputs[1]))
        } else {
            Rx::constant(Status::Disabled.emit())
        };
        let status_publish = Publish::replay(
            status_stream.distinct_until_changed().map({
                let status_id = status_id.clone();
                move |status| emit::emit_raw(&status_id, status)
            }),
            None,
        );

        let device = Arc::new(Self {
            spec,
            id,
            status_id,
            driver,
            paused: Mutex::new(false),
            rx_paused,
            status_publish,
            observables: OnceLock::new(),
            rx_all: OnceLock::new(),
            subs: Mutex::new(Vec::new()),
        });

        let mut observables = Vec::with_capacity(device.spec.observables.len());
        for observable_spec in device.spec.observables.clone() {
            observables.push(Observable::init(observable_spec, &device, registry)?);
        }
        let mut all = vec![device.rx_status()];
        for observable in &observables {
            all.push(observable.rx_value());
            all.push(observable.rx_status());
        }
        let _ = device.observables.set(observables);
        let _ = device.rx_all.set(Rx::merge(all));
        Ok(device)
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn status_id(&self) -> &str {
        &self.status_id
    }

    #[must_use]
    pub fn spec(&self) -> &DeviceSpec {
        &self.spec
    }

    #[must_use]
    pub fn device_type(&self) -> Option<&str> {
        self.spec.device_type.as_deref()
    }

    /// The device's driver, shared with observables sourced from its
    /// channels.
    #[must_use]
    pub fn driver(&self) -> Option<Arc<dyn Driver>> {
        self.driver.clone()
    }

    /// The device status stream. Replays the latest status.
    #[must_use]
    pub fn rx_status(&self) -> Rx<ObservableEmit> {
        self.status_publish.observe()
    }

    /// Every emission of this device: its own status plus all child value
    /// and status streams.
    #[must_use]
    pub fn rx_all(&self) -> Rx<ObservableEmit> {
        self.rx_all
            .get()
            .cloned()
            .unwrap_or_else(|| self.rx_status())
    }

    #[must_use]
    pub fn observables(&self) -> &[Arc<Observable>] {
        self.observables.get().map_or(&[], Vec::as_slice)
    }

    /// Look up a child observable by its local id.
    #[must_use]
    pub fn observable(&self, local_id: &str) -> Option<&Arc<Observable>> {
        self.observables()
            .iter()
            .find(|observable| observable.spec().common().id == local_id)
    }

    /// Connect the status pipeline, start the driver, then start every
    /// child in declaration order.
    ///
    /// # Errors
    ///
    /// Propagates driver startup failures; children started before the
    /// failure stay started.
    #[tracing::instrument(skip(self), fields(id = %self.id, name = %self.spec.name))]
    pub fn start(&self) -> Result<(), AquaHubError> {
        lock(&self.subs).push(self.status_publish.connect());
        if let Some(driver) = &self.driver {
            driver.start()?;
        }
        for observable in self.observables() {
            observable.start()?;
        }
        tracing::info!("device started");
        Ok(())
    }

    /// Stop every child, the driver, and the status pipeline. Restartable.
    pub fn stop(&self) {
        for observable in self.observables() {
            observable.stop();
        }
        if let Some(driver) = &self.driver {
            driver.stop();
        }
        for sub in lock(&self.subs).drain(..) {
            sub.dispose();
        }
    }

    /// Flip the pause flag on the device and every enabled child.
    pub fn pause(&self, paused: bool) {
        *lock(&self.paused) = paused;
        self.rx_paused
            .send(Emit::value(if paused { 1.0 } else { 0.0 }));
        for observable in self.observables() {
            if observable.enabled() {
                observable.pause(paused);
            }
        }
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        *lock(&self.paused)
    }

    /// Tear the device down; not reusable afterwards.
    pub fn close(&self) {
        for observable in self.observables() {
            observable.close();
        }
        self.stop();
        if let Some(driver) = &self.driver {
            driver.close();
        }
        self.status_publish.close();
        self.rx_paused.close();
    }
}

/// Device status from the pause flag and the driver status stream. A
/// device without a driver is running whenever it is not paused.
fn device_status(paused: bool, driver_status: &Emit) -> Emit {
    if paused {
        return Status::Paused.emit();
    }
    match driver_status.enum_value.as_deref() {
        None | Some("running" | "program_running" | "schedule_running") => Status::Running.emit(),
        Some("in_error") => {
            let mut status = Status::Error.emit();
            status.note = driver_status.note.clone();
            status
        }
        Some("closing") => Status::Error.emit().with_note("driver closing"),
        Some(_) => Status::Initializing.emit(),
    }
}

#[cfg(test)]
mod tests {
    use aquahub_domain::status::DriverStatus;

    use super::*;

    #[test]
    fn should_report_running_without_a_driver() {
        let status = device_status(false, &Emit::default());
        assert!(Status::Running.matches(&status));
    }

    #[test]
    fn should_report_paused_over_driver_state() {
        let status = device_status(true, &DriverStatus::Running.emit());
        assert!(Status::Paused.matches(&status));
    }

    #[test]
    fn should_map_driver_lifecycle_states() {
        assert!(Status::Initializing.matches(&device_status(
            false,
            &DriverStatus::NotStarted.emit()
        )));
        assert!(Status::Running.matches(&device_status(
            false,
            &DriverStatus::ScheduleRunning.emit()
        )));
        let status = device_status(false, &DriverStatus::InError.emit().with_note("gone"));
        assert!(Status::Error.matches(&status));
        assert_eq!(status.note.as_deref(), Some("gone"));
    }
}
