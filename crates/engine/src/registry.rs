//! The registry: the id-addressed catalog of live devices.
//!
//! The registry assigns device ids, owns the merged all-emissions stream,
//! and resolves observable references (plain, qualified, status, and
//! device-type wildcard forms) to live streams.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use aquahub_domain::emit::ObservableEmit;
use aquahub_domain::error::{AquaHubError, ConfigurationError, NotFoundError, PreconditionError};
use aquahub_domain::model::DeviceSpec;
use aquahub_domain::units::UnitTable;
use aquahub_rx::{Rx, Subject, Subscription, lock};

use crate::device::Device;
use crate::driver::DriverFactory;
use crate::observable::Observable;

#[derive(Default)]
struct Inner {
    /// Insertion order matters: wildcard references resolve to the first
    /// matching device.
    devices: Vec<Arc<Device>>,
    last_emits: HashMap<String, ObservableEmit>,
    forward_subs: HashMap<String, Subscription>,
}

/// The catalog of live devices and their streams.
pub struct Registry {
    driver_factory: Arc<dyn DriverFactory>,
    units: Arc<UnitTable>,
    inner: Mutex<Inner>,
    all: Subject<ObservableEmit>,
    device_updates: Subject<DeviceSpec>,
}

impl Registry {
    #[must_use]
    pub fn new(driver_factory: Arc<dyn DriverFactory>, units: Arc<UnitTable>) -> Arc<Self> {
        Arc::new(Self {
            driver_factory,
            units,
            inner: Mutex::new(Inner::default()),
            all: Subject::new(),
            device_updates: Subject::new(),
        })
    }

    #[must_use]
    pub fn driver_factory(&self) -> Arc<dyn DriverFactory> {
        Arc::clone(&self.driver_factory)
    }

    #[must_use]
    pub fn units(&self) -> Arc<UnitTable> {
        Arc::clone(&self.units)
    }

    /// The latest emission recorded for an observable or status id.
    #[must_use]
    pub fn last_emit(&self, id: &str) -> Option<ObservableEmit> {
        lock(&self.inner).last_emits.get(id).cloned()
    }

    #[must_use]
    pub fn devices(&self) -> Vec<Arc<Device>> {
        lock(&self.inner).devices.clone()
    }

    fn next_device_id(&self) -> String {
        let highest = lock(&self.inner)
            .devices
            .iter()
            .filter_map(|device| device.id().parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        (highest + 1).to_string()
    }

    /// Register and start a device. A descriptor without an id gets the
    /// next sequential numeric id.
    ///
    /// # Errors
    ///
    /// Rejects duplicate ids and invalid descriptors; propagates driver
    /// startup failures, in which case the device is unregistered again.
    #[tracing::instrument(skip(self, spec), fields(name = %spec.name))]
    pub fn add_device(self: &Arc<Self>, mut spec: DeviceSpec) -> Result<Arc<Device>, AquaHubError> {
        let id = match spec.id.clone() {
            Some(id) => {
                if self.get_device(&id).is_ok() {
                    return Err(
                        PreconditionError::new(id, "device id already registered").into()
                    );
                }
                id
            }
            None => self.next_device_id(),
        };
        spec.id = Some(id.clone());
        let device = Device::init(spec, self)?;
        let forward = self.forward(&device);
        {
            let mut inner = lock(&self.inner);
            inner.devices.push(Arc::clone(&device));
            inner.forward_subs.insert(id.clone(), forward);
        }
        if let Err(error) = device.start() {
            self.unregister(&id);
            device.close();
            return Err(error);
        }
        tracing::info!(id = %id, "device registered");
        self.device_updates.send(device.spec().clone());
        Ok(device)
    }

    /// Register a descriptor as a brand-new device, ignoring any id it
    /// carries.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Registry::add_device`].
    pub fn create_new_device(
        self: &Arc<Self>,
        mut spec: DeviceSpec,
    ) -> Result<Arc<Device>, AquaHubError> {
        spec.id = None;
        self.add_device(spec)
    }

    /// Replace a registered device with a new descriptor under the same id.
    /// Only disabled or paused devices may be replaced.
    ///
    /// # Errors
    ///
    /// [`PreconditionError`] when the device is live, [`NotFoundError`]
    /// when the id is unknown.
    #[tracing::instrument(skip(self, spec), fields(name = %spec.name))]
    pub fn update_device(
        self: &Arc<Self>,
        spec: DeviceSpec,
    ) -> Result<Arc<Device>, AquaHubError> {
        let id = spec
            .id
            .clone()
            .ok_or_else(|| ConfigurationError("device update requires an id".to_string()))?;
        let old = self.get_device(&id)?;
        let replaceable = !old.spec().enablement.is_active() || old.is_paused();
        if !replaceable {
            return Err(PreconditionError::new(
                id,
                "device must be disabled or paused before it can be replaced",
            )
            .into());
        }
        old.stop();
        old.close();
        self.unregister(&id);
        self.add_device(spec)
    }

    fn forward(self: &Arc<Self>, device: &Arc<Device>) -> Subscription {
        let registry = Arc::downgrade(self);
        device.rx_all().subscribe(move |emit: ObservableEmit| {
            if let Some(registry) = registry.upgrade() {
                lock(&registry.inner)
                    .last_emits
                    .insert(emit.observable_id.clone(), emit.clone());
                registry.all.send(emit);
            }
        })
    }

    fn unregister(&self, id: &str) {
        let mut inner = lock(&self.inner);
        inner.devices.retain(|device| device.id() != id);
        if let Some(sub) = inner.forward_subs.remove(id) {
            drop(inner);
            sub.dispose();
        }
    }

    /// Look up a device by id.
    ///
    /// # Errors
    ///
    /// [`NotFoundError`] when no such device is registered.
    pub fn get_device(&self, id: &str) -> Result<Arc<Device>, AquaHubError> {
        lock(&self.inner)
            .devices
            .iter()
            .find(|device| device.id() == id)
            .cloned()
            .ok_or_else(|| NotFoundError::new("device", id).into())
    }

    /// Look up an observable by reference: `deviceId:localId`, the same
    /// with a `?` suffix, or the device-type wildcard `>type:localId<`.
    ///
    /// # Errors
    ///
    /// [`NotFoundError`] when the reference resolves to nothing.
    pub fn get_observable(&self, id: &str) -> Result<Arc<Observable>, AquaHubError> {
        let base = id.strip_suffix('?').unwrap_or(id);
        if let Some(wildcard) = base.strip_prefix('>').and_then(|b| b.strip_suffix('<')) {
            let (device_type, local_id) = wildcard
                .split_once(':')
                .ok_or_else(|| NotFoundError::new("observable", id))?;
            let inner = lock(&self.inner);
            return inner
                .devices
                .iter()
                .filter(|device| device.device_type() == Some(device_type))
                .find_map(|device| device.observable(local_id).cloned())
                .ok_or_else(|| NotFoundError::new("observable", id).into());
        }
        let (device_id, local_id) = base
            .split_once(':')
            .ok_or_else(|| NotFoundError::new("observable", id))?;
        self.get_device(device_id)?
            .observable(local_id)
            .cloned()
            .ok_or_else(|| NotFoundError::new("observable", id).into())
    }

    /// Resolve a reference to a live stream: value streams for plain ids,
    /// status streams for `?`-suffixed ids (device or observable).
    ///
    /// # Errors
    ///
    /// [`NotFoundError`] when the reference resolves to nothing.
    pub fn get_rx_observable(&self, id: &str) -> Result<Rx<ObservableEmit>, AquaHubError> {
        if let Some(base) = id.strip_suffix('?') {
            if !base.contains(':') {
                return Ok(self.get_device(base)?.rx_status());
            }
            return Ok(self.get_observable(id)?.rx_status());
        }
        Ok(self.get_observable(id)?.rx_value())
    }

    /// Every emission of every registered device.
    #[must_use]
    pub fn rx_all(&self) -> Rx<ObservableEmit> {
        self.all.rx()
    }

    /// Device descriptors: the current snapshot on subscribe, then every
    /// later registration or replacement.
    #[must_use]
    pub fn rx_device_updates(self: &Arc<Self>) -> Rx<DeviceSpec> {
        let registry = Arc::downgrade(self);
        let live = self.device_updates.rx();
        Rx::new(move |callback| {
            if let Some(registry) = registry.upgrade() {
                for device in registry.devices() {
                    (&mut *lock(&callback))(device.spec().clone());
                }
            }
            live.subscribe_raw(callback)
        })
    }

    /// Stop and close every device and the registry streams.
    #[tracing::instrument(skip(self))]
    pub fn close(&self) {
        let (devices, forward_subs) = {
            let mut inner = lock(&self.inner);
            (
                std::mem::take(&mut inner.devices),
                std::mem::take(&mut inner.forward_subs),
            )
        };
        for (_, sub) in forward_subs {
            sub.dispose();
        }
        for device in devices {
            device.stop();
            device.close();
        }
        self.all.close();
        self.device_updates.close();
    }
}

#[cfg(test)]
mod tests {
    use aquahub_domain::emit::Emit;
    use aquahub_domain::model::{DriverRef, Enablement};
    use aquahub_domain::status::DriverStatus;
    use aquahub_rx::{BehaviorSubject, lock as rx_lock};

    use super::*;
    use crate::driver::Driver;

    struct NullFactory;

    impl DriverFactory for NullFactory {
        fn create(&self, reference: &DriverRef) -> Result<Arc<dyn Driver>, AquaHubError> {
            Err(ConfigurationError(format!("unknown driver {}", reference.id)).into())
        }
    }

    /// Single-channel driver echoing writes back, with countable subjects.
    struct EchoDriver {
        channel: Subject<Emit>,
        status: BehaviorSubject<Emit>,
    }

    impl EchoDriver {
        fn new() -> Self {
            Self {
                channel: Subject::new(),
                status: BehaviorSubject::new(DriverStatus::NotStarted.emit()),
            }
        }
    }

    impl Driver for EchoDriver {
        fn id(&self) -> &str {
            "echo"
        }

        fn start(&self) -> Result<(), AquaHubError> {
            self.status.send(DriverStatus::Running.emit());
            Ok(())
        }

        fn stop(&self) {
            self.status.send(DriverStatus::NotStarted.emit());
        }

        fn close(&self) {
            // The factory hands out one shared instance; keep the subjects
            // open so subscriber counts reflect disposal alone.
        }

        fn channel(&self, key: &str) -> Option<Rx<Emit>> {
            (key == "temp").then(|| self.channel.rx())
        }

        fn rx_status(&self) -> Rx<Emit> {
            self.status.rx()
        }

        fn set(&self, _key: &str, emit: Emit) -> Result<(), AquaHubError> {
            self.channel.send(emit);
            Ok(())
        }
    }

    struct EchoFactory(Arc<EchoDriver>);

    impl DriverFactory for EchoFactory {
        fn create(&self, _reference: &DriverRef) -> Result<Arc<dyn Driver>, AquaHubError> {
            Ok(Arc::clone(&self.0) as Arc<dyn Driver>)
        }
    }

    fn echo_registry() -> (Arc<Registry>, Arc<EchoDriver>) {
        let driver = Arc::new(EchoDriver::new());
        let registry = Registry::new(
            Arc::new(EchoFactory(Arc::clone(&driver))),
            Arc::new(UnitTable::default()),
        );
        (registry, driver)
    }

    fn registry() -> Arc<Registry> {
        echo_registry().0
    }

    fn null_registry() -> Arc<Registry> {
        Registry::new(Arc::new(NullFactory), Arc::new(UnitTable::default()))
    }

    fn tank(name: &str) -> DeviceSpec {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "type": "tank",
            "driver": {"id": "echo"},
            "observables": [
                {"kind": "measure", "id": "temp"},
            ],
        }))
        .unwrap()
    }

    #[test]
    fn should_assign_sequential_numeric_ids() {
        let registry = registry();
        let first = registry.add_device(tank("Tank one")).unwrap();
        let second = registry.add_device(tank("Tank two")).unwrap();
        assert_eq!(first.id(), "1");
        assert_eq!(second.id(), "2");
        let mut third = tank("Tank ten");
        third.id = Some("10".to_string());
        registry.add_device(third).unwrap();
        let fourth = registry.add_device(tank("Tank eleven")).unwrap();
        assert_eq!(fourth.id(), "11");
    }

    #[test]
    fn should_reject_duplicate_ids() {
        let registry = registry();
        let mut spec = tank("Tank");
        spec.id = Some("1".to_string());
        registry.add_device(spec.clone()).unwrap();
        let error = registry.add_device(spec).map(|_| ()).unwrap_err();
        assert!(error.to_string().contains("already registered"));
    }

    #[test]
    fn should_resolve_plain_status_and_wildcard_references() {
        let registry = registry();
        registry.add_device(tank("Tank one")).unwrap();
        registry.add_device(tank("Tank two")).unwrap();

        assert_eq!(registry.get_observable("1:temp").unwrap().id(), "1:temp");
        assert_eq!(registry.get_observable("2:temp?").unwrap().id(), "2:temp");
        // Wildcards resolve to the first registered matching device.
        assert_eq!(
            registry.get_observable(">tank:temp<").unwrap().id(),
            "1:temp"
        );
        assert!(registry.get_rx_observable("1?").is_ok());
        assert!(registry.get_observable("9:temp").is_err());
        assert!(registry.get_observable(">pump:speed<").is_err());
    }

    #[test]
    fn should_record_last_emits() {
        let registry = registry();
        registry.add_device(tank("Tank")).unwrap();
        let observable = registry.get_observable("1:temp").unwrap();
        observable.measurement(24.5).unwrap();
        let last = registry.last_emit("1:temp").unwrap();
        assert_eq!(last.value, Some(24.5));
    }

    #[test]
    fn should_refuse_to_replace_a_live_device() {
        let registry = registry();
        let mut spec = tank("Tank");
        spec.id = Some("1".to_string());
        registry.add_device(spec.clone()).unwrap();
        assert!(registry.update_device(spec).is_err());
    }

    #[test]
    fn should_replace_a_paused_device() {
        let registry = registry();
        let device = registry.add_device(tank("Tank")).unwrap();
        device.pause(true);
        let mut replacement = tank("Tank renamed");
        replacement.id = Some("1".to_string());
        let replaced = registry.update_device(replacement).unwrap();
        assert_eq!(replaced.spec().name, "Tank renamed");
        assert_eq!(registry.devices().len(), 1);
    }

    #[test]
    fn should_refuse_update_without_an_id() {
        let registry = registry();
        assert!(registry.update_device(tank("Tank")).is_err());
    }

    #[test]
    fn should_snapshot_then_follow_device_updates() {
        let registry = registry();
        registry.add_device(tank("Tank one")).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = registry
            .rx_device_updates()
            .subscribe(move |spec: DeviceSpec| rx_lock(&sink).push(spec));
        registry.add_device(tank("Tank two")).unwrap();
        let seen = rx_lock(&seen);
        assert_eq!(
            seen.iter().map(|spec| spec.id.as_deref()).collect::<Vec<_>>(),
            vec![Some("1"), Some("2")]
        );
        assert_eq!(seen[1].name, "Tank two");
    }

    #[test]
    fn should_release_driver_subscriptions_when_a_device_is_replaced() {
        let (registry, driver) = echo_registry();
        let device = registry.add_device(tank("Tank")).unwrap();
        assert!(driver.channel.subscriber_count() > 0);
        device.pause(true);
        let mut replacement = tank("Tank");
        replacement.id = Some("1".to_string());
        replacement.enablement = Enablement::Disabled;
        registry.update_device(replacement).unwrap();
        assert_eq!(driver.channel.subscriber_count(), 0);
        assert_eq!(driver.status.subscriber_count(), 0);
    }

    #[test]
    fn should_report_disabled_statuses_for_disabled_devices() {
        let registry = null_registry();
        let mut spec = tank("Tank");
        spec.enablement = Enablement::Disabled;
        // A disabled device keeps its driver reference but never creates it.
        spec.driver = Some(DriverRef {
            id: "does-not-exist".to_string(),
            path: None,
            params: vec![],
        });
        let device = registry.add_device(spec).unwrap();
        let device_status = registry.last_emit("1?").unwrap();
        assert_eq!(device_status.enum_value.as_deref(), Some("disabled"));
        let status = device
            .observables()
            .first()
            .and_then(|observable| observable.status())
            .unwrap();
        assert_eq!(status.enum_value.as_deref(), Some("disabled"));
        // Writes stay rejected.
        let observable = registry.get_observable("1:temp").unwrap();
        assert!(observable.measurement(1.0).is_err());
    }
}
