//! Live observables: the value pipeline, the requirement checks, and the
//! status derivation.
//!
//! An observable owns two multicast streams. The value stream carries
//! measured/derived emits, shaped by the descriptor's emit control. The
//! status stream folds four inputs (owning device status, the pause flag,
//! the source/driver status, and the requirement verdict) into one entity
//! status, deduplicated before stamping.

use std::sync::{Arc, Mutex, Weak};

use aquahub_domain::emit::{self, Emit, ObservableEmit};
use aquahub_domain::error::{AquaHubError, ConfigurationError, PreconditionError, UnsupportedOperationError};
use aquahub_domain::model::{
    self, Condition, EnumRequire, MeasureEmitControl, ObservableKind, ObservableSpec, ValueRequire,
};
use aquahub_domain::status::{DriverStatus, Status};
use aquahub_rx::{BehaviorSubject, Publish, Rx, Subject, Subscription, lock};

use crate::device::Device;
use crate::driver::{Driver, PRIMARY_CHANNEL};
use crate::expression::{self, as_observable};
use crate::registry::Registry;

/// Where writes (set/measurement/fire) land.
enum WriteTarget {
    /// A driver channel, either the observable's own driver or the owning
    /// device's.
    Driver { driver: Arc<dyn Driver>, key: String },
    /// The observable is its own source.
    Subject(Subject<Emit>),
    /// Read-only: expression-sourced or disabled.
    None,
}

/// A live observable built from a descriptor.
pub struct Observable {
    spec: ObservableSpec,
    id: String,
    status_id: String,
    device_id: String,
    /// Enabled, and the owning device is enabled too.
    active: bool,
    registry: Weak<Registry>,
    /// The observable's own driver; device-level drivers are not stored
    /// here so their lifecycle stays with the device.
    driver: Option<Arc<dyn Driver>>,
    write_target: WriteTarget,
    paused: Arc<Mutex<bool>>,
    rx_paused: BehaviorSubject<Emit>,
    status_subject: Option<BehaviorSubject<Emit>>,
    value_publish: Publish<ObservableEmit>,
    status_publish: Publish<ObservableEmit>,
    subs: Mutex<Vec<Subscription>>,
    /// Formula-driven write subscriptions, released while paused.
    rule_subs: Mutex<Vec<Subscription>>,
}

impl Observable {
    /// Build the pipelines for a descriptor. Nothing flows until
    /// [`Observable::start`].
    pub(crate) fn init(
        spec: ObservableSpec,
        device: &Arc<Device>,
        registry: &Arc<Registry>,
    ) -> Result<Arc<Self>, AquaHubError> {
        let device_id = device.id().to_string();
        let local_id = spec.common().id.clone();
        let id = model::qualified_id(&device_id, &local_id);
        let status_id = model::status_id(&id);
        let active =
            spec.common().enablement.is_active() && device.spec().enablement.is_active();

        let paused = Arc::new(Mutex::new(false));
        let rx_paused = BehaviorSubject::new(Emit::value(0.0));
        let mut driver: Option<Arc<dyn Driver>> = None;
        let mut write_target = WriteTarget::None;
        let mut status_subject: Option<BehaviorSubject<Emit>> = None;

        let (source_value, source_status): (Rx<Emit>, Rx<Emit>) = if !active {
            (Rx::never(), Rx::constant(Status::Disabled.emit()))
        } else if let Some(expr) = &spec.common().expr {
            (
                as_observable(registry, expr, &device_id),
                Rx::constant(DriverStatus::Running.emit()),
            )
        } else if let Some(reference) = &spec.common().driver {
            let own = registry.driver_factory().create(reference)?;
            let channel = own.channel(PRIMARY_CHANNEL).ok_or_else(|| {
                ConfigurationError(format!(
                    "driver {} has no channel {PRIMARY_CHANNEL} for observable {id}",
                    reference.id
                ))
            })?;
            let status = own.rx_status();
            write_target = WriteTarget::Driver {
                driver: Arc::clone(&own),
                key: PRIMARY_CHANNEL.to_string(),
            };
            driver = Some(own);
            (channel, status)
        } else if let Some((device_driver, channel)) = device
            .driver()
            .and_then(|d| d.channel(&local_id).map(|c| (d, c)))
        {
            let status = device_driver.rx_status();
            write_target = WriteTarget::Driver {
                driver: device_driver,
                key: local_id.clone(),
            };
            (channel, status)
        } else if spec.is_self_driven() {
            // Actions and chores drive their own value subject, idling
            // until the workflow executor pushes states through
            // [`Observable::send_status`].
            let subject = Subject::new();
            let status = BehaviorSubject::new(Status::Idle.emit());
            let source = (subject.rx(), status.rx());
            write_target = WriteTarget::Subject(subject);
            status_subject = Some(status);
            source
        } else {
            return Err(ConfigurationError(format!("nothing to observe on {id}")).into());
        };

        let attributed = {
            let id = id.clone();
            let paused = Arc::clone(&paused);
            prefilter(&spec, source_value)
                .filter(move |_| !*lock(&paused))
                .map(move |raw| emit::emit_raw(&id, raw))
        };
        let seed = registry
            .last_emit(&id)
            .or_else(|| Some(emit::emit_empty(&id)));
        let value_publish = Publish::replay(attributed, seed);

        let require = require_stream(registry, &spec, &device_id, &value_publish);
        let status_stream = Rx::combine_latest_all(vec![
            device.rx_status().map(|emit: ObservableEmit| emit.raw()),
            rx_paused.rx(),
            source_status,
            require,
        ])
        .map(|inputs: Vec<Emit>| {
            derive_status(&inputs[0], inputs[1].truthy(), &inputs[2], &inputs[3])
        })
        .distinct_until_changed()
        .map({
            let status_id = status_id.clone();
            move |status| emit::emit_raw(&status_id, status)
        });
        let status_publish = Publish::replay(status_stream, None);

        Ok(Arc::new(Self {
            spec,
            id,
            status_id,
            device_id,
            active,
            registry: Arc::downgrade(registry),
            driver,
            write_target,
            paused,
            rx_paused,
            status_subject,
            value_publish,
            status_publish,
            subs: Mutex::new(Vec::new()),
            rule_subs: Mutex::new(Vec::new()),
        }))
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
    pub fn spec(&self) -> &ObservableSpec {
        &self.spec
    }

    #[must_use]
    pub fn kind(&self) -> ObservableKind {
        self.spec.kind()
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.spec.common().enablement.is_active()
    }

    /// The multicast value stream. Replays the latest emit.
    #[must_use]
    pub fn rx_value(&self) -> Rx<ObservableEmit> {
        self.value_publish.observe()
    }

    /// The multicast status stream. Replays the latest status.
    #[must_use]
    pub fn rx_status(&self) -> Rx<ObservableEmit> {
        self.status_publish.observe()
    }

    /// Latest value emit, if any flowed yet.
    #[must_use]
    pub fn value(&self) -> Option<ObservableEmit> {
        self.value_publish.value()
    }

    /// Latest status emit, if any flowed yet.
    #[must_use]
    pub fn status(&self) -> Option<ObservableEmit> {
        self.status_publish.value()
    }

    /// Connect the pipelines and start the observable's own driver. An
    /// inactive observable still connects so its `disabled` status flows.
    ///
    /// # Errors
    ///
    /// Propagates driver startup failures.
    #[tracing::instrument(skip(self), fields(id = %self.id))]
    pub fn start(self: &Arc<Self>) -> Result<(), AquaHubError> {
        if let Some(driver) = &self.driver {
            driver.start()?;
        }
        let mut subs = lock(&self.subs);
        subs.push(self.value_publish.connect());
        subs.push(self.status_publish.connect());
        drop(subs);
        if self.active {
            *lock(&self.rule_subs) = self.write_rules();
        }
        tracing::debug!("observable started");
        Ok(())
    }

    /// Disconnect the pipelines and stop the observable's own driver.
    pub fn stop(&self) {
        for sub in lock(&self.rule_subs).drain(..) {
            sub.dispose();
        }
        for sub in lock(&self.subs).drain(..) {
            sub.dispose();
        }
        if let Some(driver) = &self.driver {
            driver.stop();
        }
    }

    /// Pause or resume. Pausing stops the observable's own driver and
    /// releases the write-rule subscriptions so the hardware goes quiet;
    /// the value and status pipelines stay connected, reporting `paused`
    /// and filtering source emits until resume.
    pub fn pause(self: &Arc<Self>, paused: bool) {
        *lock(&self.paused) = paused;
        if paused {
            self.rx_paused.send(Emit::value(1.0));
            for sub in lock(&self.rule_subs).drain(..) {
                sub.dispose();
            }
            if let Some(driver) = &self.driver {
                driver.stop();
            }
        } else {
            if let Some(driver) = &self.driver {
                if let Err(error) = driver.start() {
                    tracing::warn!(id = %self.id, %error, "driver restart after pause failed");
                }
            }
            if self.active {
                *lock(&self.rule_subs) = self.write_rules();
            }
            self.rx_paused.send(Emit::value(0.0));
        }
    }

    /// Tear everything down; the observable is not reusable afterwards.
    pub fn close(&self) {
        self.stop();
        self.value_publish.close();
        self.status_publish.close();
        self.rx_paused.close();
        if let Some(subject) = &self.status_subject {
            subject.close();
        }
        if let WriteTarget::Subject(subject) = &self.write_target {
            subject.close();
        }
        if let Some(driver) = &self.driver {
            driver.close();
        }
    }

    /// Record an externally measured value. Measures only.
    ///
    /// # Errors
    ///
    /// [`UnsupportedOperationError`] for other kinds, [`PreconditionError`]
    /// when disabled or paused.
    pub fn measurement(&self, value: f64) -> Result<(), AquaHubError> {
        self.ensure_writable()?;
        match self.spec.kind() {
            ObservableKind::Measure => self.write(Emit::value(value)),
            kind => {
                Err(UnsupportedOperationError::new("measurement", kind.as_str(), self.id.as_str())
                    .into())
            }
        }
    }

    /// Set the current value. Amounts and states only.
    ///
    /// # Errors
    ///
    /// [`UnsupportedOperationError`] for other kinds, [`PreconditionError`]
    /// when disabled or paused.
    pub fn set_value(&self, emit: Emit) -> Result<(), AquaHubError> {
        self.ensure_writable()?;
        match self.spec.kind() {
            ObservableKind::Amount | ObservableKind::State => self.write(emit),
            kind => {
                Err(UnsupportedOperationError::new("set_value", kind.as_str(), self.id.as_str())
                    .into())
            }
        }
    }

    /// Add a delta to the current amount.
    ///
    /// # Errors
    ///
    /// [`UnsupportedOperationError`] for non-amounts, [`PreconditionError`]
    /// when disabled or paused.
    pub fn add(&self, delta: f64) -> Result<(), AquaHubError> {
        self.ensure_writable()?;
        match self.spec.kind() {
            ObservableKind::Amount => {
                let current = self
                    .value_publish
                    .value()
                    .and_then(|emit| emit.value)
                    .unwrap_or(0.0);
                self.write(Emit::value(current + delta))
            }
            kind => Err(UnsupportedOperationError::new("add", kind.as_str(), self.id.as_str()).into()),
        }
    }

    /// Reset an amount to the value of its reset expression (the refill
    /// target, e.g. bottle capacity), or to zero when none is configured.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Observable::add`]; a reset expression that has
    /// not produced a value yet is a [`PreconditionError`].
    pub fn reset(&self) -> Result<(), AquaHubError> {
        self.ensure_writable()?;
        let ObservableSpec::Amount { reset_expr, .. } = &self.spec else {
            return Err(UnsupportedOperationError::new(
                "reset",
                self.spec.kind().as_str(),
                self.id.as_str(),
            )
            .into());
        };
        let Some(expr) = reset_expr else {
            return self.write(Emit::value(0.0));
        };
        let registry = self.registry.upgrade().ok_or_else(|| {
            PreconditionError::new(self.id.as_str(), "registry is gone")
        })?;
        match first_value(&as_observable(&registry, expr, &self.device_id)) {
            Some(target) => self.write(target),
            None => Err(PreconditionError::new(
                self.id.as_str(),
                "reset expression has no value yet",
            )
            .into()),
        }
    }

    /// Fire an event, action, or chore.
    ///
    /// # Errors
    ///
    /// [`UnsupportedOperationError`] for passive kinds, [`PreconditionError`]
    /// when disabled or paused.
    pub fn fire(&self, emit: Emit) -> Result<(), AquaHubError> {
        self.ensure_writable()?;
        match self.spec.kind() {
            ObservableKind::Event | ObservableKind::Action | ObservableKind::Chore => {
                self.write(emit)
            }
            kind => {
                Err(UnsupportedOperationError::new("fire", kind.as_str(), self.id.as_str()).into())
            }
        }
    }

    /// Push a value onto a self-driven observable's own stream. The hook
    /// the workflow executor writes step results through.
    ///
    /// # Errors
    ///
    /// [`UnsupportedOperationError`] for kinds with an external source,
    /// [`PreconditionError`] when disabled or paused.
    pub fn send_value(&self, emit: Emit) -> Result<(), AquaHubError> {
        self.ensure_writable()?;
        if self.spec.is_self_driven() {
            self.write(emit)
        } else {
            Err(UnsupportedOperationError::new(
                "send_value",
                self.spec.kind().as_str(),
                self.id.as_str(),
            )
            .into())
        }
    }

    /// Push a workflow sub-state (`steps_running`, `waiting_input`, back
    /// to `idle`) onto a self-driven observable's status stream.
    ///
    /// # Errors
    ///
    /// [`UnsupportedOperationError`] for kinds whose status comes from a
    /// driver or expression.
    pub fn send_status(&self, status: Status) -> Result<(), AquaHubError> {
        match &self.status_subject {
            Some(subject) => {
                subject.send(status.emit());
                Ok(())
            }
            None => Err(UnsupportedOperationError::new(
                "send_status",
                self.spec.kind().as_str(),
                self.id.as_str(),
            )
            .into()),
        }
    }

    fn ensure_writable(&self) -> Result<(), AquaHubError> {
        if !self.active {
            return Err(PreconditionError::new(self.id.as_str(), "observable is disabled").into());
        }
        if *lock(&self.paused) {
            return Err(PreconditionError::new(self.id.as_str(), "observable is paused").into());
        }
        Ok(())
    }

    fn write(&self, emit: Emit) -> Result<(), AquaHubError> {
        match &self.write_target {
            WriteTarget::Driver { driver, key } => driver.set(key, emit),
            WriteTarget::Subject(subject) => {
                subject.send(emit);
                Ok(())
            }
            WriteTarget::None => {
                Err(PreconditionError::new(self.id.as_str(), "observable has no writable source")
                    .into())
            }
        }
    }

    /// Subscriptions driving writable observables from their configured
    /// formulas.
    fn write_rules(self: &Arc<Self>) -> Vec<Subscription> {
        let Some(registry) = self.registry.upgrade() else {
            return Vec::new();
        };
        let mut subs = Vec::new();
        match &self.spec {
            ObservableSpec::Amount {
                set_expr, add_expr, ..
            } => {
                if let Some(expr) = set_expr {
                    subs.push(self.rule(&registry, expr, |this, emit| this.set_value(emit)));
                }
                if let Some(expr) = add_expr {
                    subs.push(self.rule(&registry, expr, |this, emit| match emit.value {
                        Some(delta) => this.add(delta),
                        None => Ok(()),
                    }));
                }
            }
            ObservableSpec::State { set_expr: Some(expr), .. } => {
                subs.push(self.rule(&registry, expr, |this, emit| this.set_value(emit)));
            }
            _ => {}
        }
        subs
    }

    fn rule(
        self: &Arc<Self>,
        registry: &Arc<Registry>,
        expr: &aquahub_domain::expr::Expr,
        apply: impl Fn(&Observable, Emit) -> Result<(), AquaHubError> + Send + Sync + 'static,
    ) -> Subscription {
        let this = Arc::downgrade(self);
        as_observable(registry, expr, &self.device_id).subscribe(move |emit: Emit| {
            if let Some(this) = this.upgrade() {
                if let Err(error) = apply(&this, emit) {
                    tracing::warn!(id = %this.id, %error, "write rule rejected");
                }
            }
        })
    }
}

/// Shape the raw source stream per the descriptor's emit control.
fn prefilter(spec: &ObservableSpec, source: Rx<Emit>) -> Rx<Emit> {
    match spec {
        ObservableSpec::Measure {
            emit_control,
            precision,
            ..
        } => {
            let Some(control) = MeasureEmitControl::effective(*emit_control, *precision) else {
                return source;
            };
            let mut stream = source;
            if let Some(decimals) = control.decimals {
                let factor = 10f64.powi(i32::try_from(decimals).unwrap_or(0));
                stream = stream.map(move |mut emit: Emit| {
                    if let Some(value) = emit.value {
                        emit.value = Some((value * factor).round() / factor);
                    }
                    emit
                });
            }
            if let Some(epsilon) = control.suppress_same_limit {
                stream = stream
                    .distinct_until_changed_by(move |a, b| expression::emits_within(a, b, epsilon));
            }
            if let Some(seconds) = control.at_most_every_second {
                stream = stream
                    .buffer_with_time_or_count(seconds, 0, false)
                    .map(|mut batch: Vec<Emit>| batch.pop().unwrap_or_default());
            }
            stream
        }
        ObservableSpec::Event { emit_control, .. } => {
            match emit_control.and_then(|control| control.debounce_value) {
                Some(seconds) => source.debounce(seconds),
                None => source,
            }
        }
        _ => source,
    }
}

/// Quiet period absorbing rapid threshold flapping before a requirement
/// verdict publishes.
const REQUIRE_DEBOUNCE_SECONDS: f64 = 0.1;

/// The requirement verdict stream: `running`, `warning`, or `alarm`, with
/// a note naming the violated requirement, debounced and deduplicated so a
/// value hovering around a threshold does not flap the status. Observables
/// without requirements are always `running`.
fn require_stream(
    registry: &Arc<Registry>,
    spec: &ObservableSpec,
    device_id: &str,
    values: &Publish<ObservableEmit>,
) -> Rx<Emit> {
    let mut streams: Vec<Rx<Emit>> = Vec::new();
    match spec {
        ObservableSpec::Measure {
            require: Some(require),
            ..
        }
        | ObservableSpec::Amount {
            require: Some(require),
            ..
        } => {
            let thresholds = require.clone();
            streams.push(values.observe().map(move |emit: ObservableEmit| {
                threshold_status(&thresholds, &emit.raw())
            }));
            push_condition_streams(
                registry,
                device_id,
                &require.warning_conditions,
                &require.alarm_conditions,
                &mut streams,
            );
        }
        ObservableSpec::State {
            require: Some(require),
            ..
        } => {
            let membership = require.clone();
            streams.push(values.observe().map(move |emit: ObservableEmit| {
                membership_status(&membership, &emit.raw())
            }));
            push_condition_streams(
                registry,
                device_id,
                &require.warning_conditions,
                &require.alarm_conditions,
                &mut streams,
            );
        }
        _ => {}
    }
    match streams.len() {
        0 => Rx::constant(Status::Running.emit()),
        1 => streams
            .swap_remove(0)
            .debounce(REQUIRE_DEBOUNCE_SECONDS)
            .distinct_until_changed(),
        _ => Rx::combine_latest_all(streams)
            .map(|emits: Vec<Emit>| max_severity(&emits))
            .debounce(REQUIRE_DEBOUNCE_SECONDS)
            .distinct_until_changed(),
    }
}

/// First synchronously delivered value of a stream, if any. Expression and
/// value streams replay their latest value on subscribe, so a ready source
/// yields here before the subscription is released.
fn first_value(rx: &Rx<Emit>) -> Option<Emit> {
    let first: Arc<Mutex<Option<Emit>>> = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&first);
    rx.subscribe(move |emit: Emit| {
        let mut slot = lock(&sink);
        if slot.is_none() {
            *slot = Some(emit);
        }
    })
    .dispose();
    lock(&first).take()
}

fn push_condition_streams(
    registry: &Arc<Registry>,
    device_id: &str,
    warnings: &[Condition],
    alarms: &[Condition],
    streams: &mut Vec<Rx<Emit>>,
) {
    for condition in warnings {
        streams.push(condition_stream(registry, condition, device_id, Status::Warning));
    }
    for condition in alarms {
        streams.push(condition_stream(registry, condition, device_id, Status::Alarm));
    }
}

fn condition_stream(
    registry: &Arc<Registry>,
    condition: &Condition,
    device_id: &str,
    level: Status,
) -> Rx<Emit> {
    let note = condition
        .description
        .clone()
        .unwrap_or_else(|| format!("{level} condition met"));
    as_observable(registry, &condition.condition, device_id).map(move |emit: Emit| {
        if emit.truthy() {
            level.emit().with_note(note.clone())
        } else {
            Status::Running.emit()
        }
    })
}

fn threshold_status(require: &ValueRequire, emit: &Emit) -> Emit {
    let Some(value) = emit.value else {
        return Status::Running.emit();
    };
    if let Some(limit) = require.alarm_above {
        if value > limit {
            return Status::Alarm.emit().with_note(format!("value {value} above {limit}"));
        }
    }
    if let Some(limit) = require.alarm_below {
        if value < limit {
            return Status::Alarm.emit().with_note(format!("value {value} below {limit}"));
        }
    }
    if let Some(limit) = require.warning_above {
        if value > limit {
            return Status::Warning.emit().with_note(format!("value {value} above {limit}"));
        }
    }
    if let Some(limit) = require.warning_below {
        if value < limit {
            return Status::Warning.emit().with_note(format!("value {value} below {limit}"));
        }
    }
    Status::Running.emit()
}

fn membership_status(require: &EnumRequire, emit: &Emit) -> Emit {
    let Some(value) = emit.enum_value.as_deref() else {
        return Status::Running.emit();
    };
    if require.alarm_if_in.iter().any(|v| v == value) {
        return Status::Alarm.emit().with_note(format!("state {value} raises an alarm"));
    }
    if !require.alarm_if_not_in.is_empty() && !require.alarm_if_not_in.iter().any(|v| v == value) {
        return Status::Alarm.emit().with_note(format!("state {value} outside the allowed set"));
    }
    Status::Running.emit()
}

fn severity(emit: &Emit) -> u8 {
    match emit.enum_value.as_deref() {
        Some("alarm") => 3,
        Some("warning") => 2,
        _ => 1,
    }
}

/// The most severe of a set of requirement verdicts. Ties keep the
/// earliest verdict, so the published note names the first requirement
/// that tripped.
fn max_severity(emits: &[Emit]) -> Emit {
    emits
        .iter()
        .reduce(|current, candidate| {
            if severity(candidate) > severity(current) {
                candidate
            } else {
                current
            }
        })
        .cloned()
        .unwrap_or_else(|| Status::Running.emit())
}

/// Fold the four status inputs into the entity status.
///
/// Device state wins over everything; then the pause flag; then the
/// source/driver state; the requirement verdict applies while the source
/// is actively producing, and an alarm or warning verdict also outranks
/// the workflow sub-states (`idle`, `steps_running`, `waiting_input`).
#[must_use]
pub fn derive_status(device_status: &Emit, paused: bool, source: &Emit, require: &Emit) -> Emit {
    match device_status.enum_value.as_deref() {
        None | Some("running" | "schedule_running" | "program_running") => {}
        Some(_) => return device_status.clone(),
    }
    if paused {
        return Status::Paused.emit();
    }
    match source.enum_value.as_deref() {
        Some("running" | "schedule_running" | "program_running") => {}
        Some(state @ ("idle" | "steps_running" | "waiting_input")) => {
            if matches!(require.enum_value.as_deref(), Some("warning" | "alarm")) {
                return require.clone();
            }
            let mut status = Emit::enum_value(state);
            status.note = source.note.clone();
            return status;
        }
        Some("in_error") => {
            let mut status = Status::Error.emit();
            status.note = source.note.clone();
            return status;
        }
        Some("closing") => return Status::Error.emit().with_note("driver closing"),
        Some("no_init" | "not_started" | "starting") | None => {
            return Status::Initializing.emit();
        }
        Some(other) => {
            let mut status = Emit::enum_value(other);
            status.note = source.note.clone();
            return status;
        }
    }
    if require.enum_value.is_some() {
        require.clone()
    } else {
        Status::Running.emit()
    }
}
