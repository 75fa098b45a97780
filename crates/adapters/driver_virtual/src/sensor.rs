//! The simulated sensor: a periodic reading drifting along a sine wave,
//! for demo catalogs and load tests without hardware.

use std::f64::consts::TAU;
use std::sync::{Arc, Mutex};

use aquahub_domain::emit::Emit;
use aquahub_domain::error::{AquaHubError, ConfigurationError};
use aquahub_domain::model::DriverRef;
use aquahub_domain::status::DriverStatus;
use aquahub_domain::time;
use aquahub_engine::driver::{Driver, DriverCore, PRIMARY_CHANNEL};
use aquahub_rx::{Rx, lock};
use tokio::task::JoinHandle;

/// Synthetic sensor on the primary channel.
///
/// Parameters: `initial` (baseline, default 25), `amplitude` (default 1),
/// `period` (seconds between readings, default 5), `wave` (seconds per
/// full sine cycle, default 600). The reading interval follows the
/// simulated clock's scaling.
pub struct SimulatedSensorDriver {
    core: Arc<DriverCore>,
    initial: f64,
    amplitude: f64,
    period: f64,
    wave: f64,
    task: Mutex<Option<JoinHandle<()>>>,
}

fn param_f64(reference: &DriverRef, key: &str, default: f64) -> Result<f64, AquaHubError> {
    match reference.param(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| {
            ConfigurationError(format!(
                "driver {} parameter {key} is not a number: {raw}",
                reference.id
            ))
            .into()
        }),
    }
}

impl SimulatedSensorDriver {
    pub const ID: &'static str = "sensor";

    /// # Errors
    ///
    /// [`ConfigurationError`] for non-numeric parameters.
    pub fn new(reference: &DriverRef) -> Result<Self, AquaHubError> {
        Ok(Self {
            core: Arc::new(DriverCore::new(reference, &[PRIMARY_CHANNEL.to_string()])),
            initial: param_f64(reference, "initial", 25.0)?,
            amplitude: param_f64(reference, "amplitude", 1.0)?,
            period: param_f64(reference, "period", 5.0)?,
            wave: param_f64(reference, "wave", 600.0)?,
            task: Mutex::new(None),
        })
    }
}

impl Driver for SimulatedSensorDriver {
    fn id(&self) -> &str {
        self.core.id()
    }

    fn start(&self) -> Result<(), AquaHubError> {
        let mut task = lock(&self.task);
        if task.is_some() {
            return Ok(());
        }
        self.core.set_status(DriverStatus::Running);
        let core = Arc::clone(&self.core);
        let (initial, amplitude, period, wave) =
            (self.initial, self.amplitude, self.period, self.wave);
        let started = time::now();
        *task = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(time::scaled_duration(period)).await;
                let elapsed = time::now() - started;
                let value = initial + amplitude * (elapsed * TAU / wave).sin();
                if core.emit(PRIMARY_CHANNEL, Emit::value(value)).is_err() {
                    return;
                }
            }
        }));
        tracing::debug!(id = %self.core.id(), period, "simulated sensor started");
        Ok(())
    }

    fn stop(&self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
        self.core.set_status(DriverStatus::NotStarted);
    }

    fn close(&self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
        self.core.set_status(DriverStatus::Closing);
        self.core.close();
    }

    fn channel(&self, key: &str) -> Option<Rx<Emit>> {
        self.core.channel(key)
    }

    fn rx_status(&self) -> Rx<Emit> {
        self.core.rx_status()
    }
}
