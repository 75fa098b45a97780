//! # aquahubd
//!
//! The aquahub daemon: load the configuration and the device catalog,
//! bring the registry up on the virtual drivers, log the emit stream in
//! batches, and shut down cleanly on ctrl-c.

use std::path::Path;
use std::sync::Arc;

use aquahub_domain::emit::ObservableEmit;
use aquahub_domain::model::DeviceSpec;
use aquahub_domain::time;
use aquahub_domain::units::{QuantityType, UnitTable};
use aquahub_driver_virtual::VirtualDriverFactory;
use aquahub_engine::registry::Registry;
use serde::Deserialize;

mod config;

use config::Config;

/// The on-disk catalog: quantity types plus device descriptors.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Catalog {
    quantities: Vec<QuantityType>,
    devices: Vec<DeviceSpec>,
}

fn load_catalog(path: &Path) -> anyhow::Result<Catalog> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "device catalog not found, starting empty");
        return Ok(Catalog::default());
    }
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.logging.filter))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if config.simulation.enabled {
        let start_time = config.simulation.start_time.unwrap_or_else(time::now);
        time::simulate(start_time, config.simulation.speed);
        tracing::info!(start_time, speed = config.simulation.speed, "simulated clock active");
    }

    let catalog = load_catalog(&config.devices.file)?;
    let registry = Registry::new(
        Arc::new(VirtualDriverFactory),
        Arc::new(UnitTable::new(catalog.quantities)),
    );
    for spec in catalog.devices {
        let name = spec.name.clone();
        if let Err(error) = registry.add_device(spec) {
            tracing::error!(name, %error, "failed to register device");
        }
    }

    // Emissions go to the log in transport form, batched so a chatty
    // catalog does not produce one log line per reading.
    let _emit_log = registry
        .rx_all()
        .buffer_with_time_or_count(
            config.emit_log.buffer_seconds,
            config.emit_log.buffer_count,
            false,
        )
        .subscribe(|batch: Vec<ObservableEmit>| {
            for emit in batch {
                tracing::info!(target: "aquahubd::emits", "{}", emit.to_transport());
            }
        });

    tracing::info!(devices = registry.devices().len(), "aquahubd running");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    registry.close();
    Ok(())
}
