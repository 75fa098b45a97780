//! Daemon configuration: `aquahub.toml` with environment overrides.

use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: Logging,
    pub devices: Devices,
    pub simulation: Simulation,
    pub emit_log: EmitLog,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// Default tracing filter; `RUST_LOG` and `AQUAHUB_LOG` win over it.
    pub filter: String,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Devices {
    /// JSON catalog of quantity types and device descriptors.
    pub file: PathBuf,
}

impl Default for Devices {
    fn default() -> Self {
        Self {
            file: PathBuf::from("devices.json"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Simulation {
    pub enabled: bool,
    /// Simulated epoch second the run starts at; wall clock when unset.
    pub start_time: Option<f64>,
    /// Acceleration factor.
    pub speed: f64,
}

impl Default for Simulation {
    fn default() -> Self {
        Self {
            enabled: false,
            start_time: None,
            speed: 1.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmitLog {
    pub buffer_seconds: f64,
    pub buffer_count: usize,
}

impl Default for EmitLog {
    fn default() -> Self {
        Self {
            buffer_seconds: 5.0,
            buffer_count: 100,
        }
    }
}

impl Config {
    /// Load from `AQUAHUB_CONFIG` (default `aquahub.toml`), falling back
    /// to defaults when the file does not exist, then apply environment
    /// overrides and validate.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var_os("AQUAHUB_CONFIG")
            .map_or_else(|| PathBuf::from("aquahub.toml"), PathBuf::from);
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env(&mut self) {
        if let Ok(filter) = std::env::var("AQUAHUB_LOG") {
            self.logging.filter = filter;
        }
        if let Ok(file) = std::env::var("AQUAHUB_DEVICES") {
            self.devices.file = PathBuf::from(file);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.simulation.speed <= 0.0 {
            return Err(ConfigError::Invalid(
                "simulation.speed must be positive".to_string(),
            ));
        }
        if self.emit_log.buffer_seconds <= 0.0 {
            return Err(ConfigError::Invalid(
                "emit_log.buffer_seconds must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_fall_back_to_defaults() {
        let config = Config::default();
        assert_eq!(config.logging.filter, "info");
        assert_eq!(config.devices.file, PathBuf::from("devices.json"));
        assert!(!config.simulation.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn should_parse_a_partial_file() {
        let config: Config = toml::from_str(
            r#"
            [logging]
            filter = "debug"

            [simulation]
            enabled = true
            start_time = 1700000000.0
            speed = 60.0
            "#,
        )
        .unwrap();
        assert_eq!(config.logging.filter, "debug");
        assert!(config.simulation.enabled);
        assert_eq!(config.simulation.speed, 60.0);
        // Untouched sections keep their defaults.
        assert_eq!(config.emit_log.buffer_count, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn should_reject_non_positive_speed() {
        let config: Config = toml::from_str(
            r"
            [simulation]
            enabled = true
            speed = 0.0
            ",
        )
        .unwrap();
        assert!(config.validate().is_err());
    }
}
