//! Layered configuration: defaults, then a TOML file, then `FUELWATCH_*`
//! environment variables.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::detector::DetectorConfig;
use crate::error::{Error, Result};
use crate::preprocess::PreprocessConfig;

/// Files probed when no explicit path is given (extension resolved by `config`)
const DEFAULT_CONFIG_FILES: [&str; 2] = ["fuelwatch", "config/fuelwatch"];

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FuelwatchConfig {
    pub detector: DetectorConfig,
    pub preprocessing: PreprocessConfig,
    pub model: ModelConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Bundle location used by `load_or_train`
    pub path: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("models/fuel_anomaly_model.json"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogRotation {
    #[default]
    Daily,
    Hourly,
    Never,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
    /// Also write rolling log files here
    pub dir: Option<PathBuf>,
    pub rotation: LogRotation,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Plain,
            dir: None,
            rotation: LogRotation::Daily,
        }
    }
}

impl FuelwatchConfig {
    pub fn validate(&self) -> Result<()> {
        self.detector.validate()?;
        self.preprocessing.validate()?;
        Ok(())
    }

    /// Commented sample configuration file
    pub fn sample_toml() -> Result<String> {
        let body = toml::to_string_pretty(&Self::default())
            .map_err(|e| Error::Config(format!("failed to render sample config: {}", e)))?;
        Ok(format!(
            r#"# fuelwatch configuration
#
# Save as fuelwatch.toml (or config/fuelwatch.toml).
# Every key can be overridden from the environment, e.g.
#   FUELWATCH_DETECTOR__CONTAMINATION=0.1
#   FUELWATCH_LOGGING__LEVEL=debug
#
# detector.contamination       expected anomaly share, in (0, 0.5]
# detector.max_samples         rows per tree; omit for min(256, n)
# preprocessing.missing_feature_policy
#                              "zero_fill" or "reject"
# logging.format               "plain" or "json"
# logging.rotation             "daily", "hourly" or "never"

{}"#,
            body
        ))
    }
}

/// Configuration loader with builder pattern
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config_file: Option<PathBuf>,
    load_env: bool,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `path` instead of probing the default locations
    pub fn with_file(mut self, path: Option<impl AsRef<Path>>) -> Self {
        self.config_file = path.map(|p| p.as_ref().to_path_buf());
        self
    }

    /// Apply `FUELWATCH_*` overrides
    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    pub fn build(self) -> Result<FuelwatchConfig> {
        let mut builder =
            Config::builder().add_source(Config::try_from(&FuelwatchConfig::default())?);

        match &self.config_file {
            Some(path) => {
                builder = builder.add_source(File::from(path.as_path()).required(true));
            }
            None => {
                for name in DEFAULT_CONFIG_FILES {
                    builder = builder.add_source(File::with_name(name).required(false));
                }
            }
        }

        if self.load_env {
            builder = builder.add_source(
                Environment::with_prefix("FUELWATCH")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config: FuelwatchConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}
