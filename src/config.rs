use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ProfilerError, Result};
use crate::timing::DocumentSettings;

/// Default retention window: 24 hours.
pub const DEFAULT_RETENTION_SECS: u64 = 24 * 3600;
/// Default background sweep period: one hour.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;

/// Profiler settings, loadable from TOML.
///
/// ```toml
/// retention_secs = 3600
/// sweep_interval_secs = 300
/// trivial_threshold_ms = 0.5
/// machine_name = "web-01"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProfilerConfig {
    /// How long a published trace stays retrievable.
    pub retention_secs: u64,
    /// Period of the background sweep; zero disables the worker.
    pub sweep_interval_secs: u64,
    /// Nodes with less self time than this are reported as trivial.
    pub trivial_threshold_ms: f64,
    /// Capture a backtrace for every recorded SQL event.
    pub capture_sql_stack: bool,
    /// Reported machine name; defaults to the request host.
    pub machine_name: Option<String>,
    /// Reported user.
    pub user: String,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            retention_secs: DEFAULT_RETENTION_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            trivial_threshold_ms: 2.0,
            capture_sql_stack: false,
            machine_name: None,
            user: "unknown user".to_owned(),
        }
    }
}

impl ProfilerConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|err| ProfilerError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Rejects a zero retention window and a negative or non-finite threshold.
    pub fn validate(&self) -> Result<()> {
        if self.retention_secs == 0 {
            return Err(ProfilerError::Config(
                "retention_secs must be greater than zero".into(),
            ));
        }
        if !self.trivial_threshold_ms.is_finite() || self.trivial_threshold_ms < 0.0 {
            return Err(ProfilerError::Config(format!(
                "trivial_threshold_ms must be a non-negative number, got {}",
                self.trivial_threshold_ms
            )));
        }
        Ok(())
    }

    /// Retention window as a `Duration`.
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    /// `None` when the background sweep is disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }

    /// Settings used when building viewer documents.
    pub fn document_settings(&self) -> DocumentSettings {
        DocumentSettings {
            trivial_threshold_ms: self.trivial_threshold_ms,
            user: self.user.clone(),
        }
    }
}
