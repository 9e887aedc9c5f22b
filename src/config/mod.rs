//! Settings loading and joint coordination configuration.
//!
//! Settings come from an optional TOML file and `TESTROLLUP__*` environment
//! variables, in that order of precedence (environment wins).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::paths::DEFAULT_MAX_DEPTH;
use crate::status::{StatusError, StatusPriority, TestingStatus};

/// Environment variable prefix for settings overrides.
pub const ENV_PREFIX: &str = "TESTROLLUP";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid status priority: {0}")]
    Priority(#[from] StatusError),

    #[error("invalid joint setting {key}: {reason}")]
    Joint { key: &'static str, reason: &'static str },
}

/// Configuration for joint request coordination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JointConfig {
    /// Timeout applied when a member starts without one.
    /// Default: 3600 seconds (1 hour)
    pub default_timeout_secs: u64,

    /// Interval between timeout sweeps, in milliseconds.
    /// Default: 30000 (30 seconds)
    pub sweep_interval_ms: u64,

    /// Attempts at a compare-and-swap before giving up on an update.
    /// Default: 16
    pub cas_max_retries: u32,
}

impl Default for JointConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 3600,
            sweep_interval_ms: 30_000,
            cas_max_retries: 16,
        }
    }
}

impl JointConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    /// Never zero, so the sweeper cannot spin.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    /// Sets the timeout used when none is given for a joint request.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_secs = timeout.as_secs();
        self
    }

    /// Sets the interval between timeout sweeps.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_ms = u64::try_from(interval.as_millis())
            .unwrap_or(u64::MAX)
            .max(1);
        self
    }

    /// Sets the number of compare-and-swap attempts per update.
    pub fn with_cas_max_retries(mut self, retries: u32) -> Self {
        self.cas_max_retries = retries.max(1);
        self
    }

    /// Reject values the builder methods would never produce.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::Joint {
                key: "sweep_interval_ms",
                reason: "must be at least 1",
            });
        }
        if self.cas_max_retries == 0 {
            return Err(ConfigError::Joint {
                key: "cas_max_retries",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }
}

/// Path resolution limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    pub max_depth: usize,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Top-level settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Testing statuses from least to most severe.
    pub status_priority: Vec<TestingStatus>,
    pub joint: JointConfig,
    pub paths: PathConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            status_priority: TestingStatus::ALL.to_vec(),
            joint: JointConfig::default(),
            paths: PathConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings from an optional file plus the environment.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings: Settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("status_priority"),
            )
            .build()?
            .try_deserialize()?;
        settings.priority()?;
        settings.joint.validate()?;
        Ok(settings)
    }

    /// The validated severity order.
    pub fn priority(&self) -> Result<StatusPriority, StatusError> {
        StatusPriority::new(self.status_priority.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_joint_config() {
        let config = JointConfig::default();
        assert_eq!(config.default_timeout(), Duration::from_secs(3600));
        assert_eq!(config.sweep_interval(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
        assert_eq!(config.cas_max_retries, 16);
    }

    #[test]
    fn test_builder_pattern() {
        let config = JointConfig::new()
            .with_default_timeout(Duration::from_secs(120))
            .with_sweep_interval(Duration::from_secs(5))
            .with_cas_max_retries(0);
        assert_eq!(config.default_timeout_secs, 120);
        assert_eq!(config.sweep_interval_ms, 5_000);
        assert_eq!(config.cas_max_retries, 1);
    }

    #[test]
    fn test_sub_second_sweep_interval() {
        let config = JointConfig::new().with_sweep_interval(Duration::from_millis(20));
        assert_eq!(config.sweep_interval(), Duration::from_millis(20));

        let config = JointConfig::new().with_sweep_interval(Duration::ZERO);
        assert_eq!(config.sweep_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_load_rejects_zero_joint_settings() {
        let temp_dir = TempDir::new().expect("temp dir");
        for (body, key) in [
            ("[joint]\ncas_max_retries = 0\n", "cas_max_retries"),
            ("[joint]\nsweep_interval_ms = 0\n", "sweep_interval_ms"),
        ] {
            let path = temp_dir.path().join("testrollup.toml");
            fs::write(&path, body).expect("write config");
            match Settings::load(Some(&path)) {
                Err(ConfigError::Joint { key: rejected, .. }) => assert_eq!(rejected, key),
                other => panic!("expected {} to be rejected, got {:?}", key, other),
            }
        }
    }

    #[test]
    fn test_default_settings_priority_is_valid() {
        let settings = Settings::default();
        assert_eq!(settings.priority().unwrap(), StatusPriority::default());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().expect("temp dir");
        let path = temp_dir.path().join("testrollup.toml");
        fs::write(
            &path,
            r#"
status_priority = ["UNKNOWN", "SKIPPED", "PASSED", "WARNING", "BLOCKED", "STOPPED", "FAILED"]

[joint]
default_timeout_secs = 900
cas_max_retries = 4

[paths]
max_depth = 32
"#,
        )
        .expect("write config");

        let settings = Settings::load(Some(&path)).expect("load");
        assert_eq!(settings.joint.default_timeout_secs, 900);
        assert_eq!(settings.joint.cas_max_retries, 4);
        assert_eq!(settings.joint.sweep_interval_ms, 30_000);
        assert_eq!(settings.paths.max_depth, 32);
        assert_eq!(
            settings.priority().unwrap().more_severe(TestingStatus::Failed, TestingStatus::Blocked),
            TestingStatus::Failed
        );
    }

    #[test]
    fn test_load_rejects_incomplete_priority() {
        let temp_dir = TempDir::new().expect("temp dir");
        let path = temp_dir.path().join("testrollup.toml");
        fs::write(&path, "status_priority = [\"PASSED\", \"FAILED\"]\n").expect("write config");

        let err = Settings::load(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Priority(_)));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let temp_dir = TempDir::new().expect("temp dir");
        let path = temp_dir.path().join("absent.toml");
        assert!(matches!(
            Settings::load(Some(&path)),
            Err(ConfigError::Load(_))
        ));
    }
}
