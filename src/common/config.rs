//! Configuration for the coordinator state machine
//!
//! Every replica of the coordinator must run with the same configuration,
//! so the loaded value is captured inside the state machine and travels
//! with its snapshots.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for overrides (e.g. `SHARDCOORD_DESIRED_SPARES=2`).
pub const ENV_PREFIX: &str = "SHARDCOORD";

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Number of available servers held out of the permutation as spares
    #[serde(default)]
    pub desired_spares: usize,

    /// Interval of the self-re-arming checkpoint alarm
    #[serde(default = "default_alarm_interval")]
    pub alarm_interval_secs: u64,

    /// Where the local host persists snapshots on shutdown
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

fn default_alarm_interval() -> u64 {
    10
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            desired_spares: 0,
            alarm_interval_secs: default_alarm_interval(),
            snapshot_path: None,
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from an optional TOML file, then apply
    /// `SHARDCOORD_*` environment overrides.
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path.to_path_buf()).required(true));
        }

        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        let config: CoordinatorConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.alarm_interval_secs == 0 {
            return Err(crate::Error::InvalidConfig(
                "alarm_interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn alarm_interval(&self) -> Duration {
        Duration::from_secs(self.alarm_interval_secs)
    }
}
