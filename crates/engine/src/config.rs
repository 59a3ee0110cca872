//! Store configuration
//!
//! [`StoreConfig`] is the static configuration a store is built with,
//! loadable from TOML. [`Settings`] is the live registry of named values
//! that can be changed while the store runs.
//!
//! ```toml
//! max_time_before_deadlock_ms = 5000
//! default_isolation = "Serializable"
//! lock_poll_interval_ms = 10
//! prune_versions_on_commit = false
//! ```

use hyperstore_core::error::{Error, Result};
use hyperstore_core::{IsolationLevel, Value};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Static store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Maximum lock wait before an acquire fails as a deadlock
    pub max_time_before_deadlock_ms: u64,
    /// Isolation of sessions begun without an explicit level
    pub default_isolation: IsolationLevel,
    /// Granularity at which lock waits observe cancellation
    pub lock_poll_interval_ms: u64,
    /// Drop versions no live session can see after each commit
    pub prune_versions_on_commit: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_time_before_deadlock_ms: 20_000,
            default_isolation: IsolationLevel::ReadCommitted,
            lock_poll_interval_ms: 25,
            prune_versions_on_commit: true,
        }
    }
}

impl StoreConfig {
    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: StoreConfig =
            toml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Reject values the store cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.lock_poll_interval_ms == 0 {
            return Err(Error::Config(
                "lock_poll_interval_ms must be greater than zero".into(),
            ));
        }
        for (name, ms) in [
            ("max_time_before_deadlock_ms", self.max_time_before_deadlock_ms),
            ("lock_poll_interval_ms", self.lock_poll_interval_ms),
        ] {
            if i64::try_from(ms).is_err() {
                return Err(Error::Config(format!("{} is out of range: {}", name, ms)));
            }
        }
        Ok(())
    }

    /// Deadlock timeout as a duration
    pub fn deadlock_timeout(&self) -> Duration {
        Duration::from_millis(self.max_time_before_deadlock_ms)
    }

    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms)
    }
}

/// Named runtime setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Setting {
    /// Lock wait limit in milliseconds
    MaxTimeBeforeDeadlockInMs,
    /// Lock wait poll interval in milliseconds
    LockPollIntervalInMs,
    /// Prune old versions after each commit
    PruneVersionsOnCommit,
}

impl Setting {
    /// Canonical setting name
    pub fn name(self) -> &'static str {
        match self {
            Setting::MaxTimeBeforeDeadlockInMs => "MaxTimeBeforeDeadlockInMs",
            Setting::LockPollIntervalInMs => "LockPollIntervalInMs",
            Setting::PruneVersionsOnCommit => "PruneVersionsOnCommit",
        }
    }
}

impl FromStr for Setting {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "MaxTimeBeforeDeadlockInMs" => Ok(Setting::MaxTimeBeforeDeadlockInMs),
            "LockPollIntervalInMs" => Ok(Setting::LockPollIntervalInMs),
            "PruneVersionsOnCommit" => Ok(Setting::PruneVersionsOnCommit),
            other => Err(Error::Config(format!("unknown setting {}", other))),
        }
    }
}

/// Live settings registry
#[derive(Debug)]
pub struct Settings {
    values: RwLock<FxHashMap<Setting, Value>>,
}

impl Settings {
    /// Seed the registry from a static configuration
    pub fn from_config(config: &StoreConfig) -> Self {
        let mut values = FxHashMap::default();
        values.insert(
            Setting::MaxTimeBeforeDeadlockInMs,
            Value::Int(millis(config.max_time_before_deadlock_ms)),
        );
        values.insert(
            Setting::LockPollIntervalInMs,
            Value::Int(millis(config.lock_poll_interval_ms)),
        );
        values.insert(
            Setting::PruneVersionsOnCommit,
            Value::Bool(config.prune_versions_on_commit),
        );
        Self {
            values: RwLock::new(values),
        }
    }

    /// Change a setting
    ///
    /// Durations must be non-negative integers (the poll interval strictly
    /// positive), flags must be booleans.
    pub fn set(&self, setting: Setting, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let valid = match setting {
            Setting::MaxTimeBeforeDeadlockInMs => value.as_int().is_some_and(|v| v >= 0),
            Setting::LockPollIntervalInMs => value.as_int().is_some_and(|v| v > 0),
            Setting::PruneVersionsOnCommit => value.as_bool().is_some(),
        };
        if !valid {
            return Err(Error::Config(format!(
                "invalid value {:?} for {}",
                value,
                setting.name()
            )));
        }
        self.values.write().insert(setting, value);
        Ok(())
    }

    /// Current value of a setting
    pub fn get(&self, setting: Setting) -> Option<Value> {
        self.values.read().get(&setting).cloned()
    }

    /// Setting as milliseconds
    pub fn duration(&self, setting: Setting) -> Option<Duration> {
        self.get(setting)
            .and_then(|v| v.as_int())
            .map(|ms| Duration::from_millis(ms.max(0) as u64))
    }

    /// Setting as a flag
    pub fn flag(&self, setting: Setting) -> bool {
        self.get(setting).and_then(|v| v.as_bool()).unwrap_or(false)
    }
}

/// Milliseconds as a setting value, saturating at `i64::MAX`
fn millis(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_config(&StoreConfig::default())
    }
}
