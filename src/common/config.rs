//! Static configuration (TOML) and the live configuration snapshot that the
//! overlay consults on every gesture.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};
use tracing::{debug, warn};

use crate::common::prefs::{PreferenceStore, PreferenceStoreExt};

/// Preference namespace reserved for the overlay's own settings.
pub const INTERNAL_NAMESPACE: &str = "overlay_internal_config";
pub const LONG_PRESS_DELAY_KEY: &str = "long_press_delay";

pub const DEFAULT_LONG_PRESS_DELAY: Duration = Duration::from_millis(2000);
pub const DEFAULT_MAX_RECORDED_OUTCOMES: usize = 32;
pub const DEFAULT_MAX_LIFECYCLE_RECORDS: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub settings: Settings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub gesture: GestureSettings,
    pub overlay: OverlaySettings,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GestureSettings {
    /// Hold time before the overlay opens, in milliseconds.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub long_press_delay: Duration,
}

impl Default for GestureSettings {
    fn default() -> Self { Self { long_press_delay: DEFAULT_LONG_PRESS_DELAY } }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OverlaySettings {
    /// Register the built-in providers and actions.
    pub register_defaults: bool,
    /// Plugin outcomes kept per window for snapshots.
    pub max_recorded_outcomes: usize,
    /// Lifecycle callbacks kept for the lifecycle provider.
    pub max_lifecycle_records: usize,
    /// Install a panic hook that feeds the crash log.
    pub capture_panics: bool,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            register_defaults: true,
            max_recorded_outcomes: DEFAULT_MAX_RECORDED_OUTCOMES,
            max_lifecycle_records: DEFAULT_MAX_LIFECYCLE_RECORDS,
            capture_panics: true,
        }
    }
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("overlay-hook").join("config.toml"))
    }

    pub fn read(path: &Path) -> anyhow::Result<Config> {
        let buf = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::parse(&buf).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn parse(buf: &str) -> anyhow::Result<Config> {
        let config: Config = toml::from_str(buf)?;
        config.validate()?;
        Ok(config)
    }

    /// An explicit path must exist. Without one, the default path is used if
    /// present and built-in defaults otherwise.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Config> {
        if let Some(path) = path {
            return Self::read(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::read(&path),
            _ => {
                debug!("no config file found; using defaults");
                Ok(Config::default())
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.settings.gesture.long_press_delay.is_zero() {
            anyhow::bail!("settings.gesture.long_press_delay must be greater than zero");
        }
        Ok(())
    }
}

/// The values one gesture or one overlay instance runs with.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Configuration {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub long_press_delay: Duration,
}

impl Default for Configuration {
    fn default() -> Self { Self { long_press_delay: DEFAULT_LONG_PRESS_DELAY } }
}

/// Produces a fresh [`Configuration`] each time it is asked.
pub trait ConfigSource: Send + Sync {
    fn snapshot(&self) -> Configuration;
}

impl ConfigSource for Configuration {
    fn snapshot(&self) -> Configuration { *self }
}

/// Reads the delay from the preference store so it can change at runtime.
/// The configured default seeds the store on first access.
#[derive(Clone)]
pub struct StoredConfig {
    store: Arc<dyn PreferenceStore>,
    defaults: GestureSettings,
}

impl StoredConfig {
    pub fn new(store: Arc<dyn PreferenceStore>, defaults: GestureSettings) -> Self {
        Self { store, defaults }
    }
}

impl ConfigSource for StoredConfig {
    fn snapshot(&self) -> Configuration {
        let default_ms = i64::try_from(self.defaults.long_press_delay.as_millis()).unwrap_or(i64::MAX);
        let stored = self.store.get(INTERNAL_NAMESPACE, LONG_PRESS_DELAY_KEY, default_ms);
        let long_press_delay = match u64::try_from(stored) {
            Ok(ms) if ms > 0 => Duration::from_millis(ms),
            _ => {
                warn!(stored, "ignoring non-positive long press delay");
                self.defaults.long_press_delay
            }
        };
        Configuration { long_press_delay }
    }
}
