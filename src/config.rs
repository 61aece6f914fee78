//! Configuration for the GlassToKey engine.

use crate::core::bindings::{BindingIndex, KeyLayout, KeyPolicy};
use crate::error::{ConfigError, LayoutError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Intent engine thresholds
    pub engine: EngineConfig,

    /// Key layout file; the built-in layout when unset
    pub layout_path: Option<PathBuf>,

    /// Frames buffered per device before the newest is dropped
    pub queue_capacity: usize,

    /// How long a device read may block before checking for cancellation
    #[serde(with = "duration_ms")]
    pub read_timeout: Duration,

    /// Path for the diagnostics summary and other state
    pub data_path: PathBuf,

    /// Where `run --record` writes captures by default
    pub capture_path: PathBuf,

    /// Whether dispatch is currently paused
    pub paused: bool,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("glasstokey");

        Self {
            engine: EngineConfig::default(),
            layout_path: None,
            queue_capacity: 256,
            read_timeout: Duration::from_millis(50),
            capture_path: data_dir.join("captures"),
            data_path: data_dir,
            paused: false,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = serde_json::from_str(&content).map_err(ConfigError::Parse)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(&config_path, content)?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("glasstokey")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)?;
        std::fs::create_dir_all(&self.capture_path)?;
        Ok(())
    }

    /// Where the diagnostics summary is flushed.
    pub fn diagnostics_path(&self) -> PathBuf {
        self.data_path.join("diagnostics.json")
    }

    /// Load the configured layout (or the built-in one) and index it.
    pub fn binding_index(&self) -> Result<BindingIndex, LayoutError> {
        let layout = match &self.layout_path {
            Some(path) => KeyLayout::load(path)?,
            None => KeyLayout::builtin(),
        };
        BindingIndex::build(&layout)
    }
}

/// Intent engine thresholds. Times are milliseconds, distances are in
/// normalized pad units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Contact must stay this long to resolve as a hold
    pub dwell_ms: u64,
    /// Policy for bindings that do not set their own
    pub default_policy: KeyPolicy,
    /// Movement that cancels a key candidate
    pub drift_tolerance: f32,
    /// Movement that turns a mouse candidate into pointer motion
    pub drag_distance: f32,
    /// Longest touch that still counts as tap-to-click
    pub tap_click_ms: u64,
    pub gesture_max_frames: u32,
    pub gesture_timeout_ms: u64,
    /// Horizontal five-finger travel that toggles typing
    pub swipe_distance: f32,
    pub swipe_window_ms: u64,
    /// Idle time after the last key before typing intent lapses
    pub typing_grace_ms: u64,
    pub snap_enabled: bool,
    pub pointer_gain: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dwell_ms: 180,
            default_policy: KeyPolicy::Tap,
            drift_tolerance: 0.04,
            drag_distance: 0.02,
            tap_click_ms: 220,
            gesture_max_frames: 24,
            gesture_timeout_ms: 350,
            swipe_distance: 0.25,
            swipe_window_ms: 600,
            typing_grace_ms: 600,
            snap_enabled: true,
            pointer_gain: 1.0,
        }
    }
}

/// Serde support for Duration as whole milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.read_timeout, Duration::from_millis(50));
        assert_eq!(config.queue_capacity, 256);
        assert_eq!(config.engine.dwell_ms, 180);
        assert_eq!(config.engine.default_policy, KeyPolicy::Tap);
        assert!(config.layout_path.is_none());
        assert!(!config.paused);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{ "read_timeout": 10, "engine": { "dwell_ms": 90 } }"#).unwrap();
        assert_eq!(config.read_timeout, Duration::from_millis(10));
        assert_eq!(config.engine.dwell_ms, 90);
        assert_eq!(config.engine.swipe_distance, 0.25);
    }

    #[test]
    fn test_builtin_index_when_no_layout() {
        let index = Config::default().binding_index().unwrap();
        assert_eq!(index.name(), "builtin-split");
    }
}
