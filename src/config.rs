//! Configuration for the Synheart Focus Agent.

use crate::collector::STANDARD_GRAVITY;
use crate::core::aggregator::{AggregatorConfig, WINDOW_DURATION};
use crate::core::telemetry::DEVICE_TYPE;
use crate::gateway::GatewayConfig;
use crate::session::{ControllerSettings, PausePolicy};
use crate::upload::UploadConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for the focus agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Duration of each aggregation window
    #[serde(with = "duration_ms")]
    pub window_duration: Duration,

    /// Divisor applied to accelerometer magnitudes
    pub accel_normalizer: f64,

    /// Stable identifier sent when pairing
    pub device_id: String,

    pub device_type: String,

    /// Collector backend
    pub backend: GatewayConfig,

    /// Upload workers and retry policy
    pub upload: UploadConfig,

    /// What `pause` does to sensor ingestion
    pub pause_policy: PausePolicy,

    /// Path for session state and telemetry counters
    pub data_path: PathBuf,

    /// Whether forwarding is currently paused
    pub paused: bool,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("synheart-focus-agent");

        Self {
            window_duration: WINDOW_DURATION,
            accel_normalizer: STANDARD_GRAVITY,
            device_id: generate_device_id(),
            device_type: DEVICE_TYPE.to_string(),
            backend: GatewayConfig::default(),
            upload: UploadConfig::default(),
            pause_policy: PausePolicy::default(),
            data_path: data_dir,
            paused: false,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults when the
    /// file does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("synheart-focus-agent")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    pub fn session_store_path(&self) -> PathBuf {
        self.data_path.join("session.json")
    }

    pub fn telemetry_log_path(&self) -> PathBuf {
        self.data_path.join("telemetry.json")
    }

    /// The window length is fixed by the collector contract; other values
    /// are reported and replaced.
    pub fn aggregator_config(&self) -> AggregatorConfig {
        if self.window_duration != WINDOW_DURATION {
            tracing::warn!(
                configured_ms = self.window_duration.as_millis() as u64,
                "window_duration is fixed at {} ms, ignoring configured value",
                WINDOW_DURATION.as_millis()
            );
        }
        let accel_normalizer = if self.accel_normalizer > 0.0 {
            self.accel_normalizer
        } else {
            STANDARD_GRAVITY
        };
        AggregatorConfig {
            accel_normalizer,
            ..AggregatorConfig::default()
        }
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            device_id: self.device_id.clone(),
            device_type: self.device_type.clone(),
            pause_policy: self.pause_policy,
        }
    }
}

/// `watch-<hostname>-<8 hex chars>`
pub fn generate_device_id() -> String {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    format!(
        "{DEVICE_TYPE}-{}-{}",
        hostname,
        &uuid::Uuid::new_v4().simple().to_string()[..8]
    )
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration as whole milliseconds.
pub(crate) mod duration_ms {
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
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.window_duration, Duration::from_millis(3000));
        assert_eq!(config.accel_normalizer, 9.81);
        assert_eq!(config.device_type, "watch");
        assert!(config.device_id.starts_with("watch-"));
        assert_eq!(config.upload.base_delay, Duration::from_secs(5));
        assert_eq!(config.upload.max_retries, 5);
        assert_eq!(config.pause_policy, PausePolicy::ForwardOnly);
        assert!(!config.paused);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.paused = true;
        config.pause_policy = PausePolicy::HaltIngestion;
        config.backend = GatewayConfig::new("https://collector.example/functions/v1")
            .with_api_key("anon-key");
        config.save_to(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["window_duration"], 3000);
        assert_eq!(raw["pause_policy"], "halt_ingestion");
        assert_eq!(raw["upload"]["max_delay"], 300_000);

        let loaded = Config::load_from(&path).unwrap();
        assert!(loaded.paused);
        assert_eq!(loaded.device_id, config.device_id);
        assert_eq!(loaded.backend.api_key.as_deref(), Some("anon-key"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"paused": true, "device_id": "watch-a-1"}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert!(config.paused);
        assert_eq!(config.device_id, "watch-a-1");
        assert_eq!(config.upload.workers, 2);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.json")).unwrap();
        assert!(!config.paused);
    }

    #[test]
    fn test_aggregator_config_keeps_fixed_window() {
        let config = Config {
            window_duration: Duration::from_secs(10),
            accel_normalizer: 0.0,
            ..Config::default()
        };
        let aggregator = config.aggregator_config();
        assert_eq!(aggregator.window_duration, WINDOW_DURATION);
        assert_eq!(aggregator.accel_normalizer, STANDARD_GRAVITY);
    }
}
