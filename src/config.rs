use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::defaults;
use crate::error::{Result, VoxError};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub endpoint: EndpointConfig,
    pub lifecycle: LifecycleConfig,
    pub playback: PlaybackConfig,
}

/// Per-speaker capture buffer configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    /// Maximum number of chunks retained per deque (ring bound).
    pub max_chunks: usize,
    /// Debounce window for synthetic silence insertion (milliseconds).
    pub debounce_ms: u64,
    /// Silence aligner tick interval (milliseconds).
    pub silence_tick_ms: u64,
}

/// Utterance endpointing configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EndpointConfig {
    /// Consecutive silent chunks that must be exceeded before the finalize
    /// timer arms.
    pub silent_chunk_threshold: u32,
    /// Quiet period after sustained silence before finalizing (milliseconds).
    pub time_after_silence_ms: u64,
    /// Hard ceiling on a capture window (milliseconds).
    pub max_capture_ms: u64,
}

/// Speaker and session lifecycle timing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Grace period before a stopped speaker's state is torn down
    /// (milliseconds).
    pub rejoin_grace_ms: u64,
    /// Idle period with no non-bot members before disconnecting
    /// (milliseconds).
    pub idle_disconnect_ms: u64,
}

/// Playback scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Initial logical volume in [0, 100].
    pub initial_volume: f32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_chunks: defaults::MAX_CHUNKS,
            debounce_ms: defaults::PUSH_DEBOUNCE_MS,
            silence_tick_ms: defaults::SILENCE_TICK_MS,
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            silent_chunk_threshold: defaults::SILENT_CHUNK_THRESHOLD,
            time_after_silence_ms: defaults::TIME_AFTER_SILENCE_MS,
            max_capture_ms: defaults::MAX_CAPTURE_MS,
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            rejoin_grace_ms: defaults::USER_REJOIN_THRESHOLD_MS,
            idle_disconnect_ms: defaults::NO_USER_TIMEOUT_MS,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            initial_volume: defaults::DEFAULT_VOLUME,
        }
    }
}

impl CaptureConfig {
    /// Debounce window as a `Duration`.
    pub fn debounce(&self) -> Duration {
        defaults::millis(self.debounce_ms)
    }

    /// Aligner tick interval as a `Duration`.
    pub fn silence_tick(&self) -> Duration {
        defaults::millis(self.silence_tick_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.capture.max_chunks == 0 {
            return Err(VoxError::ConfigInvalidValue {
                key: "capture.max_chunks".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.capture.silence_tick_ms == 0 {
            return Err(VoxError::ConfigInvalidValue {
                key: "capture.silence_tick_ms".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if !(0.0..=100.0).contains(&self.playback.initial_volume) {
            return Err(VoxError::ConfigInvalidValue {
                key: "playback.initial_volume".to_string(),
                message: "must be within [0, 100]".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.capture.max_chunks, defaults::MAX_CHUNKS);
        assert_eq!(config.capture.debounce_ms, 30);
        assert_eq!(config.capture.silence_tick_ms, 20);

        assert_eq!(config.endpoint.silent_chunk_threshold, 5);
        assert_eq!(config.endpoint.time_after_silence_ms, 1000);

        assert_eq!(config.lifecycle.rejoin_grace_ms, 15_000);
        assert_eq!(config.lifecycle.idle_disconnect_ms, 60_000);

        assert_eq!(config.playback.initial_volume, 50.0);
    }

    #[test]
    fn test_load_from_toml_file() {
        let toml_content = r#"
            [capture]
            max_chunks = 500

            [lifecycle]
            rejoin_grace_ms = 5000
        "#;

        let mut file = NamedTempFile::new().expect("should create temp file");
        file.write_all(toml_content.as_bytes())
            .expect("should write config");

        let config = Config::load(file.path()).expect("should load config");
        assert_eq!(config.capture.max_chunks, 500);
        assert_eq!(config.lifecycle.rejoin_grace_ms, 5000);
        // Unspecified fields use defaults.
        assert_eq!(config.capture.debounce_ms, 30);
        assert_eq!(config.endpoint.max_capture_ms, defaults::MAX_CAPTURE_MS);
    }

    #[test]
    fn test_load_rejects_invalid_toml() {
        let mut file = NamedTempFile::new().expect("should create temp file");
        file.write_all(b"capture = nonsense")
            .expect("should write config");

        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_max_chunks() {
        let mut config = Config::default();
        config.capture.max_chunks = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_volume() {
        let mut config = Config::default();
        config.playback.initial_volume = 150.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_helpers() {
        let config = CaptureConfig::default();
        assert_eq!(config.debounce(), Duration::from_millis(30));
        assert_eq!(config.silence_tick(), Duration::from_millis(20));
    }
}
