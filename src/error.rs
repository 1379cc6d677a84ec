//! Error types for voxcore.

use thiserror::Error;

use crate::session::SpeakerId;

#[derive(Error, Debug)]
pub enum VoxError {
    // Transport errors
    #[error("Failed to join voice channel {channel}: {message}")]
    Join { channel: u64, message: String },

    #[error("Voice transport error: {message}")]
    Transport { message: String },

    #[error("Not connected to a voice channel")]
    NotConnected,

    // Per-speaker capture errors
    #[error("Decode pipeline failed for speaker {speaker}: {message}")]
    Decode { speaker: SpeakerId, message: String },

    #[error("No capture buffer for speaker {speaker}")]
    UnknownSpeaker { speaker: SpeakerId },

    // Playback errors
    #[error("Playback sink error: {message}")]
    Sink { message: String },

    #[error("Track failed to load: {message}")]
    TrackLoad { message: String },

    // Recognition errors
    #[error("Speech recognition failed: {message}")]
    Recognition { message: String },

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, VoxError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_join_display() {
        let error = VoxError::Join {
            channel: 42,
            message: "permission denied".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Failed to join voice channel 42: permission denied"
        );
    }

    #[test]
    fn test_decode_display() {
        let error = VoxError::Decode {
            speaker: 7,
            message: "malformed frame".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Decode pipeline failed for speaker 7: malformed frame"
        );
    }

    #[test]
    fn test_sink_display() {
        let error = VoxError::Sink {
            message: "stream closed".to_string(),
        };
        assert_eq!(error.to_string(), "Playback sink error: stream closed");
    }

    #[test]
    fn test_config_invalid_value_display() {
        let error = VoxError::ConfigInvalidValue {
            key: "capture.max_chunks".to_string(),
            message: "must be positive".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for capture.max_chunks: must be positive"
        );
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: VoxError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: VoxError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<VoxError>();
        assert_sync::<VoxError>();
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_result() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(returns_result().unwrap(), 42);
    }
}
