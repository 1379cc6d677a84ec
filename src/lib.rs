//! voxcore - Real-time audio engine for multi-speaker voice sessions
//!
//! Per-speaker ring capture with silence alignment, hotword-bounded
//! command recognition, and preemptive priority playback.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod clock;
pub mod config;
pub mod defaults;
pub mod error;
pub mod playback;
pub mod session;
pub mod transport;

// Capture and mixing
pub use audio::{CaptureBuffer, CaptureTable, Endpointer, SilenceAligner, StreamMixer};

// Playback
pub use playback::{InterruptItem, PlaybackScheduler, PlaybackState, SchedulerStatus, Track};

// Session orchestration
pub use session::{
    Collaborators, SessionController, SessionControllerBuilder, SessionEvent, SpeakerId,
};

// Integration seams
pub use transport::{
    ActivePlayback, AudioStream, CommandDispatcher, HotwordDetector, PlayOptions, PlaybackControl,
    SpeechService, StreamKind, TransportEvent, VoiceConnection, VoiceTransport,
};

// Error handling
pub use error::{Result, VoxError};

// Config
pub use config::Config;
