//! Default constants for the audio core.
//!
//! This module provides shared constants used across different configuration
//! types to ensure consistency and eliminate duplication.

use std::time::Duration;

/// Audio sample rate in Hz.
///
/// 48kHz matches the voice transport's native Opus decode rate; every PCM
/// buffer in this crate is produced and consumed at this rate.
pub const SAMPLE_RATE: u32 = 48_000;

/// Number of interleaved channels in internal PCM buffers.
pub const CHANNELS: u32 = 2;

/// Size of one 16-bit sample in bytes.
pub const BYTES_PER_SAMPLE: u32 = 2;

/// PCM throughput in bytes per second (48kHz * stereo * 16-bit).
pub const BYTES_PER_SECOND: u32 = SAMPLE_RATE * CHANNELS * BYTES_PER_SAMPLE;

/// Nominal size of one decoded audio chunk in bytes.
///
/// The transport packetizes audio in 20ms frames; at 48kHz stereo 16-bit
/// that is 3840 bytes. Synthetic silence chunks use the same size so that
/// chunk counts remain a valid proxy for duration.
pub const CHUNK_BYTES: usize = 3840;

/// Wall-clock duration covered by one nominal chunk.
pub const CHUNK_DURATION_MS: u64 = 20;

/// Interval of the silence aligner tick, matching the transport's 20ms
/// packetization so aligned buffers advance at real-time rate.
pub const SILENCE_TICK_MS: u64 = 20;

/// Maximum number of chunks retained per capture deque.
///
/// 1500 chunks of 20ms each keeps 30 seconds of history per speaker, which
/// bounds memory at ~5.5MiB per speaker per variant while covering every
/// clip length the recall features request.
pub const MAX_CHUNKS: usize = 1500;

/// Debounce window for synthetic silence insertion in milliseconds.
///
/// A silence tick landing within this window of a real packet is dropped,
/// so a tick and a packet arriving in the same instant cannot both count
/// toward the aligned buffer's duration.
pub const PUSH_DEBOUNCE_MS: u64 = 30;

/// Number of consecutive silent chunks that must be exceeded before the
/// endpointer arms its finalize timer.
pub const SILENT_CHUNK_THRESHOLD: u32 = 5;

/// Quiet period after sustained silence before an utterance is finalized.
pub const TIME_AFTER_SILENCE_MS: u64 = 1000;

/// Hard ceiling on a single command-capture window in milliseconds.
///
/// Guarantees the window terminates even if the speaker never stops
/// talking.
pub const MAX_CAPTURE_MS: u64 = 10_000;

/// Grace period before a stopped speaker's buffer and pipeline are torn
/// down. A new speaking event within this window reuses the existing
/// buffer.
pub const USER_REJOIN_THRESHOLD_MS: u64 = 15_000;

/// Idle period with no non-bot members before the session disconnects.
pub const NO_USER_TIMEOUT_MS: u64 = 60_000;

/// Amplitude multiplier applied at logical volume 0.
pub const VOLUME_FLOOR: f32 = 0.5;

/// Amplitude multiplier applied at logical volume 100.
pub const VOLUME_CEILING: f32 = 2.0;

/// Default logical volume for main-queue tracks.
pub const DEFAULT_VOLUME: f32 = 50.0;

/// Interrupt priority used for acknowledgement chimes.
///
/// Lower values play first; chimes sit above generated speech numerically
/// (speech is priority 5) so a pending spoken reply is never delayed by a
/// chime.
pub const CHIME_PRIORITY: u8 = 10;

/// Interrupt priority used for synthesized speech replies.
pub const SPEECH_PRIORITY: u8 = 5;

/// Convenience constructor for millisecond durations used throughout the
/// timer-heavy session code.
pub const fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}
