//! PCM buffer management: per-speaker capture, alignment, mixing, and
//! utterance endpointing.
//!
//! All audio in this module is 48kHz 16-bit little-endian stereo PCM in
//! nominal 20ms chunks (see [`crate::defaults`]).

pub mod aligner;
pub mod capture;
pub mod endpointer;
pub mod mixer;

use std::collections::HashMap;
use std::f32::consts::TAU;
use std::sync::{Arc, Mutex};

use crate::defaults;
use crate::session::SpeakerId;

pub use aligner::SilenceAligner;
pub use capture::{CaptureBuffer, CaptureBufferConfig};
pub use endpointer::Endpointer;
pub use mixer::StreamMixer;

/// Shared view over the per-speaker capture buffers.
///
/// The `SessionController` exclusively creates and removes entries; the
/// `SilenceAligner` and `StreamMixer` only read or push through existing
/// ones.
pub type CaptureTable = Arc<Mutex<HashMap<SpeakerId, CaptureBuffer>>>;

/// Returns a zeroed chunk of the nominal transport chunk size.
pub fn silent_chunk() -> Vec<u8> {
    vec![0u8; defaults::CHUNK_BYTES]
}

/// Returns true iff every 16-bit sample in the chunk is zero.
///
/// A trailing odd byte (malformed chunk) is treated as a sample and
/// compared against zero as well.
pub fn is_silent(chunk: &[u8]) -> bool {
    chunk.iter().all(|&b| b == 0)
}

/// Downmixes interleaved stereo 16-bit LE PCM to mono by averaging the
/// channel pair at each frame.
///
/// Used by the decode pipeline to feed the hotword detector, which consumes
/// single-channel audio.
pub fn downmix_to_mono(chunk: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(chunk.len() / 2);
    for frame in chunk.chunks_exact(4) {
        let left = i16::from_le_bytes([frame[0], frame[1]]) as i32;
        let right = i16::from_le_bytes([frame[2], frame[3]]) as i32;
        let mono = ((left + right) / 2) as i16;
        out.extend_from_slice(&mono.to_le_bytes());
    }
    out
}

/// Generates a short stereo sine chime at the given frequency.
///
/// Used as the default open/close acknowledgement sounds for hotword
/// capture windows; sessions can supply their own PCM instead.
pub fn tone(freq_hz: f32, duration_ms: u64, amplitude: f32) -> Vec<u8> {
    let frames = (defaults::SAMPLE_RATE as u64 * duration_ms / 1000) as usize;
    let mut out = Vec::with_capacity(frames * 4);
    for n in 0..frames {
        let t = n as f32 / defaults::SAMPLE_RATE as f32;
        // Linear fade over the whole tone avoids a click at the cut-off.
        let envelope = 1.0 - n as f32 / frames as f32;
        let sample = (amplitude * envelope * (TAU * freq_hz * t).sin() * i16::MAX as f32) as i16;
        let bytes = sample.to_le_bytes();
        out.extend_from_slice(&bytes);
        out.extend_from_slice(&bytes);
    }
    out
}
