//! Boundary contracts toward the rest of the system.
//!
//! Implementations live outside this crate: the voice transport (gateway,
//! opus codec, networking), the hotword detector, the speech services, and
//! the chat-command dispatcher. The core only depends on these narrow
//! traits; tests supply mocks.

use std::io::Read;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::error::Result;
use crate::session::SpeakerId;

/// How the bytes of an audio stream are to be consumed by the sink.
///
/// A capability tag, not inheritance: the sink picks its consumption path
/// without virtual dispatch on the stream itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Raw 48kHz 16-bit LE stereo PCM.
    Raw,
    /// Pre-encoded audio the sink forwards without transcoding.
    Encoded(EncodedFormat),
}

/// Encoded formats the transport sink accepts as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodedFormat {
    Opus,
    Ogg,
}

/// A one-shot readable audio stream plus its consumption tag.
pub struct AudioStream {
    pub kind: StreamKind,
    pub reader: Box<dyn Read + Send>,
}

impl AudioStream {
    /// Wraps an in-memory PCM buffer.
    pub fn from_pcm(bytes: Vec<u8>) -> Self {
        Self {
            kind: StreamKind::Raw,
            reader: Box::new(std::io::Cursor::new(bytes)),
        }
    }
}

impl std::fmt::Debug for AudioStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioStream")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Options passed to the sink when starting playback.
#[derive(Debug, Clone, Copy)]
pub struct PlayOptions {
    pub kind: StreamKind,
    /// Amplitude multiplier (see the scheduler's volume model).
    pub volume: f32,
}

/// Control surface over one in-flight playback on the sink.
pub trait PlaybackControl: Send {
    /// Suspends the stream without destroying it; a later [`resume`]
    /// continues sample-accurately.
    ///
    /// [`resume`]: PlaybackControl::resume
    fn pause(&mut self);
    fn resume(&mut self);
    /// Stops and discards the stream. The finished signal still resolves.
    fn stop(&mut self);
    fn set_volume(&mut self, multiplier: f32);
}

/// A playback started on the sink: its control handle and the signal that
/// resolves when the sink finishes (or errors, or is stopped).
pub struct ActivePlayback {
    pub control: Box<dyn PlaybackControl>,
    pub finished: oneshot::Receiver<Result<()>>,
}

/// Membership and connection events delivered by the transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    SpeakingStarted { speaker: SpeakerId },
    SpeakingStopped { speaker: SpeakerId },
    MemberJoined { speaker: SpeakerId, is_bot: bool },
    MemberLeft { speaker: SpeakerId },
    Reconnected,
    Disconnected,
}

/// An established voice connection: the outgoing sink plus per-speaker
/// receive streams.
#[async_trait]
pub trait VoiceConnection: Send + Sync {
    /// Starts playing a stream on the outgoing channel.
    ///
    /// The scheduler is the sole caller; nothing else writes to the sink.
    async fn play(&self, stream: AudioStream, options: PlayOptions) -> Result<ActivePlayback>;

    /// Opens the decoded (PCM) receive stream for one speaker.
    ///
    /// The channel closes when the transport stops delivering for that
    /// speaker; a recv error mid-stream is a decode failure.
    fn create_receive_stream(&self, speaker: SpeakerId) -> Result<mpsc::Receiver<Vec<u8>>>;

    /// Leaves the voice channel.
    async fn disconnect(&self) -> Result<()>;
}

/// The voice transport: joins channels and produces connections.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn join(&self, channel: u64) -> Result<std::sync::Arc<dyn VoiceConnection>>;
}

/// Hotword/VAD detector collaborator.
pub trait HotwordDetector: Send + Sync {
    /// Registers a speaker's decoded mono stream; `on_trigger` is invoked
    /// with the matched word.
    fn register(
        &self,
        speaker: SpeakerId,
        audio: mpsc::Receiver<Vec<u8>>,
        on_trigger: Box<dyn Fn(String) + Send + Sync>,
    ) -> Result<()>;

    /// Unregisters a speaker; further audio is ignored.
    fn remove(&self, speaker: SpeakerId);

    /// Speakers currently registered with the detector.
    fn registered_speakers(&self) -> Vec<SpeakerId>;

    /// The trigger words currently active.
    fn hotwords(&self) -> Vec<String>;
}

/// Speech-to-text / text-to-speech collaborator.
#[async_trait]
pub trait SpeechService: Send + Sync {
    /// Transcribes a captured utterance.
    async fn recognize(&self, audio: AudioStream, language: &str) -> Result<String>;

    /// Synthesizes speech; returns the stream and its length in seconds.
    async fn synthesize(&self, text: &str, voice: &str) -> Result<(AudioStream, f32)>;
}

/// Receives recognized command text, once per completed capture window.
pub trait CommandDispatcher: Send + Sync {
    fn handle_recognized_text(&self, speaker: SpeakerId, text: &str);
}
