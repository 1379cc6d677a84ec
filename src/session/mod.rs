//! Session orchestration: speaker lifecycles, hotword capture windows,
//! and the timers that tie them together.

pub mod controller;
pub mod timers;

pub use controller::{Chimes, Collaborators, SessionController, SessionControllerBuilder};
pub use timers::{TimerKey, TimerKind, TimerTable};

/// Transport-scoped identifier for a session participant.
pub type SpeakerId = u64;

/// Notifications emitted by the session for external observers (daemon
/// status surfaces, metrics bridges). Delivery is best-effort.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A speaker's capture pipeline came up (first packet or rejoin).
    SpeakerActive { speaker: SpeakerId },
    /// A speaker's buffer and pipeline were torn down after the grace
    /// period.
    SpeakerRemoved { speaker: SpeakerId },
    /// A hotword opened a command-capture window.
    HotwordTriggered { speaker: SpeakerId, word: String },
    /// A capture window completed recognition.
    CommandRecognized { speaker: SpeakerId, text: String },
    /// The idle timeout elapsed with no non-bot members left.
    SessionIdle,
    /// The session disconnected from the voice channel.
    Disconnected,
}
