//! Outgoing-channel playback: the main track queue, the interrupt queue,
//! and the preemptive scheduler serializing both onto one sink.

pub mod queue;
pub mod scheduler;

pub use queue::InterruptItem;
pub use scheduler::{PlaybackScheduler, PlaybackState, SchedulerStatus, Track, volume_multiplier};
