//! Fixed-interval silence injection.
//!
//! The transport only emits packets while a speaker is actually producing
//! audio, so "silence" has to be manufactured for the aligned capture
//! variant to stay time-accurate. The aligner ticks at the transport's
//! packetization interval and pushes a synthetic silence chunk through
//! every registered capture buffer; the per-buffer debounce drops ticks
//! that collide with real packets.

use std::sync::PoisonError;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::audio::{CaptureTable, silent_chunk};

/// Background task injecting synthetic silence into every active capture
/// buffer at a fixed interval.
///
/// Started by the session controller when a session initializes; stopped
/// (or dropped) on teardown.
pub struct SilenceAligner {
    task: JoinHandle<()>,
}

impl SilenceAligner {
    /// Spawns the aligner over the shared capture table.
    pub fn start(captures: CaptureTable, tick: Duration) -> Self {
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            // Fire-and-forget payload; a missed tick is lost time, not a
            // backlog to replay.
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let mut table = captures.lock().unwrap_or_else(PoisonError::into_inner);
                for buffer in table.values_mut() {
                    buffer.push_silence(silent_chunk());
                }
            }
        });
        Self { task }
    }

    /// Stops the aligner task.
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for SilenceAligner {
    fn drop(&mut self) {
        self.task.abort();
    }
}
