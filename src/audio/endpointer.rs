//! Voice-activity utterance-boundary detection for bounded command
//! capture.
//!
//! A stream transform: every chunk passes through unchanged, while a
//! debounced silence timer and a hard ceiling timer race to finalize the
//! capture window. Whichever fires first invokes the completion callback
//! exactly once and cancels the other.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::audio::is_silent;
use crate::config::EndpointConfig;
use crate::defaults;

type Callback = Arc<dyn Fn() + Send + Sync>;

struct State {
    silence_run: u32,
    talked_once: bool,
    fired: bool,
    canceled: bool,
    finalize: Option<JoinHandle<()>>,
    ceiling: Option<JoinHandle<()>>,
}

struct Shared {
    state: Mutex<State>,
    on_silence: Callback,
    threshold: u32,
    hold_off: Duration,
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Utterance-boundary detector bounding one capture window.
pub struct Endpointer {
    shared: Arc<Shared>,
}

impl Endpointer {
    /// Creates an endpointer with default timing and the given hard
    /// ceiling.
    ///
    /// The ceiling timer starts immediately and guarantees the callback
    /// fires even if the speaker never stops talking.
    pub fn new<F>(on_silence: F, max_duration: Duration) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let config = EndpointConfig {
            max_capture_ms: max_duration.as_millis() as u64,
            ..EndpointConfig::default()
        };
        Self::with_config(&config, on_silence)
    }

    /// Creates an endpointer from an [`EndpointConfig`].
    pub fn with_config<F>(config: &EndpointConfig, on_silence: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                silence_run: 0,
                talked_once: false,
                fired: false,
                canceled: false,
                finalize: None,
                ceiling: None,
            }),
            on_silence: Arc::new(on_silence),
            threshold: config.silent_chunk_threshold,
            hold_off: defaults::millis(config.time_after_silence_ms),
        });

        let ceiling_shared = shared.clone();
        let max_duration = defaults::millis(config.max_capture_ms);
        let ceiling = tokio::spawn(async move {
            tokio::time::sleep(max_duration).await;
            fire(&ceiling_shared);
        });
        shared.lock().ceiling = Some(ceiling);

        Self { shared }
    }

    /// Feeds one chunk through the detector.
    ///
    /// The chunk is returned unchanged regardless of detection state; the
    /// transform never drops data.
    pub fn process<'a>(&self, chunk: &'a [u8]) -> &'a [u8] {
        let mut state = self.shared.lock();
        if state.fired || state.canceled {
            return chunk;
        }

        if is_silent(chunk) {
            state.silence_run += 1;
            if state.silence_run > self.shared.threshold && state.talked_once {
                // Re-arm on every qualifying chunk; only an uninterrupted
                // hold-off period finalizes the window.
                if let Some(timer) = state.finalize.take() {
                    timer.abort();
                }
                let shared = self.shared.clone();
                let hold_off = self.shared.hold_off;
                state.finalize = Some(tokio::spawn(async move {
                    tokio::time::sleep(hold_off).await;
                    fire(&shared);
                }));
            }
        } else {
            state.silence_run = 0;
            state.talked_once = true;
            if let Some(timer) = state.finalize.take() {
                timer.abort();
            }
        }
        chunk
    }

    /// Tears the window down without invoking the callback.
    pub fn cancel(&self) {
        let mut state = self.shared.lock();
        state.canceled = true;
        if let Some(timer) = state.finalize.take() {
            timer.abort();
        }
        if let Some(timer) = state.ceiling.take() {
            timer.abort();
        }
    }

    /// Whether the completion callback has been invoked.
    pub fn has_fired(&self) -> bool {
        self.shared.lock().fired
    }
}

impl Drop for Endpointer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Invokes the callback exactly once and cancels both timers.
fn fire(shared: &Arc<Shared>) {
    {
        let mut state = shared.lock();
        if state.fired || state.canceled {
            return;
        }
        state.fired = true;
        if let Some(timer) = state.finalize.take() {
            timer.abort();
        }
        if let Some(timer) = state.ceiling.take() {
            timer.abort();
        }
    }
    (shared.on_silence)();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::silent_chunk;
    use crate::defaults;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn speech_chunk() -> Vec<u8> {
        vec![1u8; defaults::CHUNK_BYTES]
    }

    fn counting_endpointer(max_duration_ms: u64) -> (Endpointer, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        let ep = Endpointer::new(
            move || {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            },
            Duration::from_millis(max_duration_ms),
        );
        (ep, fired)
    }

    #[tokio::test(start_paused = true)]
    async fn test_four_silent_chunks_never_fire() {
        let (ep, fired) = counting_endpointer(60_000);

        ep.process(&speech_chunk());
        for _ in 0..4 {
            ep.process(&silent_chunk());
        }

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_six_silent_chunks_then_quiet_fires_once() {
        let (ep, fired) = counting_endpointer(60_000);

        ep.process(&speech_chunk());
        for _ in 0..6 {
            ep.process(&silent_chunk());
        }

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(ep.has_fired());

        // Further quiet time never fires again.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_without_speech_never_fires() {
        let (ep, fired) = counting_endpointer(60_000);

        for _ in 0..20 {
            ep.process(&silent_chunk());
        }

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_speech_resets_pending_finalize() {
        let (ep, fired) = counting_endpointer(60_000);

        ep.process(&speech_chunk());
        for _ in 0..6 {
            ep.process(&silent_chunk());
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        // Speaker resumes before the hold-off elapses.
        ep.process(&speech_chunk());

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ceiling_fires_once_under_continuous_speech() {
        let (ep, fired) = counting_endpointer(200);

        for _ in 0..10 {
            ep.process(&speech_chunk());
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Silence afterwards must not re-fire through the silence path.
        for _ in 0..10 {
            ep.process(&silent_chunk());
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_suppresses_both_timers() {
        let (ep, fired) = counting_endpointer(200);

        ep.process(&speech_chunk());
        for _ in 0..6 {
            ep.process(&silent_chunk());
        }
        ep.cancel();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunks_pass_through_unchanged() {
        let (ep, _fired) = counting_endpointer(60_000);

        let chunk = speech_chunk();
        assert_eq!(ep.process(&chunk), chunk.as_slice());
        let silence = silent_chunk();
        assert_eq!(ep.process(&silence), silence.as_slice());
    }
}
