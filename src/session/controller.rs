//! Session controller: binds transport membership and speaking events to
//! per-speaker capture pipelines, hotword-bounded recognition windows,
//! and the session-wide lifecycle timers.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audio::capture::{CaptureBuffer, CaptureBufferConfig};
use crate::audio::endpointer::Endpointer;
use crate::audio::{CaptureTable, SilenceAligner, StreamMixer, downmix_to_mono, tone};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::defaults;
use crate::error::{Result, VoxError};
use crate::playback::{InterruptItem, PlaybackScheduler};
use crate::session::timers::{TimerKey, TimerKind, TimerTable};
use crate::session::{SessionEvent, SpeakerId};
use crate::transport::{
    AudioStream, CommandDispatcher, HotwordDetector, SpeechService, StreamKind, TransportEvent,
    VoiceConnection, VoiceTransport,
};

/// Capacity of the per-speaker channel feeding the hotword detector.
/// Overflow drops frames; the detector tolerates gaps.
const HOTWORD_CHANNEL_CAPACITY: usize = 64;

/// External collaborators the session is wired to.
pub struct Collaborators {
    pub transport: Arc<dyn VoiceTransport>,
    pub hotword: Arc<dyn HotwordDetector>,
    pub speech: Arc<dyn SpeechService>,
    pub dispatcher: Arc<dyn CommandDispatcher>,
}

/// Acknowledgement sounds played around a capture window.
pub struct Chimes {
    pub open: Vec<u8>,
    pub close: Vec<u8>,
}

impl Default for Chimes {
    fn default() -> Self {
        Self {
            open: tone(880.0, 150, 0.25),
            close: tone(660.0, 150, 0.25),
        }
    }
}

/// Per-session membership info.
#[derive(Debug, Clone, Copy, Default)]
struct MemberInfo {
    is_bot: bool,
    capture_opt_out: bool,
}

/// An open command-capture window for one speaker.
struct RecognitionWindow {
    tee_tx: mpsc::UnboundedSender<Vec<u8>>,
    canceled: Arc<AtomicBool>,
}

/// Live per-speaker pipeline state.
struct SpeakerState {
    pump: JoinHandle<()>,
    /// Re-entrancy guard: one recognition window per speaker.
    listening: Arc<AtomicBool>,
    window: Arc<Mutex<Option<RecognitionWindow>>>,
}

impl SpeakerState {
    fn cancel_recognition(&self) {
        if let Some(window) = lock(&self.window).take() {
            window.canceled.store(true, Ordering::SeqCst);
            // Dropping the sender closes the tee; the window task exits.
        }
        self.listening.store(false, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Orchestrates capture, recognition, and playback for one voice session.
pub struct SessionController {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    clock: Arc<dyn Clock>,
    collaborators: Collaborators,
    chimes: Chimes,
    language: String,
    captures: CaptureTable,
    mixer: StreamMixer,
    speakers: Mutex<HashMap<SpeakerId, SpeakerState>>,
    members: Mutex<HashMap<SpeakerId, MemberInfo>>,
    connection: Mutex<Option<Arc<dyn VoiceConnection>>>,
    scheduler: Mutex<Option<PlaybackScheduler>>,
    aligner: Mutex<Option<SilenceAligner>>,
    timers: Arc<TimerTable>,
    events: Option<crossbeam_channel::Sender<SessionEvent>>,
}

impl SessionController {
    /// Creates a controller with the system clock and default chimes.
    pub fn new(config: Config, collaborators: Collaborators) -> Self {
        Self::builder(config, collaborators).build()
    }

    /// Starts building a controller with non-default wiring.
    pub fn builder(config: Config, collaborators: Collaborators) -> SessionControllerBuilder {
        SessionControllerBuilder {
            config,
            collaborators,
            clock: Arc::new(SystemClock),
            chimes: Chimes::default(),
            language: "en-US".to_string(),
            events: None,
        }
    }

    /// Joins a voice channel, starting the playback scheduler and the
    /// silence aligner.
    pub async fn join(&self, channel: u64) -> Result<()> {
        let connection = self
            .inner
            .collaborators
            .transport
            .join(channel)
            .await
            .map_err(|e| VoxError::Join {
                channel,
                message: e.to_string(),
            })?;

        *lock(&self.inner.connection) = Some(connection.clone());
        *lock(&self.inner.scheduler) = Some(PlaybackScheduler::start(
            connection,
            &self.inner.config.playback,
        ));
        *lock(&self.inner.aligner) = Some(SilenceAligner::start(
            self.inner.captures.clone(),
            self.inner.config.capture.silence_tick(),
        ));
        info!(channel, "joined voice channel");
        Ok(())
    }

    /// Leaves the channel and clears all per-speaker state.
    pub async fn disconnect(&self) -> Result<()> {
        let Some(connection) = lock(&self.inner.connection).take() else {
            return Err(VoxError::NotConnected);
        };
        self.inner.teardown();
        self.inner.emit(SessionEvent::Disconnected);
        connection.disconnect().await
    }

    /// Feeds one transport event into the session state machine.
    pub fn handle_event(&self, event: TransportEvent) {
        self.inner.handle_event(event);
    }

    /// Marks a speaker as excluded from capture. Takes effect the next
    /// time they start speaking.
    pub fn set_capture_opt_out(&self, speaker: SpeakerId, opt_out: bool) {
        lock(&self.inner.members)
            .entry(speaker)
            .or_default()
            .capture_opt_out = opt_out;
    }

    /// Composite mix of every active speaker's aligned history.
    pub fn get_merged_buffer(&self) -> Vec<u8> {
        self.inner.mixer.merged_buffer()
    }

    /// [`SessionController::get_merged_buffer`] as a one-shot stream.
    pub fn get_merged_stream(&self) -> Cursor<Vec<u8>> {
        self.inner.mixer.merged_stream()
    }

    /// Recent audio for one speaker.
    pub fn get_stream_for_speaker(
        &self,
        speaker: SpeakerId,
        duration_secs: f64,
        aligned: bool,
    ) -> Result<Cursor<Vec<u8>>> {
        let table = lock(&self.inner.captures);
        let buffer = table
            .get(&speaker)
            .ok_or(VoxError::UnknownSpeaker { speaker })?;
        Ok(buffer.get_stream(duration_secs, aligned))
    }

    /// Speakers with a live capture pipeline.
    pub fn list_active_speakers(&self) -> Vec<SpeakerId> {
        let mut speakers: Vec<_> = lock(&self.inner.speakers).keys().copied().collect();
        speakers.sort_unstable();
        speakers
    }

    /// Handle to the playback scheduler, if connected.
    pub fn scheduler(&self) -> Option<PlaybackScheduler> {
        lock(&self.inner.scheduler).clone()
    }
}

/// Builder for non-default controller wiring.
pub struct SessionControllerBuilder {
    config: Config,
    collaborators: Collaborators,
    clock: Arc<dyn Clock>,
    chimes: Chimes,
    language: String,
    events: Option<crossbeam_channel::Sender<SessionEvent>>,
}

impl SessionControllerBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn chimes(mut self, chimes: Chimes) -> Self {
        self.chimes = chimes;
        self
    }

    /// Recognition language passed to the speech service.
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Best-effort session event fan-out.
    pub fn event_sender(mut self, sender: crossbeam_channel::Sender<SessionEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn build(self) -> SessionController {
        let captures: CaptureTable = Arc::new(Mutex::new(HashMap::new()));
        SessionController {
            inner: Arc::new(Inner {
                config: self.config,
                clock: self.clock,
                collaborators: self.collaborators,
                chimes: self.chimes,
                language: self.language,
                mixer: StreamMixer::new(captures.clone()),
                captures,
                speakers: Mutex::new(HashMap::new()),
                members: Mutex::new(HashMap::new()),
                connection: Mutex::new(None),
                scheduler: Mutex::new(None),
                aligner: Mutex::new(None),
                timers: TimerTable::new(),
                events: self.events,
            }),
        }
    }
}

impl Inner {
    fn emit(&self, event: SessionEvent) {
        if let Some(sender) = &self.events {
            let _ = sender.send(event);
        }
    }

    fn handle_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::SpeakingStarted { speaker } => self.on_speaking_started(speaker),
            TransportEvent::SpeakingStopped { speaker } => self.on_speaking_stopped(speaker),
            TransportEvent::MemberJoined { speaker, is_bot } => {
                lock(&self.members).entry(speaker).or_default().is_bot = is_bot;
                // Any (re)join keeps the session alive.
                self.timers
                    .cancel(TimerKey::session(TimerKind::IdleDisconnect));
            }
            TransportEvent::MemberLeft { speaker } => {
                lock(&self.members).remove(&speaker);
                self.on_speaking_stopped(speaker);
                self.arm_idle_disconnect_if_empty();
            }
            TransportEvent::Reconnected => {
                info!("transport reconnected, resetting session state");
                self.reset_speakers();
                self.timers.cancel_all();
            }
            TransportEvent::Disconnected => {
                info!("transport disconnected, clearing session");
                self.teardown();
                *lock(&self.connection) = None;
                self.emit(SessionEvent::Disconnected);
            }
        }
    }

    fn on_speaking_started(self: &Arc<Self>, speaker: SpeakerId) {
        // A live pipeline absorbs the event; a pending removal is called
        // off either way.
        self.timers
            .cancel(TimerKey::for_speaker(TimerKind::RemovalGrace, speaker));

        let needs_pipeline = match lock(&self.speakers).get(&speaker) {
            Some(state) => state.pump.is_finished(),
            None => true,
        };
        if !needs_pipeline {
            return;
        }

        let member = lock(&self.members)
            .get(&speaker)
            .copied()
            .unwrap_or_default();
        if member.capture_opt_out {
            debug!(speaker, "speaker opted out of capture, ignoring");
            return;
        }

        let Some(connection) = lock(&self.connection).clone() else {
            warn!(speaker, "speaking event without a connection");
            return;
        };
        let receive = match connection.create_receive_stream(speaker) {
            Ok(receive) => receive,
            Err(e) => {
                warn!(speaker, error = %e, "failed to open receive stream");
                return;
            }
        };

        // Reuse a buffer surviving its grace period; create otherwise.
        {
            let mut table = lock(&self.captures);
            table.entry(speaker).or_insert_with(|| {
                let config = CaptureBufferConfig {
                    max_chunks: self.config.capture.max_chunks,
                    debounce: self.config.capture.debounce(),
                    alignment: true,
                };
                CaptureBuffer::with_config(config, self.clock.clone())
            });
        }

        let (hotword_tx, hotword_rx) = mpsc::channel(HOTWORD_CHANNEL_CAPACITY);
        let trigger_target = Arc::downgrade(self);
        if let Err(e) = self.collaborators.hotword.register(
            speaker,
            hotword_rx,
            Box::new(move |word| {
                if let Some(inner) = trigger_target.upgrade() {
                    inner.on_hotword(speaker, word);
                }
            }),
        ) {
            warn!(speaker, error = %e, "hotword registration failed");
        }

        let listening = Arc::new(AtomicBool::new(false));
        let window = Arc::new(Mutex::new(None));
        let pump = self.spawn_pump(speaker, receive, hotword_tx, window.clone());

        let state = SpeakerState {
            pump,
            listening,
            window,
        };
        if let Some(previous) = lock(&self.speakers).insert(speaker, state) {
            previous.pump.abort();
        }
        self.emit(SessionEvent::SpeakerActive { speaker });
        debug!(speaker, "capture pipeline started");
    }

    /// Decode pipeline: transport receive stream → capture push, mono
    /// downmix to the hotword detector, and the recognition tee.
    fn spawn_pump(
        self: &Arc<Self>,
        speaker: SpeakerId,
        mut receive: mpsc::Receiver<Vec<u8>>,
        hotword_tx: mpsc::Sender<Vec<u8>>,
        window: Arc<Mutex<Option<RecognitionWindow>>>,
    ) -> JoinHandle<()> {
        let captures = self.captures.clone();
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(chunk) = receive.recv().await {
                if chunk.len() % 4 != 0 {
                    // Malformed frame: isolate this speaker, leave the
                    // rest of the session untouched.
                    warn!(speaker, len = chunk.len(), "malformed audio chunk");
                    if let Some(inner) = weak.upgrade() {
                        inner.isolate_speaker(speaker);
                    }
                    return;
                }
                {
                    let mut table = lock(&captures);
                    let Some(buffer) = table.get_mut(&speaker) else {
                        // Buffer torn down while we were running.
                        return;
                    };
                    buffer.push(chunk.clone());
                }
                let _ = hotword_tx.try_send(downmix_to_mono(&chunk));
                let tee = lock(&window).as_ref().map(|w| w.tee_tx.clone());
                if let Some(tee) = tee {
                    let _ = tee.send(chunk);
                }
            }
        })
    }

    fn on_speaking_stopped(self: &Arc<Self>, speaker: SpeakerId) {
        if let Some(state) = lock(&self.speakers).get(&speaker) {
            state.cancel_recognition();
        } else {
            return;
        }

        // Teardown is deferred so brief silence or a fast rejoin keeps the
        // accumulated history.
        let weak = Arc::downgrade(self);
        self.timers.rearm(
            TimerKey::for_speaker(TimerKind::RemovalGrace, speaker),
            defaults::millis(self.config.lifecycle.rejoin_grace_ms),
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.remove_speaker(speaker);
                }
            },
        );
    }

    fn remove_speaker(&self, speaker: SpeakerId) {
        if let Some(state) = lock(&self.speakers).remove(&speaker) {
            state.cancel_recognition();
            state.pump.abort();
            self.collaborators.hotword.remove(speaker);
        }
        lock(&self.captures).remove(&speaker);
        self.emit(SessionEvent::SpeakerRemoved { speaker });
        debug!(speaker, "speaker removed after grace period");
    }

    /// Same teardown as the grace expiry, but immediate. Used for decode
    /// faults; the speaker comes back on their next speaking event.
    fn isolate_speaker(&self, speaker: SpeakerId) {
        self.timers
            .cancel(TimerKey::for_speaker(TimerKind::RemovalGrace, speaker));
        self.remove_speaker(speaker);
    }

    fn arm_idle_disconnect_if_empty(self: &Arc<Self>) {
        let has_users = lock(&self.members).values().any(|member| !member.is_bot);
        if has_users {
            return;
        }
        let weak = Arc::downgrade(self);
        self.timers.rearm(
            TimerKey::session(TimerKind::IdleDisconnect),
            defaults::millis(self.config.lifecycle.idle_disconnect_ms),
            async move {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                info!("no users left, disconnecting idle session");
                inner.emit(SessionEvent::SessionIdle);
                let connection = lock(&inner.connection).take();
                inner.teardown();
                inner.emit(SessionEvent::Disconnected);
                if let Some(connection) = connection
                    && let Err(e) = connection.disconnect().await
                {
                    warn!(error = %e, "idle disconnect failed");
                }
            },
        );
    }

    fn on_hotword(self: Arc<Self>, speaker: SpeakerId, word: String) {
        let (listening, window_slot) = {
            let speakers = lock(&self.speakers);
            let Some(state) = speakers.get(&speaker) else {
                debug!(speaker, "hotword trigger for unknown speaker");
                return;
            };
            (state.listening.clone(), state.window.clone())
        };

        // Re-entrancy guard: one open window per speaker.
        if listening.swap(true, Ordering::SeqCst) {
            warn!(speaker, word, "capture window already open, ignoring trigger");
            return;
        }
        info!(speaker, word, "hotword triggered, opening capture window");
        self.emit(SessionEvent::HotwordTriggered {
            speaker,
            word: word.clone(),
        });

        self.play_interrupt(self.chimes.open.clone());

        let (tee_tx, tee_rx) = mpsc::unbounded_channel();
        let canceled = Arc::new(AtomicBool::new(false));
        *lock(&window_slot) = Some(RecognitionWindow {
            tee_tx,
            canceled: canceled.clone(),
        });

        let inner = self.clone();
        tokio::spawn(async move {
            inner
                .run_capture_window(speaker, tee_rx, listening, window_slot, canceled)
                .await;
        });
    }

    /// One bounded recognition window: tee the live chunks through an
    /// endpointer, then hand the captured audio to the recognizer.
    async fn run_capture_window(
        self: Arc<Self>,
        speaker: SpeakerId,
        mut tee_rx: mpsc::UnboundedReceiver<Vec<u8>>,
        listening: Arc<AtomicBool>,
        window_slot: Arc<Mutex<Option<RecognitionWindow>>>,
        canceled: Arc<AtomicBool>,
    ) {
        let done = Arc::new(Notify::new());
        let notify_done = done.clone();
        let endpointer = Endpointer::with_config(&self.config.endpoint, move || {
            notify_done.notify_one();
        });

        let mut captured = Vec::new();
        loop {
            tokio::select! {
                chunk = tee_rx.recv() => match chunk {
                    Some(chunk) => {
                        endpointer.process(&chunk);
                        captured.extend_from_slice(&chunk);
                    }
                    // Tee closed: the window was canceled or the pipeline
                    // went away.
                    None => break,
                },
                _ = done.notified() => break,
            }
        }
        endpointer.cancel();

        *lock(&window_slot) = None;
        listening.store(false, Ordering::SeqCst);

        if canceled.load(Ordering::SeqCst) {
            debug!(speaker, "capture window canceled");
            return;
        }

        self.play_interrupt(self.chimes.close.clone());

        let audio = AudioStream::from_pcm(captured);
        match self
            .collaborators
            .speech
            .recognize(audio, &self.language)
            .await
        {
            Ok(text) => {
                info!(speaker, text, "command recognized");
                self.emit(SessionEvent::CommandRecognized {
                    speaker,
                    text: text.clone(),
                });
                self.collaborators
                    .dispatcher
                    .handle_recognized_text(speaker, &text);
            }
            Err(e) => warn!(speaker, error = %e, "recognition failed"),
        }
    }

    fn play_interrupt(&self, pcm: Vec<u8>) {
        let Some(scheduler) = lock(&self.scheduler).clone() else {
            return;
        };
        scheduler.enqueue_interrupt(InterruptItem {
            source: Box::new(Cursor::new(pcm)),
            kind: StreamKind::Raw,
            priority: defaults::CHIME_PRIORITY,
            on_complete: None,
        });
    }

    /// Clears all per-speaker state: pumps, windows, buffers, hotword
    /// registrations, and pending timers.
    fn reset_speakers(&self) {
        let speakers: Vec<_> = lock(&self.speakers).drain().collect();
        for (speaker, state) in speakers {
            state.cancel_recognition();
            state.pump.abort();
            self.collaborators.hotword.remove(speaker);
        }
        lock(&self.captures).clear();
    }

    /// Full session teardown: per-speaker state plus scheduler, aligner,
    /// and timers. Leaves the connection handle to the caller.
    fn teardown(&self) {
        self.reset_speakers();
        self.timers.cancel_all();
        if let Some(scheduler) = lock(&self.scheduler).take() {
            scheduler.shutdown();
        }
        *lock(&self.aligner) = None;
    }
}
