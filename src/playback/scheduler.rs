//! Preemptive playback scheduler.
//!
//! A single actor task owns the main track queue, the interrupt queue, and
//! the playback state; everything else talks to it through a command
//! channel, so the outgoing sink has exactly one writer and no state is
//! ever mutated from two places. Interrupts preempt the main track (which
//! is paused, not destroyed, and resumes sample-accurately) and each other
//! by priority; completion callbacks of an interrupt burst are delivered
//! together once the burst drains.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::config::PlaybackConfig;
use crate::defaults;
use crate::error::Result;
use crate::playback::queue::{InterruptItem, InterruptQueue, QueuedInterrupt};
use crate::transport::{AudioStream, PlayOptions, PlaybackControl, VoiceConnection};

/// A main-queue entry. The queue that owns track metadata lives outside
/// this core; the scheduler only needs completion state and a loadable
/// stream.
#[async_trait]
pub trait Track: Send {
    /// Whether the track has already been completed (played, skipped, or
    /// stopped).
    fn is_finished(&self) -> bool;

    /// Records the track as completed, notifying its owner.
    fn mark_finished(&mut self);

    /// Resolves the playable stream. May be slow (network fetch); the
    /// scheduler discards the result if the track was finished meanwhile.
    async fn load(&mut self) -> Result<AudioStream>;
}

/// Scheduler playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
    Interrupting,
}

/// Snapshot of the scheduler's observable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStatus {
    pub state: PlaybackState,
    /// Tracks waiting behind the current one.
    pub queued_tracks: usize,
    /// Interrupts pending in the priority queue (excluding the active one).
    pub pending_interrupts: usize,
    /// Logical volume in [0, 100] (rounded).
    pub volume: u32,
}

/// Maps a logical volume in [0, 100] onto the sink's amplitude multiplier:
/// 0 → 0.5x, 100 → 2.0x.
pub fn volume_multiplier(volume: f32) -> f32 {
    (volume / 100.0) * (defaults::VOLUME_CEILING - defaults::VOLUME_FLOOR) + defaults::VOLUME_FLOOR
}

enum Command {
    EnqueueTrack {
        track: Box<dyn Track>,
        reply: oneshot::Sender<bool>,
    },
    EnqueueInterrupt(InterruptItem),
    Pause,
    Resume,
    Stop,
    Skip {
        count: usize,
    },
    Shuffle,
    SetVolume {
        value: f32,
        relative: bool,
    },
    Status {
        reply: oneshot::Sender<SchedulerStatus>,
    },
    TrackLoaded {
        generation: u64,
        track: Box<dyn Track>,
        result: Result<AudioStream>,
    },
    TrackEnded {
        generation: u64,
        result: Result<()>,
    },
    InterruptEnded {
        seq: u64,
        result: Result<()>,
    },
    Shutdown,
}

/// Handle to the scheduler actor. Cheap to clone; all methods are
/// fire-and-forget except the ones that need an answer.
#[derive(Clone)]
pub struct PlaybackScheduler {
    tx: mpsc::UnboundedSender<Command>,
}

impl PlaybackScheduler {
    /// Spawns the scheduler actor over the given connection sink.
    pub fn start(sink: Arc<dyn VoiceConnection>, config: &PlaybackConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = SchedulerTask {
            rx,
            tx: tx.clone(),
            sink,
            state: PlaybackState::Idle,
            resume_state: PlaybackState::Idle,
            queue: VecDeque::new(),
            current: None,
            interrupts: InterruptQueue::new(),
            active_interrupt: None,
            burst_callbacks: Vec::new(),
            volume: config.initial_volume,
            next_generation: 0,
        };
        tokio::spawn(task.run());
        Self { tx }
    }

    /// Appends a track to the main queue. Returns whether playback was
    /// newly started by this call.
    pub async fn enqueue_track(&self, track: Box<dyn Track>) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::EnqueueTrack { track, reply }).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Queues an out-of-band sound, preempting lower-urgency playback.
    pub fn enqueue_interrupt(&self, item: InterruptItem) {
        let _ = self.tx.send(Command::EnqueueInterrupt(item));
    }

    /// Pauses the main track. No-op unless playing.
    pub fn pause(&self) {
        let _ = self.tx.send(Command::Pause);
    }

    /// Resumes the main track. No-op unless paused.
    pub fn resume(&self) {
        let _ = self.tx.send(Command::Resume);
    }

    /// Force-finishes the current track and discards the rest of the main
    /// queue, resetting all internal state.
    pub fn stop(&self) {
        let _ = self.tx.send(Command::Stop);
    }

    /// Force-finishes the current track plus `count - 1` queued ones, then
    /// plays the next remaining track if any.
    pub fn skip(&self, count: usize) {
        let _ = self.tx.send(Command::Skip { count });
    }

    /// Randomizes the order of the queued (not-yet-playing) tracks.
    pub fn shuffle(&self) {
        let _ = self.tx.send(Command::Shuffle);
    }

    /// Sets the logical volume in [0, 100]; in relative mode `value` is a
    /// factor applied to the current volume (e.g. 0.5 halves it).
    pub fn set_volume(&self, value: f32, relative: bool) {
        let _ = self.tx.send(Command::SetVolume { value, relative });
    }

    /// Snapshot of the scheduler state. Also serves as a completion
    /// barrier: every command sent before this one has been processed when
    /// the reply arrives.
    pub async fn status(&self) -> SchedulerStatus {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::Status { reply });
        rx.await.unwrap_or(SchedulerStatus {
            state: PlaybackState::Idle,
            queued_tracks: 0,
            pending_interrupts: 0,
            volume: 0,
        })
    }

    /// Stops playback and terminates the actor task.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}

struct CurrentTrack {
    generation: u64,
    /// Owned here except while the load task holds it.
    track: Option<Box<dyn Track>>,
    /// Present once the sink accepted the stream.
    control: Option<Box<dyn PlaybackControl>>,
    paused_for_interrupt: bool,
}

struct ActiveInterrupt {
    queued: QueuedInterrupt,
}

struct SchedulerTask {
    rx: mpsc::UnboundedReceiver<Command>,
    tx: mpsc::UnboundedSender<Command>,
    sink: Arc<dyn VoiceConnection>,
    state: PlaybackState,
    /// State to restore when an interrupt burst drains.
    resume_state: PlaybackState,
    queue: VecDeque<Box<dyn Track>>,
    current: Option<CurrentTrack>,
    interrupts: InterruptQueue,
    active_interrupt: Option<ActiveInterrupt>,
    /// Completion callbacks collected while a burst is in flight.
    burst_callbacks: Vec<Box<dyn FnOnce() + Send>>,
    volume: f32,
    next_generation: u64,
}

impl SchedulerTask {
    async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            match command {
                Command::EnqueueTrack { track, reply } => {
                    let started = self.enqueue_track(track);
                    let _ = reply.send(started);
                }
                Command::EnqueueInterrupt(item) => self.enqueue_interrupt(item).await,
                Command::Pause => self.pause(),
                Command::Resume => self.resume(),
                Command::Stop => self.stop(),
                Command::Skip { count } => self.skip(count),
                Command::Shuffle => self.shuffle(),
                Command::SetVolume { value, relative } => self.set_volume(value, relative),
                Command::Status { reply } => {
                    let _ = reply.send(SchedulerStatus {
                        state: self.state,
                        queued_tracks: self.queue.len(),
                        pending_interrupts: self.interrupts.len(),
                        volume: self.volume.round() as u32,
                    });
                }
                Command::TrackLoaded {
                    generation,
                    track,
                    result,
                } => self.on_track_loaded(generation, track, result).await,
                Command::TrackEnded { generation, result } => {
                    self.on_track_ended(generation, result)
                }
                Command::InterruptEnded { seq, result } => {
                    self.on_interrupt_ended(seq, result).await
                }
                Command::Shutdown => {
                    self.stop();
                    break;
                }
            }
        }
    }

    fn play_options(&self, kind: crate::transport::StreamKind) -> PlayOptions {
        PlayOptions {
            kind,
            volume: volume_multiplier(self.volume),
        }
    }

    fn enqueue_track(&mut self, track: Box<dyn Track>) -> bool {
        self.queue.push_back(track);
        if self.current.is_none() {
            self.start_next_track();
            true
        } else {
            false
        }
    }

    /// Pops the next unfinished track and hands it to a load task. The
    /// loaded stream comes back as a `TrackLoaded` command.
    fn start_next_track(&mut self) {
        while let Some(track) = self.queue.pop_front() {
            if track.is_finished() {
                continue;
            }
            let generation = self.next_generation;
            self.next_generation += 1;
            self.current = Some(CurrentTrack {
                generation,
                track: None,
                control: None,
                paused_for_interrupt: false,
            });

            let tx = self.tx.clone();
            let mut track = track;
            tokio::spawn(async move {
                let result = track.load().await;
                let _ = tx.send(Command::TrackLoaded {
                    generation,
                    track,
                    result,
                });
            });
            return;
        }
        // Queue exhausted.
        self.current = None;
        if self.state == PlaybackState::Playing || self.state == PlaybackState::Paused {
            self.state = PlaybackState::Idle;
        }
        if self.state == PlaybackState::Interrupting {
            self.resume_state = PlaybackState::Idle;
        }
    }

    async fn on_track_loaded(
        &mut self,
        generation: u64,
        mut track: Box<dyn Track>,
        result: Result<AudioStream>,
    ) {
        let is_current = self
            .current
            .as_ref()
            .is_some_and(|cur| cur.generation == generation);
        if !is_current || track.is_finished() {
            // The track was stopped or skipped while its stream was still
            // loading; the late stream must not be played.
            debug!(generation, "discarding stream loaded for finished track");
            if !track.is_finished() {
                track.mark_finished();
            }
            if is_current {
                self.current = None;
                self.start_next_track();
            }
            return;
        }

        let stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "track failed to load, advancing");
                track.mark_finished();
                self.current = None;
                self.start_next_track();
                return;
            }
        };

        let options = self.play_options(stream.kind);
        match self.sink.play(stream, options).await {
            Ok(playback) => {
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let result = playback.finished.await.unwrap_or(Ok(()));
                    let _ = tx.send(Command::TrackEnded { generation, result });
                });

                let under_interrupt = self.active_interrupt.is_some();
                if let Some(cur) = self.current.as_mut() {
                    cur.track = Some(track);
                    let mut control = playback.control;
                    if under_interrupt {
                        // An interrupt burst started while the track was
                        // loading; hold it until the burst drains.
                        control.pause();
                        cur.paused_for_interrupt = true;
                        self.resume_state = PlaybackState::Playing;
                    } else {
                        self.state = PlaybackState::Playing;
                    }
                    cur.control = Some(control);
                }
            }
            Err(e) => {
                warn!(error = %e, "sink rejected track stream, advancing");
                track.mark_finished();
                self.current = None;
                self.start_next_track();
            }
        }
    }

    fn on_track_ended(&mut self, generation: u64, result: std::result::Result<(), crate::error::VoxError>) {
        let is_current = self
            .current
            .as_ref()
            .is_some_and(|cur| cur.generation == generation);
        if !is_current {
            return;
        }
        if let Err(e) = result {
            // Sink faults are never fatal; the track is treated as done.
            warn!(error = %e, "sink error during track playback, treating as completion");
        }
        if let Some(mut cur) = self.current.take()
            && let Some(track) = cur.track.as_mut()
        {
            track.mark_finished();
        }
        self.start_next_track();
    }

    async fn enqueue_interrupt(&mut self, item: InterruptItem) {
        debug!(priority = item.priority, "interrupt queued");
        self.interrupts.push(item);
        self.activate_most_urgent().await;
    }

    /// Ensures the lowest-priority-value pending interrupt is the one in
    /// flight, preempting the active one if it has been outranked.
    async fn activate_most_urgent(&mut self) {
        let Some(head_key) = self.interrupts.peek_key() else {
            return;
        };

        if let Some(active) = self.active_interrupt.as_ref() {
            if active.queued.key() <= head_key {
                // The in-flight interrupt is still the most urgent.
                return;
            }
            // Outranked: suspend and put it back; it resumes (not
            // restarts) when it becomes head again.
            if let Some(mut active) = self.active_interrupt.take() {
                if let Some(control) = active.queued.control.as_mut() {
                    control.pause();
                }
                self.interrupts.restore(active.queued);
            }
        } else {
            // First interrupt of a burst: suspend the main track.
            if self.state != PlaybackState::Interrupting {
                self.resume_state = self.state;
            }
            if self.state == PlaybackState::Playing
                && let Some(cur) = self.current.as_mut()
                && let Some(control) = cur.control.as_mut()
            {
                control.pause();
                cur.paused_for_interrupt = true;
            }
            self.state = PlaybackState::Interrupting;
        }

        self.play_interrupt_head().await;
    }

    /// Starts (or resumes) the head of the interrupt queue. Sink failures
    /// count the interrupt as completed and move on to the next.
    async fn play_interrupt_head(&mut self) {
        while let Some(mut queued) = self.interrupts.pop() {
            if let Some(control) = queued.control.as_mut() {
                control.resume();
                self.active_interrupt = Some(ActiveInterrupt { queued });
                return;
            }

            let Some(reader) = queued.source.take() else {
                // Exhausted source with no control; count it as done.
                if let Some(callback) = queued.on_complete.take() {
                    self.burst_callbacks.push(callback);
                }
                continue;
            };
            let stream = AudioStream {
                kind: queued.kind,
                reader,
            };
            let options = self.play_options(queued.kind);
            match self.sink.play(stream, options).await {
                Ok(playback) => {
                    let seq = queued.seq;
                    let tx = self.tx.clone();
                    tokio::spawn(async move {
                        let result = playback.finished.await.unwrap_or(Ok(()));
                        let _ = tx.send(Command::InterruptEnded { seq, result });
                    });
                    queued.control = Some(playback.control);
                    self.active_interrupt = Some(ActiveInterrupt { queued });
                    return;
                }
                Err(e) => {
                    warn!(error = %e, priority = queued.priority, "sink rejected interrupt, skipping it");
                    if let Some(callback) = queued.on_complete.take() {
                        self.burst_callbacks.push(callback);
                    }
                }
            }
        }
        // Nothing left to play.
        self.finish_burst();
    }

    async fn on_interrupt_ended(&mut self, seq: u64, result: std::result::Result<(), crate::error::VoxError>) {
        let is_active = self
            .active_interrupt
            .as_ref()
            .is_some_and(|active| active.queued.seq == seq);
        if !is_active {
            return;
        }
        if let Err(e) = result {
            warn!(error = %e, "sink error during interrupt playback, treating as completion");
        }
        if let Some(mut active) = self.active_interrupt.take()
            && let Some(callback) = active.queued.on_complete.take()
        {
            self.burst_callbacks.push(callback);
        }

        if self.interrupts.is_empty() {
            self.finish_burst();
        } else {
            self.play_interrupt_head().await;
        }
    }

    /// Runs the completion callbacks collected over the burst (in finish
    /// order), then restores the pre-burst state.
    fn finish_burst(&mut self) {
        for callback in self.burst_callbacks.drain(..) {
            callback();
        }
        if self.state != PlaybackState::Interrupting {
            return;
        }
        if let Some(cur) = self.current.as_mut()
            && cur.paused_for_interrupt
        {
            if let Some(control) = cur.control.as_mut() {
                control.resume();
            }
            cur.paused_for_interrupt = false;
            self.state = PlaybackState::Playing;
        } else {
            // The burst paused nothing (track user-paused, still loading,
            // or absent); the pre-burst state stands.
            self.state = self.resume_state;
        }
    }

    fn pause(&mut self) {
        if self.state != PlaybackState::Playing {
            return;
        }
        if let Some(cur) = self.current.as_mut()
            && let Some(control) = cur.control.as_mut()
        {
            control.pause();
            self.state = PlaybackState::Paused;
        }
    }

    fn resume(&mut self) {
        if self.state != PlaybackState::Paused {
            return;
        }
        if let Some(cur) = self.current.as_mut()
            && let Some(control) = cur.control.as_mut()
        {
            control.resume();
            self.state = PlaybackState::Playing;
        }
    }

    fn stop(&mut self) {
        if let Some(mut cur) = self.current.take() {
            if let Some(control) = cur.control.as_mut() {
                control.stop();
            }
            if let Some(track) = cur.track.as_mut() {
                track.mark_finished();
            }
        }
        for mut track in self.queue.drain(..) {
            // Discarded without playing, but still recorded as completed.
            track.mark_finished();
        }
        if let Some(mut active) = self.active_interrupt.take()
            && let Some(control) = active.queued.control.as_mut()
        {
            control.stop();
        }
        // Preempted interrupts suspended back into the queue still hold
        // live sink streams; stop those too.
        for mut queued in self.interrupts.drain() {
            if let Some(control) = queued.control.as_mut() {
                control.stop();
            }
        }
        self.burst_callbacks.clear();
        self.state = PlaybackState::Idle;
        self.resume_state = PlaybackState::Idle;
    }

    fn skip(&mut self, count: usize) {
        let count = count.max(1);
        if let Some(mut cur) = self.current.take() {
            if let Some(control) = cur.control.as_mut() {
                control.stop();
            }
            if let Some(track) = cur.track.as_mut() {
                track.mark_finished();
            }
        }
        for _ in 0..count - 1 {
            let Some(mut track) = self.queue.pop_front() else {
                break;
            };
            track.mark_finished();
        }
        self.start_next_track();
    }

    fn shuffle(&mut self) {
        if self.queue.len() < 2 {
            return;
        }
        self.queue.make_contiguous().shuffle(&mut rand::rng());
    }

    fn set_volume(&mut self, value: f32, relative: bool) {
        let target = if relative { self.volume * value } else { value };
        self.volume = target.clamp(0.0, 100.0);
        let multiplier = volume_multiplier(self.volume);
        if let Some(cur) = self.current.as_mut()
            && let Some(control) = cur.control.as_mut()
        {
            control.set_volume(multiplier);
        }
        if let Some(active) = self.active_interrupt.as_mut()
            && let Some(control) = active.queued.control.as_mut()
        {
            control.set_volume(multiplier);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VoxError;
    use crate::transport::{ActivePlayback, StreamKind};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Events recorded by mock playback controls, tagged with the play
    /// index on the sink.
    type ControlLog = Arc<Mutex<Vec<(usize, &'static str)>>>;

    struct MockControl {
        index: usize,
        log: ControlLog,
    }

    impl PlaybackControl for MockControl {
        fn pause(&mut self) {
            self.log.lock().expect("log lock").push((self.index, "pause"));
        }
        fn resume(&mut self) {
            self.log.lock().expect("log lock").push((self.index, "resume"));
        }
        fn stop(&mut self) {
            self.log.lock().expect("log lock").push((self.index, "stop"));
        }
        fn set_volume(&mut self, _multiplier: f32) {
            self.log
                .lock()
                .expect("log lock")
                .push((self.index, "set_volume"));
        }
    }

    #[derive(Default)]
    struct MockSink {
        log: ControlLog,
        /// Senders resolving the finished signal of each play, in order.
        finishers: Mutex<Vec<Option<oneshot::Sender<Result<()>>>>>,
        volumes: Mutex<Vec<f32>>,
    }

    impl MockSink {
        fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn play_count(&self) -> usize {
            self.finishers.lock().expect("finishers lock").len()
        }

        /// Completes the `index`-th play successfully.
        fn finish(&self, index: usize) {
            let sender = self.finishers.lock().expect("finishers lock")[index]
                .take()
                .expect("play already finished");
            let _ = sender.send(Ok(()));
        }

        /// Completes the `index`-th play with a sink error.
        fn fail(&self, index: usize) {
            let sender = self.finishers.lock().expect("finishers lock")[index]
                .take()
                .expect("play already finished");
            let _ = sender.send(Err(VoxError::Sink {
                message: "underrun".to_string(),
            }));
        }
    }

    #[async_trait]
    impl VoiceConnection for MockSink {
        async fn play(&self, _stream: AudioStream, options: PlayOptions) -> Result<ActivePlayback> {
            let (tx, rx) = oneshot::channel();
            let index = {
                let mut finishers = self.finishers.lock().expect("finishers lock");
                finishers.push(Some(tx));
                finishers.len() - 1
            };
            self.volumes.lock().expect("volumes lock").push(options.volume);
            Ok(ActivePlayback {
                control: Box::new(MockControl {
                    index,
                    log: self.log.clone(),
                }),
                finished: rx,
            })
        }

        fn create_receive_stream(
            &self,
            _speaker: crate::session::SpeakerId,
        ) -> Result<mpsc::Receiver<Vec<u8>>> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }

        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }
    }

    struct MockTrack {
        id: usize,
        finished: Arc<AtomicBool>,
        completed: Arc<Mutex<Vec<usize>>>,
    }

    impl MockTrack {
        fn new(id: usize, completed: Arc<Mutex<Vec<usize>>>) -> Box<Self> {
            Box::new(Self {
                id,
                finished: Arc::new(AtomicBool::new(false)),
                completed,
            })
        }
    }

    #[async_trait]
    impl Track for MockTrack {
        fn is_finished(&self) -> bool {
            self.finished.load(Ordering::SeqCst)
        }

        fn mark_finished(&mut self) {
            if !self.finished.swap(true, Ordering::SeqCst) {
                self.completed.lock().expect("completed lock").push(self.id);
            }
        }

        async fn load(&mut self) -> Result<AudioStream> {
            Ok(AudioStream::from_pcm(vec![self.id as u8; 4]))
        }
    }

    fn interrupt(priority: u8, order: &Arc<Mutex<Vec<u8>>>) -> InterruptItem {
        let order = order.clone();
        InterruptItem {
            source: Box::new(std::io::Cursor::new(vec![priority; 4])),
            kind: StreamKind::Raw,
            priority,
            on_complete: Some(Box::new(move || {
                order.lock().expect("order lock").push(priority);
            })),
        }
    }

    fn scheduler_over(sink: &Arc<MockSink>) -> PlaybackScheduler {
        PlaybackScheduler::start(sink.clone(), &PlaybackConfig::default())
    }

    /// Lets spawned watcher/load tasks run before the next barrier.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[test]
    fn test_volume_multiplier_endpoints() {
        assert_eq!(volume_multiplier(0.0), 0.5);
        assert_eq!(volume_multiplier(100.0), 2.0);
        assert_eq!(volume_multiplier(50.0), 1.25);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_track_starts_playback_once() {
        let sink = MockSink::new();
        let scheduler = scheduler_over(&sink);
        let completed = Arc::new(Mutex::new(Vec::new()));

        assert!(scheduler.enqueue_track(MockTrack::new(1, completed.clone())).await);
        settle().await;
        assert!(!scheduler.enqueue_track(MockTrack::new(2, completed.clone())).await);
        settle().await;

        let status = scheduler.status().await;
        assert_eq!(status.state, PlaybackState::Playing);
        assert_eq!(status.queued_tracks, 1);
        assert_eq!(sink.play_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_finish_advances_queue() {
        let sink = MockSink::new();
        let scheduler = scheduler_over(&sink);
        let completed = Arc::new(Mutex::new(Vec::new()));

        scheduler.enqueue_track(MockTrack::new(1, completed.clone())).await;
        scheduler.enqueue_track(MockTrack::new(2, completed.clone())).await;
        settle().await;

        sink.finish(0);
        settle().await;

        assert_eq!(*completed.lock().expect("completed lock"), vec![1]);
        assert_eq!(sink.play_count(), 2);

        sink.finish(1);
        settle().await;
        assert_eq!(*completed.lock().expect("completed lock"), vec![1, 2]);
        assert_eq!(scheduler.status().await.state, PlaybackState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_priority_order_and_track_resume() {
        let sink = MockSink::new();
        let scheduler = scheduler_over(&sink);
        let completed = Arc::new(Mutex::new(Vec::new()));
        let order = Arc::new(Mutex::new(Vec::new()));

        scheduler.enqueue_track(MockTrack::new(1, completed.clone())).await;
        settle().await;

        // Queued in arrival order 5, 1, 3.
        scheduler.enqueue_interrupt(interrupt(5, &order));
        settle().await;
        scheduler.enqueue_interrupt(interrupt(1, &order));
        settle().await;
        scheduler.enqueue_interrupt(interrupt(3, &order));
        settle().await;

        assert_eq!(scheduler.status().await.state, PlaybackState::Interrupting);
        // Plays so far: 0 = track, 1 = interrupt 5, 2 = interrupt 1 (which
        // preempted 5). Interrupt 3 must not preempt 1.
        assert_eq!(sink.play_count(), 3);

        sink.finish(2); // interrupt 1 completes
        settle().await;
        assert_eq!(sink.play_count(), 4); // interrupt 3 starts fresh
        sink.finish(3); // interrupt 3 completes
        settle().await;
        // Interrupt 5 resumes its suspended stream rather than replaying.
        assert_eq!(sink.play_count(), 4);
        sink.finish(1); // interrupt 5 completes
        settle().await;

        assert_eq!(*order.lock().expect("order lock"), vec![1, 3, 5]);

        // Main track resumed, not restarted.
        let status = scheduler.status().await;
        assert_eq!(status.state, PlaybackState::Playing);
        assert_eq!(sink.play_count(), 4);

        let log = sink.log.lock().expect("log lock").clone();
        assert!(log.contains(&(0, "pause")), "track paused for burst: {log:?}");
        assert_eq!(log.last(), Some(&(0, "resume")));
        assert!(!log.contains(&(0, "stop")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_while_idle_returns_to_idle() {
        let sink = MockSink::new();
        let scheduler = scheduler_over(&sink);
        let order = Arc::new(Mutex::new(Vec::new()));

        scheduler.enqueue_interrupt(interrupt(2, &order));
        settle().await;
        assert_eq!(scheduler.status().await.state, PlaybackState::Interrupting);

        sink.finish(0);
        settle().await;
        assert_eq!(scheduler.status().await.state, PlaybackState::Idle);
        assert_eq!(*order.lock().expect("order lock"), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_two_of_three_tracks() {
        let sink = MockSink::new();
        let scheduler = scheduler_over(&sink);
        let completed = Arc::new(Mutex::new(Vec::new()));

        for id in 1..=3 {
            scheduler.enqueue_track(MockTrack::new(id, completed.clone())).await;
            settle().await;
        }

        scheduler.skip(2);
        settle().await;

        assert_eq!(*completed.lock().expect("completed lock"), vec![1, 2]);
        // t3 loaded and started.
        assert_eq!(sink.play_count(), 2);
        let status = scheduler.status().await;
        assert_eq!(status.state, PlaybackState::Playing);
        assert_eq!(status.queued_tracks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_on_single_track_queue_goes_idle() {
        let sink = MockSink::new();
        let scheduler = scheduler_over(&sink);
        let completed = Arc::new(Mutex::new(Vec::new()));

        scheduler.enqueue_track(MockTrack::new(1, completed.clone())).await;
        settle().await;

        scheduler.skip(2);
        settle().await;

        assert_eq!(*completed.lock().expect("completed lock"), vec![1]);
        let status = scheduler.status().await;
        assert_eq!(status.state, PlaybackState::Idle);
        assert_eq!(status.queued_tracks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_queue_and_resets() {
        let sink = MockSink::new();
        let scheduler = scheduler_over(&sink);
        let completed = Arc::new(Mutex::new(Vec::new()));
        let order = Arc::new(Mutex::new(Vec::new()));

        for id in 1..=3 {
            scheduler.enqueue_track(MockTrack::new(id, completed.clone())).await;
        }
        scheduler.enqueue_interrupt(interrupt(1, &order));
        settle().await;

        scheduler.stop();
        settle().await;

        let mut done = completed.lock().expect("completed lock").clone();
        done.sort_unstable();
        assert_eq!(done, vec![1, 2, 3]);

        let status = scheduler.status().await;
        assert_eq!(status.state, PlaybackState::Idle);
        assert_eq!(status.queued_tracks, 0);
        assert_eq!(status.pending_interrupts, 0);
        // No playback started after the reset.
        let plays_after_stop = sink.play_count();
        settle().await;
        assert_eq!(sink.play_count(), plays_after_stop);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_resume_roundtrip() {
        let sink = MockSink::new();
        let scheduler = scheduler_over(&sink);
        let completed = Arc::new(Mutex::new(Vec::new()));

        // Pause while idle is a no-op.
        scheduler.pause();
        settle().await;
        assert_eq!(scheduler.status().await.state, PlaybackState::Idle);

        scheduler.enqueue_track(MockTrack::new(1, completed.clone())).await;
        settle().await;

        scheduler.pause();
        settle().await;
        assert_eq!(scheduler.status().await.state, PlaybackState::Paused);

        // Resume while paused toggles back.
        scheduler.resume();
        settle().await;
        assert_eq!(scheduler.status().await.state, PlaybackState::Playing);

        let log = sink.log.lock().expect("log lock").clone();
        assert_eq!(log, vec![(0, "pause"), (0, "resume")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_during_user_pause_keeps_track_paused() {
        let sink = MockSink::new();
        let scheduler = scheduler_over(&sink);
        let completed = Arc::new(Mutex::new(Vec::new()));
        let order = Arc::new(Mutex::new(Vec::new()));

        scheduler.enqueue_track(MockTrack::new(1, completed.clone())).await;
        settle().await;
        scheduler.pause();
        settle().await;

        scheduler.enqueue_interrupt(interrupt(3, &order));
        settle().await;
        assert_eq!(scheduler.status().await.state, PlaybackState::Interrupting);

        sink.finish(1); // interrupt completes
        settle().await;

        // The track was paused by the user, not the burst; it must stay
        // paused and must not have been resumed behind the user's back.
        assert_eq!(scheduler.status().await.state, PlaybackState::Paused);
        let log = sink.log.lock().expect("log lock").clone();
        assert_eq!(log, vec![(0, "pause")]);

        // An explicit resume still works after the burst.
        scheduler.resume();
        settle().await;
        assert_eq!(scheduler.status().await.state, PlaybackState::Playing);
        let log = sink.log.lock().expect("log lock").clone();
        assert_eq!(log, vec![(0, "pause"), (0, "resume")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_also_stops_suspended_interrupt() {
        let sink = MockSink::new();
        let scheduler = scheduler_over(&sink);
        let order = Arc::new(Mutex::new(Vec::new()));

        // Interrupt 5 plays (control 0), then 1 preempts it (control 1),
        // leaving 5 suspended in the queue with a live stream.
        scheduler.enqueue_interrupt(interrupt(5, &order));
        settle().await;
        scheduler.enqueue_interrupt(interrupt(1, &order));
        settle().await;

        scheduler.stop();
        settle().await;

        let log = sink.log.lock().expect("log lock").clone();
        assert!(log.contains(&(1, "stop")), "active interrupt stopped: {log:?}");
        assert!(log.contains(&(0, "stop")), "suspended interrupt stopped: {log:?}");
        let status = scheduler.status().await;
        assert_eq!(status.state, PlaybackState::Idle);
        assert_eq!(status.pending_interrupts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_error_advances_to_next_track() {
        let sink = MockSink::new();
        let scheduler = scheduler_over(&sink);
        let completed = Arc::new(Mutex::new(Vec::new()));

        scheduler.enqueue_track(MockTrack::new(1, completed.clone())).await;
        scheduler.enqueue_track(MockTrack::new(2, completed.clone())).await;
        settle().await;

        sink.fail(0);
        settle().await;

        assert_eq!(*completed.lock().expect("completed lock"), vec![1]);
        assert_eq!(sink.play_count(), 2);
        assert_eq!(scheduler.status().await.state, PlaybackState::Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_volume_absolute_and_relative() {
        let sink = MockSink::new();
        let scheduler = scheduler_over(&sink);

        scheduler.set_volume(80.0, false);
        settle().await;
        assert_eq!(scheduler.status().await.volume, 80);

        // Relative: halve.
        scheduler.set_volume(0.5, true);
        settle().await;
        assert_eq!(scheduler.status().await.volume, 40);

        // Clamped at the top.
        scheduler.set_volume(10.0, true);
        settle().await;
        assert_eq!(scheduler.status().await.volume, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shuffle_without_queue_is_noop() {
        let sink = MockSink::new();
        let scheduler = scheduler_over(&sink);
        scheduler.shuffle();
        settle().await;
        assert_eq!(scheduler.status().await.state, PlaybackState::Idle);
    }
}
