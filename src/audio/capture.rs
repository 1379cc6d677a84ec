//! Per-speaker ring buffer of recent decoded audio.
//!
//! Each buffer keeps two bounded deques of fixed-size chunks: the raw
//! stream as delivered by the decode pipeline, and an aligned variant that
//! additionally receives synthetic silence from the [`SilenceAligner`]
//! (`crate::audio::SilenceAligner`) so intermittent speakers stay
//! comparable in wall-clock duration.

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::defaults;

/// Configuration for a capture buffer.
#[derive(Debug, Clone)]
pub struct CaptureBufferConfig {
    /// Maximum number of chunks retained per deque (ring bound).
    pub max_chunks: usize,
    /// Debounce window guarding synthetic silence insertion.
    pub debounce: Duration,
    /// Whether the aligned deque is maintained for this buffer.
    pub alignment: bool,
}

impl Default for CaptureBufferConfig {
    fn default() -> Self {
        Self {
            max_chunks: defaults::MAX_CHUNKS,
            debounce: defaults::millis(defaults::PUSH_DEBOUNCE_MS),
            alignment: true,
        }
    }
}

/// Bounded ring buffer of recent audio chunks for one speaker.
pub struct CaptureBuffer {
    raw: VecDeque<Vec<u8>>,
    aligned: Option<VecDeque<Vec<u8>>>,
    config: CaptureBufferConfig,
    last_real_push: Option<Instant>,
    clock: Arc<dyn Clock>,
}

impl CaptureBuffer {
    /// Creates a buffer with default configuration (alignment enabled).
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_config(CaptureBufferConfig::default(), clock)
    }

    /// Creates a buffer with custom configuration.
    pub fn with_config(config: CaptureBufferConfig, clock: Arc<dyn Clock>) -> Self {
        let aligned = config.alignment.then(VecDeque::new);
        Self {
            raw: VecDeque::new(),
            aligned,
            config,
            last_real_push: None,
            clock,
        }
    }

    /// Appends a decoded chunk to the raw deque (and the aligned deque when
    /// alignment is enabled), evicting the oldest chunk first when full.
    ///
    /// Resets the silence debounce window.
    pub fn push(&mut self, chunk: Vec<u8>) {
        Self::push_bounded(&mut self.raw, chunk.clone(), self.config.max_chunks);
        if let Some(aligned) = self.aligned.as_mut() {
            Self::push_bounded(aligned, chunk, self.config.max_chunks);
        }
        self.last_real_push = Some(self.clock.now());
    }

    /// Appends a synthetic silence chunk to the aligned deque only.
    ///
    /// Dropped when a real chunk arrived within the debounce window, so a
    /// tick landing on top of a real packet cannot double-count duration.
    /// Returns whether the chunk was appended.
    pub fn push_silence(&mut self, chunk: Vec<u8>) -> bool {
        let Some(aligned) = self.aligned.as_mut() else {
            return false;
        };
        if let Some(last) = self.last_real_push
            && self.clock.now().duration_since(last) < self.config.debounce
        {
            return false;
        }
        Self::push_bounded(aligned, chunk, self.config.max_chunks);
        true
    }

    fn push_bounded(deque: &mut VecDeque<Vec<u8>>, chunk: Vec<u8>, max: usize) {
        while deque.len() >= max {
            deque.pop_front();
        }
        deque.push_back(chunk);
    }

    /// Returns the most recent `duration_secs` of audio, concatenated.
    ///
    /// The chunk count is `duration * bytes_per_second / chunk_bytes`,
    /// capped at the ring bound. Requests exceeding the available history
    /// return everything retained; an empty buffer returns empty bytes.
    pub fn get_buffer(&self, duration_secs: f64, aligned: bool) -> Vec<u8> {
        let deque = self.select(aligned);
        let count = ((duration_secs * defaults::BYTES_PER_SECOND as f64)
            / defaults::CHUNK_BYTES as f64)
            .ceil() as usize;
        let count = count.min(self.config.max_chunks);
        let skip = deque.len().saturating_sub(count);

        let mut out = Vec::new();
        for chunk in deque.iter().skip(skip) {
            out.extend_from_slice(chunk);
        }
        out
    }

    /// Wraps [`CaptureBuffer::get_buffer`] output as a one-shot reader.
    pub fn get_stream(&self, duration_secs: f64, aligned: bool) -> Cursor<Vec<u8>> {
        Cursor::new(self.get_buffer(duration_secs, aligned))
    }

    /// Full retained history of the aligned deque, concatenated.
    ///
    /// This is what the mixer consumes; buffers without alignment fall back
    /// to their raw history.
    pub fn aligned_bytes(&self) -> Vec<u8> {
        let deque = self.select(true);
        let mut out = Vec::with_capacity(deque.iter().map(Vec::len).sum());
        for chunk in deque {
            out.extend_from_slice(chunk);
        }
        out
    }

    fn select(&self, aligned: bool) -> &VecDeque<Vec<u8>> {
        if aligned {
            self.aligned.as_ref().unwrap_or(&self.raw)
        } else {
            &self.raw
        }
    }

    /// Number of chunks currently held in the raw deque.
    pub fn raw_len(&self) -> usize {
        self.raw.len()
    }

    /// Number of chunks currently held in the aligned deque (0 when
    /// alignment is disabled).
    pub fn aligned_len(&self) -> usize {
        self.aligned.as_ref().map_or(0, VecDeque::len)
    }
}
