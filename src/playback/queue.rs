//! Priority queue for out-of-band interrupt sounds.
//!
//! A stable min-heap: lower numeric priority plays first, and equal
//! priorities play in insertion order. FIFO-on-tie is an explicit policy
//! of this scheduler, enforced by a monotonically increasing sequence
//! number in the heap key.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::io::Read;

use crate::transport::{PlaybackControl, StreamKind};

/// A requested interrupt sound.
pub struct InterruptItem {
    /// One-shot byte source for the sound.
    pub source: Box<dyn Read + Send>,
    /// How the sink consumes the bytes.
    pub kind: StreamKind,
    /// Urgency; lower values preempt higher ones.
    pub priority: u8,
    /// Invoked after the sound has played to completion, batched with the
    /// other completions of the same interrupt burst.
    pub on_complete: Option<Box<dyn FnOnce() + Send>>,
}

impl std::fmt::Debug for InterruptItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptItem")
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// An interrupt inside the queue, possibly mid-playback.
///
/// `source` is taken when the sound first reaches the sink; `control` is
/// present while the sound is suspended after being preempted, so it can
/// resume instead of restarting.
pub(crate) struct QueuedInterrupt {
    pub priority: u8,
    pub seq: u64,
    pub kind: StreamKind,
    pub source: Option<Box<dyn Read + Send>>,
    pub control: Option<Box<dyn PlaybackControl>>,
    pub on_complete: Option<Box<dyn FnOnce() + Send>>,
}

impl QueuedInterrupt {
    /// Heap ordering key.
    pub fn key(&self) -> (u8, u64) {
        (self.priority, self.seq)
    }
}

struct HeapEntry(QueuedInterrupt);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.key() == other.0.key()
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the smallest key on
        // top.
        other.0.key().cmp(&self.0.key())
    }
}

/// Stable min-heap of pending interrupts.
pub(crate) struct InterruptQueue {
    heap: BinaryHeap<HeapEntry>,
    next_seq: u64,
}

impl InterruptQueue {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Enqueues a new interrupt and returns its heap key.
    pub fn push(&mut self, item: InterruptItem) -> (u8, u64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let queued = QueuedInterrupt {
            priority: item.priority,
            seq,
            kind: item.kind,
            source: Some(item.source),
            control: None,
            on_complete: item.on_complete,
        };
        let key = queued.key();
        self.heap.push(HeapEntry(queued));
        key
    }

    /// Returns a preempted (suspended) interrupt to the queue, keeping its
    /// original key so it resumes at its old position.
    pub fn restore(&mut self, queued: QueuedInterrupt) {
        self.heap.push(HeapEntry(queued));
    }

    /// Removes and returns the most urgent interrupt.
    pub fn pop(&mut self) -> Option<QueuedInterrupt> {
        self.heap.pop().map(|entry| entry.0)
    }

    /// Heap key of the most urgent pending interrupt.
    pub fn peek_key(&self) -> Option<(u8, u64)> {
        self.heap.peek().map(|entry| entry.0.key())
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Removes all pending entries, handing them back for teardown. A
    /// suspended entry may still hold a live sink control that the caller
    /// must stop.
    pub fn drain(&mut self) -> Vec<QueuedInterrupt> {
        self.heap.drain().map(|entry| entry.0).collect()
    }
}
