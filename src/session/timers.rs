//! Central keyed-timer table.
//!
//! Every scheduled delay in the session (removal grace, idle disconnect,
//! recognition windows) goes through this table, which enforces the one
//! invariant ad hoc timer handles keep violating: arming a timer for a key
//! cancels any pending timer for that same key first, so two timers for
//! one key are never live simultaneously.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::session::SpeakerId;

/// What a timer is guarding; combined with an optional speaker it forms
/// the timer key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Grace period before a stopped speaker's state is torn down.
    RemovalGrace,
    /// Session-wide disconnect after the last non-bot member leaves.
    IdleDisconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub kind: TimerKind,
    pub speaker: Option<SpeakerId>,
}

impl TimerKey {
    pub fn for_speaker(kind: TimerKind, speaker: SpeakerId) -> Self {
        Self {
            kind,
            speaker: Some(speaker),
        }
    }

    pub fn session(kind: TimerKind) -> Self {
        Self {
            kind,
            speaker: None,
        }
    }
}

/// Cancelable scheduled tasks keyed by `(kind, speaker)`.
#[derive(Default)]
pub struct TimerTable {
    timers: Mutex<HashMap<TimerKey, JoinHandle<()>>>,
}

impl TimerTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TimerKey, JoinHandle<()>>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancels any pending timer for `key`, then arms `action` to run
    /// after `delay`.
    pub fn rearm<F>(self: &Arc<Self>, key: TimerKey, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let table = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The entry removes itself so `is_armed` reflects reality; a
            // timer that has begun executing can no longer be canceled.
            table.lock().remove(&key);
            action.await;
        });
        if let Some(previous) = self.lock().insert(key, task) {
            previous.abort();
        }
    }

    /// Cancels the pending timer for `key`. Returns whether one was armed.
    pub fn cancel(&self, key: TimerKey) -> bool {
        match self.lock().remove(&key) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    /// Cancels every pending timer.
    pub fn cancel_all(&self) {
        for (_, task) in self.lock().drain() {
            task.abort();
        }
    }

    /// Whether a timer is currently armed for `key`.
    pub fn is_armed(&self, key: TimerKey) -> bool {
        self.lock().contains_key(&key)
    }
}

impl Drop for TimerTable {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
