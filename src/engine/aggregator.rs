//! Lock-guarded buffer of recent signals

use crate::signal::Signal;
use crate::util::lock;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// How long raw signals are kept no matter what
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(300);

/// Thread-safe, insertion-ordered store of recent [`Signal`]s.
///
/// Every method takes the lock exactly once, so calls are linearizable with
/// respect to each other.
#[derive(Debug)]
pub struct SignalAggregator {
    signals: Mutex<VecDeque<Signal>>,
    retention: Duration,
}

impl Default for SignalAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl SignalAggregator {
    pub fn new(retention: Duration) -> Self {
        Self {
            signals: Mutex::new(VecDeque::new()),
            retention,
        }
    }

    /// Append a signal, then drop everything older than the retention window
    pub fn add(&self, signal: Signal) {
        let mut signals = lock(&self.signals);
        signals.push_back(signal);
        retain_recent(&mut signals, self.retention, Instant::now());
    }

    /// Copy of the current buffer
    pub fn snapshot(&self) -> Vec<Signal> {
        lock(&self.signals).iter().cloned().collect()
    }

    pub fn clear(&self) {
        lock(&self.signals).clear();
    }

    /// Drop signals older than `window`; returns how many were removed
    pub fn prune_older_than(&self, window: Duration) -> usize {
        let mut signals = lock(&self.signals);
        let before = signals.len();
        retain_recent(&mut signals, window, Instant::now());
        before - signals.len()
    }

    /// Drain the buffer if `pred` accepts its current contents.
    ///
    /// The check and the drain happen under one lock, so a signal added
    /// concurrently is either judged together with the rest or survives.
    pub fn take_if<F>(&self, pred: F) -> Option<Vec<Signal>>
    where
        F: FnOnce(&[Signal]) -> bool,
    {
        let mut signals = lock(&self.signals);
        let contiguous = signals.make_contiguous();
        if pred(contiguous) {
            Some(signals.drain(..).collect())
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.signals).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.signals).is_empty()
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }
}

fn retain_recent(signals: &mut VecDeque<Signal>, window: Duration, now: Instant) {
    signals.retain(|s| s.age_at(now) <= window);
}
