//! Editing-behavior watcher: undo storms, fidgeting, typing flow and idleness
//!
//! Counters model burstiness rather than totals: every action decays the
//! counters it does not belong to, so a few undos spread across an hour of
//! normal editing never add up to a burst.

use super::SignalSink;
use crate::config::BehaviorTuning;
use crate::signal::{Signal, SignalKind};
use crate::util::{lock, sleep_or_cancel, spawn_supervised};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// One editor event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAction {
    Undo,
    Redo,
    /// A keystroke that inserted text
    Type,
    /// Cursor or selection moved without editing
    Selection,
    Save,
    Paste { data: String },
    /// Anything else; still counts as activity
    Other(String),
}

impl UserAction {
    /// Build from an editor's event name plus optional payload
    pub fn from_name(kind: &str, data: Option<&str>) -> Self {
        match kind {
            "undo" => UserAction::Undo,
            "redo" => UserAction::Redo,
            "type" => UserAction::Type,
            "selection" => UserAction::Selection,
            "save" => UserAction::Save,
            "paste" => UserAction::Paste {
                data: data.unwrap_or_default().to_string(),
            },
            other => UserAction::Other(other.to_string()),
        }
    }
}

/// Current value of the decaying counters
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BehaviorCounters {
    pub undo: f64,
    pub redo: f64,
    pub typing: f64,
    pub fidget: f64,
}

#[derive(Debug)]
struct BehaviorState {
    last_action: Instant,
    counters: BehaviorCounters,
    typing_started: Option<Instant>,
    idle_warned: bool,
    deep_idle_warned: bool,
}

impl BehaviorState {
    fn new(now: Instant) -> Self {
        Self {
            last_action: now,
            counters: BehaviorCounters::default(),
            typing_started: None,
            idle_warned: false,
            deep_idle_warned: false,
        }
    }
}

pub struct UserBehaviorWatcher {
    sink: Arc<dyn SignalSink>,
    tuning: BehaviorTuning,
    active: AtomicBool,
    state: Mutex<BehaviorState>,
}

impl UserBehaviorWatcher {
    pub fn new(sink: Arc<dyn SignalSink>, tuning: BehaviorTuning) -> Self {
        Self {
            sink,
            tuning,
            active: AtomicBool::new(false),
            state: Mutex::new(BehaviorState::new(Instant::now())),
        }
    }

    /// Activate and spawn the idle poller
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        {
            let mut state = lock(&self.state);
            state.last_action = Instant::now();
            state.idle_warned = false;
            state.deep_idle_warned = false;
        }
        self.active.store(true, Ordering::SeqCst);

        let watcher = Arc::clone(self);
        let period = Duration::from_secs(self.tuning.idle_poll_secs);
        spawn_supervised("idle_poll", async move {
            while sleep_or_cancel(period, &cancel).await {
                if !watcher.is_active() {
                    break;
                }
                watcher.poll_idle();
            }
            tracing::debug!("idle poller stopped");
        })
    }

    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn counters(&self) -> BehaviorCounters {
        lock(&self.state).counters
    }

    pub fn report_action(&self, action: &UserAction) {
        if !self.is_active() {
            return;
        }

        let now = Instant::now();
        let mut emitted = Vec::new();
        {
            let mut state = lock(&self.state);
            state.last_action = now;
            state.idle_warned = false;
            state.deep_idle_warned = false;

            let t = &self.tuning;
            match action {
                UserAction::Undo => {
                    state.counters.undo += 1.0;
                    if state.counters.undo > t.undo_burst {
                        emitted.push(Signal::new(SignalKind::UndoBurst, "Repeated undos", 0.7));
                        state.counters.undo = 0.0;
                    }
                }
                UserAction::Redo => {
                    state.counters.redo += 1.0;
                    if state.counters.redo > t.redo_burst {
                        emitted.push(Signal::new(SignalKind::RedoBurst, "Repeated redos", 0.7));
                        state.counters.redo = 0.0;
                    }
                }
                UserAction::Type => {
                    let started = *state.typing_started.get_or_insert(now);
                    state.counters.typing += 1.0;
                    if state.counters.typing > t.typing_burst {
                        if now.duration_since(started) < Duration::from_secs(t.typing_window_secs) {
                            emitted.push(Signal::new(
                                SignalKind::TypingFlow,
                                "User is in a typing flow",
                                0.4,
                            ));
                        }
                        state.counters.typing = 0.0;
                        state.typing_started = Some(now);
                    }
                }
                UserAction::Selection => {
                    state.counters.fidget += 1.0;
                    if state.counters.fidget > t.fidget_burst {
                        emitted.push(Signal::new(
                            SignalKind::Fidgeting,
                            "Frequent selection changes",
                            0.3,
                        ));
                        state.counters.fidget = 0.0;
                    }
                }
                UserAction::Save => {
                    emitted.push(Signal::new(SignalKind::FileSave, "User saved the file", 0.5));
                }
                UserAction::Paste { data } => {
                    let chars = data.chars().count();
                    if chars > t.large_paste_chars {
                        emitted.push(Signal::new(
                            SignalKind::LargePaste,
                            format!("Pasted {chars} characters"),
                            0.6,
                        ));
                    }
                }
                UserAction::Other(_) => {}
            }

            decay_unrelated(&mut state.counters, action, t.counter_decay);
        }

        for signal in emitted {
            tracing::debug!(kind = %signal.kind, "user behavior detected");
            self.sink.emit(signal);
        }
    }

    /// One idle check. Each level warns once until the next action.
    pub fn poll_idle(&self) {
        if !self.is_active() {
            return;
        }

        let signal = {
            let mut state = lock(&self.state);
            let idle = Instant::now().saturating_duration_since(state.last_action);

            if idle > Duration::from_secs(self.tuning.deep_idle_secs) {
                if state.deep_idle_warned {
                    None
                } else {
                    state.deep_idle_warned = true;
                    Some(Signal::new(SignalKind::DeepIdle, "User is likely away", 0.8))
                }
            } else if idle > Duration::from_secs(self.tuning.idle_secs) {
                if state.idle_warned {
                    None
                } else {
                    state.idle_warned = true;
                    Some(Signal::new(SignalKind::Idle, "User is pondering", 0.5))
                }
            } else {
                None
            }
        };

        if let Some(signal) = signal {
            tracing::debug!(kind = %signal.kind, "idle threshold crossed");
            self.sink.emit(signal);
        }
    }
}

fn decay_unrelated(counters: &mut BehaviorCounters, action: &UserAction, decay: f64) {
    let step = |value: &mut f64| *value = (*value - decay).max(0.0);
    if *action != UserAction::Undo {
        step(&mut counters.undo);
    }
    if *action != UserAction::Redo {
        step(&mut counters.redo);
    }
    if *action != UserAction::Type {
        step(&mut counters.typing);
    }
    if *action != UserAction::Selection {
        step(&mut counters.fidget);
    }
}
