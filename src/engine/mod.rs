//! The context engine: watchers in, suggestions out
//!
//! Sources call the `report_*` entry points. Watchers turn those reports into
//! signals, the aggregator keeps them for a while, and a maintenance loop
//! (plus an immediate path for terminal errors) decides when the evidence is
//! strong enough to interrupt the user.

pub mod aggregator;
pub mod context;


pub use aggregator::SignalAggregator;
pub use context::build_context;

use crate::config::{EngineTuning, SidekickConfig};
use crate::score::TriggerScoringEngine;
use crate::signal::{Signal, SignalKind};
use crate::util::{lock, sleep_or_cancel, spawn_supervised};
use crate::watchers::{ListenerKind, SignalSink, UserAction, Watcher};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Receiver of suggestion contexts, typically the presentation layer
pub trait SuggestionSink: Send + Sync {
    fn suggest(&self, context: &str);
}

/// Runtime collaborators handed to [`ContextEngine::setup`]
#[derive(Default, Clone)]
pub struct EngineEnv {
    /// Root of the project being edited, for repository watching
    pub workspace: Option<PathBuf>,
    /// Where suggestions go; without one, triggers are silent
    pub sink: Option<Arc<dyn SuggestionSink>>,
}

/// State shared between the engine, its watchers and its loop
struct EngineCore {
    aggregator: SignalAggregator,
    tuning: EngineTuning,
    enabled: AtomicBool,
    sink: Option<Arc<dyn SuggestionSink>>,
    triggers: AtomicU64,
}

impl EngineCore {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn ingest(&self, signal: Signal) {
        if !self.is_enabled() {
            return;
        }

        let critical = signal.kind == SignalKind::TerminalError;
        if critical || signal.confidence > 0.7 {
            tracing::info!(kind = %signal.kind, confidence = signal.confidence, "signal received");
        } else {
            tracing::debug!(kind = %signal.kind, confidence = signal.confidence, "signal received");
        }

        self.aggregator.add(signal);

        // Critical signals do not wait for the next maintenance tick
        if critical {
            self.check_and_trigger();
        }
    }

    fn check_and_trigger(&self) -> Option<u8> {
        let threshold = self.tuning.trigger_threshold;
        let mut score = 0;
        let taken = self.aggregator.take_if(|signals| {
            if signals.is_empty() {
                return false;
            }
            score = TriggerScoringEngine::score(signals);
            score >= threshold
        })?;

        self.triggers.fetch_add(1, Ordering::SeqCst);
        tracing::info!(
            score,
            signals = taken.len(),
            errors = context::error_count(&taken),
            "threshold met, triggering suggestion"
        );

        let context = build_context(&taken, self.tuning.error_context_chars);
        match &self.sink {
            Some(sink) => sink.suggest(&context),
            None => tracing::debug!("no suggestion sink attached"),
        }
        Some(score)
    }
}

impl SignalSink for EngineCore {
    fn emit(&self, signal: Signal) {
        self.ingest(signal);
    }
}

#[derive(Default)]
struct TaskSet {
    cancel: Option<CancellationToken>,
    handles: Vec<JoinHandle<()>>,
}

/// Owns the watchers, the signal buffer and the maintenance loop.
///
/// Construct one per host and share it behind an `Arc`; every method takes
/// `&self`.
pub struct ContextEngine {
    core: Arc<EngineCore>,
    watchers: Vec<Watcher>,
    running: AtomicBool,
    tasks: Mutex<TaskSet>,
}

impl ContextEngine {
    /// Build the engine and the watchers named in the listener allow-list.
    ///
    /// A disabled config builds no watchers at all.
    pub fn setup(config: &SidekickConfig, env: EngineEnv) -> Self {
        let tuning = config.tuning.clone().sanitized();
        let core = Arc::new(EngineCore {
            aggregator: SignalAggregator::new(tuning.engine.retention()),
            tuning: tuning.engine.clone(),
            enabled: AtomicBool::new(config.enabled),
            sink: env.sink,
            triggers: AtomicU64::new(0),
        });

        let mut watchers: Vec<Watcher> = Vec::new();
        if config.enabled {
            let sink: Arc<dyn SignalSink> = core.clone();
            for name in &config.listeners {
                let Some(kind) = ListenerKind::from_name(name) else {
                    tracing::warn!(listener = %name, "unknown listener ignored");
                    continue;
                };
                if watchers.iter().any(|w| w.kind() == kind) {
                    continue;
                }
                watchers.push(kind.build(Arc::clone(&sink), &tuning, env.workspace.clone()));
            }
        } else {
            tracing::info!("suggestions disabled, no watchers built");
        }

        Self {
            core,
            watchers,
            running: AtomicBool::new(false),
            tasks: Mutex::new(TaskSet::default()),
        }
    }

    /// Start every watcher and the maintenance loop.
    ///
    /// Returns whether the engine is running afterwards. Needs a tokio
    /// runtime; without one (or when disabled) this is a no-op.
    pub fn start(&self) -> bool {
        if !self.core.is_enabled() {
            return false;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::warn!("no tokio runtime available, context engine not started");
            return false;
        }

        let mut tasks = lock(&self.tasks);
        if self.running.load(Ordering::SeqCst) {
            return true;
        }

        tasks.handles.retain(|h| !h.is_finished());
        let cancel = CancellationToken::new();
        for watcher in &self.watchers {
            if let Some(handle) = watcher.start(cancel.child_token()) {
                tasks.handles.push(handle);
            }
        }

        let core = Arc::clone(&self.core);
        let loop_cancel = cancel.child_token();
        tasks
            .handles
            .push(spawn_supervised("maintenance_loop", maintenance_loop(core, loop_cancel)));
        tasks.cancel = Some(cancel);
        self.running.store(true, Ordering::SeqCst);

        let names: Vec<&str> = self.watchers.iter().map(|w| w.kind().name()).collect();
        tracing::info!(watchers = ?names, "context engine started");
        true
    }

    /// Stop watchers and signal every loop to exit. Does not wait.
    pub fn stop(&self) {
        let mut tasks = lock(&self.tasks);
        let was_running = self.running.swap(false, Ordering::SeqCst);
        for watcher in &self.watchers {
            watcher.stop();
        }
        if let Some(cancel) = tasks.cancel.take() {
            cancel.cancel();
        }
        if was_running {
            tracing::info!("context engine stopped");
        }
    }

    /// Stop and wait for every background task to finish
    pub async fn shutdown(&self) {
        self.stop();
        let handles = std::mem::take(&mut lock(&self.tasks).handles);
        for handle in handles {
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    tracing::warn!(error = %err, "background task ended abnormally");
                }
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.core.is_enabled()
    }

    pub fn is_enabled(&self) -> bool {
        self.core.is_enabled()
    }

    /// Runtime kill switch; disabling also stops the engine
    pub fn set_enabled(&self, enabled: bool) {
        self.core.enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.stop();
        }
    }

    /// Listener kinds that were built at setup
    pub fn listeners(&self) -> Vec<ListenerKind> {
        self.watchers.iter().map(Watcher::kind).collect()
    }

    pub fn watcher(&self, kind: ListenerKind) -> Option<&Watcher> {
        self.watchers.iter().find(|w| w.kind() == kind)
    }

    pub fn report_terminal_output(&self, output: &str, command: Option<&str>) {
        if !self.is_running() {
            return;
        }
        if let Some(Watcher::Terminal(watcher)) = self.watcher(ListenerKind::Terminal) {
            watcher.report_output(output, command);
        }
    }

    pub fn report_ast_change(&self, path: impl Into<PathBuf>, content: impl Into<String>, indentation: usize) {
        if !self.is_running() {
            return;
        }
        if let Some(Watcher::Ast(watcher)) = self.watcher(ListenerKind::Ast) {
            watcher.report_change(path, content, indentation);
        }
    }

    pub fn report_user_action(&self, action: &UserAction) {
        if !self.is_running() {
            return;
        }
        if let Some(Watcher::UserBehavior(watcher)) = self.watcher(ListenerKind::UserBehavior) {
            watcher.report_action(action);
        }
    }

    /// Generic ingestion. A `terminal_error` is checked immediately.
    pub fn report_signal(&self, kind: impl Into<SignalKind>, payload: impl Into<String>, confidence: f64) {
        self.core.ingest(Signal::new(kind, payload, confidence));
    }

    /// Score the buffer and fire if it crosses the threshold.
    ///
    /// Returns the score that fired, if any.
    pub fn check_and_trigger(&self) -> Option<u8> {
        if !self.core.is_enabled() {
            return None;
        }
        self.core.check_and_trigger()
    }

    pub fn snapshot(&self) -> Vec<Signal> {
        self.core.aggregator.snapshot()
    }

    /// Current urgency of the buffered evidence
    pub fn score(&self) -> u8 {
        TriggerScoringEngine::score(&self.core.aggregator.snapshot())
    }

    /// How many suggestions have fired since setup
    pub fn triggers_fired(&self) -> u64 {
        self.core.triggers.load(Ordering::SeqCst)
    }
}

impl Drop for ContextEngine {
    fn drop(&mut self) {
        if let Some(cancel) = lock(&self.tasks).cancel.take() {
            cancel.cancel();
        }
    }
}

async fn maintenance_loop(core: Arc<EngineCore>, cancel: CancellationToken) {
    let period = core.tuning.maintenance_interval();
    let window = core.tuning.relevance_window();

    while sleep_or_cancel(period, &cancel).await {
        if !core.is_enabled() {
            tracing::debug!("suggestions disabled, maintenance loop exiting");
            break;
        }
        let pruned = core.aggregator.prune_older_than(window);
        if pruned > 0 {
            tracing::trace!(pruned, "stale signals dropped");
        }
        core.check_and_trigger();
    }
}
