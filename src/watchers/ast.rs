//! Code-structure watcher with a debounced analysis worker
//!
//! `report_change` only overwrites a single-slot latest-value channel. The
//! worker wakes, takes whatever is newest and analyzes that; intermediate
//! states written while it slept are never looked at.

use super::SignalSink;
use crate::config::AstTuning;
use crate::signal::{Signal, SignalKind};
use crate::syntax::{self, Language};
use crate::util::{lock, spawn_supervised};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Editor buffer state at the time of a change
#[derive(Debug, Clone)]
pub struct SourceChange {
    pub path: PathBuf,
    pub content: String,
    /// Indentation level of the edited line
    pub indentation: usize,
}

/// Last analyzed size of a file, for growth detection
#[derive(Debug, Clone, Copy)]
struct LastAnalysis {
    at: Instant,
    lines: usize,
}

pub struct AstWatcher {
    sink: Arc<dyn SignalSink>,
    tuning: AstTuning,
    active: AtomicBool,
    latest: watch::Sender<Option<SourceChange>>,
    history: Mutex<HashMap<PathBuf, LastAnalysis>>,
    /// Completed analyses, observable by waiters
    analyses: watch::Sender<u64>,
}

impl AstWatcher {
    pub fn new(sink: Arc<dyn SignalSink>, tuning: AstTuning) -> Self {
        let (latest, _) = watch::channel(None);
        let (analyses, _) = watch::channel(0);
        Self {
            sink,
            tuning,
            active: AtomicBool::new(false),
            latest,
            history: Mutex::new(HashMap::new()),
            analyses,
        }
    }

    /// Activate and spawn the debounce worker
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        self.active.store(true, Ordering::SeqCst);

        // A fresh subscription treats anything queued before start as seen
        let mut rx = self.latest.subscribe();

        let watcher = Arc::clone(self);
        let wait = Duration::from_millis(self.tuning.worker_wait_ms);
        spawn_supervised("ast_worker", async move {
            loop {
                let woke = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    woke = tokio::time::timeout(wait, rx.changed()) => woke,
                };
                if !watcher.is_active() {
                    break;
                }
                match woke {
                    Ok(Ok(())) => {
                        let change = rx.borrow_and_update().clone();
                        if let Some(change) = change {
                            watcher.analyze(change).await;
                        }
                    }
                    // Sender gone: the watcher itself was dropped
                    Ok(Err(_)) => break,
                    // Bounded wait elapsed; loop to re-check the flags
                    Err(_) => continue,
                }
            }
            tracing::debug!("ast worker stopped");
        })
    }

    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Queue the newest buffer state, replacing any not yet analyzed
    pub fn report_change(&self, path: impl Into<PathBuf>, content: impl Into<String>, indentation: usize) {
        if !self.is_active() {
            return;
        }
        self.latest.send_replace(Some(SourceChange {
            path: path.into(),
            content: content.into(),
            indentation,
        }));
    }

    /// How many changes have actually been analyzed
    pub fn analyses_run(&self) -> u64 {
        *self.analyses.borrow()
    }

    async fn analyze(&self, change: SourceChange) {
        let t = &self.tuning;
        let now = Instant::now();
        let lines = change.content.lines().count();
        let shown = change.path.display().to_string();
        let mut emitted = Vec::new();

        if change.indentation > t.max_indentation {
            emitted.push(Signal::new(
                SignalKind::DeepNesting,
                format!("Deep nesting (level {}) in {}", change.indentation, shown),
                0.6,
            ));
        }

        if lines > t.large_module_lines {
            emitted.push(Signal::new(
                SignalKind::LargeModule,
                format!("{} has grown to {} lines", shown, lines),
                0.4,
            ));
        }

        let previous = lock(&self.history).insert(change.path.clone(), LastAnalysis { at: now, lines });
        if let Some(previous) = previous {
            let recent = now.duration_since(previous.at) <= Duration::from_secs(t.spike_window_secs);
            let growth = lines.saturating_sub(previous.lines);
            if recent && growth > t.spike_growth_lines {
                emitted.push(Signal::new(
                    SignalKind::ComplexitySpike,
                    format!("{} grew by {} lines in a few seconds", shown, growth),
                    0.7,
                ));
            }
        }

        if Language::from_path(&change.path).is_supported() {
            // Parsing a large buffer is CPU-bound; keep it off the runtime workers
            let SourceChange { path, content, .. } = change;
            let parsed = tokio::task::spawn_blocking(move || syntax::count_nodes(&path, &content)).await;
            match parsed {
                Ok(Ok(nodes)) if nodes > t.max_syntax_nodes => {
                    emitted.push(Signal::new(
                        SignalKind::AstComplexity,
                        format!("{} has {} syntax nodes", shown, nodes),
                        0.5,
                    ));
                }
                Ok(Ok(_)) => {}
                Ok(Err(err)) => {
                    tracing::debug!(path = %shown, error = %err, "structural parse skipped");
                }
                Err(err) => {
                    tracing::debug!(path = %shown, error = %err, "structural parse task failed");
                }
            }
        }

        for signal in emitted {
            tracing::debug!(kind = %signal.kind, path = %shown, "code structure signal");
            self.sink.emit(signal);
        }
        self.analyses.send_modify(|n| *n += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watchers::testing::CollectingSink;

    fn lines(n: usize) -> String {
        (0..n).map(|i| format!("line {i}\n")).collect()
    }

    async fn wait_for_analyses(watcher: &AstWatcher, expected: u64) {
        let mut done = watcher.analyses.subscribe();
        done.wait_for(|n| *n >= expected)
            .await
            .expect("watcher outlives the wait");
        // Give a wrongly-queued extra analysis the chance to show up
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn started(sink: &Arc<CollectingSink>) -> (Arc<AstWatcher>, CancellationToken, JoinHandle<()>) {
        let watcher = Arc::new(AstWatcher::new(sink.clone(), AstTuning::default()));
        let cancel = CancellationToken::new();
        let handle = watcher.start(cancel.clone());
        (watcher, cancel, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_debounced_to_latest_state() {
        let sink = Arc::new(CollectingSink::default());
        let (watcher, cancel, handle) = started(&sink);

        watcher.report_change("notes.txt", lines(600), 9);
        watcher.report_change("notes.txt", lines(700), 8);
        watcher.report_change("notes.txt", lines(10), 1);

        wait_for_analyses(&watcher, 1).await;
        assert_eq!(watcher.analyses_run(), 1);
        // Only the last, small and shallow, state was analyzed
        assert!(sink.signals().is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_deep_nesting_and_large_module() {
        let sink = Arc::new(CollectingSink::default());
        let (watcher, cancel, handle) = started(&sink);

        watcher.report_change("big.txt", lines(501), 6);
        wait_for_analyses(&watcher, 1).await;

        assert_eq!(sink.count(&SignalKind::DeepNesting), 1);
        assert_eq!(sink.count(&SignalKind::LargeModule), 1);
        let nesting = &sink.signals()[0];
        assert_eq!(nesting.confidence, 0.6);
        assert!(nesting.payload.contains("level 6"));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_growth_is_a_complexity_spike() {
        let sink = Arc::new(CollectingSink::default());
        let (watcher, cancel, handle) = started(&sink);

        watcher.report_change("grow.txt", lines(100), 0);
        wait_for_analyses(&watcher, 1).await;
        tokio::time::advance(Duration::from_secs(5)).await;
        watcher.report_change("grow.txt", lines(151), 0);
        wait_for_analyses(&watcher, 2).await;
        assert_eq!(sink.count(&SignalKind::ComplexitySpike), 1);

        // Growth spread over more than the window does not count
        tokio::time::advance(Duration::from_secs(31)).await;
        watcher.report_change("grow.txt", lines(260), 0);
        wait_for_analyses(&watcher, 3).await;
        assert_eq!(sink.count(&SignalKind::ComplexitySpike), 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_large_syntax_tree_and_parse_tolerance() {
        let sink = Arc::new(CollectingSink::default());
        let (watcher, cancel, handle) = started(&sink);

        let source: String = (0..200).map(|i| format!("x{i} = {i} + {i}\n")).collect();
        watcher.report_change("gen.py", source, 0);
        wait_for_analyses(&watcher, 1).await;
        assert_eq!(sink.count(&SignalKind::AstComplexity), 1);

        // Garbage still parses with error nodes; nothing blows up
        watcher.report_change("broken.rs", "fn (((( {{{{", 0);
        wait_for_analyses(&watcher, 2).await;
        assert_eq!(watcher.analyses_run(), 2);
        assert_eq!(sink.count(&SignalKind::AstComplexity), 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_does_not_let_the_old_worker_analyze() {
        let sink = Arc::new(CollectingSink::default());
        let (watcher, first_cancel, first) = started(&sink);

        // Queued for the first worker, which has not run yet
        watcher.report_change("restart.txt", lines(900), 9);
        first_cancel.cancel();
        watcher.stop();
        let second_cancel = CancellationToken::new();
        let second = watcher.start(second_cancel.clone());

        first.await.unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(watcher.analyses_run(), 0);
        assert!(sink.signals().is_empty());

        watcher.report_change("restart.txt", lines(10), 9);
        wait_for_analyses(&watcher, 1).await;
        assert_eq!(watcher.analyses_run(), 1);
        assert_eq!(sink.count(&SignalKind::DeepNesting), 1);

        second_cancel.cancel();
        second.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_exits_after_stop() {
        let sink = Arc::new(CollectingSink::default());
        let (watcher, _cancel, handle) = started(&sink);

        watcher.stop();
        watcher.report_change("late.txt", lines(900), 9);
        // The bounded wait lets the worker notice deactivation
        tokio::time::advance(Duration::from_millis(1100)).await;
        handle.await.unwrap();
        assert_eq!(watcher.analyses_run(), 0);
        assert!(sink.signals().is_empty());
    }
}
