//! Terminal output watcher: spots failing commands

use super::SignalSink;
use crate::config::TerminalTuning;
use crate::signal::{Signal, SignalKind};
use crate::util::lock;
use regex::Regex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, Mutex};

const ERROR_CONFIDENCE: f64 = 0.8;

/// Lowercase needles; any match in the raw output marks it as an error
const ERROR_KEYWORDS: [&str; 7] = [
    "error",
    "exception",
    "traceback",
    "fail",
    "not recognized",
    "not found",
    "fatal",
];

/// Shell boilerplate that never carries signal
const NOISE_MARKERS: [&str; 3] = [
    "Microsoft Windows",
    "Version 10",
    "Microsoft Corporation. All rights reserved",
];

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b(\[[0-9;?]*[ -/]*[@-~]|\][^\x07]*\x07|[@-Z\\-_])")
        .expect("ANSI escape pattern is valid")
});

#[derive(Debug, Default)]
struct TerminalState {
    lines: VecDeque<String>,
    last_command: String,
}

pub struct TerminalWatcher {
    sink: Arc<dyn SignalSink>,
    tuning: TerminalTuning,
    active: AtomicBool,
    state: Mutex<TerminalState>,
}

impl TerminalWatcher {
    pub fn new(sink: Arc<dyn SignalSink>, tuning: TerminalTuning) -> Self {
        Self {
            sink,
            tuning,
            active: AtomicBool::new(false),
            state: Mutex::new(TerminalState::default()),
        }
    }

    pub fn start(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Feed a chunk of terminal output, optionally with the command that
    /// produced it. Emits at most one `terminal_error`.
    pub fn report_output(&self, output: &str, command: Option<&str>) {
        if !self.is_active() {
            return;
        }

        let output = ANSI_ESCAPE.replace_all(output, "");
        let payload = {
            let mut state = lock(&self.state);
            if let Some(command) = command {
                state.last_command = command.trim().to_string();
            }

            for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
                if is_noise(line) {
                    continue;
                }
                state.lines.push_back(line.to_string());
            }
            while state.lines.len() > self.tuning.buffer_lines {
                state.lines.pop_front();
            }

            if !looks_like_error(&output) {
                return;
            }

            let skip = state.lines.len().saturating_sub(self.tuning.context_lines);
            let tail: Vec<&str> = state.lines.iter().skip(skip).map(String::as_str).collect();
            format!(
                "Command: {}\nTerminal Output:\n{}",
                state.last_command,
                tail.join("\n")
            )
        };

        tracing::debug!(payload = %payload, "terminal error detected");
        self.sink
            .emit(Signal::new(SignalKind::TerminalError, payload, ERROR_CONFIDENCE));
    }

    pub fn last_command(&self) -> String {
        lock(&self.state).last_command.clone()
    }

    /// Copy of the rolling line buffer, oldest first
    pub fn buffered_lines(&self) -> Vec<String> {
        lock(&self.state).lines.iter().cloned().collect()
    }
}

fn is_noise(line: &str) -> bool {
    NOISE_MARKERS.iter().any(|marker| line.contains(marker))
}

fn looks_like_error(output: &str) -> bool {
    let lower = output.to_lowercase();
    ERROR_KEYWORDS.iter().any(|k| lower.contains(k))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watchers::testing::CollectingSink;

    fn watcher() -> (Arc<CollectingSink>, TerminalWatcher) {
        let sink = Arc::new(CollectingSink::default());
        let watcher = TerminalWatcher::new(sink.clone(), TerminalTuning::default());
        watcher.start();
        (sink, watcher)
    }

    #[test]
    fn test_traceback_emits_terminal_error_with_command() {
        let (sink, watcher) = watcher();
        watcher.report_output(
            "Traceback (most recent call last):\n  File \"app.py\", line 3\nNameError: name 'x' is not defined\n",
            Some("  python app.py "),
        );

        let signals = sink.signals();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind, SignalKind::TerminalError);
        assert_eq!(signals[0].confidence, 0.8);
        assert!(signals[0].payload.starts_with("Command: python app.py\nTerminal Output:\n"));
        assert!(signals[0].payload.contains("NameError"));
    }

    #[test]
    fn test_payload_keeps_last_three_lines() {
        let (sink, watcher) = watcher();
        watcher.report_output("one\ntwo\nthree\nfour\nfatal: not a git repository", Some("git status"));

        let payload = &sink.signals()[0].payload;
        assert!(!payload.contains("two"));
        assert!(payload.ends_with("three\nfour\nfatal: not a git repository"));
    }

    #[test]
    fn test_clean_output_is_buffered_silently() {
        let (sink, watcher) = watcher();
        watcher.report_output("Compiling sidekick v0.3.0\n\n   Finished dev profile\n", Some("cargo build"));

        assert!(sink.signals().is_empty());
        assert_eq!(
            watcher.buffered_lines(),
            vec!["Compiling sidekick v0.3.0", "Finished dev profile"]
        );
        assert_eq!(watcher.last_command(), "cargo build");
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        let (sink, watcher) = watcher();
        watcher.report_output("'foo' is NOT RECOGNIZED as an internal command", None);
        assert_eq!(sink.count(&SignalKind::TerminalError), 1);
    }

    #[test]
    fn test_windows_banner_is_filtered() {
        let (_, watcher) = watcher();
        watcher.report_output(
            "Microsoft Windows [Version 10.0.19045.3803]\n(c) Microsoft Corporation. All rights reserved.\nC:\\> dir",
            None,
        );
        assert_eq!(watcher.buffered_lines(), vec!["C:\\> dir"]);
    }

    #[test]
    fn test_ansi_sequences_are_stripped() {
        let (sink, watcher) = watcher();
        watcher.report_output("\x1b[1m\x1b[31merror[E0425]\x1b[0m: cannot find value", Some("cargo check"));
        assert_eq!(watcher.buffered_lines(), vec!["error[E0425]: cannot find value"]);
        assert_eq!(sink.count(&SignalKind::TerminalError), 1);
    }

    #[test]
    fn test_buffer_is_bounded() {
        let (_, watcher) = watcher();
        let output: String = (0..80).map(|i| format!("line {i}\n")).collect();
        watcher.report_output(&output, None);

        let lines = watcher.buffered_lines();
        assert_eq!(lines.len(), 50);
        assert_eq!(lines[0], "line 30");
    }

    #[test]
    fn test_inactive_watcher_drops_input() {
        let (sink, watcher) = watcher();
        watcher.stop();
        watcher.report_output("fatal error", Some("make"));
        assert!(sink.signals().is_empty());
        assert!(watcher.buffered_lines().is_empty());
        assert_eq!(watcher.last_command(), "");
    }
}
