//! Normalized observations emitted by watchers
//!
//! Every watcher translates its raw source (keystrokes, terminal lines, file
//! contents, git status) into [`Signal`]s. The aggregator stores them and the
//! scorer only ever looks at `kind` and `confidence`.

use chrono::{DateTime, Utc};
use std::fmt;
use tokio::time::Instant;

/// What a signal is evidence of
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SignalKind {
    TerminalError,
    UndoBurst,
    RedoBurst,
    TypingFlow,
    Fidgeting,
    FileSave,
    LargePaste,
    Idle,
    DeepIdle,
    DeepNesting,
    LargeModule,
    ComplexitySpike,
    AstComplexity,
    GitStatus,
    /// Free-form tag reported through the generic ingestion path
    Other(String),
}

impl SignalKind {
    pub fn as_str(&self) -> &str {
        match self {
            SignalKind::TerminalError => "terminal_error",
            SignalKind::UndoBurst => "undo_burst",
            SignalKind::RedoBurst => "redo_burst",
            SignalKind::TypingFlow => "typing_flow",
            SignalKind::Fidgeting => "fidgeting",
            SignalKind::FileSave => "file_save",
            SignalKind::LargePaste => "large_paste",
            SignalKind::Idle => "idle",
            SignalKind::DeepIdle => "deep_idle",
            SignalKind::DeepNesting => "deep_nesting",
            SignalKind::LargeModule => "large_module",
            SignalKind::ComplexitySpike => "complexity_spike",
            SignalKind::AstComplexity => "ast_complexity",
            SignalKind::GitStatus => "git_status",
            SignalKind::Other(tag) => tag,
        }
    }
}

impl From<&str> for SignalKind {
    fn from(tag: &str) -> Self {
        match tag {
            "terminal_error" => SignalKind::TerminalError,
            "undo_burst" => SignalKind::UndoBurst,
            "redo_burst" => SignalKind::RedoBurst,
            "typing_flow" => SignalKind::TypingFlow,
            "fidgeting" => SignalKind::Fidgeting,
            "file_save" => SignalKind::FileSave,
            "large_paste" => SignalKind::LargePaste,
            "idle" => SignalKind::Idle,
            "deep_idle" => SignalKind::DeepIdle,
            "deep_nesting" => SignalKind::DeepNesting,
            "large_module" => SignalKind::LargeModule,
            "complexity_spike" => SignalKind::ComplexitySpike,
            "ast_complexity" => SignalKind::AstComplexity,
            "git_status" => SignalKind::GitStatus,
            other => SignalKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single observation. Never mutated after creation.
#[derive(Debug, Clone)]
pub struct Signal {
    pub kind: SignalKind,
    /// Free-form context, e.g. the error text or a short description
    pub payload: String,
    /// Always within `[0, 1]`
    pub confidence: f64,
    /// Monotonic receive time, used for retention
    pub timestamp: Instant,
    /// Wall-clock time for display only
    pub observed_at: DateTime<Utc>,
}

impl Signal {
    pub fn new(kind: impl Into<SignalKind>, payload: impl Into<String>, confidence: f64) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };

        Self {
            kind: kind.into(),
            payload: payload.into(),
            confidence,
            timestamp: Instant::now(),
            observed_at: Utc::now(),
        }
    }

    /// Age relative to `now`; zero if the signal is from the future
    pub fn age_at(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.timestamp)
    }
}
