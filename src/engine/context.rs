//! Turning a batch of signals into an instruction for the assistant

use crate::signal::{Signal, SignalKind};
use crate::util::truncate_str;

/// Distinct observations listed in a behavioral context
const MAX_ACTIVITY_LINES: usize = 5;

/// Compose the context handed to the suggestion sink.
///
/// A terminal error always wins: the most recent one is quoted (cut at
/// `max_error_chars`) and the assistant is asked for a one-sentence fix.
/// Without errors the most recent distinct observations are listed instead,
/// each stamped with the wall-clock time it was seen.
pub fn build_context(signals: &[Signal], max_error_chars: usize) -> String {
    let latest_error = signals
        .iter()
        .rev()
        .find(|s| s.kind == SignalKind::TerminalError);

    if let Some(error) = latest_error {
        let error_text = truncate_str(&error.payload, max_error_chars);
        return format!(
            "The user ran a command and got this error:\n{}\n\n\
             Instruction: Suggest the correct command or a brief fix. One sentence only.",
            error_text
        );
    }

    let mut recent: Vec<&Signal> = Vec::new();
    for signal in signals.iter().rev() {
        if recent.len() == MAX_ACTIVITY_LINES {
            break;
        }
        if !recent
            .iter()
            .any(|s| s.kind == signal.kind && s.payload == signal.payload)
        {
            recent.push(signal);
        }
    }
    recent.reverse();

    let activity: Vec<String> = recent
        .iter()
        .map(|s| {
            format!(
                "- [{}] {}: {}",
                s.observed_at.format("%H:%M:%S"),
                s.kind,
                s.payload
            )
        })
        .collect();
    format!(
        "The user seems to be struggling. Recent activity:\n{}\n\n\
         Instruction: Offer one short, encouraging tip. One sentence only.",
        activity.join("\n")
    )
}

/// Number of `terminal_error` signals in a batch
pub fn error_count(signals: &[Signal]) -> usize {
    signals
        .iter()
        .filter(|s| s.kind == SignalKind::TerminalError)
        .count()
}
