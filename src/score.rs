//! Trigger scoring: how badly does the user need a nudge right now?
//!
//! Additive and order-independent. Each signal contributes
//! `weight(kind) * confidence`; kinds without a weight only widen the context
//! handed to the assistant and never cause an interruption on their own.

use crate::signal::{Signal, SignalKind};

/// Scores at or above this fire a suggestion
pub const DEFAULT_TRIGGER_THRESHOLD: u8 = 50;

/// Upper bound of the score scale
pub const MAX_SCORE: u8 = 100;

/// Confidence is quantized to thousandths so scores are exact integers
const MILLI: u64 = 1000;

pub struct TriggerScoringEngine;

impl TriggerScoringEngine {
    /// Weight for a signal kind, in points per unit of confidence
    pub fn weight(kind: &SignalKind) -> u64 {
        match kind {
            SignalKind::TerminalError => 35,
            SignalKind::UndoBurst | SignalKind::RedoBurst => 40,
            SignalKind::Idle => 25,
            SignalKind::ComplexitySpike => 15,
            _ => 0,
        }
    }

    /// Score a set of signals on a 0-100 scale.
    ///
    /// Terms are summed in milli-points, saturated at 100 and floored, so
    /// `undo_burst(0.7) + idle(0.5)` is 40, not 41.
    pub fn score(signals: &[Signal]) -> u8 {
        let cap = u64::from(MAX_SCORE) * MILLI;
        let total = signals.iter().fold(0u64, |acc, signal| {
            let milli_confidence = (signal.confidence.clamp(0.0, 1.0) * MILLI as f64).round() as u64;
            acc.saturating_add(Self::weight(&signal.kind) * milli_confidence)
                .min(cap)
        });

        (total / MILLI) as u8
    }

    pub fn should_trigger(signals: &[Signal], threshold: u8) -> bool {
        !signals.is_empty() && Self::score(signals) >= threshold
    }
}
