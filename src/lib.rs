//! Sidekick library crate
//!
//! A context-aware suggestion engine: watchers observe terminal output,
//! editing behavior, source structure and the git working tree, a scorer
//! decides when the user is likely stuck, and a companion turns the evidence
//! into a short tip.

pub mod companion;
pub mod config;
pub mod engine;
pub mod score;
pub mod session;
pub mod signal;
pub mod syntax;
pub mod util;
pub mod watchers;

pub use config::SidekickConfig;
pub use engine::{ContextEngine, EngineEnv, SuggestionSink};
pub use signal::{Signal, SignalKind};
