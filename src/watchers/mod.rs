//! Watchers translate one raw event source into [`Signal`]s
//!
//! All variants share the same lifecycle: `start` flips the watcher active
//! and may spawn a background loop, `stop` flips it inactive and the loop
//! exits on its next wake. Input reported to an inactive watcher is dropped.

pub mod ast;
pub mod behavior;
pub mod git;
pub mod terminal;

pub use ast::AstWatcher;
pub use behavior::{UserAction, UserBehaviorWatcher};
pub use git::GitWatcher;
pub use terminal::TerminalWatcher;

use crate::config::Tuning;
use crate::signal::Signal;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Destination for signals emitted by a watcher
pub trait SignalSink: Send + Sync {
    fn emit(&self, signal: Signal);
}

/// The four kinds of listener a config can enable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerKind {
    Ast,
    Terminal,
    Git,
    UserBehavior,
}

impl ListenerKind {
    pub const ALL: [ListenerKind; 4] = [
        ListenerKind::Ast,
        ListenerKind::Terminal,
        ListenerKind::Git,
        ListenerKind::UserBehavior,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ast" => Some(ListenerKind::Ast),
            "terminal" => Some(ListenerKind::Terminal),
            "git" => Some(ListenerKind::Git),
            "user_behavior" => Some(ListenerKind::UserBehavior),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ListenerKind::Ast => "ast",
            ListenerKind::Terminal => "terminal",
            ListenerKind::Git => "git",
            ListenerKind::UserBehavior => "user_behavior",
        }
    }

    /// Registry entry: construct the watcher variant for this listener
    pub fn build(&self, sink: Arc<dyn SignalSink>, tuning: &Tuning, workspace: Option<PathBuf>) -> Watcher {
        match self {
            ListenerKind::Ast => Watcher::Ast(Arc::new(AstWatcher::new(sink, tuning.ast.clone()))),
            ListenerKind::Terminal => {
                Watcher::Terminal(Arc::new(TerminalWatcher::new(sink, tuning.terminal.clone())))
            }
            ListenerKind::Git => {
                Watcher::Git(Arc::new(GitWatcher::new(sink, tuning.git.clone(), workspace)))
            }
            ListenerKind::UserBehavior => Watcher::UserBehavior(Arc::new(UserBehaviorWatcher::new(
                sink,
                tuning.behavior.clone(),
            ))),
        }
    }
}

impl fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A configured watcher of any variant
#[derive(Clone)]
pub enum Watcher {
    Ast(Arc<AstWatcher>),
    Terminal(Arc<TerminalWatcher>),
    Git(Arc<GitWatcher>),
    UserBehavior(Arc<UserBehaviorWatcher>),
}

impl Watcher {
    pub fn kind(&self) -> ListenerKind {
        match self {
            Watcher::Ast(_) => ListenerKind::Ast,
            Watcher::Terminal(_) => ListenerKind::Terminal,
            Watcher::Git(_) => ListenerKind::Git,
            Watcher::UserBehavior(_) => ListenerKind::UserBehavior,
        }
    }

    /// Activate; returns the handle of the background loop if one was spawned.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        match self {
            Watcher::Ast(w) => Some(w.start(cancel)),
            Watcher::Terminal(w) => {
                w.start();
                None
            }
            Watcher::Git(w) => Some(w.start(cancel)),
            Watcher::UserBehavior(w) => Some(w.start(cancel)),
        }
    }

    pub fn stop(&self) {
        match self {
            Watcher::Ast(w) => w.stop(),
            Watcher::Terminal(w) => w.stop(),
            Watcher::Git(w) => w.stop(),
            Watcher::UserBehavior(w) => w.stop(),
        }
    }

    pub fn is_active(&self) -> bool {
        match self {
            Watcher::Ast(w) => w.is_active(),
            Watcher::Terminal(w) => w.is_active(),
            Watcher::Git(w) => w.is_active(),
            Watcher::UserBehavior(w) => w.is_active(),
        }
    }
}
