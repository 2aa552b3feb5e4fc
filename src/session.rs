//! Suggestion sessions
//!
//! Every new suggestion supersedes the previous one. Work started for an old
//! session (a slow model call, say) checks its ticket before showing anything.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct SuggestionSession {
    generation: Arc<AtomicU64>,
}

/// Proof of which session a piece of work belongs to
#[derive(Debug, Clone)]
pub struct SessionTicket {
    id: u64,
    generation: Arc<AtomicU64>,
}

impl SuggestionSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new session, invalidating every earlier ticket
    pub fn begin(&self) -> SessionTicket {
        let id = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        SessionTicket {
            id,
            generation: Arc::clone(&self.generation),
        }
    }

    /// Invalidate outstanding tickets without starting new work
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

impl SessionTicket {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_current(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.id
    }
}
