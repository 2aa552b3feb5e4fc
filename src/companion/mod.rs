//! The companion turns suggestion contexts into something the user sees
//!
//! A [`Brain`] answers prompts, a [`Bubble`] displays text. Each suggestion
//! opens a new session so a slow answer to an old question never overwrites
//! a newer one.

pub mod brain;

pub use brain::{BrainError, ChatBrain};

use crate::engine::SuggestionSink;
use crate::session::SuggestionSession;
use crate::util::lock;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

const THINKING: &str = "I noticed something... Thinking...";
const POKE_THINKING: &str = "Thinking...";
const EMPTY_SUGGESTION: &str = "Nevermind.";
const EMPTY_POKE: &str = "Something went wrong.";
const POKE_PROMPT: &str = "You are a helpful, witty and slightly chaotic coding sidekick. \
     Give me a short, one-sentence tip or a funny remark about coding.";

/// Callback for intermediate status text (download progress and the like)
pub type Progress = Arc<dyn Fn(&str) + Send + Sync>;

/// Anything that can answer a prompt in a sentence or two
#[async_trait]
pub trait Brain: Send + Sync {
    /// Answer `prompt`. Failures come back as a short user-facing string.
    async fn ask(&self, prompt: &str, progress: Progress) -> String;

    fn is_available(&self) -> bool;

    /// True while the brain is still warming up
    fn is_loading(&self) -> bool {
        false
    }
}

/// Where companion text ends up
pub trait Bubble: Send + Sync {
    fn show_message(&self, text: &str);
}

/// Prints companion messages to stderr, out of the way of piped stdout
#[derive(Debug, Default)]
pub struct TerminalBubble;

impl Bubble for TerminalBubble {
    fn show_message(&self, text: &str) {
        eprintln!("  💬 {}", text);
    }
}

pub fn suggestion_prompt(context: &str) -> String {
    format!(
        "Help the user based on this context. Keep it short and helpful:\n{}",
        context
    )
}

pub struct Companion {
    brain: Arc<dyn Brain>,
    bubble: Arc<dyn Bubble>,
    session: SuggestionSession,
    runtime: Handle,
    latest: Mutex<Option<JoinHandle<()>>>,
}

impl Companion {
    pub fn new(brain: Arc<dyn Brain>, bubble: Arc<dyn Bubble>, runtime: Handle) -> Self {
        Self {
            brain,
            bubble,
            session: SuggestionSession::new(),
            runtime,
            latest: Mutex::new(None),
        }
    }

    /// Ask for a tip unprompted, as when the user clicks the avatar
    pub fn poke(&self) {
        self.dispatch(POKE_PROMPT.to_string(), POKE_THINKING, EMPTY_POKE);
    }

    /// Drop whatever answer is still on its way
    pub fn dismiss(&self) {
        self.session.cancel();
    }

    /// Wait for the most recent request to finish.
    ///
    /// Returns false if it was still running after `timeout`.
    pub async fn settle(&self, timeout: Duration) -> bool {
        let Some(handle) = lock(&self.latest).take() else {
            return true;
        };
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "companion request ended abnormally");
                true
            }
            Err(_) => false,
        }
    }

    fn dispatch(&self, prompt: String, thinking: &'static str, fallback: &'static str) {
        let ticket = self.session.begin();
        if !self.brain.is_loading() {
            self.bubble.show_message(thinking);
        }

        let progress: Progress = {
            let ticket = ticket.clone();
            let bubble = Arc::clone(&self.bubble);
            Arc::new(move |msg: &str| {
                // Download progress matters even to a superseded request
                if ticket.is_current() || msg.starts_with("Downloading") {
                    bubble.show_message(msg);
                }
            })
        };

        let brain = Arc::clone(&self.brain);
        let bubble = Arc::clone(&self.bubble);
        let handle = self.runtime.spawn(async move {
            let response = brain.ask(&prompt, progress).await;
            if !ticket.is_current() {
                tracing::debug!(session = ticket.id(), "stale answer discarded");
                return;
            }
            let response = response.trim();
            bubble.show_message(if response.is_empty() { fallback } else { response });
        });
        *lock(&self.latest) = Some(handle);
    }
}

impl SuggestionSink for Companion {
    fn suggest(&self, context: &str) {
        self.dispatch(suggestion_prompt(context), THINKING, EMPTY_SUGGESTION);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct Reply {
        delay: Duration,
        progress: Vec<&'static str>,
        text: &'static str,
    }

    #[derive(Default)]
    struct ScriptedBrain {
        replies: Mutex<VecDeque<Reply>>,
        prompts: Mutex<Vec<String>>,
        loading: bool,
    }

    impl ScriptedBrain {
        fn with(replies: Vec<Reply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl Brain for ScriptedBrain {
        async fn ask(&self, prompt: &str, progress: Progress) -> String {
            lock(&self.prompts).push(prompt.to_string());
            let reply = lock(&self.replies).pop_front();
            let Some(reply) = reply else {
                return String::new();
            };
            tokio::time::sleep(reply.delay).await;
            for msg in reply.progress {
                progress(msg);
            }
            reply.text.to_string()
        }

        fn is_available(&self) -> bool {
            true
        }

        fn is_loading(&self) -> bool {
            self.loading
        }
    }

    #[derive(Default)]
    struct RecordingBubble {
        messages: Mutex<Vec<String>>,
    }

    impl RecordingBubble {
        fn messages(&self) -> Vec<String> {
            lock(&self.messages).clone()
        }
    }

    impl Bubble for RecordingBubble {
        fn show_message(&self, text: &str) {
            lock(&self.messages).push(text.to_string());
        }
    }

    fn companion(brain: ScriptedBrain) -> (Companion, Arc<ScriptedBrain>, Arc<RecordingBubble>) {
        let brain = Arc::new(brain);
        let bubble = Arc::new(RecordingBubble::default());
        let companion = Companion::new(brain.clone(), bubble.clone(), Handle::current());
        (companion, brain, bubble)
    }

    #[tokio::test(start_paused = true)]
    async fn test_suggestion_shows_thinking_then_answer() {
        let (companion, brain, bubble) = companion(ScriptedBrain::with(vec![Reply {
            delay: Duration::from_secs(1),
            progress: vec![],
            text: "  Try `cargo build` first.\n",
        }]));

        companion.suggest("cargo biuld: no such command");
        assert!(companion.settle(Duration::from_secs(5)).await);

        assert_eq!(
            bubble.messages(),
            vec![THINKING.to_string(), "Try `cargo build` first.".to_string()]
        );
        assert_eq!(
            lock(&brain.prompts)[0],
            "Help the user based on this context. Keep it short and helpful:\ncargo biuld: no such command"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_answer_is_discarded() {
        let (companion, _, bubble) = companion(ScriptedBrain::with(vec![
            Reply {
                delay: Duration::from_secs(5),
                progress: vec!["Downloading brain... 40%", "Warming up"],
                text: "stale answer",
            },
            Reply {
                delay: Duration::from_secs(1),
                progress: vec![],
                text: "fresh answer",
            },
        ]));

        companion.suggest("first context");
        companion.suggest("second context");
        assert!(companion.settle(Duration::from_secs(10)).await);
        tokio::time::sleep(Duration::from_secs(10)).await;

        let messages = bubble.messages();
        assert!(messages.contains(&"fresh answer".to_string()));
        assert!(messages.contains(&"Downloading brain... 40%".to_string()));
        assert!(!messages.contains(&"stale answer".to_string()));
        assert!(!messages.contains(&"Warming up".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_answers_fall_back() {
        let (companion, _, bubble) = companion(ScriptedBrain::default());

        companion.suggest("anything");
        assert!(companion.settle(Duration::from_secs(1)).await);
        companion.poke();
        assert!(companion.settle(Duration::from_secs(1)).await);

        assert_eq!(
            bubble.messages(),
            vec![
                THINKING.to_string(),
                EMPTY_SUGGESTION.to_string(),
                POKE_THINKING.to_string(),
                EMPTY_POKE.to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_loading_brain_skips_thinking_message() {
        let brain = ScriptedBrain {
            loading: true,
            ..ScriptedBrain::with(vec![Reply {
                delay: Duration::from_millis(10),
                progress: vec![],
                text: "ready now",
            }])
        };
        let (companion, _, bubble) = companion(brain);

        companion.suggest("context");
        assert!(companion.settle(Duration::from_secs(1)).await);
        assert_eq!(bubble.messages(), vec!["ready now".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dismissed_answer_is_never_shown() {
        let (companion, _, bubble) = companion(ScriptedBrain::with(vec![Reply {
            delay: Duration::from_secs(3),
            progress: vec!["Warming up"],
            text: "too late",
        }]));

        companion.suggest("context");
        companion.dismiss();
        assert!(companion.settle(Duration::from_secs(10)).await);
        assert_eq!(bubble.messages(), vec![THINKING.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_times_out_on_slow_brain() {
        let (companion, _, _) = companion(ScriptedBrain::with(vec![Reply {
            delay: Duration::from_secs(60),
            progress: vec![],
            text: "eventually",
        }]));

        companion.suggest("context");
        assert!(!companion.settle(Duration::from_secs(1)).await);
        assert!(companion.settle(Duration::from_secs(1)).await);
    }
}
