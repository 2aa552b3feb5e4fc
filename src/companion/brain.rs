//! HTTP brain for OpenAI-compatible chat completion endpoints
//!
//! Works with a local llama.cpp or similar server out of the box; set the
//! configured API key variable to talk to a hosted endpoint instead.

use super::{Brain, Progress};
use crate::config::AssistantConfig;
use crate::util::truncate_str;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Rate limit retry configuration
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 2000;
const BACKOFF_MULTIPLIER: u64 = 2;

/// Keeps answers to one thought
const STOP_SEQUENCES: [&str; 2] = ["###", "\n\n"];

const UNREACHABLE: &str = "My brain hurts. (Assistant is unreachable)";
const CONFUSED: &str = "I'm confused.";

#[derive(Debug, thiserror::Error)]
pub enum BrainError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("rate limited after {0} retries")]
    RateLimited(u32),
    #[error("endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Serialize, Debug)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    stop: [&'static str; 2],
    stream: bool,
}

#[derive(Serialize, Debug)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct ChatBrain {
    client: reqwest::Client,
    config: AssistantConfig,
    api_key: Option<String>,
}

impl ChatBrain {
    pub fn new(config: AssistantConfig) -> Result<Self, BrainError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        let api_key = config.api_key();
        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    /// One completion, retrying with exponential backoff while rate limited
    pub async fn complete(&self, prompt: &str) -> Result<String, BrainError> {
        let request = build_request(&self.config, prompt);
        let mut retry_count = 0;

        loop {
            let mut builder = self.client.post(&self.config.endpoint).json(&request);
            if let Some(key) = &self.api_key {
                builder = builder.bearer_auth(key);
            }

            let response = builder.send().await?;
            let status = response.status();
            let text = response.text().await?;

            if status.is_success() {
                return extract_reply(&text);
            }

            if status.as_u16() == 429 {
                if retry_count >= MAX_RETRIES {
                    return Err(BrainError::RateLimited(retry_count));
                }
                retry_count += 1;
                let retry_after = parse_retry_after(&text).unwrap_or_else(|| {
                    (INITIAL_BACKOFF_MS * BACKOFF_MULTIPLIER.pow(retry_count - 1)) / 1000
                });
                tracing::warn!(
                    retry_after,
                    attempt = retry_count,
                    max = MAX_RETRIES,
                    "assistant rate limited, retrying"
                );
                tokio::time::sleep(Duration::from_secs(retry_after)).await;
                continue;
            }

            return Err(BrainError::Status {
                status: status.as_u16(),
                body: truncate_str(&text, 200).to_string(),
            });
        }
    }
}

#[async_trait]
impl Brain for ChatBrain {
    async fn ask(&self, prompt: &str, _progress: Progress) -> String {
        match self.complete(prompt).await {
            Ok(reply) => reply,
            Err(BrainError::Http(err)) if err.is_connect() || err.is_timeout() => {
                tracing::warn!(error = %err, endpoint = %self.config.endpoint, "assistant unreachable");
                UNREACHABLE.to_string()
            }
            Err(err) => {
                tracing::warn!(error = %err, "assistant request failed");
                CONFUSED.to_string()
            }
        }
    }

    fn is_available(&self) -> bool {
        !self.config.endpoint.trim().is_empty()
    }
}

fn build_request<'a>(config: &'a AssistantConfig, prompt: &'a str) -> ChatRequest<'a> {
    ChatRequest {
        model: &config.model,
        messages: vec![Message {
            role: "user",
            content: prompt,
        }],
        max_tokens: config.max_tokens,
        stop: STOP_SEQUENCES,
        stream: false,
    }
}

/// Text of the first choice, trimmed; empty when the model said nothing
fn extract_reply(body: &str) -> Result<String, BrainError> {
    let parsed: ChatResponse = serde_json::from_str(body)?;
    Ok(parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|c| c.trim().to_string())
        .unwrap_or_default())
}

/// Look for a "retry after N seconds" hint in an error body
fn parse_retry_after(text: &str) -> Option<u64> {
    let text_lower = text.to_lowercase();
    let pos = text_lower.find("retry")?;
    text_lower[pos..]
        .split_whitespace()
        .skip(1)
        .take(5)
        .filter_map(|word| {
            word.trim_matches(|c: char| !c.is_numeric())
                .parse::<u64>()
                .ok()
        })
        .find(|secs| *secs > 0 && *secs < 300)
}
