//! Configuration management for sidekick
//!
//! Stores settings in ~/.config/sidekick/config.json

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Listener names understood by the watcher registry
pub const ALL_LISTENERS: [&str; 4] = ["ast", "terminal", "git", "user_behavior"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidekickConfig {
    /// Master switch. When false every engine entry point is a no-op.
    #[serde(default)]
    pub enabled: bool,
    /// Which watchers to build (`ast`, `terminal`, `git`, `user_behavior`)
    #[serde(default = "default_listeners")]
    pub listeners: Vec<String>,
    #[serde(default)]
    pub tuning: Tuning,
    #[serde(default)]
    pub assistant: AssistantConfig,
}

impl Default for SidekickConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listeners: default_listeners(),
            tuning: Tuning::default(),
            assistant: AssistantConfig::default(),
        }
    }
}

fn default_listeners() -> Vec<String> {
    ALL_LISTENERS.iter().map(|s| s.to_string()).collect()
}

/// Every numeric threshold the engine and its watchers use
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Tuning {
    pub engine: EngineTuning,
    pub terminal: TerminalTuning,
    pub behavior: BehaviorTuning,
    pub ast: AstTuning,
    pub git: GitTuning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineTuning {
    /// Raw storage window applied on every add
    pub retention_secs: u64,
    /// Tighter window applied by the maintenance loop
    pub relevance_window_secs: u64,
    pub maintenance_interval_ms: u64,
    pub trigger_threshold: u8,
    /// Max characters of error text put into a suggestion context
    pub error_context_chars: usize,
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            retention_secs: 300,
            relevance_window_secs: 60,
            maintenance_interval_ms: 2000,
            trigger_threshold: crate::score::DEFAULT_TRIGGER_THRESHOLD,
            error_context_chars: 300,
        }
    }
}

impl EngineTuning {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn relevance_window(&self) -> Duration {
        Duration::from_secs(self.relevance_window_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalTuning {
    pub buffer_lines: usize,
    /// Trailing lines included in a `terminal_error` payload
    pub context_lines: usize,
}

impl Default for TerminalTuning {
    fn default() -> Self {
        Self {
            buffer_lines: 50,
            context_lines: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorTuning {
    pub undo_burst: f64,
    pub redo_burst: f64,
    pub typing_burst: f64,
    pub typing_window_secs: u64,
    pub fidget_burst: f64,
    pub large_paste_chars: usize,
    /// Subtracted from unrelated counters on every action
    pub counter_decay: f64,
    pub idle_poll_secs: u64,
    pub idle_secs: u64,
    pub deep_idle_secs: u64,
}

impl Default for BehaviorTuning {
    fn default() -> Self {
        Self {
            undo_burst: 3.0,
            redo_burst: 3.0,
            typing_burst: 30.0,
            typing_window_secs: 10,
            fidget_burst: 10.0,
            large_paste_chars: 200,
            counter_decay: 0.1,
            idle_poll_secs: 10,
            idle_secs: 30,
            deep_idle_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AstTuning {
    pub max_indentation: usize,
    pub large_module_lines: usize,
    pub spike_growth_lines: usize,
    pub spike_window_secs: u64,
    pub max_syntax_nodes: usize,
    /// Bounded wait of the debounce worker between deactivation checks
    pub worker_wait_ms: u64,
}

impl Default for AstTuning {
    fn default() -> Self {
        Self {
            max_indentation: 5,
            large_module_lines: 500,
            spike_growth_lines: 50,
            spike_window_secs: 30,
            max_syntax_nodes: 1000,
            worker_wait_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitTuning {
    pub poll_secs: u64,
}

impl Default for GitTuning {
    fn default() -> Self {
        Self { poll_secs: 30 }
    }
}

impl Tuning {
    /// Replace zero periods with their defaults so no loop spins
    pub fn sanitized(mut self) -> Self {
        fn fix(name: &str, value: &mut u64, default: u64) {
            if *value == 0 {
                tracing::warn!("{name} must be positive, using {default}");
                *value = default;
            }
        }

        let engine = EngineTuning::default();
        let behavior = BehaviorTuning::default();
        let ast = AstTuning::default();
        let git = GitTuning::default();

        fix(
            "engine.maintenance_interval_ms",
            &mut self.engine.maintenance_interval_ms,
            engine.maintenance_interval_ms,
        );
        fix(
            "behavior.idle_poll_secs",
            &mut self.behavior.idle_poll_secs,
            behavior.idle_poll_secs,
        );
        fix("ast.worker_wait_ms", &mut self.ast.worker_wait_ms, ast.worker_wait_ms);
        fix("git.poll_secs", &mut self.git.poll_secs, git.poll_secs);

        if self.engine.relevance_window_secs > self.engine.retention_secs {
            tracing::warn!(
                "engine.relevance_window_secs ({}) exceeds retention ({}), clamped",
                self.engine.relevance_window_secs,
                self.engine.retention_secs
            );
            self.engine.relevance_window_secs = self.engine.retention_secs;
        }
        if self.behavior.counter_decay.is_nan() || self.behavior.counter_decay < 0.0 {
            self.behavior.counter_decay = behavior.counter_decay;
        }
        self
    }
}

/// Where suggestions are sent for completion
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// OpenAI-compatible chat completions endpoint
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding an optional bearer token
    pub api_key_env: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080/v1/chat/completions".to_string(),
            model: "deepseek-coder-1.3b-instruct".to_string(),
            api_key_env: "SIDEKICK_API_KEY".to_string(),
            max_tokens: 128,
            timeout_secs: 60,
        }
    }
}

impl AssistantConfig {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

impl SidekickConfig {
    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("sidekick"))
    }

    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk, or return default
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_or_default(&path),
            None => Self::default(),
        }
    }

    /// Load from `path`; a missing file gives defaults and a corrupt one is
    /// preserved next to it before falling back to defaults.
    pub fn load_or_default(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => return Self::default(),
        };

        match serde_json::from_str::<Self>(&content) {
            Ok(config) => config.normalized(),
            Err(err) => {
                preserve_corrupt_config(path, &content);
                tracing::warn!(
                    error = %err,
                    path = %path.display(),
                    "config file was corrupted, a backup was saved and defaults were loaded"
                );
                Self::default()
            }
        }
    }

    /// Strict load, for callers that want to surface errors
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config.normalized())
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<PathBuf> {
        let path =
            Self::config_path().context("Could not determine config directory")?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }

        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        write_config_atomic(path, &content).context("Failed to write config")?;
        Ok(())
    }

    /// Whether `listener` is in the allow-list
    pub fn listens_to(&self, listener: &str) -> bool {
        self.listeners.iter().any(|l| l == listener)
    }

    fn normalized(mut self) -> Self {
        self.listeners = self
            .listeners
            .into_iter()
            .map(|l| l.trim().to_ascii_lowercase())
            .filter(|l| !l.is_empty())
            .collect();
        self.tuning = self.tuning.sanitized();
        self
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let backup = path.with_extension("json.corrupt");
    if let Err(err) = fs::write(&backup, content) {
        tracing::warn!(error = %err, "failed to back up corrupt config");
    }
}

fn write_config_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}
