//! Repository-state watcher
//!
//! Polls the working tree of the workspace and reports, as informational
//! context, what the user appears to be working on. Its signals carry no
//! trigger weight; a missing workspace or a non-repository is simply quiet.

use super::SignalSink;
use crate::config::GitTuning;
use crate::signal::{Signal, SignalKind};
use crate::util::{lock, sleep_or_cancel, spawn_supervised};
use git2::{Repository, StatusOptions};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const STATUS_CONFIDENCE: f64 = 0.3;

/// Working-tree state inferred from git
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingTree {
    pub branch: String,
    /// Modified, staged and untracked paths, sorted and deduplicated
    pub changed_files: BTreeSet<PathBuf>,
    /// Inferred focus area (what the user seems to be working on)
    pub inferred_focus: Option<String>,
}

impl WorkingTree {
    /// Read the working tree of the repository containing `path`
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let repo = Repository::discover(path)?;
        let branch = current_branch(&repo);
        let changed_files = changed_files(&repo)?;
        let inferred_focus = infer_focus(&changed_files);
        Ok(Self {
            branch,
            changed_files,
            inferred_focus,
        })
    }

    fn describe(&self) -> String {
        let mut out = format!(
            "Branch: {}\nChanged files: {}",
            self.branch,
            self.changed_files.len()
        );
        if let Some(focus) = &self.inferred_focus {
            out.push_str(&format!("\nFocus: {}", focus));
        }
        out
    }
}

pub struct GitWatcher {
    sink: Arc<dyn SignalSink>,
    tuning: GitTuning,
    workspace: Option<PathBuf>,
    active: AtomicBool,
    last_seen: Mutex<Option<BTreeSet<PathBuf>>>,
}

impl GitWatcher {
    pub fn new(sink: Arc<dyn SignalSink>, tuning: GitTuning, workspace: Option<PathBuf>) -> Self {
        Self {
            sink,
            tuning,
            workspace,
            active: AtomicBool::new(false),
            last_seen: Mutex::new(None),
        }
    }

    /// Activate and spawn the poller
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        self.active.store(true, Ordering::SeqCst);

        let watcher = Arc::clone(self);
        let period = Duration::from_secs(self.tuning.poll_secs);
        spawn_supervised("git_poll", async move {
            while sleep_or_cancel(period, &cancel).await {
                if !watcher.is_active() {
                    break;
                }
                let Some(workspace) = watcher.workspace.clone() else {
                    continue;
                };
                match tokio::task::spawn_blocking(move || WorkingTree::load(&workspace)).await {
                    Ok(Ok(tree)) => watcher.observe(tree),
                    Ok(Err(err)) => tracing::debug!(error = %err, "git status unavailable"),
                    Err(err) => tracing::debug!(error = %err, "git status task failed"),
                }
            }
            tracing::debug!("git poller stopped");
        })
    }

    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Compare a fresh reading with the previous one and report changes.
    ///
    /// The first reading only establishes a baseline unless files are
    /// already changed.
    pub fn observe(&self, tree: WorkingTree) {
        if !self.is_active() {
            return;
        }

        let changed = {
            let mut last = lock(&self.last_seen);
            let differs = match last.as_ref() {
                Some(previous) => *previous != tree.changed_files,
                None => !tree.changed_files.is_empty(),
            };
            *last = Some(tree.changed_files.clone());
            differs
        };

        if changed {
            tracing::debug!(branch = %tree.branch, files = tree.changed_files.len(), "working tree changed");
            self.sink
                .emit(Signal::new(SignalKind::GitStatus, tree.describe(), STATUS_CONFIDENCE));
        }
    }
}

fn current_branch(repo: &Repository) -> String {
    match repo.head() {
        Ok(head) => head.shorthand().unwrap_or("HEAD").to_string(),
        // Fresh repository without commits
        Err(_) => "HEAD".to_string(),
    }
}

fn changed_files(repo: &Repository) -> anyhow::Result<BTreeSet<PathBuf>> {
    let mut opts = StatusOptions::new();
    opts.include_untracked(true);
    opts.include_ignored(false);
    opts.include_unmodified(false);
    opts.recurse_untracked_dirs(true);
    opts.exclude_submodules(true);

    let statuses = repo.statuses(Some(&mut opts))?;
    Ok(statuses
        .iter()
        .filter(|entry| {
            let status = entry.status();
            status.is_wt_modified()
                || status.is_wt_deleted()
                || status.is_wt_renamed()
                || status.is_wt_new()
                || status.is_index_new()
                || status.is_index_modified()
                || status.is_index_deleted()
                || status.is_index_renamed()
        })
        .filter_map(|entry| entry.path().map(PathBuf::from))
        .collect())
}

/// Infer what the user is focused on from the paths being changed
fn infer_focus(files: &BTreeSet<PathBuf>) -> Option<String> {
    if files.is_empty() {
        return None;
    }

    let focus_keywords = [
        "auth", "api", "db", "database", "ui", "test", "config", "util", "model", "view",
        "controller", "service", "handler", "route", "component", "hook", "store",
    ];

    let mut dir_counts: HashMap<String, usize> = HashMap::new();
    let mut keyword_counts: HashMap<&str, usize> = HashMap::new();

    for file in files {
        let shown = file.to_string_lossy().replace('\\', "/");
        let parts: Vec<&str> = shown.split('/').collect();
        if parts.len() > 1 {
            *dir_counts.entry(parts[0].to_string()).or_insert(0) += 1;
        }

        let lower = shown.to_lowercase();
        for keyword in &focus_keywords {
            if lower.contains(keyword) {
                *keyword_counts.entry(*keyword).or_insert(0) += 1;
            }
        }
    }

    // Ties break alphabetically so the result is stable between polls
    let top_dir = dir_counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)));
    let top_keyword = keyword_counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)));

    match (top_dir, top_keyword) {
        (Some((dir, _)), Some((keyword, _))) => Some(format!("{} ({})", keyword, dir)),
        (Some((dir, _)), None) => Some(format!("{}/", dir)),
        (None, Some((keyword, _))) => Some(keyword.to_string()),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watchers::testing::CollectingSink;
    use std::fs;
    use tempfile::tempdir;

    fn tree(files: &[&str]) -> WorkingTree {
        let changed_files: BTreeSet<PathBuf> = files.iter().map(PathBuf::from).collect();
        let inferred_focus = infer_focus(&changed_files);
        WorkingTree {
            branch: "main".to_string(),
            changed_files,
            inferred_focus,
        }
    }

    #[test]
    fn test_infer_focus() {
        let files: BTreeSet<PathBuf> = [
            PathBuf::from("src/auth/login.rs"),
            PathBuf::from("src/auth/session.rs"),
        ]
        .into_iter()
        .collect();

        let focus = infer_focus(&files).unwrap();
        assert_eq!(focus, "auth (src)");
        assert_eq!(infer_focus(&BTreeSet::new()), None);
    }

    #[test]
    fn test_observe_reports_only_changes() {
        let sink = Arc::new(CollectingSink::default());
        let watcher = GitWatcher::new(sink.clone(), GitTuning::default(), None);
        watcher.active.store(true, Ordering::SeqCst);

        watcher.observe(tree(&[]));
        assert!(sink.signals().is_empty());

        watcher.observe(tree(&["src/api/routes.rs"]));
        watcher.observe(tree(&["src/api/routes.rs"]));
        let signals = sink.signals();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind, SignalKind::GitStatus);
        assert!(signals[0].payload.contains("Changed files: 1"));
        assert!(signals[0].payload.contains("Focus: api (src)"));

        watcher.observe(tree(&[]));
        assert_eq!(sink.signals().len(), 2);
    }

    #[test]
    fn test_working_tree_load_reads_repository() {
        let dir = tempdir().unwrap();
        Repository::init(dir.path()).unwrap();
        fs::create_dir_all(dir.path().join("src/db")).unwrap();
        fs::write(dir.path().join("src/db/pool.rs"), "fn pool() {}\n").unwrap();

        let tree = WorkingTree::load(dir.path()).unwrap();
        assert_eq!(tree.changed_files.len(), 1);
        assert!(tree.changed_files.contains(Path::new("src/db/pool.rs")));
        assert_eq!(tree.inferred_focus.as_deref(), Some("db (src)"));
    }

    #[test]
    fn test_load_outside_repository_errors() {
        let dir = tempdir().unwrap();
        assert!(WorkingTree::load(dir.path()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_without_workspace_stays_quiet() {
        let sink = Arc::new(CollectingSink::default());
        let watcher = Arc::new(GitWatcher::new(sink.clone(), GitTuning::default(), None));
        let cancel = CancellationToken::new();
        let handle = watcher.start(cancel.clone());
        assert!(watcher.is_active());

        tokio::time::advance(Duration::from_secs(61)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert!(sink.signals().is_empty());
    }
}
