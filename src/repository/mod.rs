//! A single mirrored repository: a bare clone directory, its worktree
//! links, and the control loop that keeps both in sync with upstream.
//!
//! Split across submodules by responsibility: `mod.rs` holds construction
//! and shared state, `lifecycle.rs` the init/validate step, `cycle.rs` the
//! fetch/ensure/cleanup body of one mirror cycle, `loop_.rs` the
//! scheduling loop, `queries.rs` the read-only operations.

mod cycle;
mod lifecycle;
mod loop_;
mod queries;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{Mutex, Notify, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::{AuthConfig, GcMode, RepoConfig, repo_name_from_url, synthesize_link};
use crate::error::MirrorError;
use crate::git::{GitInvoker, RemoteUrl};
use crate::metrics::MetricsSink;
use crate::worktree::WorktreeLink;

pub use queries::{CommitInfo, CommitWithChangedFiles};
pub(crate) use loop_::timeout_token;

/// Externally-visible lifecycle state. Everything except `running` is
/// internal bookkeeping exposed for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoState {
    Idle,
    Initializing,
    Fetching,
    EnsuringWorktrees,
    Cleaning,
}

/// A repository under mirror. `remote`, `root`, `dir`, and friends are
/// fixed at construction; `worktree_links` and `state` change over the
/// object's life.
pub struct Repository {
    pub(crate) remote: String,
    pub(crate) parsed_url: RemoteUrl,
    pub(crate) root: PathBuf,
    pub(crate) link_root: PathBuf,
    pub(crate) dir: PathBuf,
    pub(crate) interval: Duration,
    pub(crate) mirror_timeout: Duration,
    pub(crate) auth: AuthConfig,
    pub(crate) gc_mode: GcMode,
    pub(crate) envs: HashMap<String, String>,
    pub(crate) invoker: GitInvoker,
    pub(crate) metrics: Arc<dyn MetricsSink>,

    pub(crate) worktree_links: Mutex<HashMap<String, WorktreeLink>>,
    state: StdMutex<RepoState>,
    running: AtomicBool,
    /// Exclusive while a mirror cycle is in progress; shared for read-only
    /// queries. `dir` and `.worktrees/` are only ever mutated under the
    /// write guard.
    pub(crate) dir_lock: RwLock<()>,
    stop: CancellationToken,
    stopped: Notify,
    /// Single-slot immediate-refresh request; two sends before the loop
    /// wakes coalesce into one cycle.
    refresh: Notify,
}

impl Repository {
    /// Build a repository from a config record. Validates `root`,
    /// `interval`, and `mirror_timeout`; does not touch the filesystem
    /// (the bare clone is created on first cycle).
    pub fn new(
        config: &RepoConfig,
        defaults: &crate::config::Defaults,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, MirrorError> {
        let parsed_url = RemoteUrl::parse(&config.remote)
            .ok_or_else(|| MirrorError::Parse(format!("unparseable remote URL {:?}", config.remote)))?;

        let root = PathBuf::from(config.root.clone().unwrap_or_else(|| defaults.root.clone()));
        if !root.is_absolute() {
            return Err(MirrorError::ConfigInvalid(format!(
                "root {} must be absolute",
                root.display()
            )));
        }

        let link_root = config
            .link_root
            .clone()
            .or_else(|| defaults.link_root.clone())
            .map(PathBuf::from)
            .unwrap_or_else(|| root.clone());
        if !link_root.is_absolute() {
            return Err(MirrorError::ConfigInvalid(format!(
                "link_root {} must be absolute",
                link_root.display()
            )));
        }

        let interval = config.interval.unwrap_or(defaults.interval);
        if interval < Duration::from_secs(1) {
            return Err(MirrorError::ConfigInvalid(
                "interval must be at least 1 second".to_string(),
            ));
        }

        let mirror_timeout = config.mirror_timeout.unwrap_or(defaults.mirror_timeout);
        if mirror_timeout < Duration::from_secs(1) {
            return Err(MirrorError::ConfigInvalid(
                "mirror_timeout must be at least 1 second".to_string(),
            ));
        }

        let gc_mode = config.git_gc.unwrap_or(defaults.git_gc);
        let auth = config.auth.clone().unwrap_or_else(|| defaults.auth.clone());

        let repo_name = repo_name_from_url(&parsed_url);
        let dir = root.join("repo-mirrors").join(format!("{repo_name}.git"));

        let mut envs = HashMap::new();
        if let Ok(path) = std::env::var("PATH") {
            envs.insert("PATH".to_string(), path);
        }

        let mut worktree_links = HashMap::new();
        for wt in &config.worktrees {
            let link = wt
                .link
                .clone()
                .unwrap_or_else(|| synthesize_link(&repo_name, &wt.git_ref));
            let parsed = WorktreeLink::new(link.clone(), Some(wt.git_ref.clone()), wt.pathspecs.clone());
            if worktree_links.insert(link.clone(), parsed).is_some() {
                return Err(MirrorError::ConfigInvalid(format!(
                    "duplicate worktree link {link:?} on repository {:?}",
                    config.remote
                )));
            }
        }

        Ok(Self {
            remote: config.remote.trim().to_lowercase().trim_end_matches('/').to_string(),
            parsed_url,
            root,
            link_root,
            dir,
            interval,
            mirror_timeout,
            auth,
            gc_mode,
            envs,
            invoker: GitInvoker::resolve(),
            metrics,
            worktree_links: Mutex::new(worktree_links),
            state: StdMutex::new(RepoState::Idle),
            running: AtomicBool::new(false),
            dir_lock: RwLock::new(()),
            stop: CancellationToken::new(),
            stopped: Notify::new(),
            refresh: Notify::new(),
        })
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn parsed_url(&self) -> &RemoteUrl {
        &self.parsed_url
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    pub fn state(&self) -> RepoState {
        *self.state.lock().unwrap()
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn set_state(&self, state: RepoState) {
        *self.state.lock().unwrap() = state;
    }

    /// Request an out-of-schedule mirror cycle. Coalesces with any
    /// already-pending request.
    pub fn queue_mirror_run(&self) {
        self.refresh.notify_one();
    }

    /// Signal the control loop to stop. Does not block; await
    /// [`Repository::wait_stopped`] to observe shutdown completion.
    pub fn request_stop(&self) {
        self.stop.cancel();
    }

    pub async fn wait_stopped(&self) {
        loop {
            let notified = self.stopped.notified();
            if !self.running() {
                return;
            }
            notified.await;
        }
    }

    pub(crate) fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }

    pub(crate) fn refresh_notify(&self) -> &Notify {
        &self.refresh
    }

    pub(crate) fn mark_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
        if !running {
            self.stopped.notify_waiters();
        }
    }

    /// Add a worktree link. Returns an error if a link with the same key
    /// already exists.
    pub async fn add_worktree_link(&self, link: WorktreeLink) -> Result<(), MirrorError> {
        let mut links = self.worktree_links.lock().await;
        if links.contains_key(&link.link) {
            return Err(MirrorError::AlreadyExists {
                remote: link.link.clone(),
            });
        }
        links.insert(link.link.clone(), link);
        Ok(())
    }

    /// Remove a worktree link by its key. The published symlink and
    /// worktree directory are cleaned up on the next cycle.
    pub async fn remove_worktree_link(&self, link_key: &str) -> Result<(), MirrorError> {
        let mut links = self.worktree_links.lock().await;
        links
            .remove(link_key)
            .map(|_| ())
            .ok_or_else(|| MirrorError::NotFound {
                remote: link_key.to_string(),
            })
    }

    pub(crate) fn env_for(&self, inject_ssh: bool) -> HashMap<String, String> {
        let mut env = self.envs.clone();
        if inject_ssh
            && matches!(
                self.parsed_url.scheme,
                crate::git::UrlScheme::Scp | crate::git::UrlScheme::Ssh
            )
        {
            let cmd = crate::git::ssh_command(
                Some(self.auth.ssh_key_path.as_str()).filter(|s| !s.is_empty()),
                Some(self.auth.ssh_known_hosts_path.as_str()).filter(|s| !s.is_empty()),
            );
            env.insert("GIT_SSH_COMMAND".to_string(), cmd);
        }
        env
    }

    pub(crate) async fn run_git(
        &self,
        cwd: &std::path::Path,
        args: &[&str],
        inject_ssh: bool,
        cancel: &CancellationToken,
    ) -> Result<String, MirrorError> {
        let env = self.env_for(inject_ssh);
        self.invoker.run(cwd, &env, args, cancel).await
    }
}
