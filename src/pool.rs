//! The repository pool: owns many [`Repository`]s, reconciles them against
//! a declarative desired state, and coordinates shutdown.
//!
//! Separates "apply defaults, then validate" from the domain object's own
//! construction — here that domain object is [`Repository`], and the pool
//! additionally owns the cross-repository invariant that no two worktree
//! links may publish to the same absolute path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::{DesiredState, RepoConfig};
use crate::error::MirrorError;
use crate::git::RemoteUrl;
use crate::metrics::MetricsSink;
use crate::repository::Repository;
use crate::worktree::WorktreeLink;

/// Owns every mirrored repository and the root cancellation that tears the
/// pool down. Construct with [`RepositoryPool::new`], then
/// [`RepositoryPool::start_loop`] to begin scheduling.
pub struct RepositoryPool {
    default_root: PathBuf,
    metrics: Arc<dyn MetricsSink>,
    members: RwLock<HashMap<String, Arc<Repository>>>,
    root_cancel: CancellationToken,
    /// Cancelled once every member has observed `running() == false` after
    /// `root_cancel` fires. Callers await `pool.stopped().cancelled()`.
    stopped: CancellationToken,
}

impl RepositoryPool {
    /// Validate `desired`, construct a repository per entry (without
    /// starting any loop), check cross-repository worktree link path
    /// uniqueness, and spawn the shutdown watcher bound to `root_cancel`.
    ///
    /// A one-shot orphan cleanup of the default root runs after
    /// construction.
    pub async fn new(
        root_cancel: CancellationToken,
        desired: &DesiredState,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Arc<Self>, MirrorError> {
        validate_defaults(&desired.defaults)?;

        let mut members = HashMap::new();
        for repo_config in &desired.repositories {
            let repo = Repository::new(repo_config, &desired.defaults, Arc::clone(&metrics))?;
            let key = repo.remote().to_string();
            if members.contains_key(&key) {
                return Err(MirrorError::ConfigInvalid(format!(
                    "duplicate remote {key:?} in desired state"
                )));
            }
            members.insert(key, Arc::new(repo));
        }

        let values: Vec<Arc<Repository>> = members.values().cloned().collect();
        check_link_uniqueness(values.iter()).await?;

        let pool = Arc::new(Self {
            default_root: PathBuf::from(&desired.defaults.root),
            metrics,
            members: RwLock::new(members),
            root_cancel,
            stopped: CancellationToken::new(),
        });

        Arc::clone(&pool).spawn_shutdown_watcher();
        pool.cleanup_orphans().await;

        Ok(pool)
    }

    /// Cancelled once shutdown has fully drained: every member observed
    /// `running() == false` after `root_cancel` fired.
    pub fn stopped(&self) -> &CancellationToken {
        &self.stopped
    }

    fn spawn_shutdown_watcher(self: Arc<Self>) {
        tokio::spawn(async move {
            self.root_cancel.cancelled().await;
            log::info!("pool shutdown requested");

            let members: Vec<Arc<Repository>> = self.members.read().await.values().cloned().collect();
            for repo in &members {
                repo.request_stop();
            }

            loop {
                if members.iter().all(|r| !r.running()) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }

            self.stopped.cancel();
            log::info!("pool stopped");
        });
    }

    /// Start every repository whose loop is not currently running.
    pub async fn start_loop(&self) {
        let members: Vec<Arc<Repository>> = self.members.read().await.values().cloned().collect();
        for repo in members {
            if !repo.running() {
                tokio::spawn(async move {
                    repo.run_loop().await;
                });
            }
        }
    }

    /// Run one mirror of each repository sequentially, each bounded by
    /// `timeout`. The first error aborts and surfaces; repositories after
    /// it are not mirrored this pass.
    pub async fn mirror_all(&self, timeout: Duration) -> Result<(), MirrorError> {
        let members: Vec<Arc<Repository>> = self.members.read().await.values().cloned().collect();
        for repo in members {
            let cancel = crate::repository::timeout_token(timeout);
            repo.run_cycle(&cancel).await?;
        }
        Ok(())
    }

    /// Write to the named repository's single-slot immediate-refresh
    /// channel. `remote` is matched by URL equivalence, not string
    /// identity.
    pub async fn queue_mirror_run(&self, remote: &str) -> Result<(), MirrorError> {
        let parsed = RemoteUrl::parse(remote)
            .ok_or_else(|| MirrorError::Parse(format!("unparseable remote URL {remote:?}")))?;
        let members = self.members.read().await;
        let repo = find_equivalent(&parsed, &members)
            .ok_or_else(|| MirrorError::NotFound { remote: remote.to_string() })?;
        repo.queue_mirror_run();
        Ok(())
    }

    /// Add a repository. Fails with [`MirrorError::AlreadyExists`] if its
    /// URL (by equivalence) already belongs to a member, or if any of its
    /// worktree links would collide with a path already published by
    /// another member.
    pub async fn add_repository(
        &self,
        repo_config: &RepoConfig,
        defaults: &crate::config::Defaults,
    ) -> Result<(), MirrorError> {
        let parsed = RemoteUrl::parse(&repo_config.remote)
            .ok_or_else(|| MirrorError::Parse(format!("unparseable remote URL {:?}", repo_config.remote)))?;

        {
            let members = self.members.read().await;
            if find_equivalent(&parsed, &members).is_some() {
                return Err(MirrorError::AlreadyExists { remote: repo_config.remote.clone() });
            }
        }

        let repo = Arc::new(Repository::new(repo_config, defaults, Arc::clone(&self.metrics))?);

        {
            let members = self.members.read().await;
            let mut combined: Vec<Arc<Repository>> = members.values().cloned().collect();
            combined.push(Arc::clone(&repo));
            check_link_uniqueness(combined.iter()).await?;
        }

        self.members.write().await.insert(repo.remote().to_string(), repo);
        Ok(())
    }

    /// Remove a repository: stop its loop (bounded by its own
    /// `mirror_timeout`), unlink every published symlink, then remove its
    /// bare repo directory. Link/directory removal failures are logged,
    /// not fatal — removal is best-effort.
    pub async fn remove_repository(&self, remote: &str) -> Result<(), MirrorError> {
        let parsed = RemoteUrl::parse(remote)
            .ok_or_else(|| MirrorError::Parse(format!("unparseable remote URL {remote:?}")))?;

        let repo = {
            let members = self.members.read().await;
            find_equivalent(&parsed, &members).cloned()
        }
        .ok_or_else(|| MirrorError::NotFound { remote: remote.to_string() })?;

        repo.request_stop();
        repo.wait_stopped().await;

        let links: Vec<WorktreeLink> = repo.worktree_links.lock().await.values().cloned().collect();
        for link in &links {
            let link_abs = link.link_abs(&repo.link_root);
            if let Err(e) = std::fs::remove_file(&link_abs) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("failed to unlink {}: {e}", link_abs.display());
                }
            }
        }

        if repo.dir().exists() {
            if let Err(e) = std::fs::remove_dir_all(repo.dir()) {
                log::warn!("failed to remove {}: {e}", repo.dir().display());
            }
        }

        self.members.write().await.remove(repo.remote());
        Ok(())
    }

    /// Add a worktree link to a member repository, rejecting it if its
    /// resolved absolute path would collide with one already published by
    /// any member (including the same repository).
    pub async fn add_worktree_link(&self, remote: &str, link: WorktreeLink) -> Result<(), MirrorError> {
        let parsed = RemoteUrl::parse(remote)
            .ok_or_else(|| MirrorError::Parse(format!("unparseable remote URL {remote:?}")))?;

        let members = self.members.read().await;
        let repo = find_equivalent(&parsed, &members)
            .ok_or_else(|| MirrorError::NotFound { remote: remote.to_string() })?;

        let link_abs = link.link_abs(&repo.link_root);
        for other in members.values() {
            let other_links = other.worktree_links.lock().await;
            if other_links.values().any(|l| l.link_abs(&other.link_root) == link_abs) {
                return Err(MirrorError::AlreadyExists { remote: link_abs.display().to_string() });
            }
        }

        repo.add_worktree_link(link).await
    }

    /// Remove a worktree link from a member repository by its link key.
    pub async fn remove_worktree_link(&self, remote: &str, link_key: &str) -> Result<(), MirrorError> {
        let parsed = RemoteUrl::parse(remote)
            .ok_or_else(|| MirrorError::Parse(format!("unparseable remote URL {remote:?}")))?;

        let members = self.members.read().await;
        let repo = find_equivalent(&parsed, &members)
            .ok_or_else(|| MirrorError::NotFound { remote: remote.to_string() })?;

        repo.remove_worktree_link(link_key).await
    }

    /// Reconcile the pool against a newer desired state: remove members no
    /// longer present (by URL equivalence), add new ones, then diff
    /// worktree links within every still-matched repository (removed
    /// before new). Individual add/remove failures are logged and do not
    /// abort the pass.
    pub async fn reconfigure(&self, desired: &DesiredState) -> Result<(), MirrorError> {
        validate_defaults(&desired.defaults)?;

        let current: Vec<Arc<Repository>> = self.members.read().await.values().cloned().collect();

        for repo in &current {
            let still_desired = desired
                .repositories
                .iter()
                .filter_map(|rc| RemoteUrl::parse(&rc.remote))
                .any(|u| u.same_as(repo.parsed_url()));
            if !still_desired {
                if let Err(e) = self.remove_repository(repo.remote()).await {
                    log::warn!("reconfigure: failed to remove {}: {e}", repo.remote());
                }
            }
        }

        for repo_config in &desired.repositories {
            let Some(parsed) = RemoteUrl::parse(&repo_config.remote) else {
                log::warn!("reconfigure: skipping unparseable remote {:?}", repo_config.remote);
                continue;
            };
            let already_present = {
                let members = self.members.read().await;
                find_equivalent(&parsed, &members).is_some()
            };
            if !already_present {
                if let Err(e) = self.add_repository(repo_config, &desired.defaults).await {
                    log::warn!("reconfigure: failed to add {}: {e}", repo_config.remote);
                }
            }
        }

        self.start_loop().await;

        for repo_config in &desired.repositories {
            let Some(parsed) = RemoteUrl::parse(&repo_config.remote) else { continue };
            let repo = {
                let members = self.members.read().await;
                find_equivalent(&parsed, &members).cloned()
            };
            let Some(repo) = repo else { continue };
            self.reconcile_worktree_links(&repo, &parsed, repo_config).await;
        }

        self.cleanup_orphans().await;
        Ok(())
    }

    async fn reconcile_worktree_links(&self, repo: &Arc<Repository>, parsed: &RemoteUrl, repo_config: &RepoConfig) {
        let repo_name = crate::config::repo_name_from_url(parsed);
        let desired_links: Vec<WorktreeLink> = repo_config
            .worktrees
            .iter()
            .map(|wt| {
                let link = wt
                    .link
                    .clone()
                    .unwrap_or_else(|| crate::config::synthesize_link(&repo_name, &wt.git_ref));
                WorktreeLink::new(link, Some(wt.git_ref.clone()), wt.pathspecs.clone())
            })
            .collect();

        let current_links: Vec<WorktreeLink> = repo.worktree_links.lock().await.values().cloned().collect();

        for current in &current_links {
            let still_same = desired_links.iter().any(|d| d.link == current.link && d.same_as(current));
            if !still_same {
                let _ = repo.remove_worktree_link(&current.link).await;
            }
        }

        for desired_link in &desired_links {
            let present_now = repo.worktree_links.lock().await.contains_key(&desired_link.link);
            if !present_now {
                if let Err(e) = repo.add_worktree_link(desired_link.clone()).await {
                    log::warn!(
                        "reconfigure: failed to add worktree link {:?} on {}: {e}",
                        desired_link.link,
                        repo.remote()
                    );
                }
            }
        }
    }

    /// One-shot scan of the default root's `repo-mirrors/` for top-level
    /// bare-repo directories not referenced by any current member; these
    /// are removed. Non-bare directories are left untouched.
    async fn cleanup_orphans(&self) {
        let mirrors_dir = self.default_root.join("repo-mirrors");
        let entries = match std::fs::read_dir(&mirrors_dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };

        let known_dirs: std::collections::HashSet<PathBuf> = {
            let members = self.members.read().await;
            members.values().map(|r| r.dir().to_path_buf()).collect()
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() || known_dirs.contains(&path) || !is_bare_git_dir(&path) {
                continue;
            }
            log::info!("removing orphaned bare repository {}", path.display());
            if let Err(e) = std::fs::remove_dir_all(&path) {
                log::warn!("failed to remove orphan {}: {e}", path.display());
            }
        }
    }
}

fn find_equivalent<'a>(
    url: &RemoteUrl,
    members: &'a HashMap<String, Arc<Repository>>,
) -> Option<&'a Arc<Repository>> {
    members.values().find(|r| r.parsed_url().same_as(url))
}

async fn check_link_uniqueness<'a>(repos: impl Iterator<Item = &'a Arc<Repository>>) -> Result<(), MirrorError> {
    let mut seen: HashMap<PathBuf, String> = HashMap::new();
    for repo in repos {
        let links = repo.worktree_links.lock().await;
        for link in links.values() {
            let abs = link.link_abs(&repo.link_root);
            if let Some(existing) = seen.insert(abs.clone(), repo.remote().to_string()) {
                return Err(MirrorError::ConfigInvalid(format!(
                    "worktree link path {} is published by both {existing:?} and {:?}",
                    abs.display(),
                    repo.remote()
                )));
            }
        }
    }
    Ok(())
}

fn validate_defaults(defaults: &crate::config::Defaults) -> Result<(), MirrorError> {
    if !Path::new(&defaults.root).is_absolute() {
        return Err(MirrorError::ConfigInvalid(format!("defaults.root {} must be absolute", defaults.root)));
    }
    if let Some(link_root) = &defaults.link_root {
        if !Path::new(link_root).is_absolute() {
            return Err(MirrorError::ConfigInvalid(format!("defaults.link_root {link_root} must be absolute")));
        }
    }
    if defaults.interval < Duration::from_secs(1) {
        return Err(MirrorError::ConfigInvalid("defaults.interval must be at least 1 second".to_string()));
    }
    if defaults.mirror_timeout < Duration::from_secs(1) {
        return Err(MirrorError::ConfigInvalid(
            "defaults.mirror_timeout must be at least 1 second".to_string(),
        ));
    }
    Ok(())
}

/// `true` if `path` looks like a bare Git repository: it has `HEAD` and
/// `objects`/`refs` entries and no `.git` subdirectory of its own.
fn is_bare_git_dir(path: &Path) -> bool {
    path.join("HEAD").is_file()
        && path.join("objects").is_dir()
        && path.join("refs").is_dir()
        && !path.join(".git").exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DesiredState, Defaults};
    use crate::metrics::NullMetrics;

    fn desired_state(yaml: &str) -> DesiredState {
        DesiredState::from_yaml(yaml).unwrap()
    }

    #[tokio::test]
    async fn rejects_overlapping_worktree_link_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().display();
        let yaml = format!(
            r#"
defaults:
  root: "{root}"
repositories:
  - remote: git@github.com:example/one.git
    worktrees:
      - link: shared
  - remote: git@github.com:example/two.git
    worktrees:
      - link: shared
"#
        );
        let desired = desired_state(&yaml);
        let err = RepositoryPool::new(CancellationToken::new(), &desired, Arc::new(NullMetrics))
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::ConfigInvalid(_)));
    }

    #[tokio::test]
    async fn constructs_distinct_repositories_without_starting_loops() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().display();
        let yaml = format!(
            r#"
defaults:
  root: "{root}"
repositories:
  - remote: git@github.com:example/one.git
  - remote: https://github.com/example/two.git
"#
        );
        let desired = desired_state(&yaml);
        let pool = RepositoryPool::new(CancellationToken::new(), &desired, Arc::new(NullMetrics))
            .await
            .unwrap();
        let members = pool.members.read().await;
        assert_eq!(members.len(), 2);
        assert!(members.values().all(|r| !r.running()));
    }

    #[tokio::test]
    async fn add_repository_rejects_equivalent_url() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().display();
        let yaml = format!(
            r#"
defaults:
  root: "{root}"
repositories:
  - remote: git@github.com:example/one.git
"#
        );
        let desired = desired_state(&yaml);
        let pool = RepositoryPool::new(CancellationToken::new(), &desired, Arc::new(NullMetrics))
            .await
            .unwrap();

        let dup = RepoConfig {
            remote: "ssh://git@github.com/example/one.git".to_string(),
            root: None,
            link_root: None,
            interval: None,
            mirror_timeout: None,
            git_gc: None,
            auth: None,
            worktrees: vec![],
        };
        let err = pool.add_repository(&dup, &Defaults::default()).await.unwrap_err();
        assert!(matches!(err, MirrorError::AlreadyExists { .. }));
    }

    #[test]
    fn validate_defaults_rejects_relative_root() {
        let mut defaults = Defaults::default();
        defaults.root = "relative/path".to_string();
        assert!(validate_defaults(&defaults).is_err());
    }

    #[test]
    fn is_bare_git_dir_requires_head_objects_and_refs() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("repo.git");
        std::fs::create_dir_all(dir.join("objects")).unwrap();
        std::fs::create_dir_all(dir.join("refs")).unwrap();
        assert!(!is_bare_git_dir(&dir));
        std::fs::write(dir.join("HEAD"), "ref: refs/heads/main\n").unwrap();
        assert!(is_bare_git_dir(&dir));
    }
}
