//! Steps 2-4 of a mirror cycle: fetch, ensure each worktree link, and
//! conditional cleanup.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::GcMode;
use crate::error::MirrorError;
use crate::worktree::{WorktreeLink, directory_name};

use super::{RepoState, Repository};

/// Worktree directories older than this, and not currently pointed at by
/// any live link, are removed during cleanup.
const STALE_TIMEOUT: Duration = Duration::from_secs(10);

impl Repository {
    /// Run one complete mirror cycle: init/validate, fetch, ensure every
    /// worktree link, and conditional cleanup. Any failure aborts the
    /// cycle; it is recorded against metrics and returned to the caller,
    /// who logs it and continues on the next tick.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<(), MirrorError> {
        let started = Instant::now();
        let _guard = self.dir_lock.write().await;

        let result = self.run_cycle_locked(cancel).await;

        self.set_state(RepoState::Idle);
        self.metrics.record_mirror(&self.remote, result.is_ok());
        self.metrics.observe_latency(&self.remote, started.elapsed());
        result
    }

    async fn run_cycle_locked(&self, cancel: &CancellationToken) -> Result<(), MirrorError> {
        self.set_state(RepoState::Initializing);
        self.init_or_validate(cancel).await?;

        self.set_state(RepoState::Fetching);
        let updated_refs = self.fetch(cancel).await?;

        self.set_state(RepoState::EnsuringWorktrees);
        let links: Vec<WorktreeLink> = self.worktree_links.lock().await.values().cloned().collect();
        for link in &links {
            self.ensure_worktree(link, cancel).await?;
        }

        if !updated_refs.is_empty() {
            self.set_state(RepoState::Cleaning);
            self.cleanup(&links, cancel).await?;
        }

        Ok(())
    }

    /// `git fetch origin --prune --no-progress --porcelain --no-auto-gc`,
    /// returning the refs the porcelain output reports as updated.
    async fn fetch(&self, cancel: &CancellationToken) -> Result<Vec<String>, MirrorError> {
        let output = self
            .run_git(
                &self.dir,
                &["fetch", "origin", "--prune", "--no-progress", "--porcelain", "--no-auto-gc"],
                true,
                cancel,
            )
            .await?;
        Ok(parse_updated_refs(&output))
    }

    /// Apply the §4.5 decision table for a single worktree link.
    async fn ensure_worktree(&self, link: &WorktreeLink, cancel: &CancellationToken) -> Result<(), MirrorError> {
        let link_abs = link.link_abs(&self.link_root);

        let remote_hash = self.remote_hash(&link.git_ref, cancel).await;
        let current_wt = crate::fs::read_link_absolute(&link_abs);
        let (current_hash, sane) = match &current_wt {
            Some(wt) => (self.current_head(wt, cancel).await, self.worktree_is_sane(wt, cancel).await),
            None => (None, false),
        };

        match remote_hash {
            None => {
                if let Some(wt) = current_wt {
                    self.remove_worktree(&wt, cancel).await?;
                    let _ = std::fs::remove_file(&link_abs);
                }
                Ok(())
            }
            Some(hash) => {
                if current_hash.as_deref() == Some(hash.as_str()) && sane {
                    return Ok(());
                }
                if current_hash.as_deref() == Some(hash.as_str()) && !sane {
                    if let Some(wt) = &current_wt {
                        self.remove_worktree(wt, cancel).await?;
                    }
                    let new_dir = self.create_worktree(&link_abs, &hash, &link.pathspecs, cancel).await?;
                    crate::fs::publish_symlink(&link_abs, &new_dir)?;
                    return Ok(());
                }

                let new_dir = self.create_worktree(&link_abs, &hash, &link.pathspecs, cancel).await?;
                crate::fs::publish_symlink(&link_abs, &new_dir)?;
                if let Some(old_wt) = current_wt {
                    if old_wt != new_dir {
                        self.remove_worktree(&old_wt, cancel).await?;
                    }
                }
                Ok(())
            }
        }
    }

    async fn remote_hash(&self, git_ref: &str, cancel: &CancellationToken) -> Option<String> {
        self.run_git(&self.dir, &["log", "--pretty=format:%H", "-n", "1", git_ref], false, cancel)
            .await
            .ok()
            .filter(|s| !s.is_empty())
    }

    async fn current_head(&self, worktree: &Path, cancel: &CancellationToken) -> Option<String> {
        self.run_git(worktree, &["rev-parse", "HEAD"], false, cancel)
            .await
            .ok()
    }

    async fn worktree_is_sane(&self, worktree: &Path, cancel: &CancellationToken) -> bool {
        let inside = self
            .run_git(worktree, &["rev-parse", "--is-inside-work-tree"], false, cancel)
            .await;
        if inside.as_deref() != Ok("true") {
            return false;
        }
        let toplevel = self
            .run_git(worktree, &["rev-parse", "--show-toplevel"], false, cancel)
            .await;
        match toplevel {
            Ok(top) => {
                if dunce::canonicalize(&top).ok() != dunce::canonicalize(worktree).ok() {
                    return false;
                }
            }
            Err(_) => return false,
        }
        self.run_git(worktree, &["fsck", "--no-progress", "--connectivity-only"], false, cancel)
            .await
            .is_ok()
    }

    /// Create a worktree at `hash` for `link_abs`, returning its absolute
    /// directory under `<dir>/.worktrees/`.
    async fn create_worktree(
        &self,
        link_abs: &Path,
        hash: &str,
        pathspecs: &[String],
        cancel: &CancellationToken,
    ) -> Result<PathBuf, MirrorError> {
        let worktrees_root = self.dir.join(".worktrees");
        std::fs::create_dir_all(&worktrees_root).map_err(|e| MirrorError::fs(&worktrees_root, e))?;
        let name = directory_name(link_abs, hash);
        let target = worktrees_root.join(&name);

        if target.exists() {
            self.remove_worktree(&target, cancel).await?;
            self.run_git(&self.dir, &["worktree", "prune", "--verbose"], false, cancel).await?;
        }

        let target_str = target
            .to_str()
            .ok_or_else(|| MirrorError::Parse("non-utf8 worktree path".to_string()))?;
        self.run_git(
            &self.dir,
            &["worktree", "add", "--force", "--detach", "--no-checkout", target_str, hash],
            false,
            cancel,
        )
        .await?;

        if pathspecs.is_empty() {
            self.run_git(&target, &["checkout", hash], false, cancel).await?;
        } else {
            let mut args = vec!["checkout", hash, "--"];
            args.extend(pathspecs.iter().map(|s| s.as_str()));
            self.run_git(&target, &args, false, cancel).await?;
        }

        Ok(target)
    }

    async fn remove_worktree(&self, worktree: &Path, cancel: &CancellationToken) -> Result<(), MirrorError> {
        if let Some(path_str) = worktree.to_str() {
            let _ = self
                .run_git(&self.dir, &["worktree", "remove", "--force", path_str], false, cancel)
                .await;
        }
        if worktree.exists() {
            std::fs::remove_dir_all(worktree).map_err(|e| MirrorError::fs(worktree, e))?;
        }
        Ok(())
    }

    /// Remove stale worktree directories, then prune/expire/gc.
    async fn cleanup(&self, links: &[WorktreeLink], cancel: &CancellationToken) -> Result<(), MirrorError> {
        let worktrees_root = self.dir.join(".worktrees");
        if worktrees_root.exists() {
            let live: std::collections::HashSet<PathBuf> = {
                let mut set = std::collections::HashSet::new();
                for link in links {
                    let link_abs = link.link_abs(&self.link_root);
                    if let Some(target) = crate::fs::read_link_absolute(&link_abs) {
                        set.insert(target);
                    }
                }
                set
            };

            let entries = std::fs::read_dir(&worktrees_root).map_err(|e| MirrorError::fs(&worktrees_root, e))?;
            for entry in entries {
                let entry = entry.map_err(|e| MirrorError::fs(&worktrees_root, e))?;
                let path = entry.path();
                let canonical = dunce::canonicalize(&path).unwrap_or_else(|_| path.clone());
                if live.contains(&canonical) {
                    continue;
                }
                let age = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .and_then(|m| m.elapsed().ok())
                    .unwrap_or(Duration::MAX);
                if age >= STALE_TIMEOUT {
                    self.remove_worktree(&path, cancel).await?;
                }
            }
        }

        self.run_git(&self.dir, &["worktree", "prune", "--verbose"], false, cancel).await?;
        self.run_git(
            &self.dir,
            &["reflog", "expire", "--expire-unreachable=all", "--all"],
            false,
            cancel,
        )
        .await?;

        let gc_args: &[&str] = match self.gc_mode {
            GcMode::Auto => &["gc", "--auto"],
            GcMode::Always => &["gc"],
            GcMode::Aggressive => &["gc", "--aggressive"],
            GcMode::Off => &[],
        };
        if !gc_args.is_empty() {
            self.run_git(&self.dir, gc_args, false, cancel).await?;
        }

        Ok(())
    }
}

/// Parse `git fetch --porcelain` output for lines of the form
/// `<flag> <old> <new> <ref>` where `flag` is anything but `=` (no-op).
fn parse_updated_refs(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(4, ' ');
            let flag = parts.next()?;
            let _old = parts.next()?;
            let _new = parts.next()?;
            let reference = parts.next()?;
            if flag != "=" {
                Some(reference.to_string())
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_updated_refs_skipping_noop_lines() {
        let output = "* 0000000000000000000000000000000000000000 1111111111111111111111111111111111111111 refs/heads/feature\n\
                       = 2222222222222222222222222222222222222222 2222222222222222222222222222222222222222 refs/heads/main";
        let updated = parse_updated_refs(output);
        assert_eq!(updated, vec!["refs/heads/feature".to_string()]);
    }
}
