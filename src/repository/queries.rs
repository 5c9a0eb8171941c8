//! Read-only queries. Run under the repository's *shared* `dir_lock`, so
//! arbitrarily many queries may run concurrently with each other, but
//! never while a mirror cycle holds the exclusive side.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::error::MirrorError;

use super::Repository;

/// One commit as returned by [`Repository::list_commits_with_changed_files`]
/// and its `branch_commits`/`merge_commits` specializations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitWithChangedFiles {
    pub hash: String,
    pub changed_files: Vec<String>,
}

/// Alias kept distinct from [`CommitWithChangedFiles`] at the public API
/// boundary: a bare hash, for callers that only need [`Repository::hash`]'s
/// result typed rather than a raw `String`.
pub type CommitInfo = String;

static COMMIT_HASH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-f]{40}$|^[0-9a-f]{64}$").unwrap());

impl Repository {
    /// `Hash(ref, path?)`: `git log --pretty=format:%H -n 1 <ref> [-- <path>]`.
    pub async fn hash(
        &self,
        git_ref: &str,
        path: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<CommitInfo, MirrorError> {
        let _guard = self.dir_lock.read().await;
        let mut args = vec!["log", "--pretty=format:%H", "-n", "1", git_ref];
        if let Some(path) = path {
            args.push("--");
            args.push(path);
        }
        self.run_git(&self.dir, &args, false, cancel).await
    }

    /// `Subject(hash)`: first line of the commit message.
    pub async fn subject(&self, hash: &str, cancel: &CancellationToken) -> Result<String, MirrorError> {
        let _guard = self.dir_lock.read().await;
        self.run_git(&self.dir, &["show", "--no-patch", "--format=%s", hash], false, cancel)
            .await
    }

    /// `ChangedFiles(hash)`: paths touched by `hash`.
    pub async fn changed_files(&self, hash: &str, cancel: &CancellationToken) -> Result<Vec<String>, MirrorError> {
        let _guard = self.dir_lock.read().await;
        let output = self
            .run_git(&self.dir, &["show", "--name-only", "--pretty=format:", hash], false, cancel)
            .await?;
        Ok(output.lines().filter(|l| !l.is_empty()).map(str::to_string).collect())
    }

    /// `ListCommitsWithChangedFiles(ref1, ref2)`: newest first, `ref1..ref2`.
    pub async fn list_commits_with_changed_files(
        &self,
        ref1: &str,
        ref2: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<CommitWithChangedFiles>, MirrorError> {
        let _guard = self.dir_lock.read().await;
        let range = format!("{ref1}..{ref2}");
        let output = self
            .run_git(&self.dir, &["log", "--name-only", "--pretty=format:%H", &range], false, cancel)
            .await?;
        Ok(parse_commits_with_changed_files(&output))
    }

    /// `BranchCommits(branch)` = `ListCommitsWithChangedFiles("HEAD", branch)`.
    pub async fn branch_commits(
        &self,
        branch: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<CommitWithChangedFiles>, MirrorError> {
        self.list_commits_with_changed_files("HEAD", branch, cancel).await
    }

    /// `MergeCommits(mergeHash)` = `ListCommitsWithChangedFiles(mergeHash^, mergeHash)`;
    /// the merge commit itself is first.
    pub async fn merge_commits(
        &self,
        merge_hash: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<CommitWithChangedFiles>, MirrorError> {
        let parent = format!("{merge_hash}^");
        self.list_commits_with_changed_files(&parent, merge_hash, cancel).await
    }

    /// `ObjectExists(obj)`: `git cat-file -e <obj>`.
    pub async fn object_exists(&self, obj: &str, cancel: &CancellationToken) -> Result<(), MirrorError> {
        let _guard = self.dir_lock.read().await;
        self.run_git(&self.dir, &["cat-file", "-e", obj], false, cancel).await?;
        Ok(())
    }

    /// `Clone(dst, ref, pathspecs, stripGit)`: export a shallow working
    /// copy at `ref` into `dst`, returning the new clone's HEAD hash.
    ///
    /// If `ref` is a full-length commit hash (40 hex for SHA-1, 64 for
    /// SHA-256), clones `--no-checkout` then hard-resets to it (a bare
    /// mirror has no local branch tracking arbitrary commits to check out
    /// by name). Otherwise clones `--single-branch [-b <ref>]` and checks
    /// out `ref` (optionally scoped to `pathspecs`).
    pub async fn clone_export(
        &self,
        dst: &Path,
        git_ref: &str,
        pathspecs: &[String],
        strip_git: bool,
        cancel: &CancellationToken,
    ) -> Result<CommitInfo, MirrorError> {
        let _guard = self.dir_lock.read().await;

        if dst.exists() {
            crate::fs::remove_dir_contents(dst)?;
        }

        let dst_str = dst.to_str().ok_or_else(|| MirrorError::Parse("non-utf8 clone destination".to_string()))?;
        let dir_str = self
            .dir
            .to_str()
            .ok_or_else(|| MirrorError::Parse("non-utf8 repository directory".to_string()))?;

        if COMMIT_HASH_RE.is_match(git_ref) {
            self.run_git(&self.dir, &["clone", "--no-checkout", dir_str, dst_str], false, cancel)
                .await?;
            self.run_git(dst, &["reset", "--hard", git_ref], false, cancel).await?;
        } else {
            let mut clone_args = vec!["clone", "--no-checkout", "--single-branch"];
            if git_ref != "HEAD" {
                clone_args.push("-b");
                clone_args.push(git_ref);
            }
            clone_args.push(dir_str);
            clone_args.push(dst_str);
            self.run_git(&self.dir, &clone_args, false, cancel).await?;

            let mut checkout_args = vec!["checkout", git_ref];
            if !pathspecs.is_empty() {
                checkout_args.push("--");
                checkout_args.extend(pathspecs.iter().map(String::as_str));
            }
            self.run_git(dst, &checkout_args, false, cancel).await?;
        }

        let head = self.run_git(dst, &["rev-parse", "HEAD"], false, cancel).await?;

        if strip_git {
            let git_dir = dst.join(".git");
            if git_dir.exists() {
                std::fs::remove_dir_all(&git_dir).map_err(|e| MirrorError::fs(&git_dir, e))?;
            }
        }

        Ok(head)
    }
}

/// Parse `git log --name-only --pretty=format:%H` output: a line matching a
/// full 40- or 64-hex commit hash starts a new record; subsequent
/// non-empty lines become that record's changed files; blank lines
/// separate records.
fn parse_commits_with_changed_files(output: &str) -> Vec<CommitWithChangedFiles> {
    let mut commits = Vec::new();
    for line in output.lines() {
        if line.is_empty() {
            continue;
        }
        if COMMIT_HASH_RE.is_match(line) {
            commits.push(CommitWithChangedFiles {
                hash: line.to_string(),
                changed_files: Vec::new(),
            });
        } else if let Some(last) = commits.last_mut() {
            last.changed_files.push(line.to_string());
        }
    }
    commits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiple_commits_with_changed_files() {
        let output = "\
aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa
file1.txt
file2.txt

bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb
file3.txt";
        let commits = parse_commits_with_changed_files(output);
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].hash, "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        assert_eq!(commits[0].changed_files, vec!["file1.txt", "file2.txt"]);
        assert_eq!(commits[1].hash, "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");
        assert_eq!(commits[1].changed_files, vec!["file3.txt"]);
    }

    #[test]
    fn commit_with_no_changed_files_yields_empty_vec() {
        let output = "cccccccccccccccccccccccccccccccccccccccc";
        let commits = parse_commits_with_changed_files(output);
        assert_eq!(commits.len(), 1);
        assert!(commits[0].changed_files.is_empty());
    }

    #[test]
    fn recognises_sha256_length_hashes() {
        let hash64 = "d".repeat(64);
        assert!(COMMIT_HASH_RE.is_match(&hash64));
        assert!(!COMMIT_HASH_RE.is_match(&"d".repeat(39)));
    }

    #[test]
    fn empty_output_yields_no_commits() {
        assert!(parse_commits_with_changed_files("").is_empty());
    }
}
