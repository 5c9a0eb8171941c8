//! Step 1 of a mirror cycle: create the bare clone on first run, or
//! sanity-check and re-create it if it has drifted.

use tokio_util::sync::CancellationToken;

use crate::error::MirrorError;

use super::Repository;

impl Repository {
    /// Ensure `self.dir` is a valid bare mirror of `self.remote`, creating
    /// or re-creating it as needed. Must be called under the write side of
    /// `dir_lock`.
    pub(super) async fn init_or_validate(&self, cancel: &CancellationToken) -> Result<(), MirrorError> {
        if self.dir.exists() {
            match self.sanity_check(cancel).await {
                Ok(()) => return Ok(()),
                Err(_) => {
                    std::fs::remove_dir_all(&self.dir).map_err(|e| MirrorError::fs(&self.dir, e))?;
                }
            }
        }

        self.create_bare_mirror(cancel).await
    }

    async fn sanity_check(&self, cancel: &CancellationToken) -> Result<(), MirrorError> {
        if crate::fs::is_empty_dir(&self.dir)? {
            return Err(MirrorError::ConfigInvalid(format!(
                "{} is empty",
                self.dir.display()
            )));
        }

        let is_bare = self
            .run_git(&self.dir, &["rev-parse", "--is-bare-repository"], false, cancel)
            .await?;
        if is_bare != "true" {
            return Err(MirrorError::ConfigInvalid(format!(
                "{} is not a bare repository",
                self.dir.display()
            )));
        }

        let git_dir = self
            .run_git(&self.dir, &["rev-parse", "--absolute-git-dir"], false, cancel)
            .await?;
        let canonical_dir = dunce::canonicalize(&self.dir).unwrap_or_else(|_| self.dir.clone());
        let canonical_git_dir =
            dunce::canonicalize(&git_dir).unwrap_or_else(|_| std::path::PathBuf::from(&git_dir));
        if canonical_git_dir != canonical_dir {
            return Err(MirrorError::ConfigInvalid(format!(
                "absolute-git-dir {git_dir} does not match {}",
                self.dir.display()
            )));
        }

        let origin_url = self
            .run_git(&self.dir, &["config", "--get", "remote.origin.url"], false, cancel)
            .await?;
        if origin_url != self.remote {
            return Err(MirrorError::ConfigInvalid(format!(
                "remote.origin.url {origin_url:?} does not match {:?}",
                self.remote
            )));
        }

        let fetch_refspec = self
            .run_git(&self.dir, &["config", "--get", "remote.origin.fetch"], false, cancel)
            .await?;
        if fetch_refspec != "+refs/*:refs/*" {
            return Err(MirrorError::ConfigInvalid(format!(
                "remote.origin.fetch {fetch_refspec:?} is not a mirror refspec"
            )));
        }

        self.run_git(
            &self.dir,
            &["fsck", "--no-progress", "--connectivity-only"],
            false,
            cancel,
        )
        .await?;

        Ok(())
    }

    async fn create_bare_mirror(&self, cancel: &CancellationToken) -> Result<(), MirrorError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| MirrorError::fs(&self.dir, e))?;

        self.run_git(&self.dir, &["init", "-q", "--bare"], false, cancel).await?;
        self.run_git(
            &self.dir,
            &["remote", "add", "--mirror=fetch", "origin", &self.remote],
            false,
            cancel,
        )
        .await?;

        let symref_output = self
            .run_git(&self.dir, &["ls-remote", "--symref", "origin", "HEAD"], true, cancel)
            .await?;
        let default_ref = parse_symref(&symref_output).ok_or_else(|| {
            MirrorError::Parse(format!(
                "could not determine default branch from ls-remote output: {symref_output:?}"
            ))
        })?;

        self.run_git(
            &self.dir,
            &["symbolic-ref", "HEAD", &default_ref],
            false,
            cancel,
        )
        .await?;

        Ok(())
    }
}

/// Parse `ref: refs/heads/main\tHEAD` from `git ls-remote --symref` output
/// into `refs/heads/main`.
fn parse_symref(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let rest = line.strip_prefix("ref: ")?;
        let (target, _) = rest.split_once('\t')?;
        Some(target.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_symref_line() {
        let output = "ref: refs/heads/main\tHEAD\n5c3a1f2 HEAD";
        assert_eq!(parse_symref(output).as_deref(), Some("refs/heads/main"));
    }

    #[test]
    fn missing_symref_line_yields_none() {
        assert_eq!(parse_symref("5c3a1f2 HEAD"), None);
    }
}
