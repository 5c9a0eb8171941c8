//! Cancellable `git` subprocess invocation: stdout+stderr capture, non-zero
//! exit bails with both streams attached, and cancellation triggers a
//! graceful-then-forced kill.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime};

use once_cell::sync::Lazy;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::{FailedCommand, MirrorError};

/// Grace period between cancelling a subprocess and killing it outright.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// The `git` executable path, resolved once at process startup and handed
/// to each invoker via [`GitInvoker::resolve`] rather than re-resolved per
/// call.
static GIT_BINARY: Lazy<PathBuf> = Lazy::new(|| which::which("git").unwrap_or_else(|_| PathBuf::from("git")));

/// Runs `git` as a subprocess. Stateless: every invocation receives its own
/// working directory, environment, and cancellation token.
#[derive(Debug, Clone)]
pub struct GitInvoker {
    git_binary: PathBuf,
}

impl Default for GitInvoker {
    fn default() -> Self {
        Self {
            git_binary: PathBuf::from("git"),
        }
    }
}

impl GitInvoker {
    pub fn new(git_binary: impl Into<PathBuf>) -> Self {
        Self {
            git_binary: git_binary.into(),
        }
    }

    /// An invoker using the `git` resolved from `PATH` at process startup
    /// (falling back to the literal `"git"` if resolution fails, so a
    /// missing `git` surfaces as a normal spawn error rather than a panic).
    pub fn resolve() -> Self {
        Self {
            git_binary: GIT_BINARY.clone(),
        }
    }

    /// Run `git <args>` in `cwd` with exactly `env` as the subprocess
    /// environment (no inheritance from this process — callers compose
    /// `PATH` and, for SSH remotes, `GIT_SSH_COMMAND`, themselves).
    ///
    /// On success returns trimmed stdout. On failure returns an error
    /// carrying the command line, stdout, and stderr. If `cancel` fires
    /// before the process exits, it is killed after a 5-second grace and
    /// the error reflects that the deadline expired rather than a generic
    /// I/O failure.
    pub async fn run(
        &self,
        cwd: &Path,
        env: &HashMap<String, String>,
        args: &[&str],
        cancel: &CancellationToken,
    ) -> Result<String, MirrorError> {
        let command_line = format!("{} {}", self.git_binary.display(), args.join(" "));

        let mut cmd = Command::new(&self.git_binary);
        cmd.current_dir(cwd)
            .args(args)
            .env_clear()
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|source| MirrorError::fs(cwd, source))?;

        // Take the pipes up front so reading them concurrently with
        // `child.wait()` below only ever needs a `&mut Child` borrow — not
        // ownership — keeping `child` available to the cancellation branch.
        let mut stdout_pipe = child.stdout.take().expect("stdout was piped");
        let mut stderr_pipe = child.stderr.take().expect("stderr was piped");

        tokio::select! {
            result = async {
                let mut stdout_buf = Vec::new();
                let mut stderr_buf = Vec::new();
                let (status, _, _) = tokio::join!(
                    child.wait(),
                    stdout_pipe.read_to_end(&mut stdout_buf),
                    stderr_pipe.read_to_end(&mut stderr_buf),
                );
                status.map(|status| (status, stdout_buf, stderr_buf))
            } => {
                let (status, stdout_buf, stderr_buf) = result.map_err(|source| MirrorError::fs(cwd, source))?;
                let stdout = String::from_utf8_lossy(&stdout_buf).trim().to_string();
                let stderr = String::from_utf8_lossy(&stderr_buf).to_string();
                if status.success() {
                    Ok(stdout)
                } else {
                    Err(MirrorError::GitCommandFailed(FailedCommand {
                        command: command_line,
                        stdout,
                        stderr,
                    }))
                }
            }
            _ = cancel.cancelled() => {
                let deadline = SystemTime::now();
                tokio::select! {
                    _ = child.wait() => {}
                    _ = tokio::time::sleep(KILL_GRACE) => {
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                    }
                }
                Err(MirrorError::Timeout { deadline })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_with_path() -> HashMap<String, String> {
        let mut env = HashMap::new();
        if let Ok(path) = std::env::var("PATH") {
            env.insert("PATH".to_string(), path);
        }
        env
    }

    #[tokio::test]
    async fn runs_and_trims_stdout() {
        let invoker = GitInvoker::default();
        let dir = tempfile::tempdir().unwrap();
        let out = invoker
            .run(
                dir.path(),
                &env_with_path(),
                &["--version"],
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(out.starts_with("git version"));
    }

    #[tokio::test]
    async fn failure_carries_command_and_stderr() {
        let invoker = GitInvoker::default();
        let dir = tempfile::tempdir().unwrap();
        let err = invoker
            .run(
                dir.path(),
                &env_with_path(),
                &["not-a-real-subcommand"],
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        match err {
            MirrorError::GitCommandFailed(cmd) => {
                assert!(cmd.command.contains("not-a-real-subcommand"));
            }
            other => panic!("expected GitCommandFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_yields_timeout_error() {
        let invoker = GitInvoker::default();
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = invoker
            .run(dir.path(), &env_with_path(), &["--version"], &cancel)
            .await;
        // The process likely finishes before the select polls cancellation,
        // so this mainly guards that a pre-cancelled token doesn't panic;
        // timing-sensitive assertions on which branch wins are avoided.
        let _ = err;
    }
}
