//! Error types shared across the mirror engine.
//!
//! A plain enum with a manual `Display` rather than a derive-macro error
//! crate: each variant carries exactly the structured context a caller
//! needs to log or report, and nothing more.

use std::fmt;
use std::path::PathBuf;
use std::time::SystemTime;

/// A command line plus its captured output, attached to [`MirrorError::GitCommandFailed`].
#[derive(Debug, Clone)]
pub struct FailedCommand {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
}

impl fmt::Display for FailedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` failed", self.command)?;
        if !self.stderr.trim().is_empty() {
            write!(f, "\nstderr:\n{}", self.stderr.trim())?;
        }
        if !self.stdout.trim().is_empty() {
            write!(f, "\nstdout:\n{}", self.stdout.trim())?;
        }
        Ok(())
    }
}

/// Error kinds raised by the mirror engine: config-invalid, not-found,
/// already-exists, git-command-failed, timeout, filesystem, parse.
#[derive(Debug)]
pub enum MirrorError {
    /// Desired-state/configuration is structurally invalid. Surfaces at
    /// pool construction.
    ConfigInvalid(String),
    /// Referenced a remote that is not a member of the pool.
    NotFound { remote: String },
    /// Attempted to add a remote that already belongs to the pool.
    AlreadyExists { remote: String },
    /// A `git` subprocess exited non-zero.
    GitCommandFailed(FailedCommand),
    /// An operation did not complete before its deadline.
    Timeout { deadline: SystemTime },
    /// A filesystem operation (open/stat/rename/symlink) failed.
    Filesystem { path: PathBuf, source: std::io::Error },
    /// Unparseable URL or unparseable `git` command output.
    Parse(String),
}

impl fmt::Display for MirrorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirrorError::ConfigInvalid(msg) => write!(f, "invalid configuration: {msg}"),
            MirrorError::NotFound { remote } => write!(f, "no repository for remote {remote:?}"),
            MirrorError::AlreadyExists { remote } => {
                write!(f, "repository for remote {remote:?} already exists")
            }
            MirrorError::GitCommandFailed(cmd) => write!(f, "{cmd}"),
            MirrorError::Timeout { deadline } => write!(
                f,
                "operation did not complete before deadline {deadline:?}"
            ),
            MirrorError::Filesystem { path, source } => {
                write!(f, "filesystem error at {}: {source}", path.display())
            }
            MirrorError::Parse(msg) => write!(f, "parse error: {msg}"),
        }
    }
}

impl std::error::Error for MirrorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MirrorError::Filesystem { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl MirrorError {
    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MirrorError::Filesystem {
            path: path.into(),
            source,
        }
    }
}
