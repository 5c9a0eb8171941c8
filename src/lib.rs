//! Mirrors remote Git repositories into local bare clones and publishes
//! one or more checked-out worktrees per repository as stable symlinks.
//!
//! The mirror engine is a [`repository::Repository`]: a bare clone
//! directory, a set of declared [`worktree::WorktreeLink`]s, and the
//! control loop that keeps both in sync with upstream. A
//! [`pool::RepositoryPool`] owns many repositories and reconciles them
//! against a [`config::DesiredState`] snapshot.
//!
//! Loading and watching a config file, CLI flag parsing, webhook HTTP
//! handling, and metrics exposition are external collaborators; this
//! crate exposes the two interfaces they need — [`config::DesiredState`]
//! and [`pool::RepositoryPool::queue_mirror_run`] — and nothing else of
//! its own network or file-watching surface.

pub mod config;
pub mod error;
pub mod fs;
pub mod git;
pub mod metrics;
pub mod pool;
pub mod repository;
pub mod worktree;

pub use error::MirrorError;
pub use pool::RepositoryPool;
pub use repository::Repository;
