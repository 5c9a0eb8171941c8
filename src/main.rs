//! Reference CLI wiring: parse flags, load a desired-state config, start
//! the pool, and wait for a shutdown signal.
//!
//! Config file *watching* and the webhook HTTP server remain external
//! collaborators — `--watch-config` and `--http-bind-address` are
//! accepted for flag-surface compatibility but this binary does not act
//! on them. An embedder wanting either wires them up against
//! [`git_mirror::pool::RepositoryPool::reconfigure`] and
//! [`git_mirror::pool::RepositoryPool::queue_mirror_run`] themselves.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use git_mirror::config::DesiredState;
use git_mirror::metrics::AtomicMetrics;
use git_mirror::pool::RepositoryPool;

/// Mirrors remote Git repositories into local bare clones and publishes
/// checked-out worktrees as stable symlinks.
#[derive(Debug, Parser)]
#[command(name = "git-mirror", version)]
struct Cli {
    /// Log level: error, warn, info, debug, trace.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Path to the desired-state YAML config.
    #[arg(long, env = "GIT_MIRROR_CONFIG")]
    config: PathBuf,

    /// Re-read `config` on change and reconcile the pool. Not implemented
    /// by this reference binary; left to an external collaborator.
    #[arg(long, env = "GIT_MIRROR_WATCH_CONFIG", default_value_t = false)]
    watch_config: bool,

    /// Bind address for a webhook/metrics HTTP server. Not implemented by
    /// this reference binary; left to an external collaborator.
    #[arg(long, env = "GIT_MIRROR_HTTP_BIND")]
    http_bind_address: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level)).init();

    if cli.watch_config {
        log::warn!("--watch-config was given but config file watching is not implemented by this binary");
    }
    if cli.http_bind_address.is_some() {
        log::warn!("--http-bind-address was given but no HTTP server is started by this binary");
    }

    let desired = match load_desired_state(&cli.config) {
        Ok(desired) => desired,
        Err(e) => {
            log::error!("{e:#}");
            return ExitCode::from(1);
        }
    };

    let metrics = Arc::new(AtomicMetrics::new());
    let root_cancel = CancellationToken::new();

    let pool = match RepositoryPool::new(root_cancel.clone(), &desired, metrics).await {
        Ok(pool) => pool,
        Err(e) => {
            log::error!("failed to construct repository pool: {e}");
            return ExitCode::from(1);
        }
    };

    pool.start_loop().await;
    log::info!("git-mirror running, {} repositories", desired.repositories.len());

    if tokio::signal::ctrl_c().await.is_err() {
        log::error!("failed to install shutdown signal handler");
        return ExitCode::from(1);
    }
    log::info!("shutdown requested, stopping repositories");
    root_cancel.cancel();

    tokio::select! {
        _ = pool.stopped().cancelled() => {
            log::info!("clean shutdown");
            ExitCode::from(0)
        }
        _ = tokio::signal::ctrl_c() => {
            log::error!("second shutdown signal received, forcing exit");
            ExitCode::from(1)
        }
    }
}

fn load_desired_state(path: &std::path::Path) -> anyhow::Result<DesiredState> {
    let source = std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
    DesiredState::from_yaml(&source).with_context(|| format!("parsing config {}", path.display()))
}
