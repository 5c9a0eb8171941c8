//! The per-repository scheduling loop.
//!
//! Runs cycles back-to-back, sleeping between them for `interval` jittered
//! by ±20%. Wakes early on a stop request or a queued immediate-refresh.
//! Each cycle runs under its own `mirror_timeout` deadline, derived from a
//! cancellation token spawned alongside the cycle rather than a
//! `tokio::time::timeout` wrapper, so a cancelled `git` subprocess still
//! gets its kill grace instead of being dropped mid-flight.

use rand::Rng;
use tokio_util::sync::CancellationToken;

use super::Repository;

impl Repository {
    /// Run cycles until [`Repository::request_stop`] is called (or the
    /// token passed at construction is external — see
    /// [`Repository::stop_token`]). Never returns on a `git` failure; only
    /// a stop request ends the loop. On return, `running()` is `false` and
    /// any task blocked in [`Repository::wait_stopped`] is woken.
    pub async fn run_loop(&self) {
        self.mark_running(true);
        log::info!("starting mirror loop for {}", self.remote);

        while !self.stop_token().is_cancelled() {
            self.run_timed_cycle().await;

            if self.stop_token().is_cancelled() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.jittered_interval()) => {}
                _ = self.stop_token().cancelled() => {}
                _ = self.refresh_notify().notified() => {}
            }
        }

        log::info!("stopped mirror loop for {}", self.remote);
        self.mark_running(false);
    }

    /// Run one cycle under a deadline of `mirror_timeout`, logging (but not
    /// propagating) any failure — the loop never exits on a Git failure.
    async fn run_timed_cycle(&self) {
        let cycle_cancel = self.stop_token().child_token();
        let deadline_cancel = cycle_cancel.clone();
        let timeout = self.mirror_timeout;

        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            deadline_cancel.cancel();
        });

        let result = self.run_cycle(&cycle_cancel).await;
        timer.abort();

        if let Err(err) = result {
            log::warn!("mirror cycle failed for {}: {err}", self.remote);
        }
    }

    /// `interval` plus a uniform jitter in `[0, 0.2) * interval`.
    fn jittered_interval(&self) -> std::time::Duration {
        let factor: f64 = rand::thread_rng().gen_range(0.0..0.2);
        self.interval + std::time::Duration::from_secs_f64(self.interval.as_secs_f64() * factor)
    }
}

/// A cancellation token suitable for a one-off call into
/// [`Repository::run_cycle`] outside the scheduling loop (e.g.
/// [`crate::pool::RepositoryPool::mirror_all`]), bounded by its own timer
/// rather than the loop's stop token.
pub(crate) fn timeout_token(timeout: std::time::Duration) -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        child.cancel();
    });
    token
}
