//! Mirror-cycle metrics recording, scoped to value capture only.
//!
//! Exposition (a scrape endpoint) is an external collaborator's concern; a
//! [`MetricsSink`] only records data points, and [`AtomicMetrics`] is an
//! in-process default implementation an embedder can read back from or
//! render for their own HTTP handler.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Latency histogram buckets, in seconds.
pub const LATENCY_BUCKETS: [f64; 11] = [0.5, 1.0, 5.0, 10.0, 20.0, 30.0, 60.0, 90.0, 120.0, 150.0, 300.0];

/// Recorded data points for a mirror cycle.
pub trait MetricsSink: Send + Sync {
    /// Record the outcome of a completed mirror cycle for `repo`. Updates
    /// `git_last_mirror_timestamp` (on success) and `git_mirror_count`.
    fn record_mirror(&self, repo: &str, success: bool);

    /// Record the wall-clock duration of a completed mirror cycle for
    /// `repo`, bucketed per `git_mirror_latency_seconds`.
    fn observe_latency(&self, repo: &str, duration: Duration);
}

#[derive(Debug, Default, Clone)]
struct RepoMetrics {
    last_success_unix: Option<u64>,
    success_count: u64,
    failure_count: u64,
    latency_bucket_counts: [u64; LATENCY_BUCKETS.len()],
    latency_overflow_count: u64,
}

/// In-process [`MetricsSink`] implementation. Cheap to clone (internally
/// `Arc`-free; holds a `Mutex` directly, so share via `Arc<AtomicMetrics>`).
#[derive(Debug, Default)]
pub struct AtomicMetrics {
    by_repo: Mutex<HashMap<String, RepoMetrics>>,
}

impl AtomicMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render Prometheus text-format output. Provided as a convenience for
    /// an embedder's own scrape handler; this crate never starts an HTTP
    /// server itself.
    pub fn render_prometheus_text(&self) -> String {
        let by_repo = self.by_repo.lock().unwrap();
        let mut out = String::new();

        out.push_str("# TYPE git_last_mirror_timestamp gauge\n");
        for (repo, m) in by_repo.iter() {
            if let Some(ts) = m.last_success_unix {
                out.push_str(&format!(
                    "git_last_mirror_timestamp{{repo=\"{repo}\"}} {ts}\n"
                ));
            }
        }

        out.push_str("# TYPE git_mirror_count counter\n");
        for (repo, m) in by_repo.iter() {
            out.push_str(&format!(
                "git_mirror_count{{repo=\"{repo}\",success=\"true\"}} {}\n",
                m.success_count
            ));
            out.push_str(&format!(
                "git_mirror_count{{repo=\"{repo}\",success=\"false\"}} {}\n",
                m.failure_count
            ));
        }

        out.push_str("# TYPE git_mirror_latency_seconds histogram\n");
        for (repo, m) in by_repo.iter() {
            let mut cumulative = 0u64;
            for (bucket, count) in LATENCY_BUCKETS.iter().zip(m.latency_bucket_counts.iter()) {
                cumulative += count;
                out.push_str(&format!(
                    "git_mirror_latency_seconds_bucket{{repo=\"{repo}\",le=\"{bucket}\"}} {cumulative}\n"
                ));
            }
            cumulative += m.latency_overflow_count;
            out.push_str(&format!(
                "git_mirror_latency_seconds_bucket{{repo=\"{repo}\",le=\"+Inf\"}} {cumulative}\n"
            ));
        }

        out
    }
}

impl MetricsSink for AtomicMetrics {
    fn record_mirror(&self, repo: &str, success: bool) {
        let mut by_repo = self.by_repo.lock().unwrap();
        let entry = by_repo.entry(repo.to_string()).or_default();
        if success {
            entry.success_count += 1;
            entry.last_success_unix = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .ok()
                .map(|d| d.as_secs());
        } else {
            entry.failure_count += 1;
        }
    }

    fn observe_latency(&self, repo: &str, duration: Duration) {
        let seconds = duration.as_secs_f64();
        let mut by_repo = self.by_repo.lock().unwrap();
        let entry = by_repo.entry(repo.to_string()).or_default();
        match LATENCY_BUCKETS.iter().position(|b| seconds <= *b) {
            Some(idx) => entry.latency_bucket_counts[idx] += 1,
            None => entry.latency_overflow_count += 1,
        }
    }
}

/// A [`MetricsSink`] that discards everything, for tests and embedders
/// that don't care about metrics.
#[derive(Debug, Default)]
pub struct NullMetrics;

impl MetricsSink for NullMetrics {
    fn record_mirror(&self, _repo: &str, _success: bool) {}
    fn observe_latency(&self, _repo: &str, _duration: Duration) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_success_and_failure_counts() {
        let metrics = AtomicMetrics::new();
        metrics.record_mirror("repo-a", true);
        metrics.record_mirror("repo-a", true);
        metrics.record_mirror("repo-a", false);

        let rendered = metrics.render_prometheus_text();
        assert!(rendered.contains("git_mirror_count{repo=\"repo-a\",success=\"true\"} 2"));
        assert!(rendered.contains("git_mirror_count{repo=\"repo-a\",success=\"false\"} 1"));
        assert!(rendered.contains("git_last_mirror_timestamp{repo=\"repo-a\"}"));
    }

    #[test]
    fn latency_falls_into_expected_bucket() {
        let metrics = AtomicMetrics::new();
        metrics.observe_latency("repo-a", Duration::from_millis(700));
        let rendered = metrics.render_prometheus_text();
        assert!(rendered.contains("git_mirror_latency_seconds_bucket{repo=\"repo-a\",le=\"1\"} 1"));
        assert!(rendered.contains("git_mirror_latency_seconds_bucket{repo=\"repo-a\",le=\"0.5\"} 0"));
    }

    #[test]
    fn latency_above_largest_bucket_counts_as_overflow() {
        let metrics = AtomicMetrics::new();
        metrics.observe_latency("repo-a", Duration::from_secs(301));
        let rendered = metrics.render_prometheus_text();
        assert!(rendered.contains("git_mirror_latency_seconds_bucket{repo=\"repo-a\",le=\"+Inf\"} 1"));
        assert!(rendered.contains("git_mirror_latency_seconds_bucket{repo=\"repo-a\",le=\"300\"} 0"));
    }
}
