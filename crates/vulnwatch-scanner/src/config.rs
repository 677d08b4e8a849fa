//! Worker configuration

use std::path::PathBuf;
use std::time::Duration;
use vulnwatch_entities::risk::RiskWeights;

/// Absolute ceiling on retries, regardless of configuration. Matches the
/// check constraint on `scan_jobs.retry_count`.
pub const RETRY_HARD_CAP: i32 = 10;

/// Worker loop aborts after this many consecutive poll-cycle errors.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// Configuration for one worker instance.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Identifier recorded on claimed jobs and audit entries.
    pub worker_id: String,

    /// How often the poll loop looks for pending jobs.
    pub poll_interval: Duration,
    /// Hard wall-clock limit on one Trivy invocation.
    pub scan_timeout: Duration,
    /// Jobs stuck in an in-flight state longer than this are reclaimed
    /// by the staleness sweep.
    pub stale_after: Duration,
    /// How long in-flight scans get to finish after a shutdown signal.
    pub shutdown_grace: Duration,

    /// Retry budget for transient failures, capped at [`RETRY_HARD_CAP`].
    pub max_retries: i32,
    /// Concurrent scan slots per worker.
    pub concurrency: usize,

    pub trivy_binary: String,
    pub trivy_cache_dir: PathBuf,

    pub risk_weights: RiskWeights,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", std::process::id()),
            poll_interval: Duration::from_secs(5),
            scan_timeout: Duration::from_secs(600),
            stale_after: Duration::from_secs(1800),
            shutdown_grace: Duration::from_secs(30),
            max_retries: 3,
            concurrency: 4,
            trivy_binary: "trivy".to_string(),
            trivy_cache_dir: std::env::temp_dir().join("vulnwatch-trivy-cache"),
            risk_weights: RiskWeights::default(),
        }
    }
}

impl WorkerConfig {
    /// Effective retry budget: configured value, never above the hard cap.
    pub fn retry_budget(&self) -> i32 {
        self.max_retries.min(RETRY_HARD_CAP)
    }
}
