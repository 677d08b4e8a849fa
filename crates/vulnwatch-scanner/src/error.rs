//! Failure taxonomy for the scan pipeline
//!
//! Every variant maps to a machine-readable `error_code` stored on the job
//! and mirrored into the audit ledger. Retryability decides whether a
//! failing job goes back to `pending` (budget permitting) or straight to
//! `failed`.

use thiserror::Error;

pub type ScanResult<T> = Result<T, ScanError>;

#[derive(Error, Debug)]
pub enum ScanError {
    /// Transient pull failure: network, auth, registry rate limit.
    #[error("image pull failed: {0}")]
    PullFailed(String),

    /// The registry does not know this image. Permanent.
    #[error("image not found: {0}")]
    ImageNotFound(String),

    /// The reference itself is malformed. Permanent.
    #[error("invalid image reference: {0}")]
    InvalidReference(String),

    /// The scanner process exceeded the wall-clock limit and was killed.
    #[error("scan timed out after {0}s")]
    Timeout(u64),

    /// The scanner process exited with a non-zero status.
    #[error("scanner exited with status {exit_code}: {stderr}")]
    ExitNonZero { exit_code: i32, stderr: String },

    /// The scanner output was not a well-formed report. Not retried: this
    /// indicates a tool/version mismatch, not transience.
    #[error("failed to parse scanner output: {0}")]
    ParseFailed(String),

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

/// Error code recorded by the staleness sweep; no pipeline stage raises it
/// directly.
pub const STALE_RECLAIMED: &str = "STALE_RECLAIMED";

impl ScanError {
    /// Machine-readable code persisted on the failed job.
    pub fn error_code(&self) -> &'static str {
        match self {
            ScanError::PullFailed(_) => "PULL_FAILED",
            ScanError::ImageNotFound(_) => "IMAGE_NOT_FOUND",
            ScanError::InvalidReference(_) => "INVALID_REFERENCE",
            ScanError::Timeout(_) => "SCAN_TIMEOUT",
            ScanError::ExitNonZero { .. } => "SCAN_EXIT_NONZERO",
            ScanError::ParseFailed(_) => "PARSE_ERROR",
            ScanError::Database(_) | ScanError::Io(_) | ScanError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether this failure consumes retry budget instead of being terminal
    /// on first occurrence.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScanError::PullFailed(_) | ScanError::Timeout(_) | ScanError::ExitNonZero { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ScanError::PullFailed("x".into()).error_code(),
            "PULL_FAILED"
        );
        assert_eq!(ScanError::Timeout(600).error_code(), "SCAN_TIMEOUT");
        assert_eq!(
            ScanError::ExitNonZero {
                exit_code: 1,
                stderr: String::new()
            }
            .error_code(),
            "SCAN_EXIT_NONZERO"
        );
        assert_eq!(
            ScanError::ParseFailed("bad json".into()).error_code(),
            "PARSE_ERROR"
        );
    }

    #[test]
    fn test_retryability() {
        assert!(ScanError::PullFailed("net".into()).is_retryable());
        assert!(ScanError::Timeout(1).is_retryable());
        assert!(ScanError::ExitNonZero {
            exit_code: 2,
            stderr: String::new()
        }
        .is_retryable());

        assert!(!ScanError::ImageNotFound("ghost".into()).is_retryable());
        assert!(!ScanError::InvalidReference("???".into()).is_retryable());
        assert!(!ScanError::ParseFailed("bad".into()).is_retryable());
    }
}
