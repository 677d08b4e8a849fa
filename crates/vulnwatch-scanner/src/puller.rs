//! Image acquirer
//!
//! Pulls the target image through the local Docker daemon and resolves its
//! digest. Pull failures are classified into the retry taxonomy: registry
//! 404s and malformed references are permanent, auth/network/rate-limit
//! failures are transient.

use bollard::query_parameters::CreateImageOptions;
use bollard::Docker;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::error::{ScanError, ScanResult};

/// Result of a successful pull.
#[derive(Debug, Clone)]
pub struct PulledImage {
    /// Content digest (`sha256:...`) from the registry, when advertised.
    pub digest: Option<String>,
    /// Wall-clock seconds the pull took.
    pub duration: f64,
}

pub struct ImagePuller {
    docker: Arc<Docker>,
}

impl ImagePuller {
    pub fn new(docker: Arc<Docker>) -> Self {
        Self { docker }
    }

    /// Pull `image` via the daemon, then inspect it to resolve the digest.
    pub async fn pull(&self, image: &str) -> ScanResult<PulledImage> {
        let started = Instant::now();

        let options = CreateImageOptions {
            from_image: Some(image.to_string()),
            ..Default::default()
        };

        // Credentials come from the daemon's own config
        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(progress) = stream.next().await {
            match progress {
                Ok(info) => {
                    if let Some(status) = &info.status {
                        debug!(image, status, "pull progress");
                    }
                }
                Err(err) => return Err(classify_pull_error(image, err)),
            }
        }

        let inspect = self
            .docker
            .inspect_image(image)
            .await
            .map_err(|err| classify_pull_error(image, err))?;

        let digest = inspect
            .repo_digests
            .as_ref()
            .and_then(|digests| digests.first())
            .and_then(|d| d.rsplit('@').next())
            .map(String::from);

        let duration = started.elapsed().as_secs_f64();
        info!(image, duration_secs = format!("{duration:.1}"), "image pulled");

        Ok(PulledImage { digest, duration })
    }
}

/// Map a Docker daemon error onto the failure taxonomy.
fn classify_pull_error(image: &str, err: bollard::errors::Error) -> ScanError {
    use bollard::errors::Error;

    match err {
        Error::DockerResponseServerError {
            status_code,
            message,
        } => match status_code {
            404 => ScanError::ImageNotFound(image.to_string()),
            400 => ScanError::InvalidReference(format!("{image}: {message}")),
            401 | 403 => ScanError::PullFailed(format!(
                "authentication failed for {image}: {message}"
            )),
            429 => ScanError::PullFailed(format!("registry rate limit exceeded pulling {image}")),
            _ => ScanError::PullFailed(format!("registry error {status_code} pulling {image}: {message}")),
        },
        // Daemon unreachable, connection reset, etc.
        other => {
            let message = other.to_string();
            let lowered = message.to_lowercase();
            if lowered.contains("manifest unknown") || lowered.contains("not found") {
                ScanError::ImageNotFound(image.to_string())
            } else if lowered.contains("invalid reference") {
                ScanError::InvalidReference(image.to_string())
            } else {
                ScanError::PullFailed(format!("pulling {image}: {message}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error(status_code: u16, message: &str) -> bollard::errors::Error {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message: message.to_string(),
        }
    }

    #[test]
    fn test_404_is_permanent_not_found() {
        let err = classify_pull_error("ghost:latest", server_error(404, "manifest unknown"));
        assert!(matches!(err, ScanError::ImageNotFound(_)));
        assert_eq!(err.error_code(), "IMAGE_NOT_FOUND");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_400_is_invalid_reference() {
        let err = classify_pull_error("UPPER:bad", server_error(400, "invalid reference format"));
        assert!(matches!(err, ScanError::InvalidReference(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_auth_and_rate_limit_are_transient() {
        for status in [401u16, 403, 429, 500] {
            let err = classify_pull_error("nginx:latest", server_error(status, "nope"));
            assert!(matches!(err, ScanError::PullFailed(_)), "status {status}");
            assert!(err.is_retryable());
        }
    }
}
