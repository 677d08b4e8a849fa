//! Container image reference parsing and normalization
//!
//! Accepts the usual shorthand forms and expands them to a canonical
//! (registry, name, tag) triple:
//!
//! - `nginx` -> (docker.io, nginx, latest)
//! - `nginx:1.24` -> (docker.io, nginx, 1.24)
//! - `gcr.io/project/image:v1` -> (gcr.io, project/image, v1)
//! - `localhost:5000/app` -> (localhost:5000, app, latest)

use chrono::{Timelike, Utc};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::{ServiceError, ServiceResult, UtcDateTime};

pub const DEFAULT_REGISTRY: &str = "docker.io";
pub const DEFAULT_TAG: &str = "latest";

/// Normalized container image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub registry: String,
    pub name: String,
    pub tag: String,
}

impl ImageRef {
    pub fn new(
        name: impl Into<String>,
        tag: impl Into<String>,
        registry: impl Into<String>,
    ) -> Self {
        Self {
            registry: registry.into(),
            name: name.into(),
            tag: tag.into(),
        }
    }

    /// Parse a raw image reference, filling in defaults for missing parts.
    ///
    /// Explicit `tag` / `registry` arguments win over anything embedded in
    /// the raw string.
    pub fn parse(
        raw: &str,
        tag: Option<&str>,
        registry: Option<&str>,
    ) -> ServiceResult<Self> {
        let mut name = raw.trim().trim_matches('/').to_lowercase();

        if name.is_empty() {
            return Err(ServiceError::Validation {
                message: "image reference cannot be empty".to_string(),
            });
        }

        let mut final_tag = tag.map(str::to_string);
        let mut final_registry = registry.map(str::to_string);

        // Tag embedded in the reference (nginx:1.24). A ':' followed by a '/'
        // is a registry port (localhost:5000/app), not a tag.
        if final_tag.is_none() {
            if let Some(idx) = name.rfind(':') {
                let candidate = &name[idx + 1..];
                if !candidate.is_empty() && !candidate.contains('/') {
                    final_tag = Some(candidate.to_string());
                    name.truncate(idx);
                }
            }
        }

        // Registry embedded in the reference (gcr.io/project/image). The
        // first path segment is a registry when it looks like a host.
        if final_registry.is_none() {
            if let Some((first, rest)) = name.split_once('/') {
                if first.contains('.') || first.contains(':') || first == "localhost" {
                    final_registry = Some(first.to_string());
                    name = rest.to_string();
                }
            }
        }

        if name.is_empty() || name.contains(':') {
            return Err(ServiceError::Validation {
                message: format!("invalid image reference: {raw}"),
            });
        }

        Ok(Self {
            registry: final_registry.unwrap_or_else(|| DEFAULT_REGISTRY.to_string()),
            name,
            tag: final_tag.unwrap_or_else(|| DEFAULT_TAG.to_string()),
        })
    }

    /// Reference as handed to the Docker daemon and the scanner engine.
    /// Docker Hub images are addressed without the registry prefix.
    pub fn pull_ref(&self) -> String {
        if self.registry == DEFAULT_REGISTRY {
            format!("{}:{}", self.name, self.tag)
        } else {
            format!("{}/{}:{}", self.registry, self.name, self.tag)
        }
    }

    /// Best-effort correlation key: sha256 of the canonical reference plus
    /// the current UTC hour bucket, truncated to 32 hex chars. Two requests
    /// for the same image within one hour share a key. Not unique-enforced.
    pub fn idempotency_key(&self, now: UtcDateTime) -> String {
        let bucket = now
            .with_minute(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(now);
        let source = format!(
            "{}/{}:{}:{}",
            self.registry,
            self.name,
            self.tag,
            bucket.format("%Y%m%d%H%M")
        );
        let digest = Sha256::digest(source.as_bytes());
        hex::encode(digest)[..32].to_string()
    }

    pub fn idempotency_key_now(&self) -> String {
        self.idempotency_key(Utc::now())
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.name, self.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn test_parse_bare_name() {
        let image = ImageRef::parse("nginx", None, None).unwrap();
        assert_eq!(image.registry, "docker.io");
        assert_eq!(image.name, "nginx");
        assert_eq!(image.tag, "latest");
    }

    #[test]
    fn test_parse_name_with_tag() {
        let image = ImageRef::parse("nginx:1.24", None, None).unwrap();
        assert_eq!(image.name, "nginx");
        assert_eq!(image.tag, "1.24");
    }

    #[test]
    fn test_parse_registry_and_tag() {
        let image = ImageRef::parse("gcr.io/project/image:v1", None, None).unwrap();
        assert_eq!(image.registry, "gcr.io");
        assert_eq!(image.name, "project/image");
        assert_eq!(image.tag, "v1");
    }

    #[test]
    fn test_parse_registry_with_port() {
        let image = ImageRef::parse("localhost:5000/app", None, None).unwrap();
        assert_eq!(image.registry, "localhost:5000");
        assert_eq!(image.name, "app");
        assert_eq!(image.tag, "latest");
    }

    #[test]
    fn test_explicit_arguments_win() {
        let image = ImageRef::parse("nginx", Some("1.25"), Some("ghcr.io")).unwrap();
        assert_eq!(image.registry, "ghcr.io");
        assert_eq!(image.tag, "1.25");
    }

    #[test]
    fn test_parse_empty_rejected() {
        assert!(ImageRef::parse("", None, None).is_err());
        assert!(ImageRef::parse("  /  ", None, None).is_err());
    }

    #[test]
    fn test_pull_ref_omits_docker_hub() {
        let hub = ImageRef::parse("nginx:latest", None, None).unwrap();
        assert_eq!(hub.pull_ref(), "nginx:latest");

        let ghcr = ImageRef::parse("ghcr.io/org/app:v1.0", None, None).unwrap();
        assert_eq!(ghcr.pull_ref(), "ghcr.io/org/app:v1.0");
    }

    #[test]
    fn test_idempotency_key_stable_within_bucket() {
        let image = ImageRef::parse("nginx:latest", None, None).unwrap();
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 10, 15, 0).unwrap();
        let key_a = image.idempotency_key(at);
        let key_b = image.idempotency_key(at + Duration::minutes(40));
        let key_c = image.idempotency_key(at + Duration::hours(1));

        assert_eq!(key_a.len(), 32);
        assert_eq!(key_a, key_b);
        assert_ne!(key_a, key_c);
    }
}
