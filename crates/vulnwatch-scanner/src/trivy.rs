//! Trivy process executor
//!
//! Runs the Trivy binary as a bounded-lifetime subprocess. The child is
//! spawned with `kill_on_drop`, so it cannot outlive the calling task even
//! when that task is aborted; on timeout we additionally `start_kill` and
//! reap it explicitly so no zombie is left behind.
//!
//! The local vulnerability database under `cache_dir` is shared by all
//! concurrent scans on this worker. Scans take the read side of a lock,
//! `refresh_database` takes the write side, so a refresh never runs while
//! a scan is reading the cache.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::error::{ScanError, ScanResult};

/// Timeout for vulnerability database downloads, separate from the scan
/// timeout.
const DB_REFRESH_TIMEOUT: Duration = Duration::from_secs(300);

/// Raw output of one scanner invocation.
#[derive(Debug, Clone)]
pub struct ScanOutput {
    /// The report exactly as the scanner emitted it, unparsed.
    pub raw: String,
    /// Wall-clock seconds the scanner ran.
    pub duration: f64,
}

pub struct TrivyScanner {
    binary: String,
    cache_dir: PathBuf,
    timeout: Duration,
    db_lock: RwLock<()>,
}

impl TrivyScanner {
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            binary: config.trivy_binary.clone(),
            cache_dir: config.trivy_cache_dir.clone(),
            timeout: config.scan_timeout,
            db_lock: RwLock::new(()),
        }
    }

    /// Scanner version, parsed from `trivy --version`. Best-effort: returns
    /// None when the binary is missing or the output is unrecognized.
    pub async fn version(&self) -> Option<String> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .ok()?;

        if !output.status.success() {
            return None;
        }

        // First line looks like "Version: 0.58.1"
        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .lines()
            .next()
            .and_then(|line| line.strip_prefix("Version:"))
            .map(|v| v.trim().to_string())
    }

    /// Run a vulnerability scan against `image`, returning the raw JSON
    /// report.
    ///
    /// Guarantees the subprocess is dead when this returns, on every path:
    /// timeout, spawn error, non-zero exit, or cancellation of the calling
    /// task.
    pub async fn scan_image(&self, image: &str) -> ScanResult<ScanOutput> {
        let _cache_guard = self.db_lock.read().await;

        let scratch = tempfile::tempdir()?;
        let output_path = scratch.path().join("report.json");

        let mut cmd = Command::new(&self.binary);
        cmd.arg("image")
            .arg("--format")
            .arg("json")
            .arg("--output")
            .arg(&output_path)
            .arg("--scanners")
            .arg("vuln")
            .arg("--cache-dir")
            .arg(&self.cache_dir)
            .arg("--quiet")
            .arg(image)
            .env("NO_COLOR", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(image, binary = %self.binary, "executing scanner");

        let started = Instant::now();
        let mut child = cmd.spawn()?;

        // Drain stderr concurrently so a chatty scanner can't block on a
        // full pipe.
        let stderr_pipe = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(mut pipe) = stderr_pipe {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!(image, timeout_secs = self.timeout.as_secs(), "scan timed out, killing scanner");
                let _ = child.start_kill();
                let _ = child.wait().await;
                stderr_task.abort();
                return Err(ScanError::Timeout(self.timeout.as_secs()));
            }
        };

        let duration = started.elapsed().as_secs_f64();
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let exit_code = status.code().unwrap_or(-1);
            return Err(classify_scanner_failure(image, exit_code, &stderr));
        }

        let raw = match tokio::fs::read_to_string(&output_path).await {
            Ok(raw) => raw,
            Err(_) => {
                return Err(ScanError::ExitNonZero {
                    exit_code: status.code().unwrap_or(0),
                    stderr: "scanner exited cleanly but produced no output file".to_string(),
                });
            }
        };

        info!(image, duration_secs = format!("{duration:.1}"), "scan finished");

        Ok(ScanOutput { raw, duration })
    }

    /// Download or update the local vulnerability database.
    ///
    /// Takes the write side of the cache lock, so it waits for in-flight
    /// scans to finish and blocks new ones until the refresh is done.
    pub async fn refresh_database(&self) -> ScanResult<()> {
        let _cache_guard = self.db_lock.write().await;

        info!(cache_dir = %self.cache_dir.display(), "refreshing vulnerability database");

        let mut cmd = Command::new(&self.binary);
        cmd.arg("image")
            .arg("--download-db-only")
            .arg("--cache-dir")
            .arg(&self.cache_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let stderr_pipe = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(mut pipe) = stderr_pipe {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });

        let status = match tokio::time::timeout(DB_REFRESH_TIMEOUT, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                stderr_task.abort();
                return Err(ScanError::Timeout(DB_REFRESH_TIMEOUT.as_secs()));
            }
        };

        if !status.success() {
            let stderr = stderr_task.await.unwrap_or_default();
            return Err(ScanError::ExitNonZero {
                exit_code: status.code().unwrap_or(-1),
                stderr,
            });
        }

        info!("vulnerability database refreshed");
        Ok(())
    }
}

/// Map a non-zero scanner exit onto the failure taxonomy by sniffing
/// stderr. Trivy performs its own pull when the image is not in the local
/// daemon, so registry-side failures can surface here too.
fn classify_scanner_failure(image: &str, exit_code: i32, stderr: &str) -> ScanError {
    let lowered = stderr.to_lowercase();

    if lowered.contains("manifest unknown")
        || lowered.contains("could not find image")
        || lowered.contains("not found")
    {
        ScanError::ImageNotFound(image.to_string())
    } else if lowered.contains("unauthorized") || lowered.contains("denied") {
        ScanError::PullFailed(format!(
            "authentication failed for {image}: check registry credentials"
        ))
    } else if lowered.contains("rate limit") || lowered.contains("too many requests") {
        ScanError::PullFailed(format!("registry rate limit exceeded pulling {image}"))
    } else {
        ScanError::ExitNonZero {
            exit_code,
            stderr: stderr.trim().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    /// Write an executable stub that stands in for the trivy binary.
    fn stub_scanner(dir: &tempfile::TempDir, script: &str) -> String {
        let path = dir.path().join("fake-trivy");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh").unwrap();
        writeln!(file, "{script}").unwrap();
        drop(file);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn scanner_with(binary: String, timeout: Duration) -> TrivyScanner {
        let config = WorkerConfig {
            trivy_binary: binary,
            scan_timeout: timeout,
            ..Default::default()
        };
        TrivyScanner::new(&config)
    }

    #[tokio::test]
    async fn test_scan_success_reads_output_file() {
        let dir = tempfile::tempdir().unwrap();
        // Stub finds its --output argument and writes a report there.
        let binary = stub_scanner(
            &dir,
            r#"while [ $# -gt 0 ]; do
  if [ "$1" = "--output" ]; then out="$2"; fi
  shift
done
printf '{"Results":[]}' > "$out""#,
        );
        let scanner = scanner_with(binary, Duration::from_secs(10));

        let output = scanner.scan_image("nginx:latest").await.unwrap();
        assert_eq!(output.raw, r#"{"Results":[]}"#);
        assert!(output.duration >= 0.0);
    }

    #[tokio::test]
    async fn test_scan_timeout_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let binary = stub_scanner(&dir, "sleep 60");
        let scanner = scanner_with(binary, Duration::from_secs(1));

        let started = Instant::now();
        let err = scanner.scan_image("nginx:latest").await.unwrap_err();

        assert!(matches!(err, ScanError::Timeout(1)));
        assert_eq!(err.error_code(), "SCAN_TIMEOUT");
        // The child was killed and reaped, not waited on for its full sleep.
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_scan_nonzero_exit_captures_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let binary = stub_scanner(&dir, r#"echo "scanner blew up" >&2; exit 3"#);
        let scanner = scanner_with(binary, Duration::from_secs(10));

        let err = scanner.scan_image("nginx:latest").await.unwrap_err();
        match err {
            ScanError::ExitNonZero { exit_code, stderr } => {
                assert_eq!(exit_code, 3);
                assert!(stderr.contains("scanner blew up"));
            }
            other => panic!("expected ExitNonZero, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_scan_missing_output_is_exit_error() {
        let dir = tempfile::tempdir().unwrap();
        // Exits zero without writing the output file.
        let binary = stub_scanner(&dir, "exit 0");
        let scanner = scanner_with(binary, Duration::from_secs(10));

        let err = scanner.scan_image("nginx:latest").await.unwrap_err();
        assert_eq!(err.error_code(), "SCAN_EXIT_NONZERO");
    }

    #[test]
    fn test_classify_manifest_unknown_as_not_found() {
        let err = classify_scanner_failure("ghost:latest", 1, "FATAL: manifest unknown");
        assert!(matches!(err, ScanError::ImageNotFound(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_classify_auth_and_rate_limit_as_pull_failures() {
        let auth = classify_scanner_failure("private:latest", 1, "response: unauthorized");
        assert!(matches!(auth, ScanError::PullFailed(_)));
        assert!(auth.is_retryable());

        let rate = classify_scanner_failure("nginx:latest", 1, "429 too many requests");
        assert!(matches!(rate, ScanError::PullFailed(_)));
    }

    #[test]
    fn test_classify_other_failures_as_exit_nonzero() {
        let err = classify_scanner_failure("nginx:latest", 7, "segfault");
        assert!(matches!(err, ScanError::ExitNonZero { exit_code: 7, .. }));
    }
}
