//! Full pipeline against a real Docker daemon and a stubbed trivy binary:
//! claim, pull, scan, normalize, complete, plus the timeout and
//! parse-error failure paths.
//!
//! Single test function on purpose: each scenario claims from the global
//! pending queue, so they run back to back against one database.

mod common;

use common::{setup_database, stub_scanner, submit_image, test_config, test_worker};
use std::sync::Arc;
use std::time::Duration;
use vulnwatch_entities::types::{ComplianceStatus, ScanStatus};
use vulnwatch_scanner::ScanService;

/// Small image that exists on Docker Hub; the pull is real, the scan is
/// stubbed.
const TEST_IMAGE: &str = "alpine:3.20";

const STUB_REPORT: &str = r#"cat > "$out" <<'REPORT'
{
  "SchemaVersion": 2,
  "Metadata": { "RepoDigests": ["alpine@sha256:feedface"] },
  "Results": [{
    "Target": "alpine:3.20 (alpine 3.20)",
    "Vulnerabilities": [
      {
        "VulnerabilityID": "CVE-2024-0001",
        "PkgName": "openssl",
        "InstalledVersion": "3.0.1",
        "FixedVersion": "3.0.2",
        "Severity": "CRITICAL",
        "CVSS": { "nvd": { "V3Score": 9.8 } }
      },
      {
        "VulnerabilityID": "CVE-2024-0002",
        "PkgName": "busybox",
        "InstalledVersion": "1.36.0",
        "Severity": "LOW"
      }
    ]
  }]
}
REPORT"#;

/// Stub script prelude that extracts the --output argument.
fn writing_stub(body: &str) -> String {
    format!(
        r#"while [ $# -gt 0 ]; do
  if [ "$1" = "--output" ]; then out="$2"; fi
  shift
done
{body}"#
    )
}

#[tokio::test]
async fn test_pipeline_end_to_end() -> anyhow::Result<()> {
    let db = setup_database().await;
    let service = ScanService::new(db.clone());
    let stub_dir = tempfile::tempdir()?;

    // --- Happy path: pull, scan, normalize, complete ---
    let job = submit_image(&service, TEST_IMAGE).await;

    let mut config = test_config("worker-e2e");
    config.trivy_binary = stub_scanner(&stub_dir, &writing_stub(STUB_REPORT));
    let worker = Arc::new(test_worker(&db, config));

    let claimed = worker.claim_next_job().await?.expect("job to claim");
    assert_eq!(claimed.id, job.id);
    Arc::clone(&worker).process_job(claimed).await;

    let done = service.get(job.id).await?;
    assert_eq!(done.status, ScanStatus::Completed);
    assert_eq!(done.critical_count, 1);
    assert_eq!(done.low_count, 1);
    assert_eq!(done.total_vulnerabilities, 2);
    assert_eq!(done.fixable_count, 1);
    assert_eq!(done.unfixable_count, 1);
    assert_eq!(done.risk_score, 101);
    assert_eq!(done.compliance_status, ComplianceStatus::NonCompliant);
    assert!(!done.is_compliant);
    assert_eq!(done.max_cvss_score, Some(9.8));
    assert!(done.pull_duration.is_some());
    assert!(done.scan_duration.is_some());
    assert!(done.completed_at.is_some());
    assert!(done.image_digest.is_some());
    assert!(done.raw_report.is_some());
    assert!(done.error_code.is_none());

    // Findings landed in the same transaction
    let findings = service.job_findings(job.id).await?;
    assert_eq!(findings.len(), 2);
    assert_eq!(findings[0].vulnerability_id, "CVE-2024-0001");
    assert!(findings[0].is_fixable);
    assert!(!findings[1].is_fixable);

    // Full audit chain, no stage skipped
    let history = service.job_history(job.id).await?;
    let transitions: Vec<_> = history
        .iter()
        .map(|entry| (entry.previous_status, entry.new_status))
        .collect();
    assert_eq!(
        transitions,
        vec![
            (None, ScanStatus::Pending),
            (Some(ScanStatus::Pending), ScanStatus::Pulling),
            (Some(ScanStatus::Pulling), ScanStatus::Scanning),
            (Some(ScanStatus::Scanning), ScanStatus::Parsing),
            (Some(ScanStatus::Parsing), ScanStatus::Completed),
        ]
    );

    // Round-trip law on the pipeline's own output
    let recomputed = done.severity_counts();
    assert_eq!(
        done.risk_score,
        recomputed.risk_score(&worker.config().risk_weights)
    );
    assert_eq!(done.compliance_status, recomputed.compliance_status());

    // --- Timeout: scanner killed, job failed, retry accounted ---
    let job = service
        .submit(vulnwatch_scanner::SubmitRequest {
            image: TEST_IMAGE.to_string(),
            force_rescan: true,
            ..Default::default()
        })
        .await?;

    let mut config = test_config("worker-timeout");
    config.trivy_binary = stub_scanner(&stub_dir, "sleep 30");
    config.scan_timeout = Duration::from_secs(1);
    let worker = Arc::new(test_worker(&db, config));

    let claimed = worker.claim_next_job().await?.expect("job to claim");
    assert_eq!(claimed.id, job.id);
    Arc::clone(&worker).process_job(claimed).await;

    let failed = service.get(job.id).await?;
    assert_eq!(failed.status, ScanStatus::Failed);
    assert_eq!(failed.error_code.as_deref(), Some("SCAN_TIMEOUT"));
    assert_eq!(failed.retry_count, 1);
    assert!(failed.completed_at.is_some());

    // --- Malformed output: PARSE_ERROR, raw preserved, no retry ---
    let job = service
        .submit(vulnwatch_scanner::SubmitRequest {
            image: TEST_IMAGE.to_string(),
            force_rescan: true,
            ..Default::default()
        })
        .await?;

    let mut config = test_config("worker-parse");
    config.trivy_binary = stub_scanner(
        &stub_dir,
        &writing_stub(r#"printf 'this is not a report' > "$out""#),
    );
    let worker = Arc::new(test_worker(&db, config));

    let claimed = worker.claim_next_job().await?.expect("job to claim");
    assert_eq!(claimed.id, job.id);
    Arc::clone(&worker).process_job(claimed).await;

    let failed = service.get(job.id).await?;
    assert_eq!(failed.status, ScanStatus::Failed);
    assert_eq!(failed.error_code.as_deref(), Some("PARSE_ERROR"));
    assert_eq!(failed.retry_count, 0, "parse failures are not retried");
    // The unparsable payload is kept for diagnosis
    assert_eq!(
        failed.raw_report,
        Some(serde_json::Value::String("this is not a report".to_string()))
    );
    assert!(service.job_findings(job.id).await?.is_empty());

    let history = service.job_history(job.id).await?;
    let last = history.last().expect("history");
    assert_eq!(last.previous_status, Some(ScanStatus::Parsing));
    assert_eq!(last.new_status, ScanStatus::Failed);

    Ok(())
}
