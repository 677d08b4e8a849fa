//! Trivy report model and result normalizer
//!
//! Deserializes the scanner's JSON report and flattens it into a
//! deduplicated set of findings plus the aggregate counts that get
//! denormalized onto the job record. Duplicate (vulnerability id, package)
//! pairs across scan targets collapse into one finding.

use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use vulnwatch_core::DBDateTime;
use vulnwatch_entities::risk::SeverityCounts;
use vulnwatch_entities::types::Severity;

use crate::error::{ScanError, ScanResult};

#[derive(Debug, Clone, Deserialize)]
pub struct TrivyReport {
    #[serde(rename = "SchemaVersion", default)]
    pub schema_version: Option<i64>,
    #[serde(rename = "Metadata", default)]
    pub metadata: Option<TrivyMetadata>,
    #[serde(rename = "Results", default)]
    pub results: Vec<TrivyResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrivyMetadata {
    #[serde(rename = "RepoDigests", default)]
    pub repo_digests: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrivyResult {
    #[serde(rename = "Target", default)]
    pub target: String,
    /// Trivy emits `null` here for targets with no findings.
    #[serde(rename = "Vulnerabilities", default)]
    pub vulnerabilities: Option<Vec<TrivyVulnerability>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrivyVulnerability {
    #[serde(rename = "VulnerabilityID", default)]
    pub vulnerability_id: Option<String>,
    #[serde(rename = "PkgName", default)]
    pub pkg_name: Option<String>,
    #[serde(rename = "InstalledVersion", default)]
    pub installed_version: Option<String>,
    #[serde(rename = "FixedVersion", default)]
    pub fixed_version: Option<String>,
    #[serde(rename = "Severity", default)]
    pub severity: Option<String>,
    #[serde(rename = "Title", default)]
    pub title: Option<String>,
    #[serde(rename = "PrimaryURL", default)]
    pub primary_url: Option<String>,
    #[serde(rename = "PublishedDate", default)]
    pub published_date: Option<DBDateTime>,
    /// Keyed by source (`nvd`, `redhat`, ...). BTreeMap keeps vendor
    /// iteration order deterministic.
    #[serde(rename = "CVSS", default)]
    pub cvss: BTreeMap<String, CvssScores>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CvssScores {
    #[serde(rename = "V3Score", default)]
    pub v3_score: Option<f64>,
    #[serde(rename = "V2Score", default)]
    pub v2_score: Option<f64>,
}

impl TrivyVulnerability {
    /// Pick one CVSS score. Priority: NVD v3, any vendor v3, NVD v2, any
    /// vendor v2.
    pub fn cvss_score(&self) -> Option<f64> {
        if let Some(score) = self.cvss.get("nvd").and_then(|s| s.v3_score) {
            return Some(score);
        }
        if let Some(score) = self.cvss.values().find_map(|s| s.v3_score) {
            return Some(score);
        }
        if let Some(score) = self.cvss.get("nvd").and_then(|s| s.v2_score) {
            return Some(score);
        }
        self.cvss.values().find_map(|s| s.v2_score)
    }
}

/// One finding, ready for insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFinding {
    pub vulnerability_id: String,
    pub package_name: String,
    pub installed_version: String,
    pub fixed_version: Option<String>,
    pub severity: Severity,
    pub cvss_score: Option<f64>,
    pub is_fixable: bool,
    pub title: Option<String>,
    pub primary_url: Option<String>,
    pub published_date: Option<DBDateTime>,
}

/// Everything derived from one raw report.
#[derive(Debug, Clone)]
pub struct NormalizedReport {
    pub findings: Vec<NormalizedFinding>,
    pub counts: SeverityCounts,
    pub fixable_count: i32,
    pub unfixable_count: i32,
    pub max_cvss_score: Option<f64>,
    pub avg_cvss_score: Option<f64>,
    pub image_digest: Option<String>,
    pub scanner_schema_version: Option<i64>,
    /// The report as parsed JSON, stored verbatim on the job.
    pub raw: serde_json::Value,
}

impl NormalizedReport {
    pub fn total(&self) -> i32 {
        self.counts.total()
    }
}

/// Parse and normalize a raw scanner report.
///
/// Malformed input yields [`ScanError::ParseFailed`]; the caller keeps the
/// raw payload around for diagnosis.
pub fn normalize_report(raw: &str) -> ScanResult<NormalizedReport> {
    let raw_value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| ScanError::ParseFailed(e.to_string()))?;
    let report: TrivyReport = serde_json::from_value(raw_value.clone())
        .map_err(|e| ScanError::ParseFailed(e.to_string()))?;

    let mut findings = Vec::new();
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut counts = SeverityCounts::default();
    let mut fixable_count = 0;
    let mut unfixable_count = 0;
    let mut cvss_scores: Vec<f64> = Vec::new();

    for result in &report.results {
        for vuln in result.vulnerabilities.iter().flatten() {
            let vulnerability_id = vuln
                .vulnerability_id
                .clone()
                .unwrap_or_else(|| "UNKNOWN".to_string());
            let package_name = vuln.pkg_name.clone().unwrap_or_else(|| "unknown".to_string());

            // One finding per (vulnerability, package), job-wide
            if !seen.insert((vulnerability_id.clone(), package_name.clone())) {
                continue;
            }

            let severity = vuln
                .severity
                .as_deref()
                .map(Severity::from_report)
                .unwrap_or(Severity::Unknown);
            counts.record(severity);

            let fixed_version = vuln
                .fixed_version
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string);
            let is_fixable = fixed_version.is_some();
            if is_fixable {
                fixable_count += 1;
            } else {
                unfixable_count += 1;
            }

            let cvss_score = vuln.cvss_score();
            if let Some(score) = cvss_score {
                cvss_scores.push(score);
            }

            findings.push(NormalizedFinding {
                vulnerability_id,
                package_name,
                installed_version: vuln
                    .installed_version
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
                fixed_version,
                severity,
                cvss_score,
                is_fixable,
                title: vuln.title.clone(),
                primary_url: vuln.primary_url.clone(),
                published_date: vuln.published_date,
            });
        }
    }

    let max_cvss_score = cvss_scores.iter().copied().fold(None, |max: Option<f64>, s| {
        Some(max.map_or(s, |m| m.max(s)))
    });
    let avg_cvss_score = if cvss_scores.is_empty() {
        None
    } else {
        let avg = cvss_scores.iter().sum::<f64>() / cvss_scores.len() as f64;
        Some((avg * 100.0).round() / 100.0)
    };

    let image_digest = report
        .metadata
        .as_ref()
        .and_then(|m| m.repo_digests.first())
        .map(|d| d.rsplit('@').next().unwrap_or(d).to_string());

    Ok(NormalizedReport {
        findings,
        counts,
        fixable_count,
        unfixable_count,
        max_cvss_score,
        avg_cvss_score,
        image_digest,
        scanner_schema_version: report.schema_version,
        raw: raw_value,
    })
}
