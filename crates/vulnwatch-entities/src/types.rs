use sea_orm::{DeriveActiveEnum, EnumIter};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// ScanStatus enum for scan job lifecycle tracking.
///
/// Allowed transitions:
///   pending -> pulling -> scanning -> parsing -> completed
/// with any in-flight state able to drop to `failed`, or back to `pending`
/// when the staleness sweep or a transient pull failure requeues the job.
/// Terminal states: `completed`, `failed`.
///
/// NOTE: Use db_type = "Text" for SQLite compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DeriveActiveEnum, EnumIter)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum ScanStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "pulling")]
    Pulling,
    #[sea_orm(string_value = "scanning")]
    Scanning,
    #[sea_orm(string_value = "parsing")]
    Parsing,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Pulling => "pulling",
            ScanStatus::Scanning => "scanning",
            ScanStatus::Parsing => "parsing",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ScanStatus::Pending),
            "pulling" => Some(ScanStatus::Pulling),
            "scanning" => Some(ScanStatus::Scanning),
            "parsing" => Some(ScanStatus::Parsing),
            "completed" => Some(ScanStatus::Completed),
            "failed" => Some(ScanStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Failed)
    }

    /// States a job passes through between claim and terminal outcome.
    pub fn in_flight() -> [ScanStatus; 3] {
        [
            ScanStatus::Pulling,
            ScanStatus::Scanning,
            ScanStatus::Parsing,
        ]
    }

    /// States counted as queued-or-running by the duplicate-submission check.
    pub fn non_terminal() -> [ScanStatus; 4] {
        [
            ScanStatus::Pending,
            ScanStatus::Pulling,
            ScanStatus::Scanning,
            ScanStatus::Parsing,
        ]
    }

    pub fn can_transition_to(&self, next: ScanStatus) -> bool {
        use ScanStatus::*;
        match (self, next) {
            (Pending, Pulling) => true,
            (Pulling, Scanning) => true,
            (Scanning, Parsing) => true,
            (Parsing, Completed) => true,
            // Any in-flight state may fail, or be requeued by a transient
            // pull failure / the staleness sweep.
            (Pulling | Scanning | Parsing, Failed) => true,
            (Pulling | Scanning | Parsing, Pending) => true,
            _ => false,
        }
    }
}

/// Severity classification of a finding (NVD standard).
///
/// NOTE: Use db_type = "Text" for SQLite compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, DeriveActiveEnum, EnumIter)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum Severity {
    #[sea_orm(string_value = "CRITICAL")]
    Critical,
    #[sea_orm(string_value = "HIGH")]
    High,
    #[sea_orm(string_value = "MEDIUM")]
    Medium,
    #[sea_orm(string_value = "LOW")]
    Low,
    #[sea_orm(string_value = "UNKNOWN")]
    Unknown,
}

impl Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
            Severity::Unknown => "UNKNOWN",
        }
    }

    /// Map the severity string emitted by the scanner engine. Anything
    /// unrecognized (or absent) counts as UNKNOWN.
    pub fn from_report(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "CRITICAL" => Severity::Critical,
            "HIGH" => Severity::High,
            "MEDIUM" => Severity::Medium,
            "LOW" => Severity::Low,
            _ => Severity::Unknown,
        }
    }
}

/// Compliance classification derived from a job's severity profile.
///
/// NOTE: Use db_type = "Text" for SQLite compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DeriveActiveEnum, EnumIter)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum ComplianceStatus {
    #[sea_orm(string_value = "compliant")]
    Compliant,
    #[sea_orm(string_value = "non_compliant")]
    NonCompliant,
    #[sea_orm(string_value = "pending_review")]
    PendingReview,
}

impl Display for ComplianceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ComplianceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplianceStatus::Compliant => "compliant",
            ComplianceStatus::NonCompliant => "non_compliant",
            ComplianceStatus::PendingReview => "pending_review",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "compliant" => Some(ComplianceStatus::Compliant),
            "non_compliant" => Some(ComplianceStatus::NonCompliant),
            "pending_review" => Some(ComplianceStatus::PendingReview),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(ScanStatus::Completed.is_terminal());
        assert!(ScanStatus::Failed.is_terminal());
        assert!(!ScanStatus::Pending.is_terminal());
        assert!(!ScanStatus::Parsing.is_terminal());
    }

    #[test]
    fn test_transition_graph_happy_path() {
        assert!(ScanStatus::Pending.can_transition_to(ScanStatus::Pulling));
        assert!(ScanStatus::Pulling.can_transition_to(ScanStatus::Scanning));
        assert!(ScanStatus::Scanning.can_transition_to(ScanStatus::Parsing));
        assert!(ScanStatus::Parsing.can_transition_to(ScanStatus::Completed));
    }

    #[test]
    fn test_no_stage_skipping() {
        assert!(!ScanStatus::Pending.can_transition_to(ScanStatus::Scanning));
        assert!(!ScanStatus::Pending.can_transition_to(ScanStatus::Completed));
        assert!(!ScanStatus::Pulling.can_transition_to(ScanStatus::Completed));
        assert!(!ScanStatus::Scanning.can_transition_to(ScanStatus::Completed));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for next in [
            ScanStatus::Pending,
            ScanStatus::Pulling,
            ScanStatus::Scanning,
            ScanStatus::Parsing,
            ScanStatus::Completed,
            ScanStatus::Failed,
        ] {
            assert!(!ScanStatus::Completed.can_transition_to(next));
            assert!(!ScanStatus::Failed.can_transition_to(next));
        }
    }

    #[test]
    fn test_in_flight_can_fail_or_requeue() {
        for status in ScanStatus::in_flight() {
            assert!(status.can_transition_to(ScanStatus::Failed));
            assert!(status.can_transition_to(ScanStatus::Pending));
        }
    }

    #[test]
    fn test_severity_from_report() {
        assert_eq!(Severity::from_report("CRITICAL"), Severity::Critical);
        assert_eq!(Severity::from_report("high"), Severity::High);
        assert_eq!(Severity::from_report("negligible"), Severity::Unknown);
        assert_eq!(Severity::from_report(""), Severity::Unknown);
    }
}
