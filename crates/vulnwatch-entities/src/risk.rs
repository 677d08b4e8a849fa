//! Severity / risk evaluation
//!
//! Pure functions from severity counts to the denormalized risk and
//! compliance columns on a scan job. Everything here must stay
//! recomputable: for any stored job, feeding its counts back through
//! these functions reproduces the stored `risk_score`,
//! `compliance_status` and `is_compliant` values.

use serde::{Deserialize, Serialize};

use crate::types::{ComplianceStatus, Severity};

/// Weighted risk scoring.
///
/// Defaults: Critical 100, High 50, Medium 10, Low 1. Unknown severity
/// contributes nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskWeights {
    pub critical: i32,
    pub high: i32,
    pub medium: i32,
    pub low: i32,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            critical: 100,
            high: 50,
            medium: 10,
            low: 1,
        }
    }
}

/// Vulnerability counts bucketed by severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: i32,
    pub high: i32,
    pub medium: i32,
    pub low: i32,
    pub unknown: i32,
}

impl SeverityCounts {
    pub fn record(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
            Severity::Unknown => self.unknown += 1,
        }
    }

    pub fn total(&self) -> i32 {
        self.critical + self.high + self.medium + self.low + self.unknown
    }

    /// Weighted risk score. Monotonic non-decreasing in every count and
    /// zero exactly when all scored counts are zero.
    pub fn risk_score(&self, weights: &RiskWeights) -> i32 {
        self.critical * weights.critical
            + self.high * weights.high
            + self.medium * weights.medium
            + self.low * weights.low
    }

    /// Compliance classification:
    /// - any Critical or High -> NonCompliant
    /// - else any Medium or Low -> PendingReview
    /// - else Compliant
    pub fn compliance_status(&self) -> ComplianceStatus {
        if self.critical > 0 || self.high > 0 {
            ComplianceStatus::NonCompliant
        } else if self.medium > 0 || self.low > 0 {
            ComplianceStatus::PendingReview
        } else {
            ComplianceStatus::Compliant
        }
    }

    pub fn is_compliant(&self) -> bool {
        self.compliance_status() == ComplianceStatus::Compliant
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(critical: i32, high: i32, medium: i32, low: i32) -> SeverityCounts {
        SeverityCounts {
            critical,
            high,
            medium,
            low,
            unknown: 0,
        }
    }

    #[test]
    fn test_risk_score_weighted_sum() {
        // {critical:0, high:1, medium:3, low:5} => 50 + 30 + 5 = 85
        let c = counts(0, 1, 3, 5);
        assert_eq!(c.risk_score(&RiskWeights::default()), 85);
    }

    #[test]
    fn test_risk_score_zero_iff_all_zero() {
        assert_eq!(counts(0, 0, 0, 0).risk_score(&RiskWeights::default()), 0);
        assert!(counts(0, 0, 0, 1).risk_score(&RiskWeights::default()) > 0);
    }

    #[test]
    fn test_unknown_contributes_nothing() {
        let mut c = counts(1, 2, 0, 0);
        let base = c.risk_score(&RiskWeights::default());
        c.unknown = 40;
        assert_eq!(c.risk_score(&RiskWeights::default()), base);
    }

    #[test]
    fn test_risk_score_monotonic_in_each_count() {
        let weights = RiskWeights::default();
        let base = counts(1, 1, 1, 1);
        let score = base.risk_score(&weights);
        for bumped in [
            counts(2, 1, 1, 1),
            counts(1, 2, 1, 1),
            counts(1, 1, 2, 1),
            counts(1, 1, 1, 2),
        ] {
            assert!(bumped.risk_score(&weights) > score);
        }
    }

    #[test]
    fn test_compliance_non_compliant_on_critical_or_high() {
        assert_eq!(
            counts(1, 0, 0, 0).compliance_status(),
            ComplianceStatus::NonCompliant
        );
        assert_eq!(
            counts(0, 1, 0, 0).compliance_status(),
            ComplianceStatus::NonCompliant
        );
        // Independent of medium/low values
        assert_eq!(
            counts(0, 1, 3, 5).compliance_status(),
            ComplianceStatus::NonCompliant
        );
    }

    #[test]
    fn test_compliance_pending_review_on_medium_low_only() {
        assert_eq!(
            counts(0, 0, 3, 0).compliance_status(),
            ComplianceStatus::PendingReview
        );
        assert_eq!(
            counts(0, 0, 0, 5).compliance_status(),
            ComplianceStatus::PendingReview
        );
    }

    #[test]
    fn test_compliance_clean_image() {
        let clean = counts(0, 0, 0, 0);
        assert_eq!(clean.compliance_status(), ComplianceStatus::Compliant);
        assert!(clean.is_compliant());

        let unknown_only = SeverityCounts {
            unknown: 3,
            ..clean
        };
        assert_eq!(
            unknown_only.compliance_status(),
            ComplianceStatus::Compliant
        );
    }

    #[test]
    fn test_is_compliant_matches_status() {
        assert!(!counts(0, 1, 3, 5).is_compliant());
        assert!(!counts(0, 0, 1, 0).is_compliant());
        assert!(counts(0, 0, 0, 0).is_compliant());
    }

    #[test]
    fn test_record_buckets() {
        let mut c = SeverityCounts::default();
        c.record(Severity::Critical);
        c.record(Severity::High);
        c.record(Severity::High);
        c.record(Severity::Unknown);
        assert_eq!(c.critical, 1);
        assert_eq!(c.high, 2);
        assert_eq!(c.unknown, 1);
        assert_eq!(c.total(), 4);
    }
}
