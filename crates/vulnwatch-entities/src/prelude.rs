pub use super::scan_audit_logs::Entity as ScanAuditLogs;
pub use super::scan_jobs::Entity as ScanJobs;
pub use super::vulnerability_findings::Entity as VulnerabilityFindings;

pub use super::risk::{RiskWeights, SeverityCounts};
pub use super::types::{ComplianceStatus, ScanStatus, Severity};
