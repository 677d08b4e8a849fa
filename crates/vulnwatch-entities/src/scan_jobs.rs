use async_trait::async_trait;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, ConnectionTrait, DbErr};
use serde::{Deserialize, Serialize};
use vulnwatch_core::DBDateTime;

use crate::risk::SeverityCounts;
use crate::types::{ComplianceStatus, ScanStatus};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "scan_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Correlation hash of (image reference + hour bucket). Best-effort
    /// only; deliberately not unique so repeat scans are unrestricted.
    pub idempotency_key: Option<String>,
    pub image_name: String,
    pub image_tag: String,
    pub registry: String,
    pub image_digest: Option<String>,
    pub status: ScanStatus,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    /// Complete scanner JSON output, preserved verbatim for audit/export.
    pub raw_report: Option<Json>,
    pub critical_count: i32,
    pub high_count: i32,
    pub medium_count: i32,
    pub low_count: i32,
    pub unknown_count: i32,
    pub total_vulnerabilities: i32,
    pub fixable_count: i32,
    pub unfixable_count: i32,
    pub risk_score: i32,
    pub max_cvss_score: Option<f64>,
    pub avg_cvss_score: Option<f64>,
    pub is_compliant: bool,
    pub compliance_status: ComplianceStatus,
    pub pull_duration: Option<f64>,
    pub scan_duration: Option<f64>,
    pub worker_id: Option<String>,
    pub trivy_version: Option<String>,
    pub created_at: DBDateTime,
    pub started_at: Option<DBDateTime>,
    pub completed_at: Option<DBDateTime>,
    pub updated_at: DBDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::vulnerability_findings::Entity")]
    Findings,
    #[sea_orm(has_many = "super::scan_audit_logs::Entity")]
    AuditLogs,
}

impl Related<super::vulnerability_findings::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Findings.def()
    }
}

impl Related<super::scan_audit_logs::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AuditLogs.def()
    }
}

impl Model {
    /// Full image reference: registry/name:tag (registry omitted for
    /// Docker Hub).
    pub fn full_image_name(&self) -> String {
        if self.registry == "docker.io" {
            format!("{}:{}", self.image_name, self.image_tag)
        } else {
            format!("{}/{}:{}", self.registry, self.image_name, self.image_tag)
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn severity_counts(&self) -> SeverityCounts {
        SeverityCounts {
            critical: self.critical_count,
            high: self.high_count,
            medium: self.medium_count,
            low: self.low_count,
            unknown: self.unknown_count,
        }
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let now = chrono::Utc::now();

        if insert {
            if self.created_at.is_not_set() {
                self.created_at = Set(now);
            }
            if self.updated_at.is_not_set() {
                self.updated_at = Set(now);
            }
        } else {
            self.updated_at = Set(now);
        }

        Ok(self)
    }
}
