//! State and audit ledger
//!
//! Every status change on a scan job, from any component, goes through
//! [`AuditLedger::record_transition`] so the job's full history can be
//! reconstructed. Entries are append-only; nothing in the engine updates
//! or deletes them, they only disappear when the owning job is deleted.

use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder};
use std::sync::Arc;
use uuid::Uuid;
use vulnwatch_database::DbConnection;
use vulnwatch_entities::scan_audit_logs;
use vulnwatch_entities::types::ScanStatus;

#[derive(Clone)]
pub struct AuditLedger {
    db: Arc<DbConnection>,
}

impl AuditLedger {
    pub fn new(db: Arc<DbConnection>) -> Self {
        Self { db }
    }

    /// Append one transition record. `previous` is None only for job
    /// creation.
    pub async fn record_transition(
        &self,
        job_id: Uuid,
        previous: Option<ScanStatus>,
        new: ScanStatus,
        message: Option<String>,
        detail: Option<serde_json::Value>,
        actor: &str,
    ) -> Result<scan_audit_logs::Model, DbErr> {
        Self::record_transition_on(self.db.as_ref(), job_id, previous, new, message, detail, actor)
            .await
    }

    /// Same as [`record_transition`](Self::record_transition), but against
    /// an explicit connection so callers can append the entry inside their
    /// own transaction.
    pub async fn record_transition_on<C>(
        conn: &C,
        job_id: Uuid,
        previous: Option<ScanStatus>,
        new: ScanStatus,
        message: Option<String>,
        detail: Option<serde_json::Value>,
        actor: &str,
    ) -> Result<scan_audit_logs::Model, DbErr>
    where
        C: ConnectionTrait,
    {
        let entry = scan_audit_logs::ActiveModel {
            id: Set(Uuid::new_v4()),
            scan_job_id: Set(job_id),
            previous_status: Set(previous),
            new_status: Set(new),
            message: Set(message),
            detail: Set(detail),
            triggered_by: Set(Some(actor.to_string())),
            ..Default::default()
        };

        entry.insert(conn).await
    }

    /// Full transition timeline for one job, oldest first.
    pub async fn job_history(
        &self,
        job_id: Uuid,
    ) -> Result<Vec<scan_audit_logs::Model>, DbErr> {
        scan_audit_logs::Entity::find()
            .filter(scan_audit_logs::Column::ScanJobId.eq(job_id))
            .order_by_asc(scan_audit_logs::Column::CreatedAt)
            .all(self.db.as_ref())
            .await
    }
}
