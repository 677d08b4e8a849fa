use async_trait::async_trait;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, ConnectionTrait, DbErr};
use serde::{Deserialize, Serialize};
use vulnwatch_core::DBDateTime;

use crate::types::ScanStatus;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "scan_audit_logs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub scan_job_id: Uuid,
    /// None for the creation entry.
    pub previous_status: Option<ScanStatus>,
    pub new_status: ScanStatus,
    pub message: Option<String>,
    pub detail: Option<Json>,
    /// Which component or entity triggered the transition
    /// (e.g. "api", "worker-1234", "sweeper").
    pub triggered_by: Option<String>,
    pub created_at: DBDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::scan_jobs::Entity",
        from = "Column::ScanJobId",
        to = "super::scan_jobs::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    ScanJobs,
}

impl Related<super::scan_jobs::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ScanJobs.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        if insert && self.created_at.is_not_set() {
            self.created_at = Set(chrono::Utc::now());
        }

        Ok(self)
    }
}
