use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use vulnwatch_core::DBDateTime;

use crate::types::Severity;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "vulnerability_findings")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub scan_job_id: Uuid,
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

impl ActiveModelBehavior for ActiveModel {}
