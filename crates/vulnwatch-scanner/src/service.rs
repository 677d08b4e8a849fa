//! Scan service: the intake/query API
//!
//! Library surface consumed by the HTTP collaborator: submission with
//! duplicate suppression, lookups, listing with filters, cascade delete,
//! and the derived read views (latest summaries, rolling statistics,
//! per-image trend).

use chrono::{Duration, Utc};
use sea_orm::sea_query::NullOrdering;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DbErr, EntityTrait, Order, PaginatorTrait,
    QueryFilter, QueryOrder, Statement,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;
use vulnwatch_core::ImageRef;
use vulnwatch_database::DbConnection;
use vulnwatch_entities::types::{ComplianceStatus, ScanStatus};
use vulnwatch_entities::{scan_audit_logs, scan_jobs, vulnerability_findings};

use crate::ledger::AuditLedger;

#[derive(Error, Debug)]
pub enum ScanServiceError {
    #[error("scan job {0} not found")]
    NotFound(Uuid),

    #[error("validation error: {0}")]
    Validation(String),

    /// A job for the same image is still queued or running and
    /// `force_rescan` was not set. Carries the existing job's id.
    #[error("a scan for this image is already in progress (job {job_id})")]
    JobInProgress { job_id: Uuid },

    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

/// One scan submission from the intake collaborator.
#[derive(Debug, Clone, Default)]
pub struct SubmitRequest {
    /// Raw image reference; embedded `registry/name:tag` forms accepted.
    pub image: String,
    /// Explicit tag, wins over one embedded in `image`.
    pub tag: Option<String>,
    /// Explicit registry, wins over one embedded in `image`.
    pub registry: Option<String>,
    /// Create a new job even when one is already in flight for this image.
    pub force_rescan: bool,
    /// Actor recorded on the creation audit entry.
    pub requested_by: Option<String>,
}

/// Filters for [`ScanService::list`].
#[derive(Debug, Clone, Default)]
pub struct ScanListFilter {
    pub status: Option<ScanStatus>,
    /// Substring match on the image name.
    pub image: Option<String>,
    pub compliant_only: bool,
}

/// Rolling aggregates over a trailing window.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanStatistics {
    pub total_jobs: u64,
    pub pending_jobs: u64,
    pub in_flight_jobs: u64,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
    pub critical_total: i64,
    pub high_total: i64,
    pub medium_total: i64,
    pub low_total: i64,
    pub average_risk_score: f64,
    pub average_scan_duration: Option<f64>,
    pub compliant_images: u64,
    pub non_compliant_images: u64,
    /// Share of completed jobs that are compliant, 0-100.
    pub compliance_rate: f64,
}

/// One point in a per-image history chart.
#[derive(Debug, Clone, Serialize)]
pub struct TrendPoint {
    pub date: vulnwatch_core::UtcDateTime,
    pub risk_score: i32,
    pub total_vulnerabilities: i32,
    pub critical_count: i32,
    pub high_count: i32,
    pub is_compliant: bool,
}

#[derive(Clone)]
pub struct ScanService {
    db: Arc<DbConnection>,
    ledger: AuditLedger,
}

impl ScanService {
    pub fn new(db: Arc<DbConnection>) -> Self {
        let ledger = AuditLedger::new(Arc::clone(&db));
        Self { db, ledger }
    }

    pub fn ledger(&self) -> &AuditLedger {
        &self.ledger
    }

    /// Create a new scan job in `pending`.
    ///
    /// Rejected with [`ScanServiceError::JobInProgress`] when a non-terminal
    /// job already exists for the same (name, tag, registry) and
    /// `force_rescan` is false. Once the earlier job reaches a terminal
    /// state, repeat submissions always create fresh jobs; the idempotency
    /// key is a correlation aid, not a dedup mechanism.
    pub async fn submit(&self, request: SubmitRequest) -> Result<scan_jobs::Model, ScanServiceError> {
        let image = ImageRef::parse(
            &request.image,
            request.tag.as_deref(),
            request.registry.as_deref(),
        )
        .map_err(|e| ScanServiceError::Validation(e.to_string()))?;

        if !request.force_rescan {
            if let Some(existing) = self.find_non_terminal(&image).await? {
                return Err(ScanServiceError::JobInProgress {
                    job_id: existing.id,
                });
            }
        }

        let job = scan_jobs::ActiveModel {
            id: Set(Uuid::new_v4()),
            idempotency_key: Set(Some(image.idempotency_key_now())),
            image_name: Set(image.name.clone()),
            image_tag: Set(image.tag.clone()),
            registry: Set(image.registry.clone()),
            status: Set(ScanStatus::Pending),
            compliance_status: Set(ComplianceStatus::PendingReview),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;

        let actor = request.requested_by.as_deref().unwrap_or("api");
        self.ledger
            .record_transition(
                job.id,
                None,
                ScanStatus::Pending,
                Some(format!("Scan requested for {image}")),
                None,
                actor,
            )
            .await?;

        info!(job_id = %job.id, image = %image, "scan job created");

        Ok(job)
    }

    async fn find_non_terminal(
        &self,
        image: &ImageRef,
    ) -> Result<Option<scan_jobs::Model>, DbErr> {
        scan_jobs::Entity::find()
            .filter(scan_jobs::Column::ImageName.eq(&image.name))
            .filter(scan_jobs::Column::ImageTag.eq(&image.tag))
            .filter(scan_jobs::Column::Registry.eq(&image.registry))
            .filter(scan_jobs::Column::Status.is_in(ScanStatus::non_terminal()))
            .order_by_desc(scan_jobs::Column::CreatedAt)
            .one(self.db.as_ref())
            .await
    }

    pub async fn get(&self, job_id: Uuid) -> Result<scan_jobs::Model, ScanServiceError> {
        scan_jobs::Entity::find_by_id(job_id)
            .one(self.db.as_ref())
            .await?
            .ok_or(ScanServiceError::NotFound(job_id))
    }

    /// List jobs newest-first. Pages are 1-based; returns the page plus the
    /// total matching count.
    pub async fn list(
        &self,
        filter: ScanListFilter,
        page: u64,
        page_size: u64,
    ) -> Result<(Vec<scan_jobs::Model>, u64), ScanServiceError> {
        let mut query = scan_jobs::Entity::find();

        if let Some(status) = filter.status {
            query = query.filter(scan_jobs::Column::Status.eq(status));
        }
        if let Some(image) = &filter.image {
            query = query.filter(scan_jobs::Column::ImageName.contains(image));
        }
        if filter.compliant_only {
            query = query.filter(scan_jobs::Column::IsCompliant.eq(true));
        }

        let paginator = query
            .order_by_desc(scan_jobs::Column::CreatedAt)
            .paginate(self.db.as_ref(), page_size.max(1));

        let total = paginator.num_items().await?;
        let jobs = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((jobs, total))
    }

    /// Delete a job. Findings and audit entries go with it via the cascade
    /// foreign keys.
    pub async fn delete(&self, job_id: Uuid) -> Result<(), ScanServiceError> {
        let result = scan_jobs::Entity::delete_by_id(job_id)
            .exec(self.db.as_ref())
            .await?;

        if result.rows_affected == 0 {
            return Err(ScanServiceError::NotFound(job_id));
        }

        info!(job_id = %job_id, "scan job deleted");
        Ok(())
    }

    /// Findings for one job, highest CVSS first.
    pub async fn job_findings(
        &self,
        job_id: Uuid,
    ) -> Result<Vec<vulnerability_findings::Model>, ScanServiceError> {
        // Guard so a missing job is NotFound rather than an empty list
        self.get(job_id).await?;

        Ok(vulnerability_findings::Entity::find()
            .filter(vulnerability_findings::Column::ScanJobId.eq(job_id))
            // Unscored findings sort below scored ones
            .order_by_with_nulls(
                vulnerability_findings::Column::CvssScore,
                Order::Desc,
                NullOrdering::Last,
            )
            .all(self.db.as_ref())
            .await?)
    }

    /// Audit timeline for one job, oldest first.
    pub async fn job_history(
        &self,
        job_id: Uuid,
    ) -> Result<Vec<scan_audit_logs::Model>, ScanServiceError> {
        self.get(job_id).await?;
        Ok(self.ledger.job_history(job_id).await?)
    }

    /// Rolling aggregate statistics over jobs created in the trailing
    /// `window`.
    pub async fn aggregate_stats(
        &self,
        window: Duration,
    ) -> Result<ScanStatistics, ScanServiceError> {
        let cutoff = Utc::now() - window;

        let jobs = scan_jobs::Entity::find()
            .filter(scan_jobs::Column::CreatedAt.gte(cutoff))
            .all(self.db.as_ref())
            .await?;

        let mut stats = ScanStatistics {
            total_jobs: jobs.len() as u64,
            ..Default::default()
        };

        let mut risk_sum: i64 = 0;
        let mut scan_duration_sum = 0.0;
        let mut scan_duration_samples = 0u64;

        for job in &jobs {
            match job.status {
                ScanStatus::Pending => stats.pending_jobs += 1,
                ScanStatus::Pulling | ScanStatus::Scanning | ScanStatus::Parsing => {
                    stats.in_flight_jobs += 1
                }
                ScanStatus::Completed => stats.completed_jobs += 1,
                ScanStatus::Failed => stats.failed_jobs += 1,
            }

            if job.status != ScanStatus::Completed {
                continue;
            }

            stats.critical_total += job.critical_count as i64;
            stats.high_total += job.high_count as i64;
            stats.medium_total += job.medium_count as i64;
            stats.low_total += job.low_count as i64;
            risk_sum += job.risk_score as i64;

            if job.is_compliant {
                stats.compliant_images += 1;
            } else {
                stats.non_compliant_images += 1;
            }

            if let Some(duration) = job.scan_duration {
                scan_duration_sum += duration;
                scan_duration_samples += 1;
            }
        }

        if stats.completed_jobs > 0 {
            stats.average_risk_score =
                (risk_sum as f64 / stats.completed_jobs as f64 * 100.0).round() / 100.0;
            stats.compliance_rate = (stats.compliant_images as f64
                / stats.completed_jobs as f64
                * 10000.0)
                .round()
                / 100.0;
        }
        if scan_duration_samples > 0 {
            stats.average_scan_duration =
                Some((scan_duration_sum / scan_duration_samples as f64 * 100.0).round() / 100.0);
        }

        Ok(stats)
    }

    /// Latest completed job per (image, tag, registry), from the
    /// `latest_scan_summaries` view.
    pub async fn latest_scan_summaries(
        &self,
    ) -> Result<Vec<scan_jobs::Model>, ScanServiceError> {
        let backend = sea_orm::ConnectionTrait::get_database_backend(self.db.as_ref());
        Ok(scan_jobs::Entity::find()
            .from_raw_sql(Statement::from_string(
                backend,
                "SELECT * FROM latest_scan_summaries ORDER BY created_at DESC".to_string(),
            ))
            .all(self.db.as_ref())
            .await?)
    }

    /// Highest-risk images among the latest summaries.
    pub async fn top_risky_images(
        &self,
        limit: u64,
    ) -> Result<Vec<scan_jobs::Model>, ScanServiceError> {
        let backend = sea_orm::ConnectionTrait::get_database_backend(self.db.as_ref());
        Ok(scan_jobs::Entity::find()
            .from_raw_sql(Statement::from_string(
                backend,
                format!("SELECT * FROM latest_scan_summaries ORDER BY risk_score DESC LIMIT {limit}"),
            ))
            .all(self.db.as_ref())
            .await?)
    }

    /// Completed scans for one image over the trailing `days`, oldest
    /// first, for charting.
    pub async fn image_trend(
        &self,
        image: &str,
        tag: Option<&str>,
        days: i64,
    ) -> Result<Vec<TrendPoint>, ScanServiceError> {
        let image = ImageRef::parse(image, tag, None)
            .map_err(|e| ScanServiceError::Validation(e.to_string()))?;
        let cutoff = Utc::now() - Duration::days(days);

        let jobs = scan_jobs::Entity::find()
            .filter(scan_jobs::Column::ImageName.eq(&image.name))
            .filter(scan_jobs::Column::ImageTag.eq(&image.tag))
            .filter(scan_jobs::Column::Status.eq(ScanStatus::Completed))
            .filter(scan_jobs::Column::CreatedAt.gte(cutoff))
            .order_by_asc(scan_jobs::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?;

        Ok(jobs
            .into_iter()
            .map(|job| TrendPoint {
                date: job.created_at,
                risk_score: job.risk_score,
                total_vulnerabilities: job.total_vulnerabilities,
                critical_count: job.critical_count,
                high_count: job.high_count,
                is_compliant: job.is_compliant,
            })
            .collect())
    }
}
