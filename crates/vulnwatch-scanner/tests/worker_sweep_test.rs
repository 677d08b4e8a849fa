//! Staleness sweep: stuck in-flight jobs are requeued while retry budget
//! remains and force-failed once it runs out, always mutating the same row.

mod common;

use chrono::Utc;
use common::{setup_database, submit_image, test_config, test_worker, unique_image};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use std::sync::Arc;
use uuid::Uuid;
use vulnwatch_database::DbConnection;
use vulnwatch_entities::scan_jobs;
use vulnwatch_entities::types::ScanStatus;
use vulnwatch_scanner::ScanService;

/// Force a job into a stuck in-flight state, abandoned an hour ago.
async fn strand_job(
    db: &Arc<DbConnection>,
    job_id: Uuid,
    status: ScanStatus,
    retry_count: i32,
) -> anyhow::Result<()> {
    scan_jobs::Entity::update_many()
        .col_expr(scan_jobs::Column::Status, Expr::value(status))
        .col_expr(scan_jobs::Column::RetryCount, Expr::value(retry_count))
        .col_expr(
            scan_jobs::Column::WorkerId,
            Expr::value(Some("worker-dead".to_string())),
        )
        .col_expr(
            scan_jobs::Column::UpdatedAt,
            Expr::value(Utc::now() - chrono::Duration::seconds(3600)),
        )
        .filter(scan_jobs::Column::Id.eq(job_id))
        .exec(db.as_ref())
        .await?;
    Ok(())
}

#[tokio::test]
async fn test_sweep_requeues_stale_job_with_budget_remaining() -> anyhow::Result<()> {
    let db = setup_database().await;
    let service = ScanService::new(db.clone());

    let job = submit_image(&service, &unique_image("stale-requeue")).await;
    strand_job(&db, job.id, ScanStatus::Scanning, 0).await?;

    // max_retries = 2 in the test config, so budget remains
    let worker = test_worker(&db, test_config("worker-sweep-a"));
    worker.sweep_stale_jobs().await?;

    let job = service.get(job.id).await?;
    assert_eq!(job.status, ScanStatus::Pending);
    assert_eq!(job.retry_count, 1);
    assert_eq!(job.error_code.as_deref(), Some("STALE_RECLAIMED"));
    assert_eq!(job.worker_id, None);

    // Same row, continuous audit history: the sweep appended its entry
    let history = service.job_history(job.id).await?;
    let sweep_entry = history.last().expect("audit history");
    assert_eq!(sweep_entry.previous_status, Some(ScanStatus::Scanning));
    assert_eq!(sweep_entry.new_status, ScanStatus::Pending);
    assert_eq!(sweep_entry.triggered_by.as_deref(), Some("sweeper"));

    Ok(())
}

#[tokio::test]
async fn test_sweep_fails_stale_job_with_budget_exhausted() -> anyhow::Result<()> {
    let db = setup_database().await;
    let service = ScanService::new(db.clone());

    let job = submit_image(&service, &unique_image("stale-exhausted")).await;
    strand_job(&db, job.id, ScanStatus::Pulling, 2).await?;

    let worker = test_worker(&db, test_config("worker-sweep-b"));
    worker.sweep_stale_jobs().await?;

    let job = service.get(job.id).await?;
    assert_eq!(job.status, ScanStatus::Failed);
    assert_eq!(job.retry_count, 2, "budget cap is never exceeded");
    assert_eq!(job.error_code.as_deref(), Some("STALE_RECLAIMED"));
    assert!(job.completed_at.is_some());

    Ok(())
}

#[tokio::test]
async fn test_sweep_leaves_fresh_jobs_alone() -> anyhow::Result<()> {
    let db = setup_database().await;
    let service = ScanService::new(db.clone());

    // In-flight but recently updated: not stale
    let job = submit_image(&service, &unique_image("fresh")).await;
    scan_jobs::Entity::update_many()
        .col_expr(scan_jobs::Column::Status, Expr::value(ScanStatus::Scanning))
        .filter(scan_jobs::Column::Id.eq(job.id))
        .exec(db.as_ref())
        .await?;

    let worker = test_worker(&db, test_config("worker-sweep-c"));
    worker.sweep_stale_jobs().await?;

    let job = service.get(job.id).await?;
    assert_eq!(job.status, ScanStatus::Scanning);
    assert_eq!(job.retry_count, 0);

    Ok(())
}
