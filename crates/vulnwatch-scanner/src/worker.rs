//! Job poller, claimer and per-job state machine
//!
//! One [`ScanWorker`] is one horizontally-scalable worker instance. It polls
//! for pending jobs on a fixed interval and claims them with a conditional
//! update on `status`, the sole cross-worker serialization point: under N
//! racing claimers exactly one update matches and the losers move on.
//!
//! Claimed jobs run on spawned tasks, bounded by a semaphore, so a
//! long-running scan never blocks the poll loop. Every stage advances the
//! job with the same compare-and-swap discipline; a job reclaimed by the
//! staleness sweep mid-flight simply fails its next CAS and is abandoned
//! here, not overwritten.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use std::sync::Arc;
use tokio::sync::{watch, OnceCell, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vulnwatch_database::DbConnection;
use vulnwatch_entities::types::ScanStatus;
use vulnwatch_entities::{scan_jobs, vulnerability_findings};

use crate::config::{WorkerConfig, MAX_CONSECUTIVE_ERRORS};
use crate::error::{ScanError, ScanResult, STALE_RECLAIMED};
use crate::ledger::AuditLedger;
use crate::puller::{ImagePuller, PulledImage};
use crate::report::{normalize_report, NormalizedReport};
use crate::trivy::{ScanOutput, TrivyScanner};

/// How many pending candidates one claim attempt walks before giving up
/// until the next tick. Losing a CAS race moves to the next oldest job
/// instead of re-polling.
const CLAIM_CANDIDATES: u64 = 5;

/// Actor recorded on transitions made by the staleness sweep.
const SWEEPER: &str = "sweeper";

pub struct ScanWorker {
    db: Arc<DbConnection>,
    config: WorkerConfig,
    puller: ImagePuller,
    scanner: TrivyScanner,
    ledger: AuditLedger,
    slots: Arc<Semaphore>,
    trivy_version: OnceCell<Option<String>>,
}

/// Handle to a running worker. Dropping it signals shutdown too; prefer
/// [`shutdown`](WorkerHandle::shutdown), which waits for the drain.
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal shutdown and wait for the worker to drain in-flight scans.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

impl ScanWorker {
    pub fn new(db: Arc<DbConnection>, docker: Arc<bollard::Docker>, config: WorkerConfig) -> Self {
        let ledger = AuditLedger::new(Arc::clone(&db));
        let scanner = TrivyScanner::new(&config);
        let slots = Arc::new(Semaphore::new(config.concurrency));

        Self {
            db,
            config,
            puller: ImagePuller::new(docker),
            scanner,
            ledger,
            slots,
            trivy_version: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn scanner(&self) -> &TrivyScanner {
        &self.scanner
    }

    /// Spawn the poll loop on the runtime and return a shutdown handle.
    pub fn start(self) -> WorkerHandle {
        let (tx, rx) = watch::channel(false);
        let worker = Arc::new(self);
        let task = tokio::spawn(worker.run(rx));
        WorkerHandle { shutdown: tx, task }
    }

    /// The poll loop: sweep stale jobs, claim pending ones while slots are
    /// free, spawn a pipeline task per claim. Exits on the shutdown signal
    /// or after too many consecutive poll failures.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            worker_id = %self.config.worker_id,
            poll_interval_secs = self.config.poll_interval.as_secs(),
            concurrency = self.config.concurrency,
            "scan worker started"
        );

        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut consecutive_errors: u32 = 0;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(worker_id = %self.config.worker_id, "shutdown requested, no new claims");
                        break;
                    }
                }
                _ = poll.tick() => {
                    // Reap finished pipeline tasks
                    while tasks.try_join_next().is_some() {}

                    match Arc::clone(&self).poll_cycle(&mut tasks).await {
                        Ok(()) => consecutive_errors = 0,
                        Err(err) => {
                            consecutive_errors += 1;
                            error!(
                                error = %err,
                                consecutive_errors,
                                "poll cycle failed"
                            );
                            if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                                error!("too many consecutive poll failures, worker exiting");
                                break;
                            }
                            // Back off so a broken database isn't hammered
                            tokio::time::sleep(self.config.poll_interval * consecutive_errors).await;
                        }
                    }
                }
            }
        }

        self.drain(tasks).await;
        info!(worker_id = %self.config.worker_id, "scan worker stopped");
    }

    async fn poll_cycle(self: Arc<Self>, tasks: &mut JoinSet<()>) -> ScanResult<()> {
        let reclaimed = self.sweep_stale_jobs().await?;
        if reclaimed > 0 {
            info!(reclaimed, "stale jobs reclaimed");
        }

        loop {
            // One slot per in-flight pipeline; stop claiming when full
            let permit = match Arc::clone(&self.slots).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => break,
            };

            match self.claim_next_job().await? {
                Some(job) => {
                    info!(
                        job_id = %job.id,
                        image = %job.full_image_name(),
                        retry_count = job.retry_count,
                        "job claimed"
                    );
                    let worker = Arc::clone(&self);
                    tasks.spawn(async move {
                        let _slot = permit;
                        worker.process_job(job).await;
                    });
                }
                None => break,
            }
        }

        Ok(())
    }

    /// Wait out the shutdown grace period, then abort whatever is left.
    /// Aborted tasks take their scanner subprocesses down with them
    /// (`kill_on_drop`); their jobs stay in-flight in the database for
    /// another worker's staleness sweep.
    async fn drain(&self, mut tasks: JoinSet<()>) {
        if tasks.is_empty() {
            return;
        }

        info!(
            in_flight = tasks.len(),
            grace_secs = self.config.shutdown_grace.as_secs(),
            "draining in-flight scans"
        );

        let deadline = tokio::time::Instant::now() + self.config.shutdown_grace;
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(_)) => continue,
                Ok(None) => return,
                Err(_) => break,
            }
        }

        warn!(
            remaining = tasks.len(),
            "shutdown grace expired, aborting remaining scans"
        );
        tasks.shutdown().await;
    }

    /// Claim the oldest pending job, FIFO by creation time.
    ///
    /// The claim is a conditional `UPDATE ... WHERE id = ? AND status =
    /// 'pending'`: it only succeeds if the row was still pending at write
    /// time, so exactly one of N racing workers wins. Returns `None` when
    /// nothing is eligible.
    pub async fn claim_next_job(&self) -> ScanResult<Option<scan_jobs::Model>> {
        let candidates = scan_jobs::Entity::find()
            .filter(scan_jobs::Column::Status.eq(ScanStatus::Pending))
            .order_by_asc(scan_jobs::Column::CreatedAt)
            .limit(CLAIM_CANDIDATES)
            .all(self.db.as_ref())
            .await?;

        for candidate in candidates {
            let now = Utc::now();
            let claimed = scan_jobs::Entity::update_many()
                .col_expr(scan_jobs::Column::Status, Expr::value(ScanStatus::Pulling))
                .col_expr(
                    scan_jobs::Column::WorkerId,
                    Expr::value(Some(self.config.worker_id.clone())),
                )
                .col_expr(scan_jobs::Column::StartedAt, Expr::value(Some(now)))
                .col_expr(scan_jobs::Column::UpdatedAt, Expr::value(now))
                .filter(scan_jobs::Column::Id.eq(candidate.id))
                .filter(scan_jobs::Column::Status.eq(ScanStatus::Pending))
                .exec(self.db.as_ref())
                .await?;

            if claimed.rows_affected == 0 {
                // Another worker got there first; try the next oldest
                debug!(job_id = %candidate.id, "lost claim race");
                continue;
            }

            self.ledger
                .record_transition(
                    candidate.id,
                    Some(ScanStatus::Pending),
                    ScanStatus::Pulling,
                    Some(format!("Claimed by {}", self.config.worker_id)),
                    None,
                    &self.config.worker_id,
                )
                .await?;

            let job = scan_jobs::Entity::find_by_id(candidate.id)
                .one(self.db.as_ref())
                .await?
                .ok_or_else(|| {
                    ScanError::Internal(format!("job {} vanished after claim", candidate.id))
                })?;

            return Ok(Some(job));
        }

        Ok(None)
    }

    /// Reclaim jobs stuck in an in-flight state past the grace window,
    /// usually left behind by a worker that died mid-scan. With retry
    /// budget remaining the job goes back to `pending`; otherwise it is
    /// forced to `failed`. The same row is mutated either way so the job
    /// keeps one continuous audit history.
    pub async fn sweep_stale_jobs(&self) -> ScanResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.config.stale_after.as_secs() as i64);

        let stuck = scan_jobs::Entity::find()
            .filter(scan_jobs::Column::Status.is_in(ScanStatus::in_flight()))
            .filter(scan_jobs::Column::UpdatedAt.lt(cutoff))
            .all(self.db.as_ref())
            .await?;

        let mut reclaimed = 0;
        for job in stuck {
            let stale_for = self.config.stale_after.as_secs();
            let message = format!(
                "Job stuck in {} for over {stale_for}s (worker {})",
                job.status,
                job.worker_id.as_deref().unwrap_or("unknown")
            );
            let now = Utc::now();

            let (target, update) = if job.retry_count < self.config.retry_budget() {
                (
                    ScanStatus::Pending,
                    scan_jobs::Entity::update_many()
                        .col_expr(scan_jobs::Column::Status, Expr::value(ScanStatus::Pending))
                        .col_expr(
                            scan_jobs::Column::RetryCount,
                            Expr::value(job.retry_count + 1),
                        )
                        .col_expr(
                            scan_jobs::Column::WorkerId,
                            Expr::value(Option::<String>::None),
                        )
                        .col_expr(
                            scan_jobs::Column::ErrorCode,
                            Expr::value(Some(STALE_RECLAIMED.to_string())),
                        )
                        .col_expr(
                            scan_jobs::Column::ErrorMessage,
                            Expr::value(Some(message.clone())),
                        )
                        .col_expr(scan_jobs::Column::UpdatedAt, Expr::value(now)),
                )
            } else {
                (
                    ScanStatus::Failed,
                    scan_jobs::Entity::update_many()
                        .col_expr(scan_jobs::Column::Status, Expr::value(ScanStatus::Failed))
                        .col_expr(
                            scan_jobs::Column::ErrorCode,
                            Expr::value(Some(STALE_RECLAIMED.to_string())),
                        )
                        .col_expr(
                            scan_jobs::Column::ErrorMessage,
                            Expr::value(Some(message.clone())),
                        )
                        .col_expr(scan_jobs::Column::CompletedAt, Expr::value(Some(now)))
                        .col_expr(scan_jobs::Column::UpdatedAt, Expr::value(now)),
                )
            };

            // CAS on the observed status: if the owning worker made progress
            // in the meantime, leave the job alone.
            let result = update
                .filter(scan_jobs::Column::Id.eq(job.id))
                .filter(scan_jobs::Column::Status.eq(job.status))
                .exec(self.db.as_ref())
                .await?;

            if result.rows_affected == 0 {
                continue;
            }

            warn!(
                job_id = %job.id,
                stuck_in = %job.status,
                requeued = (target == ScanStatus::Pending),
                "stale job reclaimed"
            );

            self.ledger
                .record_transition(
                    job.id,
                    Some(job.status),
                    target,
                    Some(message),
                    Some(serde_json::json!({
                        "error_code": STALE_RECLAIMED,
                        "stale_after_secs": stale_for,
                        "abandoned_by": job.worker_id,
                    })),
                    SWEEPER,
                )
                .await?;

            reclaimed += 1;
        }

        Ok(reclaimed)
    }

    /// Drive one claimed job through pull, scan, parse. Stage failures are
    /// persisted by [`handle_stage_failure`](Self::handle_stage_failure);
    /// only database errors escape, and those just get logged; the
    /// staleness sweep picks the job up later.
    pub async fn process_job(self: Arc<Self>, job: scan_jobs::Model) {
        let job_id = job.id;
        if let Err(err) = self.drive(job).await {
            error!(job_id = %job_id, error = %err, "scan pipeline aborted");
        }
    }

    async fn drive(&self, job: scan_jobs::Model) -> ScanResult<()> {
        let image = job.full_image_name();

        // pulling -> scanning
        let pulled = match self.puller.pull(&image).await {
            Ok(pulled) => pulled,
            Err(err) => {
                return self
                    .handle_stage_failure(&job, ScanStatus::Pulling, err, true)
                    .await
            }
        };
        if !self.advance_to_scanning(&job, &pulled).await? {
            return Ok(());
        }

        // scanning -> parsing
        let output = match self.scanner.scan_image(&image).await {
            Ok(output) => output,
            Err(err) => {
                return self
                    .handle_stage_failure(&job, ScanStatus::Scanning, err, false)
                    .await
            }
        };
        if !self.advance_to_parsing(&job, &output).await? {
            return Ok(());
        }

        // parsing -> completed | failed
        match normalize_report(&output.raw) {
            Ok(report) => self.complete_job(&job, &pulled, &output, report).await,
            Err(err) => {
                self.handle_stage_failure(&job, ScanStatus::Parsing, err, false)
                    .await
            }
        }
    }

    /// Returns false when the job was reclaimed out from under us.
    async fn advance_to_scanning(
        &self,
        job: &scan_jobs::Model,
        pulled: &PulledImage,
    ) -> ScanResult<bool> {
        let advanced = scan_jobs::Entity::update_many()
            .col_expr(scan_jobs::Column::Status, Expr::value(ScanStatus::Scanning))
            .col_expr(
                scan_jobs::Column::ImageDigest,
                Expr::value(pulled.digest.clone()),
            )
            .col_expr(
                scan_jobs::Column::PullDuration,
                Expr::value(Some(pulled.duration)),
            )
            .col_expr(scan_jobs::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(scan_jobs::Column::Id.eq(job.id))
            .filter(scan_jobs::Column::Status.eq(ScanStatus::Pulling))
            .exec(self.db.as_ref())
            .await?;

        if advanced.rows_affected == 0 {
            warn!(job_id = %job.id, "job reclaimed during pull, abandoning");
            return Ok(false);
        }

        self.ledger
            .record_transition(
                job.id,
                Some(ScanStatus::Pulling),
                ScanStatus::Scanning,
                Some(format!("Image pulled in {:.1}s", pulled.duration)),
                pulled
                    .digest
                    .as_ref()
                    .map(|digest| serde_json::json!({ "digest": digest })),
                &self.config.worker_id,
            )
            .await?;

        Ok(true)
    }

    /// Persists the raw report before parsing starts, so a malformed
    /// payload is still on the row for diagnosis afterwards.
    async fn advance_to_parsing(
        &self,
        job: &scan_jobs::Model,
        output: &ScanOutput,
    ) -> ScanResult<bool> {
        // Unparsable output still gets preserved, as a JSON string
        let raw_json = serde_json::from_str::<serde_json::Value>(&output.raw)
            .unwrap_or_else(|_| serde_json::Value::String(output.raw.clone()));

        let trivy_version = self
            .trivy_version
            .get_or_init(|| async { self.scanner.version().await })
            .await
            .clone();

        let advanced = scan_jobs::Entity::update_many()
            .col_expr(scan_jobs::Column::Status, Expr::value(ScanStatus::Parsing))
            .col_expr(scan_jobs::Column::RawReport, Expr::value(Some(raw_json)))
            .col_expr(
                scan_jobs::Column::ScanDuration,
                Expr::value(Some(output.duration)),
            )
            .col_expr(scan_jobs::Column::TrivyVersion, Expr::value(trivy_version))
            .col_expr(scan_jobs::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(scan_jobs::Column::Id.eq(job.id))
            .filter(scan_jobs::Column::Status.eq(ScanStatus::Scanning))
            .exec(self.db.as_ref())
            .await?;

        if advanced.rows_affected == 0 {
            warn!(job_id = %job.id, "job reclaimed during scan, abandoning");
            return Ok(false);
        }

        self.ledger
            .record_transition(
                job.id,
                Some(ScanStatus::Scanning),
                ScanStatus::Parsing,
                Some(format!("Scanner finished in {:.1}s", output.duration)),
                None,
                &self.config.worker_id,
            )
            .await?;

        Ok(true)
    }

    /// Persist findings and the completed job record in one transaction:
    /// either all findings land and the job is `completed`, or nothing
    /// changes.
    async fn complete_job(
        &self,
        job: &scan_jobs::Model,
        pulled: &PulledImage,
        output: &ScanOutput,
        report: NormalizedReport,
    ) -> ScanResult<()> {
        let counts = report.counts;
        let risk_score = counts.risk_score(&self.config.risk_weights);
        let compliance_status = counts.compliance_status();
        let is_compliant = counts.is_compliant();
        // The daemon-resolved digest wins; the report's is the fallback
        let digest = pulled.digest.clone().or_else(|| report.image_digest.clone());
        let now = Utc::now();

        let txn = self.db.begin().await?;

        let updated = scan_jobs::Entity::update_many()
            .col_expr(scan_jobs::Column::Status, Expr::value(ScanStatus::Completed))
            .col_expr(scan_jobs::Column::ImageDigest, Expr::value(digest))
            .col_expr(
                scan_jobs::Column::CriticalCount,
                Expr::value(counts.critical),
            )
            .col_expr(scan_jobs::Column::HighCount, Expr::value(counts.high))
            .col_expr(scan_jobs::Column::MediumCount, Expr::value(counts.medium))
            .col_expr(scan_jobs::Column::LowCount, Expr::value(counts.low))
            .col_expr(scan_jobs::Column::UnknownCount, Expr::value(counts.unknown))
            .col_expr(
                scan_jobs::Column::TotalVulnerabilities,
                Expr::value(report.total()),
            )
            .col_expr(
                scan_jobs::Column::FixableCount,
                Expr::value(report.fixable_count),
            )
            .col_expr(
                scan_jobs::Column::UnfixableCount,
                Expr::value(report.unfixable_count),
            )
            .col_expr(scan_jobs::Column::RiskScore, Expr::value(risk_score))
            .col_expr(
                scan_jobs::Column::MaxCvssScore,
                Expr::value(report.max_cvss_score),
            )
            .col_expr(
                scan_jobs::Column::AvgCvssScore,
                Expr::value(report.avg_cvss_score),
            )
            .col_expr(scan_jobs::Column::IsCompliant, Expr::value(is_compliant))
            .col_expr(
                scan_jobs::Column::ComplianceStatus,
                Expr::value(compliance_status),
            )
            .col_expr(
                scan_jobs::Column::ErrorCode,
                Expr::value(Option::<String>::None),
            )
            .col_expr(
                scan_jobs::Column::ErrorMessage,
                Expr::value(Option::<String>::None),
            )
            .col_expr(scan_jobs::Column::CompletedAt, Expr::value(Some(now)))
            .col_expr(scan_jobs::Column::UpdatedAt, Expr::value(now))
            .filter(scan_jobs::Column::Id.eq(job.id))
            .filter(scan_jobs::Column::Status.eq(ScanStatus::Parsing))
            .exec(&txn)
            .await?;

        if updated.rows_affected == 0 {
            txn.rollback().await?;
            warn!(job_id = %job.id, "job reclaimed during parsing, abandoning");
            return Ok(());
        }

        if !report.findings.is_empty() {
            let rows: Vec<vulnerability_findings::ActiveModel> = report
                .findings
                .iter()
                .map(|finding| vulnerability_findings::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    scan_job_id: Set(job.id),
                    vulnerability_id: Set(finding.vulnerability_id.clone()),
                    package_name: Set(finding.package_name.clone()),
                    installed_version: Set(finding.installed_version.clone()),
                    fixed_version: Set(finding.fixed_version.clone()),
                    severity: Set(finding.severity),
                    cvss_score: Set(finding.cvss_score),
                    is_fixable: Set(finding.is_fixable),
                    title: Set(finding.title.clone()),
                    primary_url: Set(finding.primary_url.clone()),
                    published_date: Set(finding.published_date),
                    created_at: Set(now),
                })
                .collect();

            vulnerability_findings::Entity::insert_many(rows)
                .exec(&txn)
                .await?;
        }

        AuditLedger::record_transition_on(
            &txn,
            job.id,
            Some(ScanStatus::Parsing),
            ScanStatus::Completed,
            Some(format!(
                "Scan completed: {} vulnerabilities, risk score {risk_score}",
                report.total()
            )),
            Some(serde_json::json!({
                "critical": counts.critical,
                "high": counts.high,
                "medium": counts.medium,
                "low": counts.low,
                "unknown": counts.unknown,
                "fixable": report.fixable_count,
                "risk_score": risk_score,
                "compliance_status": compliance_status.as_str(),
            })),
            &self.config.worker_id,
        )
        .await?;

        txn.commit().await?;

        info!(
            job_id = %job.id,
            image = %job.full_image_name(),
            total = report.total(),
            critical = counts.critical,
            high = counts.high,
            risk_score,
            compliance = %compliance_status,
            scan_secs = format!("{:.1}", output.duration),
            "scan completed"
        );

        Ok(())
    }

    /// Record a stage failure. Transient pull failures requeue to `pending`
    /// while retry budget remains; everything else goes to `failed`, with
    /// `retry_count` incremented for the retryable kinds so the budget
    /// accounting survives re-submission.
    async fn handle_stage_failure(
        &self,
        job: &scan_jobs::Model,
        phase: ScanStatus,
        err: ScanError,
        allow_requeue: bool,
    ) -> ScanResult<()> {
        let budget = self.config.retry_budget();
        let retryable = err.is_retryable();
        let code = err.error_code();
        let message = err.to_string();
        let now = Utc::now();

        if allow_requeue && retryable && job.retry_count < budget {
            let attempt = job.retry_count + 1;
            let requeued = scan_jobs::Entity::update_many()
                .col_expr(scan_jobs::Column::Status, Expr::value(ScanStatus::Pending))
                .col_expr(scan_jobs::Column::RetryCount, Expr::value(attempt))
                .col_expr(
                    scan_jobs::Column::WorkerId,
                    Expr::value(Option::<String>::None),
                )
                .col_expr(
                    scan_jobs::Column::ErrorCode,
                    Expr::value(Some(code.to_string())),
                )
                .col_expr(
                    scan_jobs::Column::ErrorMessage,
                    Expr::value(Some(message.clone())),
                )
                .col_expr(scan_jobs::Column::UpdatedAt, Expr::value(now))
                .filter(scan_jobs::Column::Id.eq(job.id))
                .filter(scan_jobs::Column::Status.eq(phase))
                .exec(self.db.as_ref())
                .await?;

            if requeued.rows_affected == 0 {
                warn!(job_id = %job.id, "job reclaimed during {phase}, abandoning");
                return Ok(());
            }

            warn!(
                job_id = %job.id,
                error_code = code,
                error = %message,
                attempt,
                budget,
                "transient failure, job requeued"
            );

            self.ledger
                .record_transition(
                    job.id,
                    Some(phase),
                    ScanStatus::Pending,
                    Some(format!("{message} (retry {attempt}/{budget})")),
                    Some(serde_json::json!({
                        "error_code": code,
                        "retry_count": attempt,
                    })),
                    &self.config.worker_id,
                )
                .await?;

            return Ok(());
        }

        let retry_count = if retryable {
            (job.retry_count + 1).min(budget)
        } else {
            job.retry_count
        };

        let failed = scan_jobs::Entity::update_many()
            .col_expr(scan_jobs::Column::Status, Expr::value(ScanStatus::Failed))
            .col_expr(scan_jobs::Column::RetryCount, Expr::value(retry_count))
            .col_expr(
                scan_jobs::Column::ErrorCode,
                Expr::value(Some(code.to_string())),
            )
            .col_expr(
                scan_jobs::Column::ErrorMessage,
                Expr::value(Some(message.clone())),
            )
            .col_expr(scan_jobs::Column::CompletedAt, Expr::value(Some(now)))
            .col_expr(scan_jobs::Column::UpdatedAt, Expr::value(now))
            .filter(scan_jobs::Column::Id.eq(job.id))
            .filter(scan_jobs::Column::Status.eq(phase))
            .exec(self.db.as_ref())
            .await?;

        if failed.rows_affected == 0 {
            warn!(job_id = %job.id, "job reclaimed during {phase}, abandoning");
            return Ok(());
        }

        error!(
            job_id = %job.id,
            image = %job.full_image_name(),
            error_code = code,
            error = %message,
            retry_count,
            "scan failed"
        );

        self.ledger
            .record_transition(
                job.id,
                Some(phase),
                ScanStatus::Failed,
                Some(message),
                Some(serde_json::json!({
                    "error_code": code,
                    "retryable": retryable,
                    "retry_count": retry_count,
                })),
                &self.config.worker_id,
            )
            .await?;

        Ok(())
    }
}
