use sea_orm_migration::prelude::*;

/// Initial schema: scan_jobs, vulnerability_findings, scan_audit_logs.
#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Create scan_jobs table
        manager
            .create_table(
                Table::create()
                    .table(ScanJobs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ScanJobs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ScanJobs::IdempotencyKey).string().null())
                    .col(ColumnDef::new(ScanJobs::ImageName).string().not_null())
                    .col(ColumnDef::new(ScanJobs::ImageTag).string().not_null())
                    .col(ColumnDef::new(ScanJobs::Registry).string().not_null())
                    .col(ColumnDef::new(ScanJobs::ImageDigest).string().null())
                    .col(ColumnDef::new(ScanJobs::Status).text().not_null())
                    .col(ColumnDef::new(ScanJobs::ErrorCode).string().null())
                    .col(ColumnDef::new(ScanJobs::ErrorMessage).text().null())
                    .col(
                        ColumnDef::new(ScanJobs::RetryCount)
                            .integer()
                            .not_null()
                            .default(0)
                            .check(
                                Expr::col(ScanJobs::RetryCount)
                                    .gte(0)
                                    .and(Expr::col(ScanJobs::RetryCount).lte(10)),
                            ),
                    )
                    .col(ColumnDef::new(ScanJobs::RawReport).json_binary().null())
                    .col(
                        ColumnDef::new(ScanJobs::CriticalCount)
                            .integer()
                            .not_null()
                            .default(0)
                            .check(Expr::col(ScanJobs::CriticalCount).gte(0)),
                    )
                    .col(
                        ColumnDef::new(ScanJobs::HighCount)
                            .integer()
                            .not_null()
                            .default(0)
                            .check(Expr::col(ScanJobs::HighCount).gte(0)),
                    )
                    .col(
                        ColumnDef::new(ScanJobs::MediumCount)
                            .integer()
                            .not_null()
                            .default(0)
                            .check(Expr::col(ScanJobs::MediumCount).gte(0)),
                    )
                    .col(
                        ColumnDef::new(ScanJobs::LowCount)
                            .integer()
                            .not_null()
                            .default(0)
                            .check(Expr::col(ScanJobs::LowCount).gte(0)),
                    )
                    .col(
                        ColumnDef::new(ScanJobs::UnknownCount)
                            .integer()
                            .not_null()
                            .default(0)
                            .check(Expr::col(ScanJobs::UnknownCount).gte(0)),
                    )
                    .col(
                        ColumnDef::new(ScanJobs::TotalVulnerabilities)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ScanJobs::FixableCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ScanJobs::UnfixableCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ScanJobs::RiskScore)
                            .integer()
                            .not_null()
                            .default(0)
                            .check(Expr::col(ScanJobs::RiskScore).gte(0)),
                    )
                    .col(ColumnDef::new(ScanJobs::MaxCvssScore).double().null())
                    .col(ColumnDef::new(ScanJobs::AvgCvssScore).double().null())
                    .col(
                        ColumnDef::new(ScanJobs::IsCompliant)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(ScanJobs::ComplianceStatus)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ScanJobs::PullDuration).double().null())
                    .col(ColumnDef::new(ScanJobs::ScanDuration).double().null())
                    .col(ColumnDef::new(ScanJobs::WorkerId).string().null())
                    .col(ColumnDef::new(ScanJobs::TrivyVersion).string().null())
                    .col(
                        ColumnDef::new(ScanJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ScanJobs::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ScanJobs::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ScanJobs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Worker pickup: oldest pending job first
        manager
            .create_index(
                Index::create()
                    .name("idx_scan_jobs_pending_queue")
                    .table(ScanJobs::Table)
                    .col(ScanJobs::Status)
                    .col(ScanJobs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        // Historical trend queries per image
        manager
            .create_index(
                Index::create()
                    .name("idx_scan_jobs_image_history")
                    .table(ScanJobs::Table)
                    .col(ScanJobs::ImageName)
                    .col(ScanJobs::ImageTag)
                    .col(ScanJobs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        // Compliance dashboard filters
        manager
            .create_index(
                Index::create()
                    .name("idx_scan_jobs_compliance_filter")
                    .table(ScanJobs::Table)
                    .col(ScanJobs::IsCompliant)
                    .col(ScanJobs::CriticalCount)
                    .col(ScanJobs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        // Correlation lookups; intentionally NOT unique
        manager
            .create_index(
                Index::create()
                    .name("idx_scan_jobs_idempotency_key")
                    .table(ScanJobs::Table)
                    .col(ScanJobs::IdempotencyKey)
                    .to_owned(),
            )
            .await?;

        // Create vulnerability_findings table
        manager
            .create_table(
                Table::create()
                    .table(VulnerabilityFindings::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(VulnerabilityFindings::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(VulnerabilityFindings::ScanJobId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(VulnerabilityFindings::VulnerabilityId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(VulnerabilityFindings::PackageName)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(VulnerabilityFindings::InstalledVersion)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(VulnerabilityFindings::FixedVersion)
                            .string()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(VulnerabilityFindings::Severity)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(VulnerabilityFindings::CvssScore)
                            .double()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(VulnerabilityFindings::IsFixable)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(VulnerabilityFindings::Title).string().null())
                    .col(
                        ColumnDef::new(VulnerabilityFindings::PrimaryUrl)
                            .string()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(VulnerabilityFindings::PublishedDate)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(VulnerabilityFindings::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_vulnerability_findings_scan_job")
                            .from(
                                VulnerabilityFindings::Table,
                                VulnerabilityFindings::ScanJobId,
                            )
                            .to(ScanJobs::Table, ScanJobs::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // One finding per (job, CVE, package)
        manager
            .create_index(
                Index::create()
                    .name("idx_findings_job_cve_package")
                    .table(VulnerabilityFindings::Table)
                    .col(VulnerabilityFindings::ScanJobId)
                    .col(VulnerabilityFindings::VulnerabilityId)
                    .col(VulnerabilityFindings::PackageName)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // CVE impact analysis: which jobs carry a given CVE
        manager
            .create_index(
                Index::create()
                    .name("idx_findings_cve_lookup")
                    .table(VulnerabilityFindings::Table)
                    .col(VulnerabilityFindings::VulnerabilityId)
                    .col(VulnerabilityFindings::Severity)
                    .to_owned(),
            )
            .await?;

        // Create scan_audit_logs table
        manager
            .create_table(
                Table::create()
                    .table(ScanAuditLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ScanAuditLogs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ScanAuditLogs::ScanJobId).uuid().not_null())
                    .col(ColumnDef::new(ScanAuditLogs::PreviousStatus).text().null())
                    .col(ColumnDef::new(ScanAuditLogs::NewStatus).text().not_null())
                    .col(ColumnDef::new(ScanAuditLogs::Message).text().null())
                    .col(ColumnDef::new(ScanAuditLogs::Detail).json_binary().null())
                    .col(ColumnDef::new(ScanAuditLogs::TriggeredBy).string().null())
                    .col(
                        ColumnDef::new(ScanAuditLogs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_scan_audit_logs_scan_job")
                            .from(ScanAuditLogs::Table, ScanAuditLogs::ScanJobId)
                            .to(ScanJobs::Table, ScanJobs::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Forensic timeline per job
        manager
            .create_index(
                Index::create()
                    .name("idx_audit_scan_timeline")
                    .table(ScanAuditLogs::Table)
                    .col(ScanAuditLogs::ScanJobId)
                    .col(ScanAuditLogs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ScanAuditLogs::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(VulnerabilityFindings::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ScanJobs::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum ScanJobs {
    Table,
    Id,
    IdempotencyKey,
    ImageName,
    ImageTag,
    Registry,
    ImageDigest,
    Status,
    ErrorCode,
    ErrorMessage,
    RetryCount,
    RawReport,
    CriticalCount,
    HighCount,
    MediumCount,
    LowCount,
    UnknownCount,
    TotalVulnerabilities,
    FixableCount,
    UnfixableCount,
    RiskScore,
    MaxCvssScore,
    AvgCvssScore,
    IsCompliant,
    ComplianceStatus,
    PullDuration,
    ScanDuration,
    WorkerId,
    TrivyVersion,
    CreatedAt,
    StartedAt,
    CompletedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum VulnerabilityFindings {
    Table,
    Id,
    ScanJobId,
    VulnerabilityId,
    PackageName,
    InstalledVersion,
    FixedVersion,
    Severity,
    CvssScore,
    IsFixable,
    Title,
    PrimaryUrl,
    PublishedDate,
    CreatedAt,
}

#[derive(DeriveIden)]
enum ScanAuditLogs {
    Table,
    Id,
    ScanJobId,
    PreviousStatus,
    NewStatus,
    Message,
    Detail,
    TriggeredBy,
    CreatedAt,
}
