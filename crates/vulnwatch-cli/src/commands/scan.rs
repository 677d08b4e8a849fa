use clap::Args;
use colored::Colorize;
use std::time::Duration;
use vulnwatch_database::establish_connection;
use vulnwatch_entities::types::{ComplianceStatus, ScanStatus};
use vulnwatch_scanner::{ScanService, ScanServiceError, SubmitRequest};

/// Submit one image and wait for a running worker to finish it.
#[derive(Args)]
pub struct ScanCommand {
    /// Image reference (nginx, nginx:1.24, gcr.io/project/image:v1, ...)
    pub image: String,

    /// Explicit tag, wins over one embedded in the reference
    #[arg(long)]
    pub tag: Option<String>,

    /// Explicit registry, wins over one embedded in the reference
    #[arg(long)]
    pub registry: Option<String>,

    /// Submit even when a scan for this image is already in flight
    #[arg(long)]
    pub force: bool,

    /// Database connection URL
    #[arg(long, env = "VULNWATCH_DATABASE_URL")]
    pub database_url: String,

    /// Give up waiting after this many seconds
    #[arg(long, default_value_t = 900)]
    pub wait_timeout: u64,
}

impl ScanCommand {
    pub async fn execute(self) -> anyhow::Result<()> {
        let db = establish_connection(&self.database_url).await?;
        let service = ScanService::new(db);

        let job = match service
            .submit(SubmitRequest {
                image: self.image.clone(),
                tag: self.tag.clone(),
                registry: self.registry.clone(),
                force_rescan: self.force,
                requested_by: Some("cli".to_string()),
            })
            .await
        {
            Ok(job) => job,
            Err(ScanServiceError::JobInProgress { job_id }) => {
                anyhow::bail!(
                    "a scan for this image is already in progress (job {job_id}); \
                     pass --force to start another"
                );
            }
            Err(err) => return Err(err.into()),
        };

        println!(
            "Submitted {} as job {}",
            job.full_image_name().bright_white().bold(),
            job.id.to_string().bright_blue()
        );
        println!("Waiting for a worker to pick it up...");

        let deadline = tokio::time::Instant::now() + Duration::from_secs(self.wait_timeout);
        let mut last_status = job.status;
        let job = loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!(
                    "timed out after {}s waiting for job {} (last status: {}); \
                     is a worker running?",
                    self.wait_timeout,
                    job.id,
                    last_status
                );
            }
            tokio::time::sleep(Duration::from_secs(2)).await;

            let current = service.get(job.id).await?;
            if current.status != last_status {
                println!("  {} -> {}", last_status, current.status.to_string().cyan());
                last_status = current.status;
            }
            if current.is_terminal() {
                break current;
            }
        };

        println!();
        if job.status == ScanStatus::Failed {
            println!(
                "{} {} ({})",
                "Scan failed:".bright_red().bold(),
                job.error_message.as_deref().unwrap_or("unknown error"),
                job.error_code.as_deref().unwrap_or("UNKNOWN")
            );
            std::process::exit(1);
        }

        let compliance = match job.compliance_status {
            ComplianceStatus::Compliant => "compliant".bright_green(),
            ComplianceStatus::PendingReview => "pending review".yellow(),
            ComplianceStatus::NonCompliant => "NON-COMPLIANT".bright_red().bold(),
        };

        println!("{}", "Scan completed.".bright_green().bold());
        println!(
            "  Vulnerabilities: {} total ({} critical, {} high, {} medium, {} low, {} unknown)",
            job.total_vulnerabilities,
            job.critical_count.to_string().bright_red(),
            job.high_count.to_string().red(),
            job.medium_count.to_string().yellow(),
            job.low_count,
            job.unknown_count
        );
        println!(
            "  Fixable: {} / {}",
            job.fixable_count, job.total_vulnerabilities
        );
        println!("  Risk score: {}", job.risk_score.to_string().bold());
        if let Some(max_cvss) = job.max_cvss_score {
            println!("  Max CVSS: {max_cvss:.1}");
        }
        println!("  Compliance: {compliance}");

        let findings = service.job_findings(job.id).await?;
        if !findings.is_empty() {
            println!();
            println!("  Top findings:");
            for finding in findings.iter().take(10) {
                println!(
                    "    {} {} {} ({} -> {})",
                    format!("[{}]", finding.severity).red(),
                    finding.vulnerability_id.bright_white(),
                    finding.package_name,
                    finding.installed_version,
                    finding.fixed_version.as_deref().unwrap_or("no fix")
                );
            }
            if findings.len() > 10 {
                println!("    ... and {} more", findings.len() - 10);
            }
        }

        Ok(())
    }
}
