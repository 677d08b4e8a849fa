//! Scan-job orchestration engine
//!
//! The worker state machine that claims queued scan jobs, pulls the target
//! image, runs the Trivy engine under a hard timeout, normalizes the raw
//! report into findings and aggregates, and records every status transition
//! in the audit ledger. Safe under multiple concurrent worker instances:
//! all coordination goes through conditional status updates in the database.

pub mod config;
pub mod error;
pub mod ledger;
pub mod puller;
pub mod report;
pub mod service;
pub mod trivy;
pub mod worker;

pub use config::WorkerConfig;
pub use error::{ScanError, ScanResult};
pub use ledger::AuditLedger;
pub use puller::{ImagePuller, PulledImage};
pub use report::{normalize_report, NormalizedFinding, NormalizedReport};
pub use service::{
    ScanListFilter, ScanService, ScanServiceError, ScanStatistics, SubmitRequest, TrendPoint,
};
pub use trivy::{ScanOutput, TrivyScanner};
pub use worker::{ScanWorker, WorkerHandle};
