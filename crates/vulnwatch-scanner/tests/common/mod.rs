#![allow(dead_code)]

//! Shared setup for the scanner integration tests.
//!
//! One Postgres testcontainer per test binary; tests in the same binary
//! share the schema and isolate themselves through unique image names, so
//! they can run in parallel without truncating each other's rows.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use uuid::Uuid;
use vulnwatch_database::test_utils::TestDatabase;
use vulnwatch_database::DbConnection;
use vulnwatch_entities::scan_jobs;
use vulnwatch_scanner::{ScanService, ScanWorker, SubmitRequest, WorkerConfig};

static DB: OnceCell<TestDatabase> = OnceCell::const_new();

pub async fn setup_database() -> Arc<DbConnection> {
    let db = DB
        .get_or_init(|| async {
            TestDatabase::with_migrations()
                .await
                .expect("failed to start test database")
        })
        .await;
    db.connection_arc()
}

pub fn test_config(worker_id: &str) -> WorkerConfig {
    WorkerConfig {
        worker_id: worker_id.to_string(),
        poll_interval: Duration::from_millis(100),
        max_retries: 2,
        ..Default::default()
    }
}

pub fn test_worker(db: &Arc<DbConnection>, config: WorkerConfig) -> ScanWorker {
    let docker = Arc::new(
        bollard::Docker::connect_with_local_defaults().expect("failed to connect to docker"),
    );
    ScanWorker::new(Arc::clone(db), docker, config)
}

/// Image name no other test will touch, so parallel tests never race on
/// the same job rows.
pub fn unique_image(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

pub async fn submit_image(service: &ScanService, image: &str) -> scan_jobs::Model {
    service
        .submit(SubmitRequest {
            image: image.to_string(),
            requested_by: Some("test".to_string()),
            ..Default::default()
        })
        .await
        .expect("submit failed")
}

/// Write an executable stub that stands in for the trivy binary.
pub fn stub_scanner(dir: &tempfile::TempDir, script: &str) -> String {
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    let path = dir.path().join("fake-trivy");
    let mut file = std::fs::File::create(&path).expect("create stub");
    writeln!(file, "#!/bin/sh").expect("write stub");
    writeln!(file, "{script}").expect("write stub");
    drop(file);
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod stub");
    path.to_string_lossy().into_owned()
}
