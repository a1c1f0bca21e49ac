//! Common test utilities for API testing.
//!
//! The fixture runs a full control plane (in-process queues, coordinators,
//! file-backed SQLite) behind the real router, with scripted jobs in place
//! of the configured commands.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use deposit_core::messaging::publish;
use deposit_core::testing::ScriptedResolver;
use deposit_core::{
    create_audit_system, AuditFilter, AuditStore, Config, DepositState, DepositStore,
    OperationMessage, SqliteAuditStore, SqliteStatusStore,
};
use deposit_core::config::DatabaseConfig;
use deposit_server::control::ControlPlane;
use deposit_server::state::AppState;

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct TestFixture {
    pub router: Router,
    pub plane: ControlPlane,
    pub resolver: Arc<ScriptedResolver>,
    pub audit_store: Arc<dyn AuditStore>,
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
    pub text: String,
}

impl TestFixture {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let config = Config {
            database: DatabaseConfig {
                path: db_path.clone(),
                queue_path: temp_dir.path().join("queues.db"),
            },
            ..Default::default()
        };

        let store =
            Arc::new(SqliteStatusStore::new(&db_path).expect("Failed to create status store"));
        let audit_store: Arc<dyn AuditStore> =
            Arc::new(SqliteAuditStore::new(&db_path).expect("Failed to create audit store"));
        let (audit_handle, audit_writer) = create_audit_system(Arc::clone(&audit_store), 100);
        tokio::spawn(audit_writer.run());

        let resolver = Arc::new(ScriptedResolver::new());
        let plane = ControlPlane::build(
            &config,
            Arc::clone(&store),
            resolver.clone(),
            Some(audit_handle),
        )
        .expect("Failed to open message queues");
        plane.start().await.expect("Failed to start control plane");

        let state = Arc::new(AppState::new(
            config,
            store.clone(),
            store,
            Arc::clone(&audit_store),
            Arc::clone(&plane.pipeline),
            Arc::new(plane.pipeline_channel.clone()),
        ));
        let router = deposit_server::api::create_router(state);

        Self {
            router,
            plane,
            resolver,
            audit_store,
            temp_dir,
        }
    }

    /// Submit a registration on the operations channel.
    pub async fn register(&self, deposit_id: &str) {
        let message = OperationMessage::register(deposit_id, "alice", HashMap::new());
        publish(&self.plane.operations, &message)
            .await
            .expect("Failed to publish registration");
    }

    pub async fn wait_for_deposit(&self, deposit_id: &str, expected: DepositState) -> bool {
        let start = Instant::now();
        while start.elapsed() < WAIT_TIMEOUT {
            if self.plane.store.get_state(deposit_id).ok() == Some(expected) {
                return true;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        false
    }

    /// Poll the status endpoint until the pipeline reports `expected`.
    pub async fn wait_for_pipeline(&self, expected: &str) -> bool {
        let start = Instant::now();
        while start.elapsed() < WAIT_TIMEOUT {
            if self.get("/api/v1/pipeline").await.body["state"] == expected {
                return true;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        false
    }

    /// Wait until the audit writer has stored at least `count` events of a type.
    pub async fn wait_for_audit(&self, event_type: &str, count: i64) -> bool {
        let filter = AuditFilter::new().with_event_type(event_type);
        let start = Instant::now();
        while start.elapsed() < WAIT_TIMEOUT {
            if self.audit_store.count(&filter).unwrap_or(0) >= count {
                return true;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        false
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// POST on behalf of `user` (sent in the user header when given).
    pub async fn post_as(&self, path: &str, user: Option<&str>) -> TestResponse {
        self.request("POST", path, user).await
    }

    async fn request(&self, method: &str, path: &str, user: Option<&str>) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(user) = user {
            builder = builder.header(deposit_server::api::pipeline::USER_HEADER, user);
        }
        let request = builder.body(Body::empty()).unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();
        let text = String::from_utf8_lossy(&body_bytes).into_owned();
        let body = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);

        TestResponse { status, body, text }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status, $response.status, $response.text
        );
    };
}
