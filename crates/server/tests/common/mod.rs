#![allow(dead_code)]

//! Common test utilities for in-process API testing.
//!
//! This module provides a test fixture that builds the full router over
//! in-memory brokers, a temporary SQLite database and the sample topology,
//! so API tests run without external infrastructure.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use pulse_core::{
    create_audit_system,
    testing::{sample_config, sample_topology, SAMPLE_TOPOLOGY_JSON},
    AuditStore, InMemoryConnector, ItemStore, PipelineOrchestrator, SqliteAuditStore,
    SqliteItemStore,
};
use pulse_server::{api::create_router, state::AppState};

/// Test fixture for API testing.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_submit() {
///     let fixture = TestFixture::new().await;
///
///     let response = fixture.post("/api/v1/items", json!({
///         "kind": "sip",
///         "stage": "FC-SIPS"
///     })).await;
///
///     assert_eq!(response.status, 201);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// In-memory brokers behind every alias; switch them offline to
    /// simulate outages
    pub connector: Arc<InMemoryConnector>,
    pub orchestrator: Arc<PipelineOrchestrator>,
    /// Topology document the reload endpoint re-reads
    pub topology_path: PathBuf,
    /// Temporary directory for the database and topology document
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Create a new test fixture with a retry cap of 2.
    pub async fn new() -> Self {
        Self::with_max_attempts(2).await
    }

    pub async fn with_max_attempts(max_attempts: u32) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");
        let topology_path = temp_dir.path().join("topology.json");
        std::fs::write(&topology_path, SAMPLE_TOPOLOGY_JSON)
            .expect("Failed to write topology document");

        let mut config = sample_config(max_attempts);
        config.database.path = db_path.clone();
        config.topology.path = topology_path.clone();

        let audit_store: Arc<dyn AuditStore> = Arc::new(
            SqliteAuditStore::new(&db_path).expect("Failed to create audit store"),
        );
        let item_store: Arc<dyn ItemStore> =
            Arc::new(SqliteItemStore::new(&db_path).expect("Failed to create item store"));

        let (audit_handle, audit_writer) = create_audit_system(Arc::clone(&audit_store), 100);
        tokio::spawn(audit_writer.run());

        let connector = Arc::new(InMemoryConnector::new());
        let orchestrator = Arc::new(
            PipelineOrchestrator::from_config(
                &config,
                sample_topology(),
                connector.clone(),
                item_store,
                Some(audit_handle),
            )
            .expect("Failed to assemble pipeline"),
        );

        let state = Arc::new(AppState::new(
            config,
            Arc::clone(&orchestrator),
            audit_store,
        ));
        let router = create_router(state);

        Self {
            router,
            connector,
            orchestrator,
            topology_path,
            temp_dir,
        }
    }

    /// Work tickets published to the queue behind `stage`.
    pub fn tickets(&self, stage: &str) -> Vec<Value> {
        let topology = self.orchestrator.topology();
        let queue = topology.resolve_queue(stage).expect("stage has a queue");
        self.connector
            .broker(&queue.broker)
            .json_messages(&queue.physical_name)
    }

    /// Let the audit writer drain its channel.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a PUT request with JSON body.
    pub async fn put(&self, path: &str, body: Value) -> TestResponse {
        self.request("PUT", path, Some(body)).await
    }

    /// Send a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// Send a GET request and return the raw text body.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();
        (status, String::from_utf8_lossy(&bytes).to_string())
    }

    /// Send a request to the test server.
    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        self.send(request_builder.body(body).unwrap()).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
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

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
