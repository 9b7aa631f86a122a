use std::sync::Arc;

use async_trait::async_trait;
use hiprelay_server::{AppConfig, AppState, StorageBackend, build_app};
use hiprelay_storage::{DynFlowStore, FlowFields, FlowRecord, FlowStore, StorageError};
use serde_json::Value;
use tokio::task::JoinHandle;

/// A store whose backend is never reachable.
struct UnreachableStore;

#[async_trait]
impl FlowStore for UnreachableStore {
    async fn upsert(&self, _: &str, _: FlowFields) -> Result<FlowRecord, StorageError> {
        Err(StorageError::connection_error("connection refused"))
    }

    async fn merge_by_transaction(
        &self,
        _: &str,
        _: FlowFields,
    ) -> Result<Option<FlowRecord>, StorageError> {
        Err(StorageError::connection_error("connection refused"))
    }

    async fn get(&self, _: &str) -> Result<Option<FlowRecord>, StorageError> {
        Err(StorageError::connection_error("connection refused"))
    }

    async fn ping(&self) -> Result<(), StorageError> {
        Err(StorageError::connection_error("connection refused"))
    }
}

async fn start_server(
    store: DynFlowStore,
) -> (String, tokio::sync::oneshot::Sender<()>, JoinHandle<()>) {
    let mut config = AppConfig::default();
    config.storage.backend = StorageBackend::Memory;
    let app = build_app(AppState::new(config, store).expect("app state"));

    // Bind to an ephemeral port
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await;
    });

    (format!("http://{addr}"), tx, server)
}

#[tokio::test]
async fn server_endpoints_work() {
    let (base, shutdown_tx, handle) = start_server(hiprelay_db_memory::create_flow_store()).await;
    let client = reqwest::Client::new();

    // GET /
    let resp = client.get(format!("{base}/")).send().await.unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["Name"], "HIP M1 SERVER");
    assert_eq!(body["Status"], "Active");

    // GET /healthz
    let resp = client.get(format!("{base}/healthz")).send().await.unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    // GET /readyz
    let resp = client.get(format!("{base}/readyz")).send().await.unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ready");

    // Flow routes live under the API prefix only
    let resp = client
        .post(format!("{base}/fetch-modes"))
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

    let resp = client
        .post(format!("{base}/v1/fetch-modes"))
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn request_id_is_propagated() {
    let (base, shutdown_tx, handle) = start_server(hiprelay_db_memory::create_flow_store()).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{base}/healthz"))
        .header("x-request-id", "req-123")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers()["x-request-id"], "req-123");

    let resp = client.get(format!("{base}/healthz")).send().await.unwrap();
    let generated = resp.headers()["x-request-id"].to_str().unwrap().to_string();
    assert!(uuid::Uuid::parse_str(&generated).is_ok());

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn readyz_reports_unavailable_store() {
    let (base, shutdown_tx, handle) = start_server(Arc::new(UnreachableStore)).await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{base}/readyz")).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

    // Liveness does not depend on the store
    let resp = client.get(format!("{base}/healthz")).send().await.unwrap();
    assert!(resp.status().is_success());

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}
