use std::{any::Any, net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use hiprelay_storage::{DynFlowStore, StorageError};
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};

use crate::{
    config::{AppConfig, StorageBackend, StorageConfig},
    flows::{self, FlowError, GatewayClient},
    handlers, middleware as app_middleware,
};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: DynFlowStore,
    pub gateway: Arc<GatewayClient>,
}

impl AppState {
    pub fn new(config: AppConfig, store: DynFlowStore) -> Result<Self, FlowError> {
        let gateway = GatewayClient::new(config.gateway.clone())?;
        Ok(Self {
            config: Arc::new(config),
            store,
            gateway: Arc::new(gateway),
        })
    }
}

pub struct HipRelayServer {
    addr: SocketAddr,
    app: Router,
    store: DynFlowStore,
}

pub fn build_app(state: AppState) -> Router {
    let body_limit = state.config.server.body_limit_bytes;
    let prefix = state
        .config
        .server
        .api_prefix
        .trim_end_matches('/')
        .to_string();

    let router = Router::new()
        // Health and info endpoints
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz));

    let router = if prefix.is_empty() {
        router.merge(flows::routes())
    } else {
        router.nest(&prefix, flows::routes())
    };

    // Layers run outermost-first: request id -> cors -> trace -> catch panic -> body limit
    router
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    let req_id = req
                        .extensions()
                        .get::<axum::http::HeaderValue>()
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(app_middleware::request_id))
        .with_state(state)
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic"
    };
    tracing::error!(panic = detail, "Handler panicked");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "An unexpected error occurred" })),
    )
        .into_response()
}

/// Opens the flow store selected by `storage.backend`.
pub async fn create_store(config: &StorageConfig) -> Result<DynFlowStore, StorageError> {
    match config.backend {
        StorageBackend::Postgres => {
            let pg = config.postgres.to_postgres_config();
            let store: DynFlowStore = hiprelay_db_postgres::create_flow_store(pg).await?;
            tracing::info!(
                pool_size = config.postgres.pool_size,
                "PostgreSQL flow store ready"
            );
            Ok(store)
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory flow store; records are lost on restart");
            Ok(hiprelay_db_memory::create_flow_store())
        }
    }
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
    store: Option<DynFlowStore>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
            store: None,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    /// Uses an existing store instead of opening the configured backend.
    pub fn with_store(mut self, store: DynFlowStore) -> Self {
        self.store = Some(store);
        self
    }

    pub async fn build(self) -> anyhow::Result<HipRelayServer> {
        let store = match self.store {
            Some(store) => store,
            None => create_store(&self.config.storage).await?,
        };
        let state = AppState::new(self.config, store.clone())?;
        let app = build_app(state);

        Ok(HipRelayServer {
            addr: self.addr,
            app,
            store,
        })
    }
}

impl HipRelayServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        self.store.close().await;
        tracing::info!("flow store closed");
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_response_is_generic() {
        let response = panic_response(Box::new("boom"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_memory_backend_store() {
        let config = StorageConfig {
            backend: StorageBackend::Memory,
            ..Default::default()
        };
        let store = create_store(&config).await.unwrap();
        assert!(store.ping().await.is_ok());
    }
}
