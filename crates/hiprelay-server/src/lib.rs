pub mod config;
pub mod flows;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod server;

pub use config::{
    AppConfig, GatewayConfig, LoggingConfig, PostgresStorageConfig, ServerConfig, StorageBackend,
    StorageConfig,
};
pub use flows::{FlowError, FlowStep, GatewayClient};
pub use observability::init_tracing;
pub use server::{AppState, HipRelayServer, ServerBuilder, build_app, create_store};
