mod routes;

pub use routes::build_routes;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tokio::signal;
use tracing::info;

use crate::assistant::RetrievalAgent;
use crate::config::Config;
use crate::providers::OllamaClient;
use crate::store::EventStore;
use crate::transcribe::Transcriber;

/// Shared state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: EventStore,
    pub agent: Arc<RetrievalAgent>,
    pub transcriber: Arc<Transcriber>,
    pub start_time: Instant,
    pub version: String,
}

impl AppState {
    pub fn new(config: Config, store: EventStore) -> Self {
        let llm = Arc::new(OllamaClient::new(
            config.assistant.base_url.clone(),
            config.assistant.model.clone(),
            std::time::Duration::from_secs(config.assistant.health_timeout_secs),
        ));
        let agent = Arc::new(RetrievalAgent::new(
            llm,
            store.clone(),
            config.assistant.clone(),
        ));
        let transcriber = Arc::new(Transcriber::new(config.transcription.clone()));

        Self {
            config: Arc::new(config),
            store,
            agent,
            transcriber,
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Run the server until a shutdown signal arrives.
pub async fn serve(config: Config) -> Result<()> {
    let store = EventStore::open(&config.db_path(), config.search.clone())?;
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let state = AppState::new(config, store);

    let app = build_routes(state.clone());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("chronicle v{} listening on {}", state.version, addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("shutdown signal received");
}
