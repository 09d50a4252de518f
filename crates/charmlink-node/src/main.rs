use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use charmlink_engine::Engine;
use charmlink_engine::hosts::{BackgroundWorker, ForegroundSession};

mod api;
mod config;
mod events;
mod ledger;
mod transport;

use api::{AppState, AppStateInner};
use config::NodeConfig;
use ledger::HttpLedger;
use transport::HttpTransport;

const WORKER_QUEUE: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "charmlink=debug,charmlink_engine=debug,tower_http=debug".into()),
        )
        .init();

    let config = NodeConfig::from_env()?;

    let db = Arc::new(charmlink_db::Database::open(&config.db_path)?);

    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .timeout(Duration::from_secs(30))
        .build()?;
    let ledger = Arc::new(HttpLedger::new(client.clone(), config.ledger_url.clone()));
    let transport = Arc::new(HttpTransport::new(client, config.transport_url.clone()));

    let engine = Engine::new(config.engine.clone(), db, transport, ledger);

    let (worker_tx, worker) = BackgroundWorker::spawn(engine.clone(), WORKER_QUEUE);
    let session = ForegroundSession::start(engine.clone());

    let state: AppState = Arc::new(AppStateInner {
        engine,
        session,
        worker_tx,
    });

    let app = Router::new()
        .route("/conversations/{counterparty}/messages", get(api::get_messages))
        .route("/conversations/{counterparty}/messages", post(api::send_message))
        .route("/conversations/{counterparty}/charms", post(api::send_charm))
        .route("/conversations/{counterparty}/tokens", post(api::send_token))
        .route("/conversations/{counterparty}/open", post(api::open_conversation))
        .route("/conversations/{counterparty}/archive", post(api::archive_conversation))
        .route("/transport/events", post(api::transport_event))
        .route("/events", get(ws_upgrade))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!(
        "Charmlink node for {} listening on {} (ledger {}, transport {})",
        config.engine.username, addr, config.ledger_url, config.transport_url
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.session.teardown().await;
    worker.abort();

    info!("Charmlink node stopped");
    Ok(())
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| events::handle_socket(socket, state))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown requested");
}
