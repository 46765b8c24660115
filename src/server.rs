//! HTTP front: static browser UI plus the WebSocket push channel, one port.

use std::path::PathBuf;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::StreamExt;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tracing::{info, warn};

use crate::metrics::CpuCollector;
use crate::session::{ConnectionId, Session};

/// Configuration shared by every connection handler.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Time between readings pushed to each client.
    pub sample_period: Duration,
    /// Directory of browser UI files.
    pub assets_dir: PathBuf,
}

/// Build the application router: `/ws` upgrades to the push channel, every
/// other path is served from the assets directory.
pub fn router(config: ServerConfig) -> Router {
    let assets = ServeDir::new(&config.assets_dir);
    Router::new()
        .route("/ws", get(ws_handler))
        .fallback_service(assets)
        .with_state(config)
}

/// Serve until interrupted.
pub async fn run(listener: TcpListener, config: ServerConfig) -> std::io::Result<()> {
    axum::serve(listener, router(config))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn ws_handler(ws: WebSocketUpgrade, State(config): State<ServerConfig>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, config.sample_period))
}

/// Drive one client connection from upgrade to close.
async fn handle_socket(socket: WebSocket, period: Duration) {
    let id = ConnectionId::next();
    info!(conn = %id, "client connected");

    let (sink, mut stream) = socket.split();
    let session = Session::start(id, sink, CpuCollector::new(), period);

    // The core consumes no client messages, but reading the socket is how
    // the transport surfaces close frames and errors.
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    session.stop();
    info!(conn = %session.id(), "client disconnected");
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(e) => {
            warn!(error = %e, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
