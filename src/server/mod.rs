//! HTTP surface of the service.

mod response;
mod routes;

use std::net::SocketAddr;

use axum::{
    routing::{get, post},
    Router,
};
use miette::{Context, IntoDiagnostic, Result};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::{clipper::ClipMerger, frame::FrameExtractor};

/// State shared by all the routes.
#[derive(Debug, Clone)]
pub struct AppState {
    pub frames: FrameExtractor,
    pub merger: ClipMerger,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(routes::root))
        .route("/health", get(routes::health))
        .route("/extract-frame", post(routes::extract_frame))
        .route("/clip-and-merge", post(routes::clip_and_merge))
        .with_state(state)
}

/// Serve the API until Ctrl-C is received.
pub async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .into_diagnostic()
        .wrap_err_with(|| format!("Could not listen on {addr}"))?;

    info!("Listening on http://{addr}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .into_diagnostic()
        .wrap_err("Server error")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Could not listen for the shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, finishing in-flight requests");
}
