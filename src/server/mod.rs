use anyhow::{Result, Context};
use axum::{routing::get, Router};
use std::net::SocketAddr;
use tracing::info;

/// Serve the liveness endpoint.
///
/// Returns 200 as long as the process is up, independent of job
/// processing health.
pub async fn serve_health(addr: &str) -> Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .context(format!("Invalid health address: {}", addr))?;

    let app = Router::new().route("/health", get(health));

    info!("Liveness endpoint on http://{}/health", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .context("Health server failed")?;

    Ok(())
}

async fn health() -> &'static str {
    "OK"
}
