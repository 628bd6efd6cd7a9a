//! HTTP command surface

pub mod api;

use anyhow::{Context, Result};
use axum::Router;
use colored::Colorize;
use log::info;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

pub use api::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(api::api_router())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn serve<F>(state: Arc<AppState>, host: &str, port: u16, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    println!("\n{} meetbot listening on http://{}", "▶".green().bold(), addr);
    println!("   POST /sessions {{\"identity\", \"url\"}}");
    println!("   Press Ctrl+C to stop.\n");
    info!("HTTP surface bound to {}", addr);

    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
