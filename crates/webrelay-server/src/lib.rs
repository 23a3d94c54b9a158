//! Webrelay Server Library
//!
//! This module exposes the server components for testing and embedding.

pub mod api;
pub mod engine;
pub mod error;
pub mod net;
pub mod sfu;
pub mod state;
pub mod ws;

use anyhow::Result;

/// Create and configure the server application, starting its background tasks
pub async fn create_app(config: state::Config) -> Result<(axum::Router, state::AppState)> {
    let app_state = state::AppState::new(config).await?;
    app_state.spawn_background_tasks();
    let router = api::create_router(app_state.clone());
    Ok((router, app_state))
}
