use crate::state::AppState;
use crate::ws;
use axum::{
    http::{header::HeaderName, HeaderValue},
    routing::get,
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

const X_POWERED_BY: HeaderName = HeaderName::from_static("x-powered-by");

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Everything that is not an API route comes from the public directory
    let static_files = ServeDir::new(&state.config.public_dir);

    let powered_by = state
        .config
        .x_powered_by
        .as_deref()
        .and_then(|value| match HeaderValue::from_str(value) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Ignoring invalid X-Powered-By value {:?}: {}", value, e);
                None
            }
        });

    let router = Router::new()
        // Health check
        .route("/health", get(|| async { "OK" }))
        // Signaling and virtual network endpoint
        .route("/websocket", get(ws::handler::ws_handler))
        .fallback_service(static_files)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let router = match powered_by {
        Some(value) => router.layer(SetResponseHeaderLayer::overriding(X_POWERED_BY, value)),
        None => router,
    };

    router.with_state(state)
}
