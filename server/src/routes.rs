use axum::{middleware, routing::get, Router};

use crate::auth::middleware::inject_identity;
use crate::chat::{history, presence};
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Authenticated routes (Bearer JWT, checked by the AuthUser extractor)
    let api_routes = Router::new()
        .route("/api/messages/{id}", get(history::get_message))
        .route("/api/dm/recent", get(history::recent_conversations))
        .route("/api/dm/{user_id}/messages", get(history::direct_history))
        .route(
            "/api/channels/{channel_id}/messages",
            get(history::channel_history),
        )
        .route("/api/presence", get(presence::get_presence));

    // WebSocket endpoint (auth via query param, not JWT header)
    let ws_routes = Router::new().route("/ws", get(ws_handler::ws_upgrade));

    let health = Router::new().route("/health", get(health_check));

    Router::new()
        .merge(api_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(state.clone(), inject_identity))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
