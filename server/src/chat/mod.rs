//! REST surface over the engine: message history and presence reads.
//! Writes go through the WebSocket so they share one fan-out path.

pub mod history;
pub mod presence;

use axum::http::StatusCode;

use crate::store::StoreError;

/// Log a store failure and turn it into a 500.
fn internal(e: StoreError) -> StatusCode {
    tracing::error!(error = %e, "Store read failed");
    StatusCode::INTERNAL_SERVER_ERROR
}
