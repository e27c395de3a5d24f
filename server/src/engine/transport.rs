use async_trait::async_trait;

use super::error::DeliveryError;
use super::types::{ConnectionId, ServerEvent};

/// Pushes one event to one live connection. No business logic lives
/// behind this trait; retries, if any, belong to the implementation.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn push(&self, connection_id: ConnectionId, event: &ServerEvent)
        -> Result<(), DeliveryError>;
}
