use async_trait::async_trait;
use axum::extract::ws::Message;
use dashmap::DashMap;

use super::ConnectionSender;
use crate::engine::{ConnectionId, DeliveryError, ServerEvent, Transport};

/// Encode an event as a JSON text frame.
pub fn encode_event(event: &ServerEvent) -> Result<Message, serde_json::Error> {
    Ok(Message::Text(serde_json::to_string(event)?.into()))
}

/// Routes engine pushes to the writer task of each live WebSocket.
#[derive(Default)]
pub struct WsTransport {
    senders: DashMap<ConnectionId, ConnectionSender>,
}

impl WsTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, connection_id: ConnectionId, sender: ConnectionSender) {
        self.senders.insert(connection_id, sender);
    }

    pub fn detach(&self, connection_id: ConnectionId) -> bool {
        self.senders.remove(&connection_id).is_some()
    }

    /// Queue an event for one connection without waiting on the socket.
    pub fn send_event(
        &self,
        connection_id: ConnectionId,
        event: &ServerEvent,
    ) -> Result<(), DeliveryError> {
        let sender = self
            .senders
            .get(&connection_id)
            .map(|entry| entry.value().clone())
            .ok_or(DeliveryError::UnknownConnection(connection_id))?;

        sender
            .send(encode_event(event)?)
            .map_err(|_| DeliveryError::ConnectionClosed(connection_id))
    }

    pub fn attached(&self) -> usize {
        self.senders.len()
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn push(
        &self,
        connection_id: ConnectionId,
        event: &ServerEvent,
    ) -> Result<(), DeliveryError> {
        self.send_event(connection_id, event)
    }
}
