//! Real-time presence and message fan-out engine.
//!
//! `Engine` is the inbound surface for the transport layer. It is built once
//! by the composition root and shared through `AppState`; nothing here is a
//! process-wide singleton.

pub mod dispatch;
pub mod error;
pub mod membership;
pub mod presence;
pub mod registry;
pub mod transport;
pub mod types;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::store::{MessageStore, UserDirectory};
pub use dispatch::{DeliveryReport, DispatchResult, Dispatcher};
pub use error::{DeliveryError, DispatchError, RegistryError};
pub use membership::MembershipTracker;
pub use presence::{
    spawn_presence_forwarder, EngineEvent, EventHub, PresenceBroadcaster, PresenceSubscriber,
    Subscription, Topic,
};
pub use registry::ConnectionRegistry;
pub use transport::Transport;
pub use types::{
    ChannelId, Connection, ConnectionId, MessageId, MessageKind, MessageTarget, OutboundMessage,
    Payload, PersistedMessage, PresenceStatus, ServerEvent, UserId,
};

/// Membership announcement and disconnect policies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Deliver a user's own join/leave announcement to their connections.
    #[serde(default)]
    pub notify_self: bool,

    /// Drop every channel membership when a user's last connection closes.
    #[serde(default)]
    pub leave_channels_on_disconnect: bool,
}

pub struct Engine {
    config: EngineConfig,
    hub: Arc<EventHub>,
    broadcaster: PresenceBroadcaster,
    registry: Arc<ConnectionRegistry>,
    memberships: Arc<MembershipTracker>,
    dispatcher: Dispatcher,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn MessageStore>,
        users: Arc<dyn UserDirectory>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let hub = Arc::new(EventHub::new());
        let broadcaster = PresenceBroadcaster::new(hub.clone());
        let registry = Arc::new(ConnectionRegistry::new(broadcaster.clone()));
        let memberships = Arc::new(MembershipTracker::new());
        let dispatcher = Dispatcher::new(
            registry.clone(),
            memberships.clone(),
            store,
            users,
            transport,
        );

        Self {
            config,
            hub,
            broadcaster,
            registry,
            memberships,
            dispatcher,
        }
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn memberships(&self) -> &MembershipTracker {
        &self.memberships
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    pub fn subscribe(&self, topic: Topic) -> Subscription {
        self.hub.subscribe(topic)
    }

    /// Register a new session for `user_id` under a fresh connection id.
    pub fn on_connect(&self, user_id: UserId) -> Result<Connection, RegistryError> {
        self.register_connection(user_id, ConnectionId::new())
    }

    /// Register a session whose id the transport already allocated.
    pub fn register_connection(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> Result<Connection, RegistryError> {
        let connection = self.registry.register(user_id, connection_id)?;
        tracing::info!(
            user_id = %connection.user_id,
            connection_id = %connection.connection_id,
            "Connection opened"
        );
        Ok(connection)
    }

    /// Tear down a session. Unknown ids are logged and otherwise ignored.
    pub async fn on_disconnect(&self, connection_id: ConnectionId) -> Option<Connection> {
        let connection = match self.registry.deregister(connection_id) {
            Ok(connection) => connection,
            Err(e) => {
                tracing::warn!(connection_id = %connection_id, error = %e, "Disconnect ignored");
                return None;
            }
        };

        tracing::info!(
            user_id = %connection.user_id,
            connection_id = %connection_id,
            "Connection closed"
        );

        if self.config.leave_channels_on_disconnect {
            // Online state is re-read under the tracker lock so a reconnect
            // racing this disconnect keeps its memberships.
            let user_id = &connection.user_id;
            let left = self
                .memberships
                .leave_all_unless(user_id, || self.registry.is_online(user_id));
            for channel_id in left {
                self.announce_left(&channel_id, user_id).await;
            }
        }
        Some(connection)
    }

    /// Returns `true` if membership changed.
    pub async fn on_join_channel(&self, channel_id: &ChannelId, user_id: &UserId) -> bool {
        if !self.memberships.join(channel_id, user_id) {
            return false;
        }

        let event = self.broadcaster.on_channel_joined(channel_id, user_id);
        let report = self
            .dispatcher
            .announce(channel_id, user_id, self.config.notify_self, &event.to_server_event())
            .await;
        tracing::debug!(
            channel_id = %channel_id,
            user_id = %user_id,
            delivered = report.delivered,
            "Channel joined"
        );
        true
    }

    /// Returns `true` if membership changed.
    pub async fn on_leave_channel(&self, channel_id: &ChannelId, user_id: &UserId) -> bool {
        if !self.memberships.leave(channel_id, user_id) {
            return false;
        }
        self.announce_left(channel_id, user_id).await;
        true
    }

    async fn announce_left(&self, channel_id: &ChannelId, user_id: &UserId) {
        let event = self.broadcaster.on_channel_left(channel_id, user_id);
        let report = self
            .dispatcher
            .announce(channel_id, user_id, self.config.notify_self, &event.to_server_event())
            .await;
        tracing::debug!(
            channel_id = %channel_id,
            user_id = %user_id,
            delivered = report.delivered,
            "Channel left"
        );
    }

    pub async fn on_send_message(
        &self,
        message: OutboundMessage,
    ) -> Result<DispatchResult, DispatchError> {
        self.dispatcher.dispatch(message).await
    }
}
