//! Message fan-out: validate, persist, resolve recipients, deliver.
//!
//! The store is always written before any push (a message that was seen
//! live is always retrievable from history). Recipients are resolved from a
//! point-in-time snapshot taken after persistence; joins, leaves and
//! disconnects that land during delivery do not affect that dispatch.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use super::error::DispatchError;
use super::membership::MembershipTracker;
use super::registry::ConnectionRegistry;
use super::transport::Transport;
use super::types::{
    ChannelId, ConnectionId, MessageId, MessageTarget, OutboundMessage, ServerEvent, UserId,
};
use crate::store::{MessageStore, UserDirectory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchResult {
    pub persisted_id: MessageId,
    pub delivered_count: usize,
    /// Pushes that failed after persistence. Informational only.
    pub failed_count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    memberships: Arc<MembershipTracker>,
    store: Arc<dyn MessageStore>,
    users: Arc<dyn UserDirectory>,
    transport: Arc<dyn Transport>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        memberships: Arc<MembershipTracker>,
        store: Arc<dyn MessageStore>,
        users: Arc<dyn UserDirectory>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            registry,
            memberships,
            store,
            users,
            transport,
        }
    }

    pub async fn dispatch(&self, message: OutboundMessage) -> Result<DispatchResult, DispatchError> {
        self.validate(&message).await?;

        let persisted = self
            .store
            .append_message(&message)
            .await
            .map_err(DispatchError::Persistence)?;

        let recipients = self.resolve(&persisted.message);
        let persisted_id = persisted.id;
        let event = ServerEvent::Message { message: persisted };
        let report = self.deliver(&recipients, &event).await;

        tracing::debug!(
            message_id = %persisted_id,
            sender_id = %message.sender_id,
            kind = message.kind().as_str(),
            recipients = recipients.len(),
            delivered = report.delivered,
            failed = report.failed,
            "Message dispatched"
        );

        Ok(DispatchResult {
            persisted_id,
            delivered_count: report.delivered,
            failed_count: report.failed,
        })
    }

    async fn validate(&self, message: &OutboundMessage) -> Result<(), DispatchError> {
        if message.payload.is_empty() {
            return Err(DispatchError::EmptyPayload);
        }

        match &message.target {
            MessageTarget::Direct { recipient_id } => {
                let known = self
                    .users
                    .is_known_user(recipient_id)
                    .await
                    .map_err(DispatchError::Directory)?;
                if !known {
                    return Err(DispatchError::UnknownRecipient(recipient_id.clone()));
                }
            }
            MessageTarget::Channel { channel_id } => {
                if !self.memberships.is_member(channel_id, &message.sender_id) {
                    return Err(DispatchError::NotAMember {
                        channel_id: channel_id.clone(),
                        sender_id: message.sender_id.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Live connections that must receive `message`, deduplicated.
    ///
    /// Direct messages go to the recipient and echo to the sender's other
    /// sessions. Channel messages go to every current member.
    pub fn resolve(&self, message: &OutboundMessage) -> BTreeSet<ConnectionId> {
        match &message.target {
            MessageTarget::Direct { recipient_id } => {
                self.connections_of([recipient_id.clone(), message.sender_id.clone()])
            }
            MessageTarget::Channel { channel_id } => {
                self.connections_of(self.memberships.members_of(channel_id))
            }
        }
    }

    /// Push a membership announcement to the channel's live members.
    ///
    /// `actor` is the user who joined or left; they are included only when
    /// `notify_actor` is set, whether or not they are still a member.
    pub async fn announce(
        &self,
        channel_id: &ChannelId,
        actor: &UserId,
        notify_actor: bool,
        event: &ServerEvent,
    ) -> DeliveryReport {
        let mut users = self.memberships.members_of(channel_id);
        users.remove(actor);
        if notify_actor {
            users.insert(actor.clone());
        }

        let recipients = self.connections_of(users);
        self.deliver(&recipients, event).await
    }

    fn connections_of(&self, users: impl IntoIterator<Item = UserId>) -> BTreeSet<ConnectionId> {
        users
            .into_iter()
            .flat_map(|user_id| self.registry.connections_for(&user_id))
            .map(|connection| connection.connection_id)
            .collect()
    }

    /// One push per connection; failures are logged and counted, never raised.
    async fn deliver(
        &self,
        recipients: &BTreeSet<ConnectionId>,
        event: &ServerEvent,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for &connection_id in recipients {
            match self.transport.push(connection_id, event).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        connection_id = %connection_id,
                        error = %e,
                        "Delivery failed"
                    );
                    report.failed += 1;
                }
            }
        }
        report
    }
}
