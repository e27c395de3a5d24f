//! Recording fakes shared by the integration tests.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;

use huddle_server::engine::{
    ChannelId, ConnectionId, DeliveryError, Engine, EngineConfig, MessageId, MessageTarget,
    OutboundMessage, PersistedMessage, ServerEvent, Transport, UserId,
};
use huddle_server::store::{
    HistoryPage, HistoryQuery, MessageStore, RecentConversation, StoreError, UserDirectory,
};

/// Parks one call until released. `entered` fires once the call is parked.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

impl Gate {
    async fn pass(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

/// Arm a one-shot gate in `slot`; the next call through it parks.
fn arm(slot: &Mutex<Option<Arc<Gate>>>) -> Arc<Gate> {
    let gate = Arc::new(Gate::default());
    *slot.lock().unwrap() = Some(gate.clone());
    gate
}

fn take(slot: &Mutex<Option<Arc<Gate>>>) -> Option<Arc<Gate>> {
    slot.lock().unwrap().take()
}

/// Transport that records every push and can be told to fail some connections.
#[derive(Default)]
pub struct RecordingTransport {
    pushes: Mutex<Vec<(ConnectionId, ServerEvent)>>,
    failing: Mutex<HashSet<ConnectionId>>,
    gate: Mutex<Option<Arc<Gate>>>,
}

impl RecordingTransport {
    /// Park the next push until the returned gate is released.
    pub fn hold_next_push(&self) -> Arc<Gate> {
        arm(&self.gate)
    }

    pub fn fail(&self, connection_id: ConnectionId) {
        self.failing.lock().unwrap().insert(connection_id);
    }

    pub fn pushes(&self) -> Vec<(ConnectionId, ServerEvent)> {
        self.pushes.lock().unwrap().clone()
    }

    pub fn targets(&self) -> Vec<ConnectionId> {
        self.pushes().into_iter().map(|(id, _)| id).collect()
    }

    pub fn clear(&self) {
        self.pushes.lock().unwrap().clear();
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn push(
        &self,
        connection_id: ConnectionId,
        event: &ServerEvent,
    ) -> Result<(), DeliveryError> {
        if let Some(gate) = take(&self.gate) {
            gate.pass().await;
        }
        self.pushes
            .lock()
            .unwrap()
            .push((connection_id, event.clone()));
        if self.failing.lock().unwrap().contains(&connection_id) {
            return Err(DeliveryError::ConnectionClosed(connection_id));
        }
        Ok(())
    }
}

/// In-memory store and user directory with a switchable write failure.
#[derive(Default)]
pub struct MemoryStore {
    messages: Mutex<Vec<PersistedMessage>>,
    known_users: Mutex<HashSet<UserId>>,
    fail_appends: AtomicBool,
    append_calls: AtomicUsize,
    gate: Mutex<Option<Arc<Gate>>>,
}

impl MemoryStore {
    pub fn with_users(users: &[&str]) -> Self {
        let store = Self::default();
        store
            .known_users
            .lock()
            .unwrap()
            .extend(users.iter().map(|u| UserId::from(*u)));
        store
    }

    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Park the next append until the returned gate is released.
    pub fn hold_next_append(&self) -> Arc<Gate> {
        arm(&self.gate)
    }

    pub fn append_calls(&self) -> usize {
        self.append_calls.load(Ordering::SeqCst)
    }

    pub fn stored(&self) -> Vec<PersistedMessage> {
        self.messages.lock().unwrap().clone()
    }

    /// Messages are kept in append order, so the newest are at the end.
    fn page(&self, keep: impl Fn(&PersistedMessage) -> bool, query: HistoryQuery) -> HistoryPage {
        let limit = query.effective_limit();
        let newest_first: Vec<PersistedMessage> = self
            .stored()
            .into_iter()
            .rev()
            .filter(|m| keep(m))
            .take(limit as usize + 1)
            .collect();
        HistoryPage::from_newest_first(newest_first, limit)
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append_message(
        &self,
        message: &OutboundMessage,
    ) -> Result<PersistedMessage, StoreError> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = take(&self.gate) {
            gate.pass().await;
        }
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("disk full".into()));
        }
        let persisted = PersistedMessage {
            id: MessageId::new(),
            message: message.clone(),
            persisted_at: Utc::now(),
            read: false,
        };
        self.messages.lock().unwrap().push(persisted.clone());
        Ok(persisted)
    }

    async fn get_message(&self, id: MessageId) -> Result<Option<PersistedMessage>, StoreError> {
        Ok(self.stored().into_iter().find(|m| m.id == id))
    }

    async fn direct_history(
        &self,
        a: &UserId,
        b: &UserId,
        query: HistoryQuery,
    ) -> Result<HistoryPage, StoreError> {
        let between = |m: &PersistedMessage| match &m.message.target {
            MessageTarget::Direct { recipient_id } => {
                (&m.message.sender_id == a && recipient_id == b)
                    || (&m.message.sender_id == b && recipient_id == a)
            }
            MessageTarget::Channel { .. } => false,
        };
        Ok(self.page(between, query))
    }

    async fn channel_history(
        &self,
        channel_id: &ChannelId,
        query: HistoryQuery,
    ) -> Result<HistoryPage, StoreError> {
        let in_channel = |m: &PersistedMessage| {
            matches!(&m.message.target, MessageTarget::Channel { channel_id: c } if c == channel_id)
        };
        Ok(self.page(in_channel, query))
    }

    async fn recent_conversations(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<RecentConversation>, StoreError> {
        let mut recent: Vec<RecentConversation> = Vec::new();
        for last_message in self.stored().into_iter().rev() {
            let MessageTarget::Direct { recipient_id } = &last_message.message.target else {
                continue;
            };
            let peer_id = if &last_message.message.sender_id == user_id {
                recipient_id.clone()
            } else if recipient_id == user_id {
                last_message.message.sender_id.clone()
            } else {
                continue;
            };
            if recent.iter().all(|c| c.peer_id != peer_id) {
                recent.push(RecentConversation {
                    peer_id,
                    last_message,
                });
            }
        }
        recent.truncate(limit as usize);
        Ok(recent)
    }

    async fn mark_read(&self, id: MessageId, reader: &UserId) -> Result<bool, StoreError> {
        let mut messages = self.messages.lock().unwrap();
        let Some(message) = messages.iter_mut().find(|m| m.id == id) else {
            return Ok(false);
        };
        let is_recipient = matches!(
            &message.message.target,
            MessageTarget::Direct { recipient_id } if recipient_id == reader
        );
        if !is_recipient || message.read {
            return Ok(false);
        }
        message.read = true;
        Ok(true)
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn is_known_user(&self, user_id: &UserId) -> Result<bool, StoreError> {
        Ok(self.known_users.lock().unwrap().contains(user_id))
    }
}

pub struct Harness {
    pub engine: Arc<Engine>,
    pub store: Arc<MemoryStore>,
    pub transport: Arc<RecordingTransport>,
}

pub fn harness(config: EngineConfig, users: &[&str]) -> Harness {
    let store = Arc::new(MemoryStore::with_users(users));
    let transport = Arc::new(RecordingTransport::default());
    let engine = Arc::new(Engine::new(
        config,
        store.clone(),
        store.clone(),
        transport.clone(),
    ));
    Harness {
        engine,
        store,
        transport,
    }
}
