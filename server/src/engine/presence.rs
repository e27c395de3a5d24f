//! Presence and channel membership events.
//!
//! Events are published on explicit topics instead of an implicit
//! "emit to everyone" primitive, so every consumer is a named subscriber:
//! WebSocket actors forward the `Presence` topic to their client, and
//! external features (contacts, audits) attach a [`PresenceSubscriber`].

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::types::{ChannelId, PresenceStatus, ServerEvent, UserId};

/// Per-topic buffer. Receivers that fall further behind skip events.
const TOPIC_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Global online/offline transitions.
    Presence,
    /// Join/leave announcements for one channel.
    Channel(ChannelId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    UserOnline(UserId),
    UserOffline(UserId),
    ChannelJoined { channel_id: ChannelId, user_id: UserId },
    ChannelLeft { channel_id: ChannelId, user_id: UserId },
}

impl EngineEvent {
    /// Wire form of the event as pushed to a client.
    pub fn to_server_event(&self) -> ServerEvent {
        match self {
            Self::UserOnline(user_id) => ServerEvent::Presence {
                user_id: user_id.clone(),
                status: PresenceStatus::Online,
            },
            Self::UserOffline(user_id) => ServerEvent::Presence {
                user_id: user_id.clone(),
                status: PresenceStatus::Offline,
            },
            Self::ChannelJoined {
                channel_id,
                user_id,
            } => ServerEvent::ChannelJoined {
                channel_id: channel_id.clone(),
                user_id: user_id.clone(),
            },
            Self::ChannelLeft {
                channel_id,
                user_id,
            } => ServerEvent::ChannelLeft {
                channel_id: channel_id.clone(),
                user_id: user_id.clone(),
            },
        }
    }
}

/// Receiving end of one topic.
pub struct Subscription {
    topic: Topic,
    rx: broadcast::Receiver<EngineEvent>,
}

impl Subscription {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Wait for the next event. Returns `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<EngineEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(topic = ?self.topic, skipped, "Subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next buffered event, if any, without waiting.
    pub fn try_recv(&mut self) -> Option<EngineEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

/// Topic registry backing `subscribe` / `publish`.
#[derive(Default)]
pub struct EventHub {
    topics: DashMap<Topic, broadcast::Sender<EngineEvent>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let rx = self
            .topics
            .entry(topic.clone())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe();
        Subscription { topic, rx }
    }

    /// Publish to every current subscriber of `topic`; returns how many
    /// received it. Topics whose subscribers are all gone are dropped.
    pub fn publish(&self, topic: &Topic, event: EngineEvent) -> usize {
        let sent = match self.topics.get(topic) {
            Some(tx) => tx.send(event).ok(),
            None => return 0,
        };

        match sent {
            Some(receivers) => receivers,
            None => {
                self.topics.remove_if(topic, |_, tx| tx.receiver_count() == 0);
                0
            }
        }
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.topics
            .get(topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

/// Turns registry and tracker transitions into hub events.
#[derive(Clone)]
pub struct PresenceBroadcaster {
    hub: Arc<EventHub>,
}

impl PresenceBroadcaster {
    pub fn new(hub: Arc<EventHub>) -> Self {
        Self { hub }
    }

    /// Fired on the offline -> online transition only.
    pub fn on_user_connected(&self, user_id: &UserId) {
        let receivers = self
            .hub
            .publish(&Topic::Presence, EngineEvent::UserOnline(user_id.clone()));
        tracing::info!(user_id = %user_id, receivers, "User online");
    }

    /// Fired on the online -> offline transition only.
    pub fn on_user_disconnected(&self, user_id: &UserId) {
        let receivers = self
            .hub
            .publish(&Topic::Presence, EngineEvent::UserOffline(user_id.clone()));
        tracing::info!(user_id = %user_id, receivers, "User offline");
    }

    pub fn on_channel_joined(&self, channel_id: &ChannelId, user_id: &UserId) -> EngineEvent {
        let event = EngineEvent::ChannelJoined {
            channel_id: channel_id.clone(),
            user_id: user_id.clone(),
        };
        self.hub
            .publish(&Topic::Channel(channel_id.clone()), event.clone());
        event
    }

    pub fn on_channel_left(&self, channel_id: &ChannelId, user_id: &UserId) -> EngineEvent {
        let event = EngineEvent::ChannelLeft {
            channel_id: channel_id.clone(),
            user_id: user_id.clone(),
        };
        self.hub
            .publish(&Topic::Channel(channel_id.clone()), event.clone());
        event
    }
}

/// External consumer of presence transitions (e.g. a contacts list).
pub trait PresenceSubscriber: Send + Sync {
    fn notify_online(&self, user_id: &UserId);
    fn notify_offline(&self, user_id: &UserId);
}

/// Forward the `Presence` topic to `subscriber` until the hub shuts down.
pub fn spawn_presence_forwarder(
    hub: &EventHub,
    subscriber: Arc<dyn PresenceSubscriber>,
) -> JoinHandle<()> {
    let mut subscription = hub.subscribe(Topic::Presence);
    tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            match event {
                EngineEvent::UserOnline(user_id) => subscriber.notify_online(&user_id),
                EngineEvent::UserOffline(user_id) => subscriber.notify_offline(&user_id),
                _ => {}
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_publish_without_subscribers_is_dropped() {
        let hub = EventHub::new();
        let sent = hub.publish(&Topic::Presence, EngineEvent::UserOnline("u1".into()));
        assert_eq!(sent, 0);
    }

    #[test]
    fn test_topics_are_isolated() {
        let hub = EventHub::new();
        let mut general = hub.subscribe(Topic::Channel("general".into()));
        let mut random = hub.subscribe(Topic::Channel("random".into()));

        let event = EngineEvent::ChannelJoined {
            channel_id: "general".into(),
            user_id: "u1".into(),
        };
        assert_eq!(hub.publish(&Topic::Channel("general".into()), event.clone()), 1);

        assert_eq!(general.try_recv(), Some(event));
        assert_eq!(random.try_recv(), None);
    }

    #[test]
    fn test_dropped_subscribers_release_topic() {
        let hub = EventHub::new();
        let sub = hub.subscribe(Topic::Presence);
        assert_eq!(hub.subscriber_count(&Topic::Presence), 1);
        drop(sub);

        hub.publish(&Topic::Presence, EngineEvent::UserOffline("u1".into()));
        assert_eq!(hub.subscriber_count(&Topic::Presence), 0);
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(UserId, bool)>>);

    impl PresenceSubscriber for Recorder {
        fn notify_online(&self, user_id: &UserId) {
            self.0.lock().unwrap().push((user_id.clone(), true));
        }
        fn notify_offline(&self, user_id: &UserId) {
            self.0.lock().unwrap().push((user_id.clone(), false));
        }
    }

    #[tokio::test]
    async fn test_forwarder_calls_subscriber() {
        let hub = Arc::new(EventHub::new());
        let recorder = Arc::new(Recorder::default());
        let handle = spawn_presence_forwarder(&hub, recorder.clone());

        let broadcaster = PresenceBroadcaster::new(hub.clone());
        broadcaster.on_user_connected(&"u1".into());
        broadcaster.on_user_disconnected(&"u1".into());

        for _ in 0..50 {
            if recorder.0.lock().unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        handle.abort();

        let seen = recorder.0.lock().unwrap().clone();
        assert_eq!(seen, vec![("u1".into(), true), ("u1".into(), false)]);
    }
}
