//! Connection registry: which users are online and through which sessions.
//!
//! A user can have multiple concurrent connections (tabs, devices).
//! Lock order is always `by_user` entry, then `by_connection`. Presence
//! events are published while the user's entry is held so online/offline
//! announcements for one user can never be observed out of order.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::error::RegistryError;
use super::presence::PresenceBroadcaster;
use super::types::{Connection, ConnectionId, UserId};

pub struct ConnectionRegistry {
    by_user: DashMap<UserId, Vec<Connection>>,
    by_connection: DashMap<ConnectionId, UserId>,
    presence: PresenceBroadcaster,
}

impl ConnectionRegistry {
    pub fn new(presence: PresenceBroadcaster) -> Self {
        Self {
            by_user: DashMap::new(),
            by_connection: DashMap::new(),
            presence,
        }
    }

    /// Add a live session. Announces the user online if this is their first.
    pub fn register(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> Result<Connection, RegistryError> {
        let mut live = self.by_user.entry(user_id.clone()).or_default();

        let duplicate = match self.by_connection.entry(connection_id) {
            Entry::Occupied(_) => true,
            Entry::Vacant(slot) => {
                slot.insert(user_id.clone());
                false
            }
        };
        if duplicate {
            drop(live);
            self.by_user.remove_if(&user_id, |_, live| live.is_empty());
            return Err(RegistryError::DuplicateConnection(connection_id));
        }

        let connection = Connection {
            connection_id,
            user_id: user_id.clone(),
            created_at: Utc::now(),
        };
        let came_online = live.is_empty();
        live.push(connection.clone());
        if came_online {
            self.presence.on_user_connected(&user_id);
        }

        tracing::debug!(
            user_id = %user_id,
            connection_id = %connection_id,
            connections = live.len(),
            "Connection registered"
        );
        Ok(connection)
    }

    /// Remove a live session. Announces the user offline if it was their last.
    pub fn deregister(&self, connection_id: ConnectionId) -> Result<Connection, RegistryError> {
        let unknown = RegistryError::UnknownConnection(connection_id);
        let user_id = self
            .by_connection
            .get(&connection_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| unknown.clone())?;

        let Entry::Occupied(mut entry) = self.by_user.entry(user_id.clone()) else {
            return Err(unknown);
        };
        // A concurrent deregister of the same id may have won the race.
        if self.by_connection.remove(&connection_id).is_none() {
            return Err(unknown);
        }

        let live = entry.get_mut();
        let position = live
            .iter()
            .position(|c| c.connection_id == connection_id)
            .ok_or(unknown)?;
        let connection = live.swap_remove(position);
        let remaining = live.len();

        if remaining == 0 {
            self.presence.on_user_disconnected(&user_id);
            entry.remove();
        }

        tracing::debug!(
            user_id = %user_id,
            connection_id = %connection_id,
            remaining,
            "Connection deregistered"
        );
        Ok(connection)
    }

    /// Snapshot of the user's live sessions. Empty means offline.
    pub fn connections_for(&self, user_id: &UserId) -> Vec<Connection> {
        self.by_user
            .get(user_id)
            .map(|live| live.value().clone())
            .unwrap_or_default()
    }

    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.by_user
            .get(user_id)
            .is_some_and(|live| !live.is_empty())
    }

    pub fn user_of(&self, connection_id: ConnectionId) -> Option<UserId> {
        self.by_connection
            .get(&connection_id)
            .map(|entry| entry.value().clone())
    }

    /// Snapshot of every user with at least one live connection.
    pub fn online_users(&self) -> Vec<UserId> {
        self.by_user
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.by_connection.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::presence::{EngineEvent, EventHub, Subscription, Topic};
    use std::sync::Arc;

    fn registry() -> (ConnectionRegistry, Subscription) {
        let hub = Arc::new(EventHub::new());
        let sub = hub.subscribe(Topic::Presence);
        (ConnectionRegistry::new(PresenceBroadcaster::new(hub)), sub)
    }

    fn drain(sub: &mut Subscription) -> Vec<EngineEvent> {
        std::iter::from_fn(|| sub.try_recv()).collect()
    }

    #[test]
    fn test_duplicate_connection_rejected() {
        let (registry, _sub) = registry();
        let c1 = ConnectionId::new();
        registry.register("u1".into(), c1).unwrap();

        let err = registry.register("u2".into(), c1).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateConnection(c1));
        assert_eq!(registry.user_of(c1), Some("u1".into()));
        assert!(!registry.is_online(&"u2".into()));
    }

    #[test]
    fn test_deregister_unknown_is_reported() {
        let (registry, _sub) = registry();
        let c1 = ConnectionId::new();
        registry.register("u1".into(), c1).unwrap();
        registry.deregister(c1).unwrap();

        assert_eq!(
            registry.deregister(c1).unwrap_err(),
            RegistryError::UnknownConnection(c1)
        );
    }

    #[test]
    fn test_presence_fires_only_on_edges() {
        let (registry, mut sub) = registry();
        let u1: UserId = "u1".into();
        let (c1, c2) = (ConnectionId::new(), ConnectionId::new());

        registry.register(u1.clone(), c1).unwrap();
        registry.register(u1.clone(), c2).unwrap();
        assert_eq!(drain(&mut sub), vec![EngineEvent::UserOnline(u1.clone())]);

        registry.deregister(c1).unwrap();
        assert!(drain(&mut sub).is_empty());
        assert!(registry.is_online(&u1));

        registry.deregister(c2).unwrap();
        assert_eq!(drain(&mut sub), vec![EngineEvent::UserOffline(u1.clone())]);
        assert!(!registry.is_online(&u1));

        registry.register(u1.clone(), ConnectionId::new()).unwrap();
        assert_eq!(drain(&mut sub), vec![EngineEvent::UserOnline(u1)]);
    }

    #[test]
    fn test_connections_for_is_a_snapshot() {
        let (registry, _sub) = registry();
        let u1: UserId = "u1".into();
        let c1 = ConnectionId::new();
        registry.register(u1.clone(), c1).unwrap();

        let snapshot = registry.connections_for(&u1);
        registry.deregister(c1).unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].connection_id, c1);
        assert!(registry.connections_for(&u1).is_empty());
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn test_concurrent_register_deregister() {
        let (registry, mut sub) = registry();
        let registry = Arc::new(registry);
        let u1: UserId = "u1".into();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                let u1 = u1.clone();
                std::thread::spawn(move || {
                    for _ in 0..20 {
                        let c = ConnectionId::new();
                        registry.register(u1.clone(), c).unwrap();
                        registry.deregister(c).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(!registry.is_online(&u1));
        assert_eq!(registry.connection_count(), 0);

        // Transitions strictly alternate, starting online and ending offline.
        let events = drain(&mut sub);
        assert!(!events.is_empty());
        for (i, event) in events.iter().enumerate() {
            let expected = if i % 2 == 0 {
                EngineEvent::UserOnline(u1.clone())
            } else {
                EngineEvent::UserOffline(u1.clone())
            };
            assert_eq!(event, &expected);
        }
        assert_eq!(events.len() % 2, 0);
    }
}
