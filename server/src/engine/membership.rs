//! Channel membership tracker.
//!
//! Membership is logical and independent of connectivity: a user may join a
//! channel while offline and stays a member across reconnects. Both index
//! directions sit behind one lock so they never disagree.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::types::{ChannelId, UserId};

#[derive(Debug, Default)]
struct Memberships {
    members: HashMap<ChannelId, HashSet<UserId>>,
    channels: HashMap<UserId, HashSet<ChannelId>>,
}

impl Memberships {
    fn remove(&mut self, channel_id: &ChannelId, user_id: &UserId) -> bool {
        let Some(members) = self.members.get_mut(channel_id) else {
            return false;
        };
        if !members.remove(user_id) {
            return false;
        }
        if members.is_empty() {
            self.members.remove(channel_id);
        }

        if let Some(channels) = self.channels.get_mut(user_id) {
            channels.remove(channel_id);
            if channels.is_empty() {
                self.channels.remove(user_id);
            }
        }
        true
    }
}

#[derive(Debug, Default)]
pub struct MembershipTracker {
    inner: RwLock<Memberships>,
}

impl MembershipTracker {
    pub fn new() -> Self {
        Self::default()
    }

    // Critical sections never panic midway, so a poisoned lock still holds
    // consistent data.
    fn read(&self) -> RwLockReadGuard<'_, Memberships> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Memberships> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `true` if the user was not already a member.
    pub fn join(&self, channel_id: &ChannelId, user_id: &UserId) -> bool {
        let mut state = self.write();
        let added = state
            .members
            .entry(channel_id.clone())
            .or_default()
            .insert(user_id.clone());
        if added {
            state
                .channels
                .entry(user_id.clone())
                .or_default()
                .insert(channel_id.clone());
        }
        added
    }

    /// Returns `true` if the user was a member.
    pub fn leave(&self, channel_id: &ChannelId, user_id: &UserId) -> bool {
        self.write().remove(channel_id, user_id)
    }

    /// Drop every membership of the user, returning the channels left.
    pub fn leave_all(&self, user_id: &UserId) -> Vec<ChannelId> {
        self.leave_all_unless(user_id, || false)
    }

    /// Like [`leave_all`](Self::leave_all), but `keep` is evaluated under the
    /// write lock and nothing is dropped if it returns `true`.
    pub fn leave_all_unless(
        &self,
        user_id: &UserId,
        keep: impl FnOnce() -> bool,
    ) -> Vec<ChannelId> {
        let mut state = self.write();
        if keep() {
            return Vec::new();
        }
        let channels: Vec<ChannelId> = state
            .channels
            .get(user_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        for channel_id in &channels {
            state.remove(channel_id, user_id);
        }
        channels
    }

    pub fn members_of(&self, channel_id: &ChannelId) -> HashSet<UserId> {
        self.read()
            .members
            .get(channel_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn channels_of(&self, user_id: &UserId) -> HashSet<ChannelId> {
        self.read()
            .channels
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_member(&self, channel_id: &ChannelId, user_id: &UserId) -> bool {
        self.read()
            .members
            .get(channel_id)
            .is_some_and(|members| members.contains(user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_is_idempotent() {
        let tracker = MembershipTracker::new();
        let (general, u1) = (ChannelId::from("general"), UserId::from("u1"));

        assert!(tracker.join(&general, &u1));
        let once = tracker.members_of(&general);
        assert!(!tracker.join(&general, &u1));

        assert_eq!(tracker.members_of(&general), once);
        assert_eq!(tracker.channels_of(&u1).len(), 1);
    }

    #[test]
    fn test_leave_non_member_is_noop() {
        let tracker = MembershipTracker::new();
        let (general, u1, u2) = ("general".into(), "u1".into(), "u2".into());
        tracker.join(&general, &u1);

        assert!(!tracker.leave(&general, &u2));
        assert!(!tracker.leave(&"random".into(), &u1));
        assert_eq!(tracker.members_of(&general), HashSet::from([u1]));
    }

    #[test]
    fn test_inverse_index_follows_mutations() {
        let tracker = MembershipTracker::new();
        let u1: UserId = "u1".into();
        let (general, random): (ChannelId, ChannelId) = ("general".into(), "random".into());
        tracker.join(&general, &u1);
        tracker.join(&random, &u1);
        assert_eq!(
            tracker.channels_of(&u1),
            HashSet::from([general.clone(), random.clone()])
        );

        assert!(tracker.leave(&general, &u1));
        assert_eq!(tracker.channels_of(&u1), HashSet::from([random.clone()]));
        assert!(!tracker.is_member(&general, &u1));
        assert!(tracker.is_member(&random, &u1));
    }

    #[test]
    fn test_leave_all_clears_both_directions() {
        let tracker = MembershipTracker::new();
        let (u1, u2): (UserId, UserId) = ("u1".into(), "u2".into());
        let general: ChannelId = "general".into();
        tracker.join(&general, &u1);
        tracker.join(&general, &u2);
        tracker.join(&"random".into(), &u1);

        let mut left = tracker.leave_all(&u1);
        left.sort();
        assert_eq!(left, vec![ChannelId::from("general"), ChannelId::from("random")]);
        assert!(tracker.channels_of(&u1).is_empty());
        assert_eq!(tracker.members_of(&general), HashSet::from([u2]));
        assert!(tracker.members_of(&"random".into()).is_empty());
    }

    #[test]
    fn test_leave_all_unless_keeps_memberships_when_vetoed() {
        let tracker = MembershipTracker::new();
        let u1: UserId = "u1".into();
        let general: ChannelId = "general".into();
        tracker.join(&general, &u1);

        assert!(tracker.leave_all_unless(&u1, || true).is_empty());
        assert!(tracker.is_member(&general, &u1));

        assert_eq!(tracker.leave_all_unless(&u1, || false), vec![general.clone()]);
        assert!(!tracker.is_member(&general, &u1));
    }
}
