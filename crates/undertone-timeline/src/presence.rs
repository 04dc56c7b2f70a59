//! Ephemeral typing and presence state.
//!
//! Nothing here is persisted; both trackers are rebuilt (cleared) after a
//! reconnect gap, since stale typing or presence state after an outage is
//! meaningless.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use tracing::debug;

use undertone_shared::constants::TYPING_TTL;
use undertone_shared::{ChatId, UserId};

/// Per-chat set of users currently known to be typing.
///
/// A user transitions to typing on `typing_start` (or a refresh), and back
/// to idle on `typing_stop` or after the TTL with no refresh.  The TTL is
/// authoritative: `typing_stop` delivery is best-effort, so entries are
/// pruned on read and a lost stop can never wedge an indicator.
#[derive(Debug)]
pub struct TypingTracker {
    ttl: Duration,
    chats: HashMap<ChatId, HashMap<UserId, Instant>>,
}

impl TypingTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            chats: HashMap::new(),
        }
    }

    /// A `typing_start` arrived (or was refreshed) for this user.
    pub fn observe_start(&mut self, chat_id: ChatId, user_id: UserId) {
        self.chats
            .entry(chat_id)
            .or_default()
            .insert(user_id, Instant::now());
    }

    /// An explicit `typing_stop` arrived.
    pub fn observe_stop(&mut self, chat_id: ChatId, user_id: UserId) {
        if let Some(users) = self.chats.get_mut(&chat_id) {
            users.remove(&user_id);
        }
    }

    /// Users currently typing in `chat_id`, excluding `self_user`.
    ///
    /// Expired entries are filtered out; call [`purge_expired`] now and then
    /// to reclaim their memory.
    ///
    /// [`purge_expired`]: TypingTracker::purge_expired
    pub fn typing_in(&self, chat_id: ChatId, self_user: UserId) -> Vec<UserId> {
        let now = Instant::now();
        let mut users: Vec<UserId> = self
            .chats
            .get(&chat_id)
            .map(|users| {
                users
                    .iter()
                    .filter(|(user, started)| {
                        **user != self_user && now.duration_since(**started) < self.ttl
                    })
                    .map(|(user, _)| *user)
                    .collect()
            })
            .unwrap_or_default();
        users.sort();
        users
    }

    /// Drop every entry past its TTL.
    pub fn purge_expired(&mut self) {
        let now = Instant::now();
        let ttl = self.ttl;
        for users in self.chats.values_mut() {
            users.retain(|_, started| now.duration_since(*started) < ttl);
        }
        self.chats.retain(|_, users| !users.is_empty());
    }

    /// Forget all typing state for one chat (user blocked/removed, chat
    /// closed).
    pub fn clear_chat(&mut self, chat_id: ChatId) {
        self.chats.remove(&chat_id);
    }

    /// Forget everything (reconnect gap).
    pub fn clear_all(&mut self) {
        if !self.chats.is_empty() {
            debug!("Clearing typing state");
        }
        self.chats.clear();
    }
}

impl Default for TypingTracker {
    fn default() -> Self {
        Self::new(TYPING_TTL)
    }
}

/// Which users are currently online, fed by `presence_change` events.
#[derive(Debug, Default)]
pub struct PresenceRoster {
    online: HashSet<UserId>,
}

impl PresenceRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, user_id: UserId, online: bool) {
        if online {
            self.online.insert(user_id);
        } else {
            self.online.remove(&user_id);
        }
    }

    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.online.contains(user_id)
    }

    pub fn online_count(&self) -> usize {
        self.online.len()
    }

    /// Forget everything (reconnect gap).
    pub fn clear(&mut self) {
        self.online.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typing_start_and_stop() {
        let mut tracker = TypingTracker::default();
        let chat = ChatId::new();
        let me = UserId::new();
        let other = UserId::new();

        tracker.observe_start(chat, other);
        assert_eq!(tracker.typing_in(chat, me), vec![other]);

        tracker.observe_stop(chat, other);
        assert!(tracker.typing_in(chat, me).is_empty());
    }

    #[test]
    fn test_self_excluded() {
        let mut tracker = TypingTracker::default();
        let chat = ChatId::new();
        let me = UserId::new();

        tracker.observe_start(chat, me);
        assert!(tracker.typing_in(chat, me).is_empty());
    }

    #[test]
    fn test_ttl_expiry() {
        let mut tracker = TypingTracker::new(Duration::from_millis(0));
        let chat = ChatId::new();
        let me = UserId::new();
        let other = UserId::new();

        tracker.observe_start(chat, other);
        // Zero TTL: expired by the time we read it.
        assert!(tracker.typing_in(chat, me).is_empty());

        tracker.purge_expired();
        assert!(tracker.chats.is_empty());
    }

    #[test]
    fn test_refresh_extends_lifetime() {
        let mut tracker = TypingTracker::new(Duration::from_secs(60));
        let chat = ChatId::new();
        let me = UserId::new();
        let other = UserId::new();

        tracker.observe_start(chat, other);
        tracker.observe_start(chat, other);
        assert_eq!(tracker.typing_in(chat, me), vec![other]);
    }

    #[test]
    fn test_clear_all() {
        let mut tracker = TypingTracker::default();
        let chat = ChatId::new();
        let other = UserId::new();

        tracker.observe_start(chat, other);
        tracker.clear_all();
        assert!(tracker.typing_in(chat, UserId::new()).is_empty());
    }

    #[test]
    fn test_presence_roster() {
        let mut roster = PresenceRoster::new();
        let user = UserId::new();

        roster.observe(user, true);
        assert!(roster.is_online(&user));
        assert_eq!(roster.online_count(), 1);

        roster.observe(user, false);
        assert!(!roster.is_online(&user));

        roster.observe(user, true);
        roster.clear();
        assert_eq!(roster.online_count(), 0);
    }
}
