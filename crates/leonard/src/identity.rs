//! Users seen in joined rooms, keyed by bare JID.

use std::collections::BTreeMap;

use tracing::debug;

/// A room participant. Never removed once seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub jid: String,
    pub display_name: String,
    /// Short `@` handle, filled in once the profile lookup answers.
    pub mention_name: Option<String>,
}

/// Who the bot itself is on the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelfIdentity {
    /// Bare account JID.
    pub jid: String,
    /// `<jid>/<resource>`, stamped as `from` on outbound stanzas.
    pub full_jid: String,
    /// Display name used as room nick.
    pub nick: Option<String>,
    pub mention_name: Option<String>,
}

impl SelfIdentity {
    pub fn new(jid: impl Into<String>, full_jid: impl Into<String>) -> Self {
        Self {
            jid: jid.into(),
            full_jid: full_jid.into(),
            nick: None,
            mention_name: None,
        }
    }

    pub fn is_own_jid(&self, jid: &str) -> bool {
        jid == self.jid
    }

    pub fn is_own_nick(&self, nick: &str) -> bool {
        self.nick.as_deref() == Some(nick)
    }
}

#[derive(Debug, Clone, Default)]
pub struct IdentityTracker {
    users: BTreeMap<String, User>,
    /// `(room, nick)` to bare JID for participants currently in a room.
    occupants: BTreeMap<(String, String), String>,
}

impl IdentityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a participant seen through presence in `room`. Returns `true`
    /// when the user was not known before.
    pub fn observe(&mut self, room: &str, jid: &str, display_name: &str) -> bool {
        self.occupants
            .insert((room.to_string(), display_name.to_string()), jid.to_string());
        match self.users.get_mut(jid) {
            Some(user) => {
                if user.display_name != display_name {
                    debug!(jid, from = %user.display_name, to = display_name, "Display name changed");
                    user.display_name = display_name.to_string();
                }
                false
            }
            None => {
                self.users.insert(
                    jid.to_string(),
                    User {
                        jid: jid.to_string(),
                        display_name: display_name.to_string(),
                        mention_name: None,
                    },
                );
                true
            }
        }
    }

    /// Apply a profile lookup result. Results for users we never saw are
    /// dropped; returns whether a user was updated.
    pub fn resolve_mention_name(&mut self, jid: &str, mention_name: Option<String>) -> bool {
        let Some(user) = self.users.get_mut(jid) else {
            return false;
        };
        match mention_name {
            Some(mention_name) => {
                user.mention_name = Some(mention_name);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, jid: &str) -> Option<&User> {
        self.users.get(jid)
    }

    /// Forget that `nick` occupies `room`. The user record is kept.
    pub fn leave(&mut self, room: &str, nick: &str) {
        self.occupants.remove(&(room.to_string(), nick.to_string()));
    }

    /// JID of the participant using `nick` in `room`.
    pub fn occupant_jid(&self, room: &str, nick: &str) -> Option<&str> {
        self.occupants
            .get(&(room.to_string(), nick.to_string()))
            .map(String::as_str)
    }

    /// Case-insensitive lookup by mention name or display name.
    pub fn find_by_name(&self, name: &str) -> Option<&User> {
        let name = name.trim_start_matches('@');
        self.users
            .values()
            .find(|user| {
                user.mention_name
                    .as_deref()
                    .is_some_and(|mention| mention.eq_ignore_ascii_case(name))
            })
            .or_else(|| {
                self.users
                    .values()
                    .find(|user| user.display_name.eq_ignore_ascii_case(name))
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_creates_then_updates_in_place() {
        let mut tracker = IdentityTracker::new();
        assert!(tracker.observe("ops@conf", "1_42@chat", "Leela"));
        tracker.resolve_mention_name("1_42@chat", Some("leela".to_string()));

        assert!(!tracker.observe("ops@conf", "1_42@chat", "Leela Turanga"));
        let user = tracker.get("1_42@chat").unwrap();
        assert_eq!(user.display_name, "Leela Turanga");
        assert_eq!(user.mention_name.as_deref(), Some("leela"));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn profile_for_unknown_user_is_dropped() {
        let mut tracker = IdentityTracker::new();
        assert!(!tracker.resolve_mention_name("ghost@chat", Some("ghost".to_string())));
        assert!(tracker.is_empty());
    }

    #[test]
    fn profile_without_mention_name_keeps_previous_value() {
        let mut tracker = IdentityTracker::new();
        tracker.observe("ops@conf", "1_7@chat", "Fry");
        tracker.resolve_mention_name("1_7@chat", Some("fry".to_string()));
        assert!(!tracker.resolve_mention_name("1_7@chat", None));
        assert_eq!(
            tracker.get("1_7@chat").unwrap().mention_name.as_deref(),
            Some("fry")
        );
    }

    #[test]
    fn finds_users_by_nick_and_name() {
        let mut tracker = IdentityTracker::new();
        tracker.observe("ops@conf", "1_7@chat", "Philip Fry");
        tracker.resolve_mention_name("1_7@chat", Some("fry".to_string()));

        assert_eq!(tracker.occupant_jid("ops@conf", "Philip Fry"), Some("1_7@chat"));
        assert_eq!(tracker.find_by_name("@Fry").map(|u| u.jid.as_str()), Some("1_7@chat"));
        assert_eq!(
            tracker.find_by_name("philip fry").map(|u| u.jid.as_str()),
            Some("1_7@chat")
        );
        assert!(tracker.find_by_name("bender").is_none());
    }

    #[test]
    fn shared_nicks_resolve_per_room() {
        let mut tracker = IdentityTracker::new();
        tracker.observe("a@conf", "1_7@chat", "Fry");
        tracker.observe("b@conf", "1_8@chat", "Fry");

        assert_eq!(tracker.occupant_jid("a@conf", "Fry"), Some("1_7@chat"));
        assert_eq!(tracker.occupant_jid("b@conf", "Fry"), Some("1_8@chat"));
        assert_eq!(tracker.occupant_jid("c@conf", "Fry"), None);
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn leaving_clears_occupancy_but_keeps_user() {
        let mut tracker = IdentityTracker::new();
        tracker.observe("a@conf", "1_7@chat", "Fry");
        tracker.leave("a@conf", "Fry");

        assert_eq!(tracker.occupant_jid("a@conf", "Fry"), None);
        assert!(tracker.get("1_7@chat").is_some());
    }
}
