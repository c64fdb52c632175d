//! In-memory model of one session: connection status, our nickname, the
//! channels we joined and who is in each channel.

use std::collections::{BTreeSet, HashMap, HashSet};

pub const MIN_CHANNEL_LEN: usize = 2;
pub const MAX_CHANNEL_LEN: usize = 50;

/// Membership-mode prefixes a names reply may put in front of a nickname.
const NICK_PREFIXES: &[char] = &['~', '&', '@', '%', '+'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Not yet connected.
    Disconnected,
    Connected,
    Registered,
    /// Disconnected after having been connected. Terminal.
    Closed,
}

impl ConnectionStatus {
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionStatus::Connected | ConnectionStatus::Registered)
    }
}

/// Whether `name` is acceptable as a channel to join.
pub fn is_valid_channel_name(name: &str) -> bool {
    let len = name.chars().count();
    name.starts_with('#')
        && !name.chars().any(char::is_whitespace)
        && (MIN_CHANNEL_LEN..=MAX_CHANNEL_LEN).contains(&len)
}

/// Drop a single leading membership-mode prefix (`@alice` -> `alice`).
pub fn strip_nick_prefix(name: &str) -> &str {
    name.strip_prefix(NICK_PREFIXES).unwrap_or(name)
}

#[derive(Debug)]
pub struct SessionState {
    pub status: ConnectionStatus,
    pub nickname: Option<String>,
    pub userinfo: String,
    joined: BTreeSet<String>,
    membership: HashMap<String, HashSet<String>>,
    /// Names collected from 353 lines, waiting for the 366 terminator.
    pending_names: HashMap<String, Vec<String>>,
}

impl SessionState {
    pub fn new(userinfo: impl Into<String>) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            nickname: None,
            userinfo: userinfo.into(),
            joined: BTreeSet::new(),
            membership: HashMap::new(),
            pending_names: HashMap::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status.is_connected()
    }

    pub fn is_own_nick(&self, nick: &str) -> bool {
        self.nickname
            .as_deref()
            .is_some_and(|own| own.eq_ignore_ascii_case(nick))
    }

    pub fn mark_joined(&mut self, channel: &str) {
        self.joined.insert(channel.to_string());
    }

    /// Returns whether the channel was in the joined set.
    pub fn mark_left(&mut self, channel: &str) -> bool {
        self.joined.remove(channel)
    }

    pub fn joined_channels(&self) -> Vec<String> {
        self.joined.iter().cloned().collect()
    }

    pub fn add_member(&mut self, channel: &str, user: &str) {
        self.membership
            .entry(channel.to_string())
            .or_default()
            .insert(user.to_string());
    }

    /// Remove `user` from `channel`. Absence is not an error.
    pub fn remove_member(&mut self, channel: &str, user: &str) -> bool {
        self.membership
            .get_mut(channel)
            .is_some_and(|users| users.remove(user))
    }

    /// Overwrite the member set of `channel` with exactly `names`.
    pub fn replace_members(&mut self, channel: &str, names: &[String]) {
        let users: HashSet<String> = names.iter().cloned().collect();
        self.membership.insert(channel.to_string(), users);
    }

    /// Rename `old` to `new` in every channel it appears in.
    pub fn rename_member(&mut self, old: &str, new: &str) {
        for users in self.membership.values_mut() {
            if users.remove(old) {
                users.insert(new.to_string());
            }
        }
    }

    /// Sorted member list, or `None` if nothing is known about the channel.
    pub fn members(&self, channel: &str) -> Option<Vec<String>> {
        self.membership.get(channel).map(|users| {
            let mut names: Vec<String> = users.iter().cloned().collect();
            names.sort_by_key(|n| n.to_lowercase());
            names
        })
    }

    pub fn buffer_names(&mut self, channel: &str, names: Vec<String>) {
        self.pending_names
            .entry(channel.to_string())
            .or_default()
            .extend(names);
    }

    /// Commit the buffered names of `channel` as its full member set.
    ///
    /// Returns the committed list, which is empty if no 353 line preceded the
    /// terminator.
    pub fn commit_names(&mut self, channel: &str) -> Vec<String> {
        let names = self.pending_names.remove(channel).unwrap_or_default();
        self.replace_members(channel, &names);
        names
    }

    /// Forget everything tied to the live connection.
    pub fn close(&mut self) {
        self.status = ConnectionStatus::Closed;
        self.pending_names.clear();
    }
}
