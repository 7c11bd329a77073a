//! Rooms and fan-out
//!
//! A room is a set of subscribed connections. Personal rooms address every
//! session of one user, dyadic rooms the pair of a direct conversation and
//! group rooms the members of a group. Subscriptions are transport state
//! only and are rebuilt on every connect.

pub mod hub;

use std::fmt;

use crate::models::{GroupId, UserId};

pub use hub::{EventSender, RoomHub};

pub const DYADIC_SEPARATOR: &str = "_";
pub const GROUP_ROOM_PREFIX: &str = "group_";

/// Deterministic key for a two-party conversation. Symmetric in its arguments.
pub fn dyadic_room_key(a: &str, b: &str) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    format!("{}{}{}", first, DYADIC_SEPARATOR, second)
}

pub fn group_room_key(group_id: &str) -> String {
    format!("{}{}", GROUP_ROOM_PREFIX, group_id)
}

/// Whether `id` can take part in a dyadic room key. An id containing the
/// separator would make `a_b` + `c` and `a` + `b_c` share a key.
pub fn is_routable_identity(id: &str) -> bool {
    !id.is_empty() && !id.contains(DYADIC_SEPARATOR)
}

/// If `key` is a dyadic key that includes `user`, the other participant.
pub fn dyadic_counterpart(key: &str, user: &str) -> Option<String> {
    let (first, second) = key.split_once(DYADIC_SEPARATOR)?;
    if !is_routable_identity(first) || !is_routable_identity(second) || first > second {
        return None;
    }
    if first == user {
        Some(second.to_string())
    } else if second == user {
        Some(first.to_string())
    } else {
        None
    }
}

/// Fan-out target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    /// All sessions of one user.
    Personal(UserId),
    /// Both participants of a direct conversation, keyed by `dyadic_room_key`.
    Dyadic(String),
    Group(GroupId),
}

impl Room {
    pub fn dyadic(a: &str, b: &str) -> Self {
        Room::Dyadic(dyadic_room_key(a, b))
    }

    pub fn key(&self) -> String {
        match self {
            Room::Personal(user) => user.clone(),
            Room::Dyadic(key) => key.clone(),
            Room::Group(group_id) => group_room_key(group_id),
        }
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}
