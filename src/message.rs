//! The `Message` record shared by the hot stream (serialized JSON) and the
//! cold archive tables. Immutable except for the recall fields, per the
//! spec's data model.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Private,
    Group,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub from: i64,
    /// The counterpart user id for private messages, or the group id for
    /// group messages.
    pub to: i64,
    pub kind: MessageKind,
    pub content: String,
    pub timestamp: i64,
    #[serde(default)]
    pub recalled: bool,
    #[serde(default)]
    pub recalled_at: Option<i64>,
    #[serde(default)]
    pub recalled_by: Option<i64>,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub read_timestamp: Option<i64>,
}

impl Message {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("Message always serializes")
    }

    pub fn from_json(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }
}

/// Canonical pair key ordering: smaller user id first.
pub fn canonical_pair(a: i64, b: i64) -> (i64, i64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

pub fn private_stream_key(a: i64, b: i64) -> String {
    let (lo, hi) = canonical_pair(a, b);
    format!("chat:{lo}:{hi}")
}

pub fn group_stream_key(group_id: i64) -> String {
    format!("group:{group_id}:messages")
}

pub fn group_members_key(group_id: i64) -> String {
    format!("group:{group_id}:members")
}

pub fn group_meta_key(group_id: i64) -> String {
    format!("group:{group_id}")
}

pub fn offline_queue_key(user_id: i64) -> String {
    format!("user:{user_id}:offline")
}

pub fn user_friends_key(user_id: i64) -> String {
    format!("user:{user_id}:friends")
}

pub fn user_groups_key(user_id: i64) -> String {
    format!("user:{user_id}:groups")
}

pub fn friend_request_key(from: i64, to: i64) -> String {
    format!("friend_req:{from}:{to}")
}

pub fn group_message_read_by_key(message_id: &str) -> String {
    format!("msg:{message_id}:read_by")
}

pub fn archive_high_water_key(stream_key: &str) -> String {
    format!("{stream_key}:last_archive")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_pair_orders_smaller_first() {
        assert_eq!(canonical_pair(5, 2), (2, 5));
        assert_eq!(canonical_pair(2, 5), (2, 5));
    }

    #[test]
    fn private_stream_key_is_symmetric() {
        assert_eq!(private_stream_key(1, 2), private_stream_key(2, 1));
        assert_eq!(private_stream_key(1, 2), "chat:1:2");
    }

    #[test]
    fn json_round_trip_preserves_fields() {
        let msg = Message {
            id: "abc".to_owned(),
            from: 1,
            to: 2,
            kind: MessageKind::Private,
            content: "hi".to_owned(),
            timestamp: 1000,
            recalled: false,
            recalled_at: None,
            recalled_by: None,
            read: false,
            read_timestamp: None,
        };
        let json = msg.to_json();
        let back = Message::from_json(&json).unwrap();
        assert_eq!(msg, back);
    }
}
