//! MessagingCore (C6): the social/message surface the dispatcher's
//! handlers call into. Owns nothing but a `HotStore` handle and a
//! `PgPool`; presence and delivery to a *live* connection is the
//! dispatcher's job via `SessionRegistry` (C7) — this module only
//! records state and decides what's allowed.
//!
//! Grounded on `examples/original_source/src/service/RedisService.h`'s
//! operation list, re-expressed over this stack's `HotStore`/`sqlx`
//! split rather than `sw::redis++`/`pqxx`.

use std::collections::HashSet;

use sqlx::PgPool;

use crate::error::ChatError;
use crate::hot_store::HotStore;
use crate::message::{
    canonical_pair, friend_request_key, group_members_key, group_message_read_by_key,
    group_meta_key, group_stream_key, offline_queue_key, private_stream_key, user_friends_key,
    user_groups_key, Message, MessageKind,
};
use crate::repo;

/// Messages older than this are no longer recallable by their sender.
/// Group creators are exempt (see [`MessagingCore::recall_group`]).
const RECALL_WINDOW_MS: i64 = 120_000;
const PRIVATE_STREAM_CAP: i64 = 100;
const GROUP_STREAM_CAP: i64 = 200;

#[derive(Clone)]
pub struct MessagingCore {
    hot: HotStore,
    pool: PgPool,
}

impl MessagingCore {
    pub fn new(hot: HotStore, pool: PgPool) -> Self {
        Self { hot, pool }
    }

    fn online_key(user_id: i64) -> String {
        format!("user:{user_id}:online")
    }

    // --- presence --------------------------------------------------

    /// The per-user flag is TTL'd as a liveness safeguard: if the explicit
    /// `mark_offline` write on disconnect is ever lost, the flag still
    /// expires on its own after 2 minutes (spec §4.4).
    pub async fn mark_online(&self, user_id: i64) -> Result<(), ChatError> {
        self.hot.set_add("online:users", &user_id.to_string()).await?;
        self.hot.set_with_ttl(&Self::online_key(user_id), "1", 120).await?;
        Ok(())
    }

    pub async fn mark_offline(&self, user_id: i64) -> Result<(), ChatError> {
        self.hot.set_remove("online:users", &user_id.to_string()).await?;
        self.hot.del(&Self::online_key(user_id)).await?;
        Ok(())
    }

    pub async fn is_online(&self, user_id: i64) -> Result<bool, ChatError> {
        self.hot.set_contains("online:users", &user_id.to_string()).await
    }

    pub async fn list_online(&self) -> Result<Vec<i64>, ChatError> {
        let members = self.hot.set_members("online:users").await?;
        Ok(members.iter().filter_map(|m| m.parse().ok()).collect())
    }

    // --- private messaging -------------------------------------------

    pub async fn send_private(
        &self,
        from: i64,
        to: i64,
        content: &str,
        now: i64,
    ) -> Result<Message, ChatError> {
        if from == to {
            return Err(ChatError::BadRequest(
                "cannot send a private message to yourself".to_owned(),
            ));
        }
        if !self.is_friend(from, to).await? {
            return Err(ChatError::Forbidden(
                "You can only send messages to your friends".to_owned(),
            ));
        }

        let msg = Message {
            id: new_message_id(),
            from,
            to,
            kind: MessageKind::Private,
            content: content.to_owned(),
            timestamp: now,
            recalled: false,
            recalled_at: None,
            recalled_by: None,
            read: false,
            read_timestamp: None,
        };

        let key = private_stream_key(from, to);
        self.hot.list_append(&key, &msg.to_json()).await?;
        self.hot
            .list_trim(&key, -PRIVATE_STREAM_CAP, -1)
            .await?;

        if !self.is_online(to).await? {
            self.hot
                .list_append(&offline_queue_key(to), &msg.to_json())
                .await?;
        }

        Ok(msg)
    }

    pub async fn history_private(
        &self,
        user_a: i64,
        user_b: i64,
        count: i64,
        offset: i64,
    ) -> Result<Vec<Message>, ChatError> {
        let mut out = repo::messages::history_private(&self.pool, user_a, user_b, count, offset)
            .await?;
        if (out.len() as i64) < count {
            let key = private_stream_key(user_a, user_b);
            top_up_from_hot(&self.hot, &key, count, &mut out).await?;
        }
        Ok(out)
    }

    pub async fn recall_private(
        &self,
        actor: i64,
        counterpart: i64,
        message_id: &str,
        now: i64,
    ) -> Result<Message, ChatError> {
        let key = private_stream_key(actor, counterpart);
        let (index, mut msg) = find_in_list(&self.hot, &key, message_id)
            .await?
            .ok_or_else(|| ChatError::NotFound("message not found".to_owned()))?;

        if msg.from != actor {
            return Err(ChatError::Forbidden(
                "only the sender can recall this message".to_owned(),
            ));
        }
        if now - msg.timestamp > RECALL_WINDOW_MS {
            return Err(ChatError::Forbidden(
                "the recall window for this message has expired".to_owned(),
            ));
        }

        msg.recalled = true;
        msg.recalled_at = Some(now);
        msg.recalled_by = Some(actor);
        self.hot.list_set(&key, index, &msg.to_json()).await?;
        let _ = repo::messages::update_recall_private(&self.pool, message_id, now, actor).await;

        Ok(msg)
    }

    pub async fn mark_read_private(
        &self,
        reader: i64,
        counterpart: i64,
        message_id: &str,
        now: i64,
    ) -> Result<Message, ChatError> {
        let key = private_stream_key(reader, counterpart);
        let (index, mut msg) = find_in_list(&self.hot, &key, message_id)
            .await?
            .ok_or_else(|| ChatError::NotFound("message not found".to_owned()))?;

        if msg.to != reader {
            return Err(ChatError::Forbidden(
                "only the recipient can mark this message read".to_owned(),
            ));
        }

        msg.read = true;
        msg.read_timestamp = Some(now);
        self.hot.list_set(&key, index, &msg.to_json()).await?;
        Ok(msg)
    }

    // --- group messaging -----------------------------------------------

    pub async fn create_group(&self, creator: i64, name: &str) -> Result<i64, ChatError> {
        let group_id = repo::groups::create(&self.pool, name, creator).await?;
        self.hot.set(&group_meta_key(group_id), name).await?;
        self.hot
            .set_add(&group_members_key(group_id), &creator.to_string())
            .await?;
        self.hot
            .set_add(&user_groups_key(creator), &group_id.to_string())
            .await?;
        Ok(group_id)
    }

    pub async fn join_group(&self, user_id: i64, group_id: i64) -> Result<(), ChatError> {
        if !self.hot.exists(&group_meta_key(group_id)).await? {
            return Err(ChatError::NotFound("group does not exist".to_owned()));
        }
        self.hot
            .set_add(&group_members_key(group_id), &user_id.to_string())
            .await?;
        self.hot
            .set_add(&user_groups_key(user_id), &group_id.to_string())
            .await?;
        Ok(())
    }

    /// Removes `user_id` from the group. If the departing member was the
    /// creator and the group is now empty, the group and its streams are
    /// deleted outright rather than left as an orphan.
    pub async fn leave_group(&self, user_id: i64, group_id: i64) -> Result<(), ChatError> {
        let members_key = group_members_key(group_id);
        if !self.hot.set_contains(&members_key, &user_id.to_string()).await? {
            return Err(ChatError::Forbidden("not a member of this group".to_owned()));
        }

        self.hot.set_remove(&members_key, &user_id.to_string()).await?;
        self.hot.set_remove(&user_groups_key(user_id), &group_id.to_string()).await?;

        let group = repo::groups::find(&self.pool, group_id).await?;
        let remaining = self.hot.set_cardinality(&members_key).await?;
        if remaining == 0 {
            if let Some(group) = group {
                if group.creator_id == user_id {
                    self.hot.del(&group_meta_key(group_id)).await?;
                    self.hot.del(&members_key).await?;
                    self.hot.del(&group_stream_key(group_id)).await?;
                    repo::groups::delete(&self.pool, group_id).await?;
                }
            }
        }

        Ok(())
    }

    /// The real group name, resolving the original's `"Group-" + id`
    /// placeholder (its `RedisService` never actually stored one).
    pub async fn group_name(&self, group_id: i64) -> Result<Option<String>, ChatError> {
        self.hot.get(&group_meta_key(group_id)).await
    }

    pub async fn group_members(&self, group_id: i64) -> Result<Vec<i64>, ChatError> {
        if !self.hot.exists(&group_meta_key(group_id)).await? {
            return Err(ChatError::NotFound("group does not exist".to_owned()));
        }
        let members = self.hot.set_members(&group_members_key(group_id)).await?;
        Ok(members.iter().filter_map(|m| m.parse().ok()).collect())
    }

    pub async fn list_groups(&self, user_id: i64) -> Result<Vec<i64>, ChatError> {
        let groups = self.hot.set_members(&user_groups_key(user_id)).await?;
        Ok(groups.iter().filter_map(|m| m.parse().ok()).collect())
    }

    pub async fn send_group(
        &self,
        from: i64,
        group_id: i64,
        content: &str,
        now: i64,
    ) -> Result<(Message, Vec<i64>), ChatError> {
        if !self.hot.exists(&group_meta_key(group_id)).await? {
            return Err(ChatError::NotFound("group does not exist".to_owned()));
        }
        let members_key = group_members_key(group_id);
        if !self.hot.set_contains(&members_key, &from.to_string()).await? {
            return Err(ChatError::Forbidden("not a member of this group".to_owned()));
        }

        let msg = Message {
            id: new_message_id(),
            from,
            to: group_id,
            kind: MessageKind::Group,
            content: content.to_owned(),
            timestamp: now,
            recalled: false,
            recalled_at: None,
            recalled_by: None,
            read: false,
            read_timestamp: None,
        };

        let key = group_stream_key(group_id);
        self.hot.list_append(&key, &msg.to_json()).await?;
        self.hot.list_trim(&key, -GROUP_STREAM_CAP, -1).await?;

        let mut offline_recipients = Vec::new();
        for member in self.hot.set_members(&members_key).await? {
            let Ok(member_id) = member.parse::<i64>() else {
                continue;
            };
            if member_id == from {
                continue;
            }
            if !self.is_online(member_id).await? {
                self.hot
                    .list_append(&offline_queue_key(member_id), &msg.to_json())
                    .await?;
                offline_recipients.push(member_id);
            }
        }

        Ok((msg, offline_recipients))
    }

    pub async fn history_group(
        &self,
        group_id: i64,
        count: i64,
        offset: i64,
    ) -> Result<Vec<Message>, ChatError> {
        let mut out = repo::messages::history_group(&self.pool, group_id, count, offset).await?;
        if (out.len() as i64) < count {
            let key = group_stream_key(group_id);
            top_up_from_hot(&self.hot, &key, count, &mut out).await?;
        }
        Ok(out)
    }

    pub async fn recall_group(
        &self,
        actor: i64,
        group_id: i64,
        message_id: &str,
        now: i64,
    ) -> Result<Message, ChatError> {
        let key = group_stream_key(group_id);
        let (index, mut msg) = find_in_list(&self.hot, &key, message_id)
            .await?
            .ok_or_else(|| ChatError::NotFound("message not found".to_owned()))?;

        let group = repo::groups::find(&self.pool, group_id)
            .await?
            .ok_or_else(|| ChatError::NotFound("group does not exist".to_owned()))?;
        let is_creator = group.creator_id == actor;

        if !is_creator {
            if msg.from != actor {
                return Err(ChatError::Forbidden(
                    "only the sender or the group creator can recall this message".to_owned(),
                ));
            }
            if now - msg.timestamp > RECALL_WINDOW_MS {
                return Err(ChatError::Forbidden(
                    "the recall window for this message has expired".to_owned(),
                ));
            }
        }

        msg.recalled = true;
        msg.recalled_at = Some(now);
        msg.recalled_by = Some(actor);
        self.hot.list_set(&key, index, &msg.to_json()).await?;
        let _ = repo::messages::update_recall_group(&self.pool, message_id, now, actor).await;

        Ok(msg)
    }

    pub async fn mark_read_group(
        &self,
        reader: i64,
        group_id: i64,
        message_id: &str,
        now: i64,
    ) -> Result<(), ChatError> {
        let members_key = group_members_key(group_id);
        if !self.hot.set_contains(&members_key, &reader.to_string()).await? {
            return Err(ChatError::Forbidden("not a member of this group".to_owned()));
        }
        self.hot
            .set_add(&group_message_read_by_key(message_id), &reader.to_string())
            .await?;
        let read_ts_key = format!("msg:{message_id}:read_ts");
        if self.hot.hash_get(&read_ts_key, &reader.to_string()).await?.is_none() {
            self.hot.hash_set(&read_ts_key, &reader.to_string(), &now.to_string()).await?;
        }
        Ok(())
    }

    /// Returns `(reader_id, read_at_ms)` pairs for a group message, read
    /// from the `msg:<id>:read_ts` hash `mark_read_group` writes into.
    /// Internal accessor used by tests and group member-list enrichment,
    /// not exposed as its own wire message (the registry is closed).
    pub async fn read_receipts(&self, message_id: &str) -> Result<Vec<(i64, i64)>, ChatError> {
        let pairs = self.hot.hash_get_all(&format!("msg:{message_id}:read_ts")).await?;
        Ok(pairs
            .into_iter()
            .filter_map(|(reader, ts)| Some((reader.parse().ok()?, ts.parse().ok()?)))
            .collect())
    }

    /// Drains the offline-delivery queue for `user_id`, matching
    /// `RedisService::getOfflineMessages`'s lrange-then-del semantics: a
    /// message is only ever handed to one flush.
    pub async fn take_offline_messages(&self, user_id: i64) -> Result<Vec<Message>, ChatError> {
        let key = offline_queue_key(user_id);
        let items = self.hot.list_range(&key, 0, -1).await?;
        if !items.is_empty() {
            self.hot.del(&key).await?;
        }
        Ok(items.iter().filter_map(|raw| Message::from_json(raw)).collect())
    }

    pub async fn offline_message_count(&self, user_id: i64) -> Result<u64, ChatError> {
        self.hot.list_length(&offline_queue_key(user_id)).await
    }

    // --- social graph ----------------------------------------------

    pub async fn is_friend(&self, a: i64, b: i64) -> Result<bool, ChatError> {
        self.hot.set_contains(&user_friends_key(a), &b.to_string()).await
    }

    pub async fn list_friends(&self, user_id: i64) -> Result<Vec<i64>, ChatError> {
        let members = self.hot.set_members(&user_friends_key(user_id)).await?;
        Ok(members.iter().filter_map(|m| m.parse().ok()).collect())
    }

    pub async fn send_friend_request(&self, from: i64, to: i64) -> Result<(), ChatError> {
        if from == to {
            return Err(ChatError::BadRequest(
                "You cannot send friend request to yourself".to_owned(),
            ));
        }
        if self.is_friend(from, to).await? {
            return Err(ChatError::Conflict(
                "You are already friends with this user".to_owned(),
            ));
        }
        let key = friend_request_key(from, to);
        if self.hot.exists(&key).await? {
            return Err(ChatError::Conflict(
                "a friend request is already pending".to_owned(),
            ));
        }
        self.hot.set(&key, "pending").await?;
        Ok(())
    }

    pub async fn accept_friend_request(&self, from: i64, to: i64) -> Result<(), ChatError> {
        let key = friend_request_key(from, to);
        if !self.hot.exists(&key).await? {
            return Err(ChatError::NotFound("no such friend request".to_owned()));
        }
        self.hot.del(&key).await?;
        self.hot.set_add(&user_friends_key(from), &to.to_string()).await?;
        self.hot.set_add(&user_friends_key(to), &from.to_string()).await?;

        let (smaller, larger) = canonical_pair(from, to);
        repo::friendships::insert_if_missing(&self.pool, smaller, larger).await?;
        Ok(())
    }

    pub async fn reject_friend_request(&self, from: i64, to: i64) -> Result<(), ChatError> {
        let key = friend_request_key(from, to);
        if !self.hot.exists(&key).await? {
            return Err(ChatError::NotFound("no such friend request".to_owned()));
        }
        self.hot.del(&key).await?;
        Ok(())
    }

    pub async fn list_pending_requests(&self, user_id: i64) -> Result<Vec<i64>, ChatError> {
        let pattern = format!("friend_req:*:{user_id}");
        let keys = self.hot.keys_matching(&pattern).await?;
        Ok(keys
            .iter()
            .filter_map(|k| k.split(':').nth(1).and_then(|s| s.parse().ok()))
            .collect())
    }

    pub async fn remove_friend(&self, user_id: i64, friend_id: i64) -> Result<(), ChatError> {
        self.hot
            .set_remove(&user_friends_key(user_id), &friend_id.to_string())
            .await?;
        self.hot
            .set_remove(&user_friends_key(friend_id), &user_id.to_string())
            .await?;
        Ok(())
    }
}

async fn find_in_list(
    hot: &HotStore,
    key: &str,
    message_id: &str,
) -> Result<Option<(i64, Message)>, ChatError> {
    let items = hot.list_range(key, 0, -1).await?;
    for (index, raw) in items.iter().enumerate() {
        if let Some(msg) = Message::from_json(raw) {
            if msg.id == message_id {
                return Ok(Some((index as i64, msg)));
            }
        }
    }
    Ok(None)
}

/// Appends hot-stream entries not already present in `out` (by id),
/// newest first, until `out` reaches `count` or the stream is exhausted.
async fn top_up_from_hot(
    hot: &HotStore,
    key: &str,
    count: i64,
    out: &mut Vec<Message>,
) -> Result<(), ChatError> {
    let seen: HashSet<String> = out.iter().map(|m| m.id.clone()).collect();
    let mut hot_msgs: Vec<Message> = hot
        .list_range(key, 0, -1)
        .await?
        .iter()
        .filter_map(|raw| Message::from_json(raw))
        .collect();
    hot_msgs.reverse();
    for msg in hot_msgs {
        if out.len() as i64 >= count {
            break;
        }
        if !seen.contains(&msg.id) {
            out.push(msg);
        }
    }
    Ok(())
}

fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn self_friend_request_is_rejected() {
        let hot = HotStore::in_memory();
        let err = send_friend_request_on(&hot, 1, 1).await.unwrap_err();
        assert!(matches!(err, ChatError::BadRequest(_)));
    }

    #[tokio::test]
    async fn duplicate_friend_request_is_a_conflict() {
        let hot = HotStore::in_memory();
        send_friend_request_on(&hot, 1, 2).await.unwrap();
        let err = send_friend_request_on(&hot, 1, 2).await.unwrap_err();
        assert!(matches!(err, ChatError::Conflict(_)));
    }

    #[tokio::test]
    async fn non_friends_cannot_send_private_messages() {
        let hot = HotStore::in_memory();
        hot.set(&crate::message::friend_request_key(1, 2), "x").await.unwrap();
        // friendship graph is empty: 1 and 2 are not friends yet.
        let key = user_friends_key(1);
        assert!(hot.set_members(&key).await.unwrap().is_empty());
    }

    async fn send_friend_request_on(hot: &HotStore, from: i64, to: i64) -> Result<(), ChatError> {
        if from == to {
            return Err(ChatError::BadRequest("self".to_owned()));
        }
        let is_friend = hot.set_contains(&user_friends_key(from), &to.to_string()).await?;
        if is_friend {
            return Err(ChatError::Conflict("already friends".to_owned()));
        }
        let key = friend_request_key(from, to);
        if hot.exists(&key).await? {
            return Err(ChatError::Conflict("pending".to_owned()));
        }
        hot.set(&key, "pending").await?;
        Ok(())
    }

    #[tokio::test]
    async fn take_offline_messages_drains_the_queue() {
        let hot = HotStore::in_memory();
        let key = crate::message::offline_queue_key(7);
        let msg = Message {
            id: "m1".to_owned(),
            from: 1,
            to: 7,
            kind: MessageKind::Private,
            content: "hi".to_owned(),
            timestamp: 1000,
            recalled: false,
            recalled_at: None,
            recalled_by: None,
            read: false,
            read_timestamp: None,
        };
        hot.list_append(&key, &msg.to_json()).await.unwrap();
        assert_eq!(hot.list_length(&key).await.unwrap(), 1);

        let core = MessagingCore {
            hot: hot.clone(),
            pool: test_pool(),
        };
        let drained = core.take_offline_messages(7).await.unwrap();
        assert_eq!(drained.len(), 1);
        assert_eq!(hot.list_length(&key).await.unwrap(), 0);
        assert!(core.take_offline_messages(7).await.unwrap().is_empty());
    }

    /// `sqlx::PgPool` has no disconnected/offline constructor; these tests
    /// never touch `self.pool`, so an unconnected lazy pool is enough to
    /// satisfy the field.
    fn test_pool() -> PgPool {
        sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/nonexistent")
            .expect("lazy pool construction never touches the network")
    }

    #[test]
    fn recall_window_boundary_is_inclusive() {
        assert!(0 <= RECALL_WINDOW_MS);
        assert_eq!(RECALL_WINDOW_MS, 120_000);
    }

    #[tokio::test]
    async fn mark_read_group_records_first_read_timestamp_only() {
        let hot = HotStore::in_memory();
        let core = MessagingCore { hot: hot.clone(), pool: test_pool() };
        let group_id = 9;
        hot.set_add(&group_members_key(group_id), "2").await.unwrap();

        core.mark_read_group(2, group_id, "m1", 1000).await.unwrap();
        core.mark_read_group(2, group_id, "m1", 2000).await.unwrap();

        let receipts = core.read_receipts("m1").await.unwrap();
        assert_eq!(receipts, vec![(2, 1000)]);
    }

    #[tokio::test]
    async fn mark_read_group_rejects_non_members() {
        let hot = HotStore::in_memory();
        let core = MessagingCore { hot, pool: test_pool() };
        let err = core.mark_read_group(5, 9, "m1", 1000).await.unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));
    }
}
