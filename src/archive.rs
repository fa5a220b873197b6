//! ArchiveWorker (C10): the background reconciliation loop that drains hot
//! message streams and friendship sets into cold storage, maintaining a
//! per-key high-water mark in the hot tier so re-running a tick never
//! inserts a message twice (spec §4.8, scenario S6). Runs as its own task
//! rather than a thread, but otherwise mirrors the "dedicated worker with
//! a ticker and a cooperative shutdown" shape this stack uses for
//! `services/receiver/src/session.rs`'s idle-sweep loop.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::Notify;
use tokio::time::interval;
use tracing::{info, warn};

use crate::hot_store::{HotStore, KeyType};
use crate::message::{self, Message};
use crate::repo;

const PRIVATE_STREAM_CAP: i64 = 100;
const GROUP_STREAM_CAP: i64 = 200;

pub struct ArchiveWorker {
    hot: HotStore,
    pool: PgPool,
    period: Duration,
}

impl ArchiveWorker {
    pub fn new(hot: HotStore, pool: PgPool, period_secs: u64) -> Self {
        Self {
            hot,
            pool,
            period: Duration::from_secs(period_secs),
        }
    }

    /// Runs until `shutdown` is notified. The shutdown check is only
    /// observed at a tick boundary — an in-progress tick always finishes
    /// (spec: "the archive worker's shutdown is cooperative at the tick
    /// boundary").
    pub async fn run(self, shutdown: Arc<Notify>) {
        let mut ticker = interval(self.period);
        ticker.tick().await;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.notified() => {
                    info!("archive worker shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.run_tick().await;
                }
            }
        }
    }

    /// Runs the three archival passes sequentially, per spec (parallelizing
    /// them is a valid optimization this implementation doesn't take, to
    /// keep "no two workers on the same key" trivially true). Returns
    /// whether at least one pass made forward progress without error.
    pub async fn run_tick(&self) -> bool {
        let private_ok = self.archive_private_streams().await;
        let group_ok = self.archive_group_streams().await;
        let friends_ok = self.archive_friendships().await;
        private_ok || group_ok || friends_ok
    }

    async fn archive_private_streams(&self) -> bool {
        let keys = match self.hot.keys_matching("chat:*:*").await {
            Ok(keys) => keys,
            Err(err) => {
                warn!(%err, "archive: failed to list private stream keys");
                return false;
            }
        };

        let mut any_ok = false;
        for key in keys.into_iter().filter(|k| !k.ends_with(":last_archive")) {
            if self.archive_one_private_stream(&key).await {
                any_ok = true;
            }
        }
        any_ok
    }

    async fn archive_one_private_stream(&self, key: &str) -> bool {
        let parts: Vec<&str> = key.split(':').collect();
        if parts.len() != 3 || parts[0] != "chat" {
            warn!(key, "archive: malformed private stream key, skipping");
            return false;
        }

        match self.hot.key_type(key).await {
            Ok(KeyType::List) => {}
            Ok(_) => {
                warn!(key, "archive: private stream key has wrong hot-store type, skipping");
                return false;
            }
            Err(err) => {
                warn!(%err, key, "archive: failed to check type of private stream key");
                return false;
            }
        }

        let high_water = self.read_high_water(key).await;
        let entries = match self.hot.list_range(key, 0, -1).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(%err, key, "archive: failed to read private stream");
                return false;
            }
        };

        let fresh: Vec<Message> = entries
            .iter()
            .filter_map(|raw| Message::from_json(raw))
            .filter(|msg| msg.timestamp > high_water)
            .collect();
        if fresh.is_empty() {
            return true;
        }

        if let Err(err) = repo::messages::archive_private_batch(&self.pool, &fresh).await {
            warn!(%err, key, "archive: failed to persist private stream batch");
            return false;
        }

        let new_high = fresh.iter().map(|m| m.timestamp).max().unwrap_or(high_water);
        if let Err(err) = self
            .hot
            .set(&message::archive_high_water_key(key), &new_high.to_string())
            .await
        {
            warn!(%err, key, "archive: failed to advance high-water mark");
            return false;
        }
        if let Err(err) = self.hot.list_trim(key, -PRIVATE_STREAM_CAP, -1).await {
            warn!(%err, key, "archive: failed to trim private stream");
        }
        true
    }

    async fn archive_group_streams(&self) -> bool {
        let keys = match self.hot.keys_matching("group:*:messages").await {
            Ok(keys) => keys,
            Err(err) => {
                warn!(%err, "archive: failed to list group stream keys");
                return false;
            }
        };

        let mut any_ok = false;
        for key in keys.into_iter().filter(|k| !k.ends_with(":last_archive")) {
            if self.archive_one_group_stream(&key).await {
                any_ok = true;
            }
        }
        any_ok
    }

    async fn archive_one_group_stream(&self, key: &str) -> bool {
        let parts: Vec<&str> = key.split(':').collect();
        let Some(group_id) = (if parts.len() == 3 && parts[0] == "group" && parts[2] == "messages" {
            parts[1].parse::<i64>().ok()
        } else {
            None
        }) else {
            warn!(key, "archive: malformed group stream key, skipping");
            return false;
        };

        match self.hot.key_type(key).await {
            Ok(KeyType::List) => {}
            Ok(_) => {
                warn!(key, "archive: group stream key has wrong hot-store type, skipping");
                return false;
            }
            Err(err) => {
                warn!(%err, key, "archive: failed to check type of group stream key");
                return false;
            }
        }

        match repo::groups::exists(&self.pool, group_id).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(group_id, "archive: group no longer exists, skipping stream");
                return false;
            }
            Err(err) => {
                warn!(%err, group_id, "archive: failed to check group existence");
                return false;
            }
        }

        let high_water = self.read_high_water(key).await;
        let entries = match self.hot.list_range(key, 0, -1).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(%err, key, "archive: failed to read group stream");
                return false;
            }
        };

        let fresh: Vec<Message> = entries
            .iter()
            .filter_map(|raw| Message::from_json(raw))
            .filter(|msg| msg.timestamp > high_water)
            .collect();
        if fresh.is_empty() {
            return true;
        }

        if let Err(err) = repo::messages::archive_group_batch(&self.pool, group_id, &fresh).await {
            warn!(%err, key, "archive: failed to persist group stream batch");
            return false;
        }

        let new_high = fresh.iter().map(|m| m.timestamp).max().unwrap_or(high_water);
        if let Err(err) = self
            .hot
            .set(&message::archive_high_water_key(key), &new_high.to_string())
            .await
        {
            warn!(%err, key, "archive: failed to advance high-water mark");
            return false;
        }
        if let Err(err) = self.hot.list_trim(key, -GROUP_STREAM_CAP, -1).await {
            warn!(%err, key, "archive: failed to trim group stream");
        }
        true
    }

    async fn archive_friendships(&self) -> bool {
        let keys = match self.hot.keys_matching("user:*:friends").await {
            Ok(keys) => keys,
            Err(err) => {
                warn!(%err, "archive: failed to list friendship keys");
                return false;
            }
        };

        let mut any_ok = false;
        for key in keys {
            let parts: Vec<&str> = key.split(':').collect();
            let Some(user_id) = (if parts.len() == 3 && parts[0] == "user" && parts[2] == "friends" {
                parts[1].parse::<i64>().ok()
            } else {
                None
            }) else {
                warn!(key = key.as_str(), "archive: malformed friendship key, skipping");
                continue;
            };

            let members = match self.hot.set_members(&key).await {
                Ok(members) => members,
                Err(err) => {
                    warn!(%err, user_id, "archive: failed to read friendship set");
                    continue;
                }
            };

            for friend in members.iter().filter_map(|m| m.parse::<i64>().ok()) {
                let (smaller, larger) = message::canonical_pair(user_id, friend);
                match repo::friendships::insert_if_missing(&self.pool, smaller, larger).await {
                    Ok(()) => any_ok = true,
                    Err(err) => {
                        warn!(%err, smaller, larger, "archive: failed to persist friendship pair");
                    }
                }
            }
        }
        any_ok
    }

    async fn read_high_water(&self, stream_key: &str) -> i64 {
        self.hot
            .get(&message::archive_high_water_key(stream_key))
            .await
            .ok()
            .flatten()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pool() -> PgPool {
        sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/nonexistent")
            .expect("lazy pool construction never touches the network")
    }

    #[tokio::test]
    async fn malformed_private_key_is_skipped_without_panicking() {
        let hot = HotStore::in_memory();
        hot.set("chat:not-a-pair", "x").await.unwrap();
        let worker = ArchiveWorker::new(hot, test_pool(), 3600);
        assert!(!worker.archive_one_private_stream("chat:not-a-pair").await);
    }

    #[tokio::test]
    async fn high_water_defaults_to_zero_when_unset() {
        let hot = HotStore::in_memory();
        let worker = ArchiveWorker::new(hot, test_pool(), 3600);
        assert_eq!(worker.read_high_water("chat:1:2").await, 0);
    }

    #[tokio::test]
    async fn wrong_type_key_is_skipped() {
        let hot = HotStore::in_memory();
        hot.set("group:9:messages", "not-a-list").await.unwrap();
        let worker = ArchiveWorker::new(hot, test_pool(), 3600);
        assert!(!worker.archive_one_group_stream("group:9:messages").await);
    }
}
