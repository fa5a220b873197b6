//! HotStore (C1): the fast key-value tier shared by [`crate::messaging::MessagingCore`]
//! and [`crate::archive::ArchiveWorker`]. Two backends implement the same surface:
//! a Redis-backed one for production, and an in-memory one for tests and for
//! running without an external Redis, mirroring how this stack keeps a real
//! `sqlx::PgPool` in production but fakes cold storage in unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::RwLock;

use crate::error::ChatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    None,
    String,
    Hash,
    Set,
    List,
}

#[derive(Clone)]
pub struct HotStore {
    backend: Backend,
}

#[derive(Clone)]
enum Backend {
    Redis(ConnectionManager),
    Memory(Arc<RwLock<HashMap<String, MemValue>>>),
}

enum MemValue {
    Str(String, Option<Instant>),
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
    List(VecDeque<String>),
}

impl MemValue {
    fn key_type(&self) -> KeyType {
        match self {
            MemValue::Str(..) => KeyType::String,
            MemValue::Hash(_) => KeyType::Hash,
            MemValue::Set(_) => KeyType::Set,
            MemValue::List(_) => KeyType::List,
        }
    }
}

impl HotStore {
    pub async fn connect(redis_url: &str) -> Result<Self, ChatError> {
        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self {
            backend: Backend::Redis(manager),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(Arc::new(RwLock::new(HashMap::new()))),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, ChatError> {
        match &self.backend {
            Backend::Redis(conn) => Ok(conn.clone().get(key).await?),
            Backend::Memory(map) => {
                let mut map = map.write().await;
                Ok(Self::mem_read_str(&mut map, key))
            }
        }
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), ChatError> {
        match &self.backend {
            Backend::Redis(conn) => {
                let _: () = conn.clone().set(key, value).await?;
            }
            Backend::Memory(map) => {
                map.write()
                    .await
                    .insert(key.to_owned(), MemValue::Str(value.to_owned(), None));
            }
        }
        Ok(())
    }

    pub async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<(), ChatError> {
        match &self.backend {
            Backend::Redis(conn) => {
                let _: () = conn.clone().set_ex(key, value, ttl_seconds).await?;
            }
            Backend::Memory(map) => {
                let expires_at = Instant::now() + Duration::from_secs(ttl_seconds);
                map.write().await.insert(
                    key.to_owned(),
                    MemValue::Str(value.to_owned(), Some(expires_at)),
                );
            }
        }
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> Result<bool, ChatError> {
        match &self.backend {
            Backend::Redis(conn) => Ok(conn.clone().exists(key).await?),
            Backend::Memory(map) => {
                let mut map = map.write().await;
                Self::mem_expire_if_needed(&mut map, key);
                Ok(map.contains_key(key))
            }
        }
    }

    pub async fn del(&self, key: &str) -> Result<(), ChatError> {
        match &self.backend {
            Backend::Redis(conn) => {
                let _: () = conn.clone().del(key).await?;
            }
            Backend::Memory(map) => {
                map.write().await.remove(key);
            }
        }
        Ok(())
    }

    pub async fn key_type(&self, key: &str) -> Result<KeyType, ChatError> {
        match &self.backend {
            Backend::Redis(conn) => {
                let type_name: String = redis::cmd("TYPE")
                    .arg(key)
                    .query_async(&mut conn.clone())
                    .await?;
                Ok(match type_name.as_str() {
                    "string" => KeyType::String,
                    "hash" => KeyType::Hash,
                    "set" => KeyType::Set,
                    "list" => KeyType::List,
                    _ => KeyType::None,
                })
            }
            Backend::Memory(map) => {
                let mut map = map.write().await;
                Self::mem_expire_if_needed(&mut map, key);
                Ok(map.get(key).map(MemValue::key_type).unwrap_or(KeyType::None))
            }
        }
    }

    pub async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, ChatError> {
        match &self.backend {
            Backend::Redis(conn) => Ok(conn.clone().keys(pattern).await?),
            Backend::Memory(map) => {
                let map = map.read().await;
                Ok(map
                    .keys()
                    .filter(|k| glob_match(pattern, k))
                    .cloned()
                    .collect())
            }
        }
    }

    pub async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), ChatError> {
        match &self.backend {
            Backend::Redis(conn) => {
                let _: () = conn.clone().hset(key, field, value).await?;
            }
            Backend::Memory(map) => {
                let mut map = map.write().await;
                match map.entry(key.to_owned()).or_insert_with(|| MemValue::Hash(HashMap::new())) {
                    MemValue::Hash(h) => {
                        h.insert(field.to_owned(), value.to_owned());
                    }
                    _ => return Err(ChatError::UpstreamFailure(format!("{key} is not a hash"))),
                }
            }
        }
        Ok(())
    }

    pub async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, ChatError> {
        match &self.backend {
            Backend::Redis(conn) => Ok(conn.clone().hget(key, field).await?),
            Backend::Memory(map) => {
                let map = map.read().await;
                Ok(match map.get(key) {
                    Some(MemValue::Hash(h)) => h.get(field).cloned(),
                    _ => None,
                })
            }
        }
    }

    pub async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, String)>, ChatError> {
        match &self.backend {
            Backend::Redis(conn) => {
                let map: HashMap<String, String> = conn.clone().hgetall(key).await?;
                Ok(map.into_iter().collect())
            }
            Backend::Memory(map) => {
                let map = map.read().await;
                Ok(match map.get(key) {
                    Some(MemValue::Hash(h)) => h.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                    _ => Vec::new(),
                })
            }
        }
    }

    pub async fn set_add(&self, key: &str, member: &str) -> Result<bool, ChatError> {
        match &self.backend {
            Backend::Redis(conn) => {
                let added: i64 = conn.clone().sadd(key, member).await?;
                Ok(added > 0)
            }
            Backend::Memory(map) => {
                let mut map = map.write().await;
                match map.entry(key.to_owned()).or_insert_with(|| MemValue::Set(HashSet::new())) {
                    MemValue::Set(s) => Ok(s.insert(member.to_owned())),
                    _ => Err(ChatError::UpstreamFailure(format!("{key} is not a set"))),
                }
            }
        }
    }

    pub async fn set_remove(&self, key: &str, member: &str) -> Result<(), ChatError> {
        match &self.backend {
            Backend::Redis(conn) => {
                let _: () = conn.clone().srem(key, member).await?;
            }
            Backend::Memory(map) => {
                if let Some(MemValue::Set(s)) = map.write().await.get_mut(key) {
                    s.remove(member);
                }
            }
        }
        Ok(())
    }

    pub async fn set_members(&self, key: &str) -> Result<Vec<String>, ChatError> {
        match &self.backend {
            Backend::Redis(conn) => Ok(conn.clone().smembers(key).await?),
            Backend::Memory(map) => {
                let map = map.read().await;
                Ok(match map.get(key) {
                    Some(MemValue::Set(s)) => s.iter().cloned().collect(),
                    _ => Vec::new(),
                })
            }
        }
    }

    pub async fn set_contains(&self, key: &str, member: &str) -> Result<bool, ChatError> {
        match &self.backend {
            Backend::Redis(conn) => Ok(conn.clone().sismember(key, member).await?),
            Backend::Memory(map) => {
                let map = map.read().await;
                Ok(matches!(map.get(key), Some(MemValue::Set(s)) if s.contains(member)))
            }
        }
    }

    pub async fn set_cardinality(&self, key: &str) -> Result<u64, ChatError> {
        match &self.backend {
            Backend::Redis(conn) => Ok(conn.clone().scard(key).await?),
            Backend::Memory(map) => {
                let map = map.read().await;
                Ok(match map.get(key) {
                    Some(MemValue::Set(s)) => s.len() as u64,
                    _ => 0,
                })
            }
        }
    }

    pub async fn list_append(&self, key: &str, value: &str) -> Result<(), ChatError> {
        match &self.backend {
            Backend::Redis(conn) => {
                let _: () = conn.clone().rpush(key, value).await?;
            }
            Backend::Memory(map) => {
                match map.write().await.entry(key.to_owned()).or_insert_with(|| MemValue::List(VecDeque::new())) {
                    MemValue::List(l) => l.push_back(value.to_owned()),
                    _ => return Err(ChatError::UpstreamFailure(format!("{key} is not a list"))),
                }
            }
        }
        Ok(())
    }

    pub async fn list_range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, ChatError> {
        match &self.backend {
            Backend::Redis(conn) => Ok(conn.clone().lrange(key, start as isize, stop as isize).await?),
            Backend::Memory(map) => {
                let map = map.read().await;
                let list = match map.get(key) {
                    Some(MemValue::List(l)) => l,
                    _ => return Ok(Vec::new()),
                };
                let len = list.len() as i64;
                let (s, e) = resolve_range(start, stop, len);
                if s > e || len == 0 {
                    return Ok(Vec::new());
                }
                Ok(list
                    .iter()
                    .skip(s as usize)
                    .take((e - s + 1) as usize)
                    .cloned()
                    .collect())
            }
        }
    }

    pub async fn list_trim(&self, key: &str, start: i64, stop: i64) -> Result<(), ChatError> {
        match &self.backend {
            Backend::Redis(conn) => {
                let _: () = conn.clone().ltrim(key, start as isize, stop as isize).await?;
            }
            Backend::Memory(map) => {
                let mut map = map.write().await;
                if let Some(MemValue::List(l)) = map.get_mut(key) {
                    let len = l.len() as i64;
                    let (s, e) = resolve_range(start, stop, len);
                    if s > e || len == 0 {
                        l.clear();
                    } else {
                        let trimmed: VecDeque<String> = l
                            .iter()
                            .skip(s as usize)
                            .take((e - s + 1) as usize)
                            .cloned()
                            .collect();
                        *l = trimmed;
                    }
                }
            }
        }
        Ok(())
    }

    pub async fn list_set(&self, key: &str, index: i64, value: &str) -> Result<(), ChatError> {
        match &self.backend {
            Backend::Redis(conn) => {
                let _: () = conn.clone().lset(key, index as isize, value).await?;
            }
            Backend::Memory(map) => {
                let mut map = map.write().await;
                if let Some(MemValue::List(l)) = map.get_mut(key) {
                    let len = l.len() as i64;
                    let idx = if index < 0 { len + index } else { index };
                    if idx < 0 || idx >= len {
                        return Err(ChatError::UpstreamFailure("index out of range".to_owned()));
                    }
                    l[idx as usize] = value.to_owned();
                }
            }
        }
        Ok(())
    }

    pub async fn list_length(&self, key: &str) -> Result<u64, ChatError> {
        match &self.backend {
            Backend::Redis(conn) => Ok(conn.clone().llen(key).await?),
            Backend::Memory(map) => {
                let map = map.read().await;
                Ok(match map.get(key) {
                    Some(MemValue::List(l)) => l.len() as u64,
                    _ => 0,
                })
            }
        }
    }

    fn mem_read_str(map: &mut HashMap<String, MemValue>, key: &str) -> Option<String> {
        Self::mem_expire_if_needed(map, key);
        match map.get(key) {
            Some(MemValue::Str(v, _)) => Some(v.clone()),
            _ => None,
        }
    }

    fn mem_expire_if_needed(map: &mut HashMap<String, MemValue>, key: &str) {
        let expired = matches!(map.get(key), Some(MemValue::Str(_, Some(exp))) if Instant::now() >= *exp);
        if expired {
            map.remove(key);
        }
    }
}

/// Resolves Redis-style (possibly negative) start/stop indices into a
/// clamped `[0, len-1]` inclusive range. Returns `(start, end)` with
/// `start > end` signaling an empty result.
fn resolve_range(start: i64, stop: i64, len: i64) -> (i64, i64) {
    let norm = |i: i64| -> i64 {
        if i < 0 {
            (len + i).max(0)
        } else {
            i
        }
    };
    let s = norm(start);
    let e = norm(stop).min(len - 1);
    (s, e)
}

/// A minimal glob matcher supporting only `*` (the only wildcard the hot
/// store's key patterns use, e.g. `chat:*:*`).
fn glob_match(pattern: &str, text: &str) -> bool {
    fn helper(p: &[u8], t: &[u8]) -> bool {
        match p.first() {
            None => t.is_empty(),
            Some(b'*') => helper(&p[1..], t) || (!t.is_empty() && helper(p, &t[1..])),
            Some(c) => t.first() == Some(c) && helper(&p[1..], &t[1..]),
        }
    }
    helper(pattern.as_bytes(), text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_append_and_trim_bound_hot_stream_length() {
        let store = HotStore::in_memory();
        for i in 0..105 {
            store.list_append("chat:1:2", &i.to_string()).await.unwrap();
        }
        assert_eq!(store.list_length("chat:1:2").await.unwrap(), 105);
        store.list_trim("chat:1:2", -100, -1).await.unwrap();
        assert_eq!(store.list_length("chat:1:2").await.unwrap(), 100);
        let all = store.list_range("chat:1:2", 0, -1).await.unwrap();
        assert_eq!(all.first().unwrap(), "5");
        assert_eq!(all.last().unwrap(), "104");
    }

    #[tokio::test]
    async fn list_set_supports_negative_index() {
        let store = HotStore::in_memory();
        store.list_append("k", "a").await.unwrap();
        store.list_append("k", "b").await.unwrap();
        store.list_set("k", -1, "B").await.unwrap();
        let all = store.list_range("k", 0, -1).await.unwrap();
        assert_eq!(all, vec!["a".to_owned(), "B".to_owned()]);
    }

    #[tokio::test]
    async fn set_with_ttl_expires_on_read() {
        let store = HotStore::in_memory();
        store.set_with_ttl("flag", "1", 0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(store.get("flag").await.unwrap(), None);
    }

    #[tokio::test]
    async fn keys_matching_supports_star_patterns() {
        let store = HotStore::in_memory();
        store.set("chat:1:2", "x").await.unwrap();
        store.set("chat:3:4", "y").await.unwrap();
        store.set("group:9:messages", "z").await.unwrap();
        let mut chat_keys = store.keys_matching("chat:*:*").await.unwrap();
        chat_keys.sort();
        assert_eq!(chat_keys, vec!["chat:1:2".to_owned(), "chat:3:4".to_owned()]);
    }

    #[tokio::test]
    async fn set_operations_are_idempotent_on_add() {
        let store = HotStore::in_memory();
        assert!(store.set_add("s", "1").await.unwrap());
        assert!(!store.set_add("s", "1").await.unwrap());
        assert_eq!(store.set_cardinality("s").await.unwrap(), 1);
    }
}
