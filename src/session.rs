//! SessionRegistry (C7): maps `userId -> connection` and tracks
//! per-connection last-activity, enforcing the single-login-per-user
//! invariant. Modeled on this stack's `Arc<RwLock<HashMap<...>>>` session
//! idiom (see the original `state.rs`'s `ReceiverSessionRegistry`), but
//! split across two maps (connection state, and the user -> connection
//! reverse index) since `lookup` is far hotter than `bind`/`unbind` — a
//! single coarse lock would serialize fan-out behind every login.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::{Notify, RwLock};

pub type ConnectionId = u64;
pub type FrameSender = UnboundedSender<String>;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_connection_id() -> ConnectionId {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

struct ConnEntry {
    sender: FrameSender,
    user_id: Option<i64>,
    last_activity: Instant,
    /// Notified by [`SessionRegistry::force_close`]; the connection's read
    /// loop selects on this alongside its socket read to implement the
    /// heartbeat supervisor's eviction (spec §4.7) without reaching into
    /// the transport directly.
    close: Arc<Notify>,
}

#[derive(Default)]
pub struct SessionRegistry {
    conns: RwLock<HashMap<ConnectionId, ConnEntry>>,
    by_user: RwLock<HashMap<i64, ConnectionId>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly-accepted connection and returns its close
    /// signal so the caller's read loop can select on it immediately.
    pub async fn register_connection(&self, conn_id: ConnectionId, sender: FrameSender) -> Arc<Notify> {
        let close = Arc::new(Notify::new());
        self.conns.write().await.insert(
            conn_id,
            ConnEntry {
                sender,
                user_id: None,
                last_activity: Instant::now(),
                close: close.clone(),
            },
        );
        close
    }

    /// The close signal for `conn_id`, if it is still registered. The
    /// connection's read loop holds a clone from registration time and
    /// selects on it; this accessor exists only so [`force_close`] can be
    /// implemented without storing a second map keyed by connection.
    pub async fn close_signal(&self, conn_id: ConnectionId) -> Option<Arc<Notify>> {
        self.conns.read().await.get(&conn_id).map(|e| e.close.clone())
    }

    /// Wakes the connection's read loop so it can tear itself down. Unlike
    /// `remove_connection`, this does not touch the registry — the
    /// connection task removes itself on its way out, same as a normal
    /// disconnect.
    pub async fn force_close(&self, conn_id: ConnectionId) {
        if let Some(close) = self.close_signal(conn_id).await {
            close.notify_one();
        }
    }

    /// Binds `user_id` to `conn_id`. If the user already had a live
    /// connection, it is evicted and its id returned so the caller can
    /// send it a "logged in elsewhere" frame and force-close it outside
    /// any lock this method holds.
    pub async fn bind(&self, user_id: i64, conn_id: ConnectionId) -> Option<ConnectionId> {
        let evicted = {
            let mut by_user = self.by_user.write().await;
            by_user.insert(user_id, conn_id)
        };

        let mut conns = self.conns.write().await;
        if let Some(entry) = conns.get_mut(&conn_id) {
            entry.user_id = Some(user_id);
        }

        evicted.filter(|prev| *prev != conn_id)
    }

    pub async fn unbind(&self, user_id: i64) {
        let mut by_user = self.by_user.write().await;
        if let Some(conn_id) = by_user.remove(&user_id) {
            if let Some(entry) = self.conns.write().await.get_mut(&conn_id) {
                entry.user_id = None;
            }
        }
    }

    pub async fn lookup(&self, user_id: i64) -> Option<FrameSender> {
        let conn_id = *self.by_user.read().await.get(&user_id)?;
        self.conns
            .read()
            .await
            .get(&conn_id)
            .map(|e| e.sender.clone())
    }

    pub async fn is_online(&self, user_id: i64) -> bool {
        self.by_user.read().await.contains_key(&user_id)
    }

    /// The user id currently bound to `conn_id`, if the connection has
    /// completed login.
    pub async fn current_user(&self, conn_id: ConnectionId) -> Option<i64> {
        self.conns.read().await.get(&conn_id).and_then(|e| e.user_id)
    }

    pub async fn touch(&self, conn_id: ConnectionId) {
        if let Some(entry) = self.conns.write().await.get_mut(&conn_id) {
            entry.last_activity = Instant::now();
        }
    }

    /// Removes a connection that the transport has reported disconnected,
    /// returning the user id it was bound to, if any.
    pub async fn remove_connection(&self, conn_id: ConnectionId) -> Option<i64> {
        let entry = self.conns.write().await.remove(&conn_id);
        let user_id = entry.and_then(|e| e.user_id);
        if let Some(uid) = user_id {
            let mut by_user = self.by_user.write().await;
            if by_user.get(&uid) == Some(&conn_id) {
                by_user.remove(&uid);
            }
        }
        user_id
    }

    pub async fn sweep_idle(&self, threshold: Duration) -> Vec<ConnectionId> {
        let now = Instant::now();
        self.conns
            .read()
            .await
            .iter()
            .filter(|(_, e)| now.duration_since(e.last_activity) > threshold)
            .map(|(id, _)| *id)
            .collect()
    }

    pub async fn send_to(&self, conn_id: ConnectionId, frame: String) -> bool {
        let sender = self.conns.read().await.get(&conn_id).map(|e| e.sender.clone());
        match sender {
            Some(s) => s.send(frame).is_ok(),
            None => false,
        }
    }

    pub async fn send_to_user(&self, user_id: i64, frame: String) -> bool {
        match self.lookup(user_id).await {
            Some(sender) => sender.send(frame).is_ok(),
            None => false,
        }
    }

    pub async fn user_count(&self) -> usize {
        self.by_user.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    #[tokio::test]
    async fn binding_a_second_connection_evicts_the_first() {
        let registry = SessionRegistry::new();
        let (tx1, _rx1) = unbounded_channel();
        let (tx2, _rx2) = unbounded_channel();
        registry.register_connection(1, tx1).await;
        registry.register_connection(2, tx2).await;

        assert_eq!(registry.bind(42, 1).await, None);
        assert_eq!(registry.bind(42, 2).await, Some(1));
        assert_eq!(registry.lookup(42).await.is_some(), true);
    }

    #[tokio::test]
    async fn remove_connection_clears_the_reverse_index() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = unbounded_channel();
        registry.register_connection(1, tx).await;
        registry.bind(7, 1).await;

        assert_eq!(registry.remove_connection(1).await, Some(7));
        assert!(registry.lookup(7).await.is_none());
        assert!(!registry.is_online(7).await);
    }

    #[tokio::test]
    async fn sweep_idle_returns_only_connections_past_threshold() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = unbounded_channel();
        registry.register_connection(1, tx).await;

        assert!(registry.sweep_idle(Duration::from_secs(0)).await.contains(&1));
        assert!(registry
            .sweep_idle(Duration::from_secs(3600))
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn unbind_without_a_prior_bind_is_a_no_op() {
        let registry = SessionRegistry::new();
        registry.unbind(99).await;
        assert!(!registry.is_online(99).await);
    }

    #[tokio::test]
    async fn current_user_reflects_bind_and_unbind() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = unbounded_channel();
        registry.register_connection(1, tx).await;
        assert_eq!(registry.current_user(1).await, None);

        registry.bind(42, 1).await;
        assert_eq!(registry.current_user(1).await, Some(42));

        registry.unbind(42).await;
        assert_eq!(registry.current_user(1).await, None);
    }

    #[tokio::test]
    async fn force_close_wakes_the_registered_signal() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = unbounded_channel();
        let close = registry.register_connection(1, tx).await;

        registry.force_close(1).await;
        close.notified().await;
    }

    #[tokio::test]
    async fn force_close_on_unknown_connection_is_a_no_op() {
        let registry = SessionRegistry::new();
        registry.force_close(999).await;
    }
}
