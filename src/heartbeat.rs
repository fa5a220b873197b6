//! HeartbeatSupervisor (C9): periodically sweeps the session registry for
//! connections that have gone quiet past the idle timeout and force-closes
//! them (spec §4.7, scenario S5). Runs on its own ticker the same way
//! [`crate::archive::ArchiveWorker`] does, rather than as a timer on the
//! accept loop, since this stack already favors one task per responsibility
//! over a shared event loop (see `services/receiver/src/session.rs`).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::interval;
use tracing::info;

use crate::session::SessionRegistry;

pub struct HeartbeatSupervisor {
    sessions: Arc<SessionRegistry>,
    interval: Duration,
    timeout: Duration,
}

impl HeartbeatSupervisor {
    pub fn new(sessions: Arc<SessionRegistry>, interval_secs: u64, timeout_secs: u64) -> Self {
        Self {
            sessions,
            interval: Duration::from_secs(interval_secs),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub async fn run(self, shutdown: Arc<Notify>) {
        let mut ticker = interval(self.interval);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.notified() => {
                    info!("heartbeat supervisor shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }
    }

    async fn sweep(&self) {
        let idle = self.sessions.sweep_idle(self.timeout).await;
        for conn_id in idle {
            info!(conn_id, "heartbeat: evicting idle connection");
            self.sessions.force_close(conn_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    #[tokio::test]
    async fn sweep_force_closes_connections_past_the_timeout() {
        let sessions = Arc::new(SessionRegistry::new());
        let (tx, _rx) = unbounded_channel();
        let close = sessions.register_connection(1, tx).await;

        let supervisor = HeartbeatSupervisor::new(sessions, 20, 0);
        supervisor.sweep().await;

        close.notified().await;
    }
}
