//! Server (C11): the TCP accept loop and per-connection read/write tasks.
//! Grounded on `services/forwarder/src/local_fanout.rs`'s `FanoutServer` —
//! same bind/local_addr/run shape, same one-task-per-connection split —
//! generalized from raw byte fanout to the line-oriented request/response
//! protocol this server actually speaks.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::unbounded_channel;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::dispatcher;
use crate::protocol;
use crate::repo;
use crate::session::{self, ConnectionId};
use crate::state::AppState;

pub struct Server {
    listener: TcpListener,
    state: AppState,
}

impl Server {
    pub async fn bind(addr: &str, state: AppState) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, state })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the accept loop until `shutdown` is notified. Accepted
    /// connections are handed to their own task and are not waited on —
    /// graceful shutdown here means "stop accepting", per spec §6.3.
    pub async fn run(self, shutdown: Arc<Notify>) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.notified() => {
                    info!("server: accept loop shutting down");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let state = self.state.clone();
                        tokio::spawn(async move {
                            handle_connection(state, stream, peer).await;
                        });
                    }
                    Err(err) => {
                        warn!(%err, "server: accept failed");
                    }
                },
            }
        }
    }
}

async fn handle_connection(state: AppState, stream: TcpStream, peer: SocketAddr) {
    let conn_id = session::next_connection_id();
    let (tx, mut rx) = unbounded_channel::<String>();
    let close = state.sessions.register_connection(conn_id, tx).await;
    info!(conn_id, %peer, "server: connection accepted");

    let (read_half, mut write_half) = stream.into_split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let mut out = frame;
            out.push('\n');
            if write_half.write_all(out.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(read_half).lines();
    loop {
        tokio::select! {
            biased;
            _ = close.notified() => {
                info!(conn_id, "server: connection force-closed by heartbeat supervisor");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => {
                    match protocol::parse(&line) {
                        Some(frame) => {
                            state.sessions.touch(conn_id).await;
                            dispatcher::dispatch(&state, conn_id, frame).await;
                        }
                        None => {
                            // Decoding errors never close the connection (spec §7).
                            state
                                .sessions
                                .send_to(
                                    conn_id,
                                    protocol::encode(
                                        &protocol::Frame::new(protocol::message_type::ERROR)
                                            .with("message", "malformed frame"),
                                    ),
                                )
                                .await;
                        }
                    }
                }
                Ok(None) => {
                    info!(conn_id, "server: peer closed connection");
                    break;
                }
                Err(err) => {
                    warn!(conn_id, %err, "server: read error, closing connection");
                    break;
                }
            },
        }
    }

    finalize_connection(&state, conn_id).await;
    writer.abort();
}

/// Tears down a connection's server-side state: unbinds it from the
/// session registry, marks its user offline in presence, and persists
/// `users.online = false`. Shared by normal disconnect and heartbeat
/// eviction so both paths leave identical state behind.
async fn finalize_connection(state: &AppState, conn_id: ConnectionId) {
    if let Some(user_id) = state.sessions.remove_connection(conn_id).await {
        if let Err(err) = repo::users::set_online(&state.pool, user_id, false).await {
            warn!(%err, user_id, "server: failed to mark user offline");
        }
        if let Err(err) = state.messaging.mark_offline(user_id).await {
            warn!(%err, user_id, "server: failed to clear presence");
        }
    }
}
