use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use chat_server::archive::ArchiveWorker;
use chat_server::email::NoopEmailGateway;
use chat_server::heartbeat::HeartbeatSupervisor;
use chat_server::hot_store::HotStore;
use chat_server::server::Server;
use chat_server::{db, AppState, Config};

/// `server [port] [bind-ip]`, defaulting to 8888 and 0.0.0.0.
#[derive(Parser)]
#[command(name = "chat-server")]
struct Cli {
    port: Option<u16>,
    bind_ip: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = Config::from_env(cli.port, cli.bind_ip);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.log_level))
        .init();

    info!("connecting to database...");
    let pool = db::create_pool(&config.database_url).await;
    db::run_migrations(&pool).await;
    info!("migrations applied");

    let hot = match HotStore::connect(&config.redis_url).await {
        Ok(hot) => {
            info!(redis_url = %config.redis_url, "connected to Redis hot store");
            hot
        }
        Err(err) => {
            warn!(%err, "failed to connect to Redis, falling back to in-memory hot store");
            HotStore::in_memory()
        }
    };

    let state = AppState::new(pool.clone(), hot.clone(), Arc::new(NoopEmailGateway));

    let server = Server::bind(&config.bind_addr, state.clone())
        .await
        .expect("failed to bind server");
    let local_addr = server.local_addr().expect("local_addr always succeeds after bind");
    info!(addr = %local_addr, "chat server listening");

    let shutdown = Arc::new(tokio::sync::Notify::new());

    let heartbeat = HeartbeatSupervisor::new(
        state.sessions.clone(),
        config.heartbeat_interval_secs,
        config.heartbeat_timeout_secs,
    );
    let heartbeat_shutdown = shutdown.clone();
    let heartbeat_handle = tokio::spawn(heartbeat.run(heartbeat_shutdown));

    let archiver = ArchiveWorker::new(hot, pool, config.archive_interval_secs);
    let archive_shutdown = shutdown.clone();
    let archive_handle = tokio::spawn(archiver.run(archive_shutdown));

    let server_shutdown = shutdown.clone();
    let server_handle = tokio::spawn(server.run(server_shutdown));

    shutdown_signal().await;
    info!("shutting down: stopping accept loop and archive worker");
    shutdown.notify_waiters();

    let _ = server_handle.await;
    let _ = heartbeat_handle.await;
    let _ = archive_handle.await;
    info!("chat server shut down gracefully");
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
