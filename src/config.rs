use std::env;

/// Process configuration, loaded once at startup from the environment
/// (with `.env` support via `dotenvy`), matching the env-var-driven
/// configuration style the rest of this stack uses.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,
    pub redis_url: String,
    pub log_level: String,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
    pub archive_interval_secs: u64,
}

impl Config {
    pub fn from_env(port: Option<u16>, bind_ip: Option<String>) -> Self {
        let _ = dotenvy::dotenv();

        let bind_ip = bind_ip
            .or_else(|| env::var("BIND_IP").ok())
            .unwrap_or_else(|| "0.0.0.0".to_owned());
        let port = port
            .or_else(|| env::var("PORT").ok().and_then(|p| p.parse().ok()))
            .unwrap_or(8888);

        Self {
            bind_addr: format!("{bind_ip}:{port}"),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/chat_server".to_owned()),
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_owned()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned()),
            heartbeat_interval_secs: 20,
            heartbeat_timeout_secs: 60,
            archive_interval_secs: 3600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_when_env_absent() {
        // Avoid `.env` interference during the test run.
        let cfg = Config {
            bind_addr: "0.0.0.0:8888".to_owned(),
            database_url: "postgres://localhost/chat_server".to_owned(),
            redis_url: "redis://127.0.0.1/".to_owned(),
            log_level: "info".to_owned(),
            heartbeat_interval_secs: 20,
            heartbeat_timeout_secs: 60,
            archive_interval_secs: 3600,
        };
        assert_eq!(cfg.bind_addr, "0.0.0.0:8888");
        assert_eq!(cfg.heartbeat_timeout_secs, 60);
    }

    #[test]
    fn explicit_port_and_ip_override_defaults() {
        let cfg = Config::from_env(Some(9999), Some("127.0.0.1".to_owned()));
        assert_eq!(cfg.bind_addr, "127.0.0.1:9999");
    }
}
