use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use anyhow::Context;
use pqfetch_config::{Config, FetchConfig};
use pqfetch_db_connection::{DbConnectionConfig, DbConnectionError};
use pqfetch_dispatch::{DispatcherConfig, ListenerConfig};

/// Load configuration and reject it before anything starts when a constraint
/// does not hold.
pub fn load_validated_config(path: Option<&str>) -> anyhow::Result<Config> {
    let config = pqfetch_config::load_config(path)
        .with_context(|| format!("failed to load configuration from {path:?}"))?;
    pqfetch_config::validate_config(&config).context("invalid configuration")?;
    Ok(config)
}

/// Build database connection config from application config.
pub fn database_config_from_config(cfg: &Config) -> Result<DbConnectionConfig, DbConnectionError> {
    let url = cfg
        .database
        .url
        .clone()
        .ok_or_else(|| DbConnectionError::MissingEnvVar("PQFETCH_DATABASE_URL".to_string()))?;

    let db = DbConnectionConfig {
        max_connections: cfg.database.max_connections,
        min_connections: cfg.database.min_connections,
        connect_timeout_secs: cfg.database.connect_timeout_secs,
        ..DbConnectionConfig::new(url)
    };
    db.validate("PQFETCH")?;
    Ok(db)
}

pub fn dispatcher_config(fetch: &FetchConfig) -> DispatcherConfig {
    DispatcherConfig {
        channel: fetch.channel.clone(),
        ceiling: fetch.min_poll,
        heartbeat: fetch.heartbeat(),
    }
}

pub fn listener_config(fetch: &FetchConfig) -> ListenerConfig {
    ListenerConfig {
        channel: fetch.channel.clone(),
        check_interval: fetch.check_interval(),
    }
}

/// Parse host:port into a SocketAddr, with fallback to 0.0.0.0.
pub fn parse_bind_address(host: &str, port: u16) -> SocketAddr {
    host.parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, port))
        .or_else(|_| host.parse::<SocketAddr>())
        .or_else(|_| {
            host.trim_start_matches('[')
                .trim_end_matches(']')
                .parse::<Ipv6Addr>()
                .map(|ip| SocketAddr::new(IpAddr::V6(ip), port))
        })
        .unwrap_or_else(|_| {
            tracing::warn!(host, "unparsable bind host, using 0.0.0.0");
            SocketAddr::from(([0, 0, 0, 0], port))
        })
}
