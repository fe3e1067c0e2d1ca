use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Pre-compiled regex for hostname validation (compiled once at first use)
static HOSTNAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][-a-zA-Z0-9\.]*[a-zA-Z0-9]$").unwrap());

/// Notification channel the store publishes pending requests on.
pub const DEFAULT_CHANNEL: &str = "http";

#[derive(Debug, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub server: Option<ServerSection>,
    #[serde(default)]
    pub logging: Option<LoggingSection>,
    #[serde(default)]
    pub database: Option<DatabaseSection>,
    #[serde(default)]
    pub fetch: Option<FetchSection>,
    #[serde(default)]
    pub http_client: Option<HttpClientSection>,
}

#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub json: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseSection {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub max_connections: Option<u32>,
    #[serde(default)]
    pub min_connections: Option<u32>,
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct FetchSection {
    #[serde(default)]
    pub enable: Option<bool>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub min_poll: Option<usize>,
    #[serde(default)]
    pub check_interval_secs: Option<u64>,
    #[serde(default)]
    pub heartbeat_millis: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct HttpClientSection {
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Load a RawConfigFile from a path. The format is inferred from the extension: .toml, .yaml/.yml, .json
pub fn load_raw_from_file<P: AsRef<Path>>(path: P) -> Result<RawConfigFile, ConfigError> {
    let path = path.as_ref();
    let s = fs::read_to_string(path)?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase());
    parse_config_str(&s, ext.as_deref())
}

/// Parse configuration from a string with optional format hint
#[inline]
fn parse_config_str(s: &str, ext: Option<&str>) -> Result<RawConfigFile, ConfigError> {
    match ext {
        #[cfg(feature = "toml")]
        Some("toml") => toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string())),
        #[cfg(feature = "yaml")]
        Some("yaml" | "yml") => {
            serde_yaml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
        }
        #[cfg(feature = "json")]
        Some("json") => serde_json::from_str(s).map_err(|e| ConfigError::Parse(e.to_string())),
        _ => parse_config_auto(s),
    }
}

/// Try to parse config by attempting each enabled format
#[inline]
fn parse_config_auto(s: &str) -> Result<RawConfigFile, ConfigError> {
    #[cfg(feature = "toml")]
    if let Ok(cfg) = toml::from_str(s) {
        return Ok(cfg);
    }

    #[cfg(feature = "json")]
    if let Ok(cfg) = serde_json::from_str(s) {
        return Ok(cfg);
    }

    #[cfg(feature = "yaml")]
    if let Ok(cfg) = serde_yaml::from_str(s) {
        return Ok(cfg);
    }

    #[cfg(any(feature = "yaml", feature = "toml", feature = "json"))]
    {
        Err(ConfigError::Parse(
            "failed to parse config as any supported format".into(),
        ))
    }

    #[cfg(not(any(feature = "yaml", feature = "toml", feature = "json")))]
    {
        let _ = s;
        Err(ConfigError::Parse("no config format enabled".into()))
    }
}

/// Concrete application configuration with defaults.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    pub fetch: FetchConfig,
    pub http_client: HttpClientConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
}

/// Settings consumed by the dispatch core.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchConfig {
    /// Module enable flag; when false the listener and dispatcher are not started.
    pub enable: bool,
    pub channel: String,
    /// Default ceiling for concurrently in-flight outbound calls.
    pub min_poll: usize,
    /// Interval of the listener liveness check.
    pub check_interval_secs: u64,
    /// Interval of the periodic queue re-drain.
    pub heartbeat_millis: u64,
}

impl FetchConfig {
    #[inline]
    pub const fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    #[inline]
    pub const fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HttpClientConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl HttpClientConfig {
    #[inline]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 4977,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 10,
                min_connections: 1,
                connect_timeout_secs: 30,
            },
            fetch: FetchConfig {
                enable: true,
                channel: DEFAULT_CHANNEL.to_string(),
                min_poll: 5,
                check_interval_secs: 5 * 60,
                heartbeat_millis: 1000,
            },
            http_client: HttpClientConfig {
                timeout_secs: 60,
                user_agent: concat!("pqfetch/", env!("CARGO_PKG_VERSION")).to_string(),
            },
        }
    }
}

#[inline]
fn parse_bool(s: &str) -> Result<bool, ()> {
    let bytes = s.as_bytes();
    match bytes {
        b"1" | b"true" | b"TRUE" | b"True" | b"yes" | b"YES" | b"Yes" | b"y" | b"Y" | b"on" => {
            Ok(true)
        }
        b"0" | b"false" | b"FALSE" | b"False" | b"no" | b"NO" | b"No" | b"n" | b"N" | b"off" => {
            Ok(false)
        }
        _ => match s.to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "on" => Ok(true),
            "false" | "no" | "n" | "off" => Ok(false),
            _ => Err(()),
        },
    }
}

/// Helper macro to apply optional value if present
macro_rules! apply_opt {
    ($target:expr, $source:expr) => {
        if let Some(v) = $source {
            $target = v;
        }
    };
    ($target:expr, $source:expr, wrap) => {
        if let Some(v) = $source {
            $target = Some(v);
        }
    };
}

/// Load concrete `Config` from optional file and environment variables.
/// Environment variables take precedence over file values and defaults.
pub fn load_config<P: AsRef<Path>>(path: Option<P>) -> Result<Config, ConfigError> {
    let mut cfg = Config::default();

    if let Some(p) = path {
        let raw = load_raw_from_file(p)?;
        apply_raw(&mut cfg, raw);
    }

    apply_env_overrides(&mut cfg)?;

    Ok(cfg)
}

fn apply_raw(cfg: &mut Config, raw: RawConfigFile) {
    if let Some(server) = raw.server {
        apply_opt!(cfg.server.host, server.host);
        apply_opt!(cfg.server.port, server.port);
    }
    if let Some(logging) = raw.logging {
        apply_opt!(cfg.logging.level, logging.level);
        apply_opt!(cfg.logging.json, logging.json);
    }
    if let Some(db) = raw.database {
        apply_opt!(cfg.database.url, db.url, wrap);
        apply_opt!(cfg.database.max_connections, db.max_connections);
        apply_opt!(cfg.database.min_connections, db.min_connections);
        apply_opt!(cfg.database.connect_timeout_secs, db.connect_timeout_secs);
    }
    if let Some(fetch) = raw.fetch {
        apply_opt!(cfg.fetch.enable, fetch.enable);
        apply_opt!(cfg.fetch.channel, fetch.channel);
        apply_opt!(cfg.fetch.min_poll, fetch.min_poll);
        apply_opt!(cfg.fetch.check_interval_secs, fetch.check_interval_secs);
        apply_opt!(cfg.fetch.heartbeat_millis, fetch.heartbeat_millis);
    }
    if let Some(http) = raw.http_client {
        apply_opt!(cfg.http_client.timeout_secs, http.timeout_secs);
        apply_opt!(cfg.http_client.user_agent, http.user_agent);
    }
}

/// Helper to parse env var as a specific type
#[inline]
fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Parse(format!("invalid {}: {}", key, e))),
        Err(_) => Ok(None),
    }
}

/// Helper to parse env var as bool
#[inline]
fn env_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    match env::var(key) {
        Ok(v) => parse_bool(v.trim())
            .map(Some)
            .map_err(|_| ConfigError::Parse(format!("invalid {}", key))),
        Err(_) => Ok(None),
    }
}

/// Helper to get env var as string
#[inline]
fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

/// Apply all environment variable overrides to config
fn apply_env_overrides(cfg: &mut Config) -> Result<(), ConfigError> {
    // Server
    if let Some(v) = env_str("PQFETCH_SERVER_HOST") {
        cfg.server.host = v;
    }
    if let Some(v) = env_parse::<u16>("PQFETCH_SERVER_PORT")? {
        cfg.server.port = v;
    }

    // Logging
    if let Some(v) = env_str("PQFETCH_LOG_LEVEL") {
        cfg.logging.level = v;
    }
    if let Some(v) = env_bool("PQFETCH_LOG_JSON")? {
        cfg.logging.json = v;
    }

    // Database
    if let Some(v) = env_str("PQFETCH_DATABASE_URL") {
        cfg.database.url = Some(v);
    }
    if let Some(v) = env_parse::<u32>("PQFETCH_DB_MAX_CONNECTIONS")? {
        cfg.database.max_connections = v;
    }
    if let Some(v) = env_parse::<u32>("PQFETCH_DB_MIN_CONNECTIONS")? {
        cfg.database.min_connections = v;
    }
    if let Some(v) = env_parse::<u64>("PQFETCH_DB_CONNECT_TIMEOUT_SECS")? {
        cfg.database.connect_timeout_secs = v;
    }

    // Fetch
    if let Some(v) = env_bool("PQFETCH_FETCH_ENABLE")? {
        cfg.fetch.enable = v;
    }
    if let Some(v) = env_str("PQFETCH_FETCH_CHANNEL") {
        cfg.fetch.channel = v;
    }
    if let Some(v) = env_parse::<usize>("PQFETCH_FETCH_MIN_POLL")? {
        cfg.fetch.min_poll = v;
    }
    if let Some(v) = env_parse::<u64>("PQFETCH_FETCH_CHECK_INTERVAL_SECS")? {
        cfg.fetch.check_interval_secs = v;
    }
    if let Some(v) = env_parse::<u64>("PQFETCH_FETCH_HEARTBEAT_MILLIS")? {
        cfg.fetch.heartbeat_millis = v;
    }

    // HTTP client
    if let Some(v) = env_parse::<u64>("PQFETCH_HTTP_TIMEOUT_SECS")? {
        cfg.http_client.timeout_secs = v;
    }
    if let Some(v) = env_str("PQFETCH_HTTP_USER_AGENT") {
        cfg.http_client.user_agent = v;
    }

    Ok(())
}

/// Validate higher-level constraints on the resolved configuration.
pub fn validate_config(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.server.port == 0 {
        return Err(ConfigError::Validation("server.port must be > 0".into()));
    }
    let host_ok = cfg.server.host.parse::<std::net::IpAddr>().is_ok()
        || HOSTNAME_REGEX.is_match(&cfg.server.host);
    if !host_ok {
        return Err(ConfigError::Validation(format!(
            "invalid server.host: {}",
            cfg.server.host
        )));
    }

    if let Some(raw) = cfg.database.url.as_deref() {
        match url::Url::parse(raw) {
            Ok(u) if matches!(u.scheme(), "postgres" | "postgresql") => {}
            Ok(u) => {
                return Err(ConfigError::Validation(format!(
                    "database.url must use the postgres scheme, got {}",
                    u.scheme()
                )))
            }
            Err(e) => {
                return Err(ConfigError::Validation(format!(
                    "invalid database.url: {e}"
                )))
            }
        }
    }
    if cfg.database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be > 0".into(),
        ));
    }
    if cfg.database.min_connections > cfg.database.max_connections {
        return Err(ConfigError::Validation(
            "database.min_connections must not exceed database.max_connections".into(),
        ));
    }

    if cfg.fetch.channel.trim().is_empty() {
        return Err(ConfigError::Validation("fetch.channel must not be empty".into()));
    }
    if cfg.fetch.min_poll == 0 {
        return Err(ConfigError::Validation("fetch.min_poll must be >= 1".into()));
    }
    if cfg.fetch.check_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "fetch.check_interval_secs must be >= 1".into(),
        ));
    }
    if cfg.fetch.heartbeat_millis == 0 {
        return Err(ConfigError::Validation(
            "fetch.heartbeat_millis must be >= 1".into(),
        ));
    }
    if cfg.http_client.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "http_client.timeout_secs must be >= 1".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn parse_toml() {
        let f = NamedTempFile::new().expect("tmpfile");
        std::fs::write(
            f.path(),
            r#"
[server]
host = "127.0.0.1"
port = 6000

[database]
url = "postgres://localhost/apostol"

[fetch]
min_poll = 12
"#,
        )
        .unwrap();
        let cfg = load_raw_from_file(f.path()).expect("load");
        let s = cfg.server.unwrap();
        assert_eq!(s.host.unwrap(), "127.0.0.1");
        assert_eq!(s.port.unwrap(), 6000);
        assert_eq!(cfg.fetch.unwrap().min_poll, Some(12));
        assert_eq!(
            cfg.database.unwrap().url.as_deref(),
            Some("postgres://localhost/apostol")
        );
    }

    #[test]
    fn parse_yaml() {
        let f = NamedTempFile::new().expect("tmpfile");
        std::fs::write(
            f.path(),
            r#"
server:
  host: 0.0.0.0
  port: 9000
fetch:
  enable: false
  check_interval_secs: 60
"#,
        )
        .unwrap();
        let cfg = load_raw_from_file(f.path()).expect("load");
        let fetch = cfg.fetch.unwrap();
        assert_eq!(fetch.enable, Some(false));
        assert_eq!(fetch.check_interval_secs, Some(60));
        assert_eq!(cfg.server.unwrap().port, Some(9000));
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        assert!(cfg.fetch.enable);
        assert_eq!(cfg.fetch.channel, "http");
        assert_eq!(cfg.fetch.check_interval(), Duration::from_secs(300));
        validate_config(&cfg).expect("defaults validate");
    }

    #[test]
    fn raw_values_override_defaults() {
        let mut cfg = Config::default();
        let raw: RawConfigFile = serde_json::from_str(
            r#"{"fetch": {"min_poll": 2, "heartbeat_millis": 250}, "http_client": {"timeout_secs": 5}}"#,
        )
        .unwrap();
        apply_raw(&mut cfg, raw);
        assert_eq!(cfg.fetch.min_poll, 2);
        assert_eq!(cfg.fetch.heartbeat(), Duration::from_millis(250));
        assert_eq!(cfg.http_client.timeout(), Duration::from_secs(5));
        // untouched sections keep defaults
        assert_eq!(cfg.server.port, 4977);
    }

    #[test]
    fn env_overrides() {
        let keys = [
            "PQFETCH_FETCH_MIN_POLL",
            "PQFETCH_FETCH_ENABLE",
            "PQFETCH_HTTP_TIMEOUT_SECS",
        ];
        for k in &keys {
            std::env::remove_var(k);
        }

        std::env::set_var("PQFETCH_FETCH_MIN_POLL", "7");
        std::env::set_var("PQFETCH_FETCH_ENABLE", "off");
        std::env::set_var("PQFETCH_HTTP_TIMEOUT_SECS", "15");

        let cfg = load_config::<&Path>(None).expect("load config");
        assert_eq!(cfg.fetch.min_poll, 7);
        assert!(!cfg.fetch.enable);
        assert_eq!(cfg.http_client.timeout_secs, 15);

        for k in &keys {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn rejects_zero_ceiling() {
        let mut cfg = Config::default();
        cfg.fetch.min_poll = 0;
        assert!(matches!(
            validate_config(&cfg),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn rejects_non_postgres_url() {
        let mut cfg = Config::default();
        cfg.database.url = Some("mysql://localhost/db".into());
        let err = validate_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("postgres scheme"));

        cfg.database.url = Some("postgresql://user@localhost/db".into());
        validate_config(&cfg).expect("postgresql scheme accepted");
    }

    #[test]
    fn bool_parsing() {
        assert_eq!(parse_bool("Yes"), Ok(true));
        assert_eq!(parse_bool("OFF"), Ok(false));
        assert!(parse_bool("maybe").is_err());
    }
}
