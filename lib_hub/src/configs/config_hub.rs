use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::connections::BackoffPolicy;
use crate::error::HubError;

pub const DEFAULT_CONFIG_FILE: &str = "hub_server.conf";
pub const DEFAULT_QUEUE: &str = "Hub-messages";
pub const DEFAULT_PORT: u16 = 3010;
pub const DEFAULT_PROXY_URL: &str = "localhost:8084";
pub const DEFAULT_REDIS_HOST: &str = "localhost";
pub const DEFAULT_REDIS_PORT: u16 = 6379;

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[command(about = "Hub server: relays broker queue messages to WebSocket connections", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[arg(long, env = "PORT", help = "Port to listen on for HTTP and WebSocket traffic.")]
    pub port: Option<u16>,

    #[arg(long, env = "HUB_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[arg(long, env = "ROOT_PATH", help = "Directory holding index.html and images/.")]
    pub root_path: Option<PathBuf>,

    #[arg(long, env = "PROXY_URL", help = "Upstream host:port that receives /api requests.")]
    pub proxy_url: Option<String>,

    #[arg(long, env = "REDIS_HOST", help = "Redis host.")]
    pub redis_host: Option<String>,

    #[arg(long, env = "REDIS_PORT", help = "Redis port.")]
    pub redis_port: Option<u16>,

    #[arg(long, env = "redisPwd", help = "Redis password (empty for none).")]
    pub redis_password: Option<String>,

    #[arg(long, env = "HUB_QUEUE", help = "Name of the Redis list the relay consumes.")]
    pub queue_name: Option<String>,

    #[arg(long, env = "HUB_POP_TIMEOUT_SECS", help = "Seconds one BLPOP waits before it is re-issued.")]
    pub pop_timeout_secs: Option<u64>,

    #[arg(long, env = "HUB_RECONNECT_BASE_DELAY_MS", help = "Base delay in milliseconds for broker reconnect attempts.")]
    pub reconnect_base_delay_ms: Option<u64>,

    #[arg(long, env = "HUB_RECONNECT_MAX_DELAY_MS", help = "Maximum delay in milliseconds for broker reconnect attempts.")]
    pub reconnect_max_delay_ms: Option<u64>,

    #[arg(long, env = "HUB_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[arg(long, env = "HUB_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[arg(long, env = "HUB_MAX_LOG_FILES", help = "Number of daily log files to keep.")]
    pub max_log_files: Option<usize>,
}

impl Config {
    /// Built-in defaults, the lowest-precedence layer.
    pub fn defaults() -> Config {
        Config {
            port: Some(DEFAULT_PORT),
            root_path: Some(PathBuf::from(".")),
            proxy_url: Some(DEFAULT_PROXY_URL.to_string()),
            redis_host: Some(DEFAULT_REDIS_HOST.to_string()),
            redis_port: Some(DEFAULT_REDIS_PORT),
            redis_password: Some(String::new()),
            queue_name: Some(DEFAULT_QUEUE.to_string()),
            pop_timeout_secs: Some(5),
            reconnect_base_delay_ms: Some(1000),
            reconnect_max_delay_ms: Some(60000),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            max_log_files: Some(5),
            ..Default::default()
        }
    }

    // Merge two Config structs, where 'other' overrides 'self' for Some values
    pub fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            root_path: other.root_path.or(self.root_path),
            proxy_url: other.proxy_url.or(self.proxy_url),
            redis_host: other.redis_host.or(self.redis_host),
            redis_port: other.redis_port.or(self.redis_port),
            redis_password: other.redis_password.or(self.redis_password),
            queue_name: other.queue_name.or(self.queue_name),
            pop_timeout_secs: other.pop_timeout_secs.or(self.pop_timeout_secs),
            reconnect_base_delay_ms: other.reconnect_base_delay_ms.or(self.reconnect_base_delay_ms),
            reconnect_max_delay_ms: other.reconnect_max_delay_ms.or(self.reconnect_max_delay_ms),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            max_log_files: other.max_log_files.or(self.max_log_files),
        }
    }

    /// Fills every remaining gap with its default and builds the Redis URL.
    pub fn resolve(self) -> Result<HubConfig, HubError> {
        let redis_host = self.redis_host.unwrap_or_else(|| DEFAULT_REDIS_HOST.to_string());
        let redis_port = self.redis_port.unwrap_or(DEFAULT_REDIS_PORT);
        let redis_password = self.redis_password.unwrap_or_default();
        let redis_url = redis_url(&redis_host, redis_port, &redis_password)?;

        let base = Duration::from_millis(self.reconnect_base_delay_ms.unwrap_or(1000));
        let max = Duration::from_millis(self.reconnect_max_delay_ms.unwrap_or(60000)).max(base);

        Ok(HubConfig {
            port: self.port.unwrap_or(DEFAULT_PORT),
            root_path: self.root_path.unwrap_or_else(|| PathBuf::from(".")),
            proxy_url: self.proxy_url.unwrap_or_else(|| DEFAULT_PROXY_URL.to_string()),
            redis_host,
            redis_port,
            redis_url,
            queue_name: self.queue_name.unwrap_or_else(|| DEFAULT_QUEUE.to_string()),
            pop_timeout: Duration::from_secs(self.pop_timeout_secs.unwrap_or(5).max(1)),
            reconnect: BackoffPolicy::unbounded(base, max),
            log_dir: self.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: self.log_level.unwrap_or_else(|| "info".to_string()),
            max_log_files: self.max_log_files.unwrap_or(5).max(1),
        })
    }
}

/// Fully-resolved settings consumed by the server.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub port: u16,
    pub root_path: PathBuf,
    pub proxy_url: String,
    pub redis_host: String,
    pub redis_port: u16,
    /// Includes the password when one is set; never log it.
    pub redis_url: String,
    pub queue_name: String,
    pub pop_timeout: Duration,
    pub reconnect: BackoffPolicy,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub max_log_files: usize,
}

/// Builds `redis://[:password@]host:port/`, percent-encoding the password.
pub fn redis_url(host: &str, port: u16, password: &str) -> Result<String, HubError> {
    let mut url = Url::parse(&format!("redis://{host}:{port}/"))
        .map_err(|e| HubError::Config(format!("invalid redis host {host:?}: {e}")))?;
    if !password.is_empty() {
        url.set_password(Some(password))
            .map_err(|_| HubError::Config("redis URL cannot carry a password".to_string()))?;
    }
    Ok(url.to_string())
}

fn read_config_file(path: &Path) -> Result<Config, HubError> {
    let config_str = fs::read_to_string(path)?;
    Ok(serde_json::from_str::<Config>(&config_str)?)
}

/// Loads `.env`, parses the command line and environment, and resolves the
/// layered configuration.
pub fn load_config() -> Result<HubConfig, HubError> {
    // A missing .env file is the normal case.
    let _ = dotenvy::dotenv();
    load_config_from(Config::parse())
}

/// Layers defaults, the config file and `cli` (which already carries env vars).
pub fn load_config_from(cli: Config) -> Result<HubConfig, HubError> {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = Config::defaults();

    if config_file_path.exists() {
        match read_config_file(&config_file_path) {
            Ok(file_config) => current_config = current_config.merge(file_config),
            Err(e) => tracing::warn!(
                "Failed to load config file {}: {}. Falling back to other sources.",
                config_file_path.display(),
                e
            ),
        }
    } else {
        tracing::debug!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            config_file_path.display()
        );
    }

    current_config.merge(cli).resolve()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn later_layers_override_earlier_ones() {
        let file = Config {
            port: Some(4000),
            queue_name: Some("from-file".to_string()),
            ..Default::default()
        };
        let cli = Config {
            port: Some(5000),
            ..Default::default()
        };

        let merged = Config::defaults().merge(file).merge(cli);
        assert_eq!(merged.port, Some(5000));
        assert_eq!(merged.queue_name.as_deref(), Some("from-file"));
        assert_eq!(merged.proxy_url.as_deref(), Some(DEFAULT_PROXY_URL));
    }

    #[test]
    fn resolve_fills_defaults() {
        let config = Config::default().resolve().expect("resolves");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.queue_name, DEFAULT_QUEUE);
        assert_eq!(config.redis_url, "redis://localhost:6379/");
        assert_eq!(config.pop_timeout, Duration::from_secs(5));
        assert_eq!(config.reconnect.base, Duration::from_millis(1000));
        assert_eq!(config.reconnect.max_retries, None);
    }

    #[test]
    fn password_is_encoded_into_the_url() {
        assert_eq!(
            redis_url("cache.local", 6380, "p@ss word").unwrap(),
            "redis://:p%40ss%20word@cache.local:6380/"
        );
    }

    #[test]
    fn cli_arguments_parse_with_long_flags() {
        let cli = Config::try_parse_from([
            "server_hub",
            "--port",
            "8123",
            "--queue-name",
            "Other-messages",
            "--pop-timeout-secs",
            "0",
        ])
        .expect("valid args");
        assert_eq!(cli.port, Some(8123));

        let config = Config::defaults().merge(cli).resolve().unwrap();
        assert_eq!(config.queue_name, "Other-messages");
        // A zero wait would park the blocking pool forever.
        assert_eq!(config.pop_timeout, Duration::from_secs(1));
    }

    #[test]
    fn config_file_layer_is_applied_and_bad_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("hub.conf");
        let mut f = fs::File::create(&good).unwrap();
        write!(f, r#"{{"port": 7001, "rootPath": "/srv/hub", "queueName": "Q"}}"#).unwrap();

        let config = load_config_from(Config {
            config_path: Some(good),
            queue_name: Some("cli-wins".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.port, 7001);
        assert_eq!(config.root_path, PathBuf::from("/srv/hub"));
        assert_eq!(config.queue_name, "cli-wins");

        let bad = dir.path().join("broken.conf");
        fs::write(&bad, "{ not json").unwrap();
        let config = load_config_from(Config {
            config_path: Some(bad),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
    }
}
