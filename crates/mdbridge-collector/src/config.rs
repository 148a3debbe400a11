use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mdbridge_binance::BinanceFeedConfig;
use mdbridge_lib::{CollectorSettings, RunnerSettings, SubscriptionTimeouts};

use crate::error::ConfigError;

const DEFAULT_FEED_NAME: &str = "binance-futures";
const DEFAULT_CREDENTIALS: &str = "env:BINANCE_FUTURES_API_KEY,BINANCE_FUTURES_API_SECRET";
const DEFAULT_BAR_SPEC: &str = "1-MINUTE-LAST-EXTERNAL";
const DEFAULT_FLUSH_ROWS: usize = 10_000;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub feed: FeedConfig,
    pub instruments: Vec<String>,
    #[serde(default)]
    pub bar_types: Vec<String>,
    #[serde(default = "default_bar_spec")]
    pub bar_spec: Option<String>,
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub status: StatusConfig,
    /// Run for this long then shut down; absent means until a signal
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default = "default_health_addr")]
    pub health_addr: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    #[serde(default = "default_feed_name")]
    pub name: String,
    #[serde(default)]
    pub testnet: bool,
    #[serde(default)]
    pub ws_url: Option<String>,
    #[serde(default)]
    pub http_url: Option<String>,
    #[serde(default = "default_credentials")]
    pub credentials: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            name: default_feed_name(),
            testnet: false,
            ws_url: None,
            http_url: None,
            credentials: default_credentials(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    pub path: PathBuf,
    #[serde(default = "default_flush_rows")]
    pub flush_rows: usize,
    #[serde(default = "default_flush_interval")]
    pub flush_interval: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutsConfig {
    #[serde(default = "default_connection")]
    pub connection: String,
    #[serde(default = "default_subscribe")]
    pub subscribe: String,
    #[serde(default = "default_disconnection")]
    pub disconnection: String,
    #[serde(default = "default_post_stop")]
    pub post_stop: String,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            connection: default_connection(),
            subscribe: default_subscribe(),
            disconnection: default_disconnection(),
            post_stop: default_post_stop(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StatusConfig {
    #[serde(default = "default_status_interval")]
    pub interval: String,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            interval: default_status_interval(),
        }
    }
}

fn default_feed_name() -> String {
    DEFAULT_FEED_NAME.to_string()
}
fn default_credentials() -> String {
    DEFAULT_CREDENTIALS.to_string()
}
fn default_bar_spec() -> Option<String> {
    Some(DEFAULT_BAR_SPEC.to_string())
}
fn default_flush_rows() -> usize {
    DEFAULT_FLUSH_ROWS
}
fn default_flush_interval() -> String {
    "1m".to_string()
}
fn default_connection() -> String {
    "30s".to_string()
}
fn default_subscribe() -> String {
    "10s".to_string()
}
fn default_disconnection() -> String {
    "10s".to_string()
}
fn default_post_stop() -> String {
    "5s".to_string()
}
fn default_status_interval() -> String {
    "5m".to_string()
}
fn default_health_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every duration and address up front so a bad value fails at
    /// startup rather than mid-run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.runner_settings()?;
        self.subscription_timeouts()?;
        self.run_duration()?;
        self.health_addr()?;
        if self.catalog.flush_rows == 0 {
            return Err(ConfigError::Invalid("catalog.flush_rows must be greater than zero".to_string()));
        }
        Ok(())
    }

    pub fn health_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.health_addr
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("invalid health_addr: {}", self.health_addr)))
    }

    pub fn run_duration(&self) -> Result<Option<Duration>, ConfigError> {
        self.duration.as_deref().map(parse_duration).transpose()
    }

    pub fn subscription_timeouts(&self) -> Result<SubscriptionTimeouts, ConfigError> {
        let subscribe = parse_duration(&self.timeouts.subscribe)?;
        Ok(SubscriptionTimeouts {
            subscribe,
            unsubscribe: subscribe,
        })
    }

    pub fn runner_settings(&self) -> Result<RunnerSettings, ConfigError> {
        Ok(RunnerSettings {
            connection_timeout: parse_duration(&self.timeouts.connection)?,
            disconnection_timeout: parse_duration(&self.timeouts.disconnection)?,
            post_stop_timeout: parse_duration(&self.timeouts.post_stop)?,
            status_interval: parse_duration(&self.status.interval)?,
            flush_interval: parse_duration(&self.catalog.flush_interval)?,
        })
    }

    pub fn collector_settings(&self) -> Result<CollectorSettings, ConfigError> {
        Ok(CollectorSettings {
            feed_name: self.feed.name.clone(),
            instruments: self.instruments.clone(),
            bar_types: self.bar_types.clone(),
            bar_spec: self.bar_spec.clone(),
            timeouts: self.subscription_timeouts()?,
        })
    }

    /// Endpoint preset for the configured network, with overrides applied
    pub fn feed_config(&self, api_key: Option<String>) -> Result<BinanceFeedConfig, ConfigError> {
        let mut config = if self.feed.testnet {
            BinanceFeedConfig::testnet()
        } else {
            BinanceFeedConfig::production()
        };
        if let Some(url) = &self.feed.ws_url {
            config.ws_url = url.clone();
        }
        if let Some(url) = &self.feed.http_url {
            config.http_url = url.clone();
        }
        config.api_key = api_key;
        config.request_timeout = parse_duration(&self.timeouts.subscribe)?;
        Ok(config)
    }
}

/// Parse a duration like "30s", "15m", "1h" or "1d"
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(ConfigError::Invalid("Empty duration".to_string()));
    }

    let (num_str, unit) = s.split_at(s.len() - 1);
    let num: u64 = num_str
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("Invalid duration: {}", s)))?;

    if num == 0 {
        return Err(ConfigError::Invalid(format!(
            "Duration must be greater than zero: {}",
            s
        )));
    }

    match unit {
        "s" => Ok(Duration::from_secs(num)),
        "m" => Ok(Duration::from_secs(num * 60)),
        "h" => Ok(Duration::from_secs(num * 60 * 60)),
        "d" => Ok(Duration::from_secs(num * 60 * 60 * 24)),
        _ => Err(ConfigError::Invalid(format!("Unknown unit: {}", unit))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn load(yaml: &str) -> Result<Config, ConfigError> {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        Config::load(file.path())
    }

    #[test]
    fn test_load_full_config() {
        let config = load(
            r#"
feed:
  name: binance-testnet
  testnet: true
  ws_url: ws://localhost:9000/ws
  credentials: "env:KEY,SECRET"
instruments:
  - ADAUSDT-PERP.BINANCE
  - SOLUSDT-PERP.BINANCE
bar_spec: 5-MINUTE-LAST-EXTERNAL
catalog:
  path: /data/catalog
  flush_rows: 500
  flush_interval: 30s
timeouts:
  connection: 1m
  subscribe: 5s
status:
  interval: 1h
duration: 2h
health_addr: 127.0.0.1:9090
unknown_field: ignored
"#,
        )
        .unwrap();

        assert_eq!(config.feed.name, "binance-testnet");
        assert_eq!(config.instruments.len(), 2);
        assert_eq!(config.catalog.flush_rows, 500);
        assert_eq!(config.run_duration().unwrap(), Some(Duration::from_secs(7200)));
        assert_eq!(config.health_addr().unwrap().port(), 9090);

        let runner = config.runner_settings().unwrap();
        assert_eq!(runner.connection_timeout, Duration::from_secs(60));
        assert_eq!(runner.flush_interval, Duration::from_secs(30));
        assert_eq!(runner.status_interval, Duration::from_secs(3600));
        // Unset values keep their defaults
        assert_eq!(runner.post_stop_timeout, Duration::from_secs(5));

        let feed = config.feed_config(Some("k".to_string())).unwrap();
        assert_eq!(feed.ws_url, "ws://localhost:9000/ws");
        assert_eq!(feed.http_url, "https://testnet.binancefuture.com");
        assert_eq!(feed.request_timeout, Duration::from_secs(5));

        let collector = config.collector_settings().unwrap();
        assert_eq!(collector.bar_spec.as_deref(), Some("5-MINUTE-LAST-EXTERNAL"));
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = load(
            r#"
instruments: [ADAUSDT-PERP.BINANCE]
catalog:
  path: ./catalog
"#,
        )
        .unwrap();
        assert_eq!(config.feed.name, "binance-futures");
        assert_eq!(
            config.feed.credentials,
            "env:BINANCE_FUTURES_API_KEY,BINANCE_FUTURES_API_SECRET"
        );
        assert_eq!(config.bar_spec.as_deref(), Some("1-MINUTE-LAST-EXTERNAL"));
        assert_eq!(config.catalog.flush_rows, 10_000);
        assert_eq!(config.run_duration().unwrap(), None);
        assert_eq!(
            config.feed_config(None).unwrap().ws_url,
            "wss://fstream.binance.com/ws"
        );
    }

    #[test]
    fn test_invalid_duration_rejected_at_load() {
        let result = load(
            r#"
instruments: []
catalog:
  path: ./catalog
duration: 0h
"#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86400));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("0m").is_err());
        assert!(parse_duration("5w").is_err());
        assert!(parse_duration("m").is_err());
    }
}
