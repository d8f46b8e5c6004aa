use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub stations: StationsConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Cycle scheduling and engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Seconds between the start of two cycles when running as a loop.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Wall-clock budget of one cycle. A cycle that exceeds it is abandoned.
    #[serde(default = "default_cycle_budget_secs")]
    pub cycle_budget_secs: u64,
    /// Upper bound on a single adapter poll.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    /// Number of recent plays carried in each snapshot's `song_history`.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_key")]
    pub key: String,
    #[serde(default = "default_cache_tags")]
    pub tags: Vec<String>,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Prepended to every metric path (`<prefix>.station.<code>.listeners`).
    #[serde(default)]
    pub prefix: String,
    /// Optional line-protocol file. Metrics only go to the log when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationsConfig {
    /// Path to the TOML station file.
    /// Defaults to `$XDG_CONFIG_HOME/radio-sync/stations.toml`.
    #[serde(default = "default_stations_toml")]
    pub stations_toml: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "platform::data_dir")]
    pub data_dir: PathBuf,
}

impl PathsConfig {
    pub fn snapshots_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }

    pub fn history_file(&self) -> PathBuf {
        self.data_dir.join("history.tsv")
    }

    pub fn songs_file(&self) -> PathBuf {
        self.data_dir.join("songs.json")
    }

    pub fn log_file(&self) -> PathBuf {
        self.data_dir.join("sync.log")
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn cycle_budget(&self) -> Duration {
        Duration::from_secs(self.cycle_budget_secs.max(1))
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs.max(1))
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            cycle_budget_secs: default_cycle_budget_secs(),
            poll_timeout_secs: default_poll_timeout_secs(),
            history_window: default_history_window(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key: default_cache_key(),
            tags: default_cache_tags(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for StationsConfig {
    fn default() -> Self {
        Self {
            stations_toml: default_stations_toml(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: platform::data_dir(),
        }
    }
}

fn default_interval_secs() -> u64 {
    60
}

fn default_cycle_budget_secs() -> u64 {
    60
}

fn default_poll_timeout_secs() -> u64 {
    10
}

fn default_history_window() -> usize {
    5
}

fn default_cache_key() -> String {
    "api_nowplaying_data".to_string()
}

fn default_cache_tags() -> Vec<String> {
    vec!["nowplaying".to_string()]
}

fn default_cache_ttl_secs() -> u64 {
    60
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8989
}

fn default_stations_toml() -> PathBuf {
    platform::config_dir().join("stations.toml")
}

impl Config {
    /// Load from the default location, writing a default file on first run.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save_to(&config_path)?;
            return Ok(config);
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.http.enabled);
        assert_eq!(config.http.port, 8989);
        assert_eq!(config.sync.cycle_budget_secs, 60);
        assert_eq!(config.sync.history_window, 5);
        assert_eq!(config.cache.key, "api_nowplaying_data");
        assert_eq!(config.cache.tags, vec!["nowplaying".to_string()]);
        assert_eq!(config.cache.ttl_secs, 60);
        assert!(config.metrics.file.is_none());
        assert!(config
            .stations
            .stations_toml
            .ends_with("radio-sync/stations.toml"));
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config = Config::parse(
            r#"
            [sync]
            interval_secs = 15

            [metrics]
            prefix = "radio"
            "#,
        )
        .unwrap();
        assert_eq!(config.sync.interval_secs, 15);
        assert_eq!(config.sync.poll_timeout_secs, 10);
        assert_eq!(config.metrics.prefix, "radio");
        assert_eq!(config.cache.ttl_secs, 60);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.sync.history_window = 12;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.sync.history_window, 12);
    }

    #[test]
    fn test_durations_never_zero() {
        let sync = SyncConfig {
            interval_secs: 0,
            cycle_budget_secs: 0,
            poll_timeout_secs: 0,
            history_window: 0,
        };
        assert_eq!(sync.interval(), Duration::from_secs(1));
        assert_eq!(sync.cycle_budget(), Duration::from_secs(1));
        assert_eq!(sync.poll_timeout(), Duration::from_secs(1));
    }
}
