use std::path::Path;

use config::Config;
use config::ConfigError;
use config::File;
use mw_types::Subscription;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct BurstConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_burst_capacity")]
    pub capacity: usize,
    #[serde(default = "default_burst_rate")]
    pub max_items_per_second: u32,
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self { enabled: false, capacity: default_burst_capacity(), max_items_per_second: default_burst_rate() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmergencyConfig {
    #[serde(default = "default_max_global_attempts")]
    pub max_global_attempts: u32,
    #[serde(default = "default_emergency_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self { max_global_attempts: default_max_global_attempts(), cooldown_secs: default_emergency_cooldown_secs() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatcherConfig {
    /// Base websocket endpoint for live searches.
    pub ws_base: String,
    /// Base HTTP endpoint for listing detail fetches.
    pub fetch_base: String,
    /// Session credential sent as a cookie on every connection and fetch.
    #[serde(default)]
    pub session: String,
    /// Percentage of each quota window kept in reserve.
    #[serde(default = "default_safety_threshold_pct")]
    pub safety_threshold_pct: u32,
    /// Minimum spacing between connection attempts across all listeners.
    #[serde(default = "default_search_queue_delay_ms")]
    pub search_queue_delay_ms: u64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default)]
    pub burst: BurstConfig,
    #[serde(default)]
    pub emergency: EmergencyConfig,
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            ws_base: String::new(),
            fetch_base: String::new(),
            session: String::new(),
            safety_threshold_pct: default_safety_threshold_pct(),
            search_queue_delay_ms: default_search_queue_delay_ms(),
            tick_interval_ms: default_tick_interval_ms(),
            burst: BurstConfig::default(),
            emergency: EmergencyConfig::default(),
            subscriptions: Vec::new(),
        }
    }
}

fn default_burst_capacity() -> usize {
    64
}

fn default_burst_rate() -> u32 {
    4
}

fn default_max_global_attempts() -> u32 {
    20
}

fn default_emergency_cooldown_secs() -> u64 {
    300
}

fn default_safety_threshold_pct() -> u32 {
    10
}

fn default_search_queue_delay_ms() -> u64 {
    1_000
}

fn default_tick_interval_ms() -> u64 {
    500
}

pub fn load_watcher_config<P: AsRef<Path>>(path: P) -> Result<WatcherConfig, ConfigError> {
    let config = Config::builder().add_source(File::from(path.as_ref())).build()?;

    config.try_deserialize()
}

/// Load watcher config with fallback to default
pub fn load_watcher_config_or_default(path: &str) -> WatcherConfig {
    match load_watcher_config(path) {
        Ok(config) => {
            tracing::info!("Loaded watcher config from {path}");
            config
        }
        Err(err) => {
            tracing::warn!("Failed to load watcher config from {}: {}. Using defaults.", path, err);
            WatcherConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WatcherConfig::default();

        assert_eq!(config.safety_threshold_pct, 10);
        assert_eq!(config.search_queue_delay_ms, 1_000);
        assert_eq!(config.tick_interval_ms, 500);
        assert!(!config.burst.enabled);
        assert_eq!(config.emergency.max_global_attempts, 20);
        assert!(config.subscriptions.is_empty());
    }

    #[test]
    fn test_config_from_file() {
        let dir = std::env::temp_dir().join("mw_watcher_config_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("watcher.toml");
        std::fs::write(
            &path,
            r#"
ws_base = "wss://example.test/api/live"
fetch_base = "https://example.test/api/fetch"
session = "abc"
safety_threshold_pct = 25

[burst]
enabled = true
max_items_per_second = 2

[[subscriptions]]
market = "standard"
search_id = "abc123"
label = "chase boots"

[[subscriptions]]
market = "standard"
search_id = "def456"
enabled = false
"#,
        )
        .unwrap();

        let config = load_watcher_config(&path).unwrap();
        assert_eq!(config.safety_threshold_pct, 25);
        assert!(config.burst.enabled);
        assert_eq!(config.burst.max_items_per_second, 2);
        assert_eq!(config.burst.capacity, 64);
        assert_eq!(config.subscriptions.len(), 2);
        assert!(config.subscriptions[0].is_active());
        assert!(!config.subscriptions[1].is_active());
    }
}
