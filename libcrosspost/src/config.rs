//! Configuration management for Crosspost

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{ConfigError, Result};
use crate::types::Platform;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub capacity: CapacityConfig,
    #[serde(default)]
    pub platforms: HashMap<String, PlatformLimits>,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

/// Retry, TTL, and lease knobs for the broker and workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Maximum publish attempts per content item.
    pub max_attempts: u32,
    /// Base retry delay in seconds; actual delay is `base * attempts` (linear).
    pub base_delay_seconds: i64,
    /// Message TTL in seconds; expired messages mark their content `expired`.
    pub message_ttl_seconds: i64,
    /// Redelivery delay after a rate-limit denial (not a failure).
    pub rate_limit_delay_seconds: i64,
    /// Visibility lease per delivery; an unacknowledged message is
    /// redelivered once the lease lapses.
    pub lease_seconds: i64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_seconds: 300,
            message_ttl_seconds: 24 * 3600,
            rate_limit_delay_seconds: 60,
            lease_seconds: 120,
        }
    }
}

/// Global admission budget for one discovery run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityConfig {
    pub max_users: u32,
    pub max_posts_per_user: u32,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            max_users: 50,
            max_posts_per_user: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformLimits {
    /// Worker slots for this platform (also caps per-platform admissions per run).
    pub concurrency: u32,
    /// Publishes admitted per 60-second window.
    pub rate_per_minute: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// Seconds between discovery runs in continuous mode.
    pub poll_interval: u64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self { poll_interval: 60 }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let mut config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;

        if let Ok(db_path) = std::env::var("CROSSPOST_DB_PATH") {
            config.database.path = db_path;
        }

        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        let mut platforms = HashMap::new();
        platforms.insert(
            "facebook".to_string(),
            PlatformLimits {
                concurrency: 10,
                rate_per_minute: 50,
            },
        );
        platforms.insert(
            "instagram".to_string(),
            PlatformLimits {
                concurrency: 8,
                rate_per_minute: 40,
            },
        );
        platforms.insert(
            "linkedin".to_string(),
            PlatformLimits {
                concurrency: 5,
                rate_per_minute: 30,
            },
        );
        platforms.insert(
            "youtube".to_string(),
            PlatformLimits {
                concurrency: 5,
                rate_per_minute: 20,
            },
        );

        Self {
            database: DatabaseConfig {
                path: "~/.local/share/crosspost/crosspost.db".to_string(),
            },
            delivery: DeliveryConfig::default(),
            capacity: CapacityConfig::default(),
            platforms,
            scheduling: SchedulingConfig::default(),
        }
    }

    /// Worker slots for a platform. Platforms absent from the config get a
    /// conservative single slot rather than being dropped.
    pub fn concurrency_limit(&self, platform: Platform) -> u32 {
        self.platforms
            .get(platform.as_str())
            .map(|l| l.concurrency)
            .unwrap_or(1)
    }

    /// Per-minute publish budget for a platform, if one is configured.
    pub fn rate_limit(&self, platform: Platform) -> Option<u32> {
        self.platforms
            .get(platform.as_str())
            .map(|l| l.rate_per_minute)
    }

    /// Total admissions allowed in one discovery run.
    pub fn admission_budget(&self) -> u32 {
        self.capacity.max_users * self.capacity.max_posts_per_user
    }
}

/// Resolve the configuration file path following the XDG Base Directory convention
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CROSSPOST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("crosspost").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_platform_limits() {
        let config = Config::default_config();

        assert_eq!(config.concurrency_limit(Platform::Facebook), 10);
        assert_eq!(config.concurrency_limit(Platform::Instagram), 8);
        assert_eq!(config.concurrency_limit(Platform::Linkedin), 5);
        assert_eq!(config.concurrency_limit(Platform::Youtube), 5);

        assert_eq!(config.rate_limit(Platform::Facebook), Some(50));
    }

    #[test]
    fn test_admission_budget() {
        let config = Config::default_config();
        assert_eq!(config.admission_budget(), 500);
    }

    #[test]
    fn test_unconfigured_platform_gets_one_slot() {
        let mut config = Config::default_config();
        config.platforms.remove("youtube");

        assert_eq!(config.concurrency_limit(Platform::Youtube), 1);
        assert_eq!(config.rate_limit(Platform::Youtube), None);
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml_str = r#"
[database]
path = "/tmp/test.db"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();

        assert_eq!(config.database.path, "/tmp/test.db");
        // Sections fall back to defaults
        assert_eq!(config.delivery.max_attempts, 3);
        assert_eq!(config.delivery.base_delay_seconds, 300);
        assert_eq!(config.delivery.message_ttl_seconds, 86400);
        assert_eq!(config.capacity.max_users, 50);
        assert_eq!(config.scheduling.poll_interval, 60);
    }

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[database]
path = "/tmp/test.db"

[delivery]
max_attempts = 5
base_delay_seconds = 60
message_ttl_seconds = 3600
rate_limit_delay_seconds = 30
lease_seconds = 90

[capacity]
max_users = 2
max_posts_per_user = 3

[platforms.facebook]
concurrency = 2
rate_per_minute = 5

[scheduling]
poll_interval = 10
"#;
        let config: Config = toml::from_str(toml_str).unwrap();

        assert_eq!(config.delivery.max_attempts, 5);
        assert_eq!(config.admission_budget(), 6);
        assert_eq!(config.concurrency_limit(Platform::Facebook), 2);
        assert_eq!(config.rate_limit(Platform::Facebook), Some(5));
        assert_eq!(config.scheduling.poll_interval, 10);
    }

    #[test]
    #[serial_test::serial]
    fn test_db_path_env_override() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "[database]\npath = \"/tmp/from-file.db\"\n").unwrap();

        std::env::set_var("CROSSPOST_DB_PATH", "/tmp/from-env.db");
        let config = Config::load_from_path(&config_path).unwrap();
        std::env::remove_var("CROSSPOST_DB_PATH");

        assert_eq!(config.database.path, "/tmp/from-env.db");
    }

    #[test]
    #[serial_test::serial]
    fn test_config_path_env_override() {
        std::env::set_var("CROSSPOST_CONFIG", "/tmp/somewhere/config.toml");
        let path = resolve_config_path().unwrap();
        std::env::remove_var("CROSSPOST_CONFIG");

        assert_eq!(path, PathBuf::from("/tmp/somewhere/config.toml"));
    }

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let config = Config::default_config();
        let serialized = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();

        assert_eq!(parsed.database.path, config.database.path);
        assert_eq!(parsed.platforms.len(), config.platforms.len());
    }
}
