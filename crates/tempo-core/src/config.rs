//! Tempo configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, TempoError};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TempoConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    #[serde(default)]
    pub rewards: RewardConfig,
    #[serde(default)]
    pub listing: ListingConfig,
}

impl TempoConfig {
    /// Load config from the default path (~/.tempo/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TempoError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| TempoError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the given path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| TempoError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the engine cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.scheduling.recurrence_cap == 0 {
            return Err(TempoError::Config("scheduling.recurrence_cap must be > 0".into()));
        }
        if self.scheduling.recurrence_horizon_days == 0 {
            return Err(TempoError::Config(
                "scheduling.recurrence_horizon_days must be > 0".into(),
            ));
        }
        if self.scheduling.calendar_utc_offset_minutes.abs() >= 24 * 60 {
            return Err(TempoError::Config(
                "scheduling.calendar_utc_offset_minutes must be within ±24h".into(),
            ));
        }
        if self.listing.default_per_page == 0 || self.listing.max_per_page == 0 {
            return Err(TempoError::Config("listing page sizes must be > 0".into()));
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Tempo home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tempo")
    }
}

/// SQLite database location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String { "~/.tempo/schedule.db".into() }

impl DatabaseConfig {
    /// Database path with `~` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 { 3030 }
fn default_host() -> String { "127.0.0.1".into() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

/// Which status transitions the lifecycle manager accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionPolicy {
    /// Any transition is accepted.
    #[default]
    Permissive,
    /// Terminal states are final and no-op transitions are rejected.
    Strict,
}

/// Scheduling engine knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// Hard ceiling on generated recurrence children, applied even when an
    /// explicit count is larger.
    #[serde(default = "default_recurrence_cap")]
    pub recurrence_cap: u32,
    /// Until-bound used when a recurring event has none.
    #[serde(default = "default_recurrence_horizon_days")]
    pub recurrence_horizon_days: u32,
    #[serde(default)]
    pub transition_policy: TransitionPolicy,
    /// Offset used to bucket calendar views into local days and weeks.
    #[serde(default)]
    pub calendar_utc_offset_minutes: i32,
    #[serde(default = "default_max_calendar_span_days")]
    pub max_calendar_span_days: u32,
}

fn default_recurrence_cap() -> u32 { 50 }
fn default_recurrence_horizon_days() -> u32 { 365 }
fn default_max_calendar_span_days() -> u32 { 366 }

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            recurrence_cap: default_recurrence_cap(),
            recurrence_horizon_days: default_recurrence_horizon_days(),
            transition_policy: TransitionPolicy::default(),
            calendar_utc_offset_minutes: 0,
            max_calendar_span_days: default_max_calendar_span_days(),
        }
    }
}

/// Reward-ledger amounts. `points` is the primary currency, `coins` the
/// secondary one credited alongside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_create_meeting_points")]
    pub create_meeting_points: u32,
    #[serde(default = "default_create_other_points")]
    pub create_other_points: u32,
    #[serde(default = "default_create_meeting_coins")]
    pub create_meeting_coins: u32,
    #[serde(default = "default_create_other_coins")]
    pub create_other_coins: u32,
    #[serde(default = "default_complete_meeting_points")]
    pub complete_meeting_points: u32,
    #[serde(default = "default_complete_other_points")]
    pub complete_other_points: u32,
    #[serde(default = "default_complete_meeting_coins")]
    pub complete_meeting_coins: u32,
    #[serde(default = "default_complete_other_coins")]
    pub complete_other_coins: u32,
}

fn bool_true() -> bool { true }
fn default_create_meeting_points() -> u32 { 10 }
fn default_create_other_points() -> u32 { 8 }
fn default_create_meeting_coins() -> u32 { 5 }
fn default_create_other_coins() -> u32 { 4 }
fn default_complete_meeting_points() -> u32 { 15 }
fn default_complete_other_points() -> u32 { 10 }
fn default_complete_meeting_coins() -> u32 { 8 }
fn default_complete_other_coins() -> u32 { 5 }

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            create_meeting_points: default_create_meeting_points(),
            create_other_points: default_create_other_points(),
            create_meeting_coins: default_create_meeting_coins(),
            create_other_coins: default_create_other_coins(),
            complete_meeting_points: default_complete_meeting_points(),
            complete_other_points: default_complete_other_points(),
            complete_meeting_coins: default_complete_meeting_coins(),
            complete_other_coins: default_complete_other_coins(),
        }
    }
}

/// Pagination defaults for list endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingConfig {
    #[serde(default = "default_per_page")]
    pub default_per_page: u32,
    #[serde(default = "default_max_per_page")]
    pub max_per_page: u32,
}

fn default_per_page() -> u32 { 20 }
fn default_max_per_page() -> u32 { 100 }

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            default_per_page: default_per_page(),
            max_per_page: default_max_per_page(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TempoConfig::default();
        assert_eq!(config.scheduling.recurrence_cap, 50);
        assert_eq!(config.scheduling.recurrence_horizon_days, 365);
        assert_eq!(config.scheduling.transition_policy, TransitionPolicy::Permissive);
        assert_eq!(config.rewards.complete_meeting_points, 15);
        assert_eq!(config.server.port, 3030);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [database]
            path = "/tmp/tempo-test.db"

            [scheduling]
            recurrence_cap = 10
            transition_policy = "strict"
            calendar_utc_offset_minutes = 420

            [rewards]
            create_meeting_points = 12
        "#;

        let config: TempoConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.database.path, "/tmp/tempo-test.db");
        assert_eq!(config.scheduling.recurrence_cap, 10);
        assert_eq!(config.scheduling.transition_policy, TransitionPolicy::Strict);
        assert_eq!(config.scheduling.calendar_utc_offset_minutes, 420);
        assert_eq!(config.rewards.create_meeting_points, 12);
        assert_eq!(config.rewards.create_other_points, 8);
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let config: TempoConfig = toml::from_str("").unwrap();
        assert_eq!(config.listing.default_per_page, 20);
        assert_eq!(config.listing.max_per_page, 100);
        assert!(config.rewards.enabled);
    }

    #[test]
    fn test_validate_rejects_zero_cap() {
        let mut config = TempoConfig::default();
        config.scheduling.recurrence_cap = 0;
        assert!(matches!(config.validate(), Err(TempoError::Config(_))));
    }

    #[test]
    fn test_save_and_load_roundtrip_file() {
        let dir = std::env::temp_dir().join("tempo-config-test");
        let path = dir.join("config.toml");
        let mut config = TempoConfig::default();
        config.server.port = 4040;
        config.save_to(&path).unwrap();

        let loaded = TempoConfig::load_from(&path).unwrap();
        assert_eq!(loaded.server.port, 4040);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_home_dir() {
        let home = TempoConfig::home_dir();
        assert!(home.to_string_lossy().contains("tempo"));
    }

    #[test]
    fn test_resolved_path_expands_tilde() {
        let db = DatabaseConfig::default();
        assert!(db.resolved_path().ends_with("schedule.db"));
        let absolute = DatabaseConfig { path: "/var/lib/tempo/a.db".into() };
        assert_eq!(absolute.resolved_path(), PathBuf::from("/var/lib/tempo/a.db"));
    }
}
