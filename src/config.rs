//! Engine configuration.
//!
//! Configuration is read from a TOML file. Every field has a default, so an
//! empty file (or no file at all) gives a working engine backed by an
//! in-memory database. `DATABASE_URL` overrides `database_url`.

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::competitions::rating::{RatingConfig, Rounding};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub database_url: String,
    pub rating: RatingSection,
    pub scheduler: SchedulerSection,
    pub matchmaker: MatchmakerSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RatingSection {
    pub k_factor: f64,
    pub rounding: Rounding,
    /// Rating given to newly registered teams.
    pub initial_elo: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerSection {
    /// A dispatched fixture with no outcome after this long is voided.
    pub fixture_timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// Whether the round driver opens the next round by itself once the
    /// current one is complete.
    pub auto_advance: bool,
    /// Minimum gap between a round closing and the next one opening.
    pub round_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MatchmakerSection {
    /// Upper bound on the number of partial pairings explored while looking
    /// for a draw without rematches.
    pub search_budget: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: ":memory:".to_string(),
            rating: RatingSection::default(),
            scheduler: SchedulerSection::default(),
            matchmaker: MatchmakerSection::default(),
        }
    }
}

impl Default for RatingSection {
    fn default() -> Self {
        Self {
            k_factor: 32.0,
            rounding: Rounding::Nearest,
            initial_elo: 1000,
        }
    }
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            fixture_timeout_secs: 15 * 60,
            poll_interval_ms: 1000,
            auto_advance: true,
            round_interval_secs: 0,
        }
    }
}

impl Default for MatchmakerSection {
    fn default() -> Self {
        Self {
            search_budget: 10_000,
        }
    }
}

impl EngineConfig {
    /// Loads the configuration from `path` (if any) and applies environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|source| {
                    ConfigError::Read {
                        path: path.display().to_string(),
                        source,
                    }
                })?;
                Self::from_toml(&contents)?
            }
            None => Self::default(),
        };

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.rating.k_factor.is_finite() && self.rating.k_factor > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "rating.k_factor must be a positive number (got {})",
                self.rating.k_factor
            )));
        }
        if self.scheduler.fixture_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.fixture_timeout_secs must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn rating(&self) -> RatingConfig {
        RatingConfig {
            k_factor: self.rating.k_factor,
            rounding: self.rating.rounding,
        }
    }

    pub fn fixture_timeout(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::seconds(
            i64::try_from(self.scheduler.fixture_timeout_secs)
                .unwrap_or(i64::MAX / 1000),
        )
    }

    pub fn round_interval(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::seconds(
            i64::try_from(self.scheduler.round_interval_secs)
                .unwrap_or(i64::MAX / 1000),
        )
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler.poll_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = EngineConfig::from_toml("").unwrap();
        assert_eq!(config.database_url, ":memory:");
        assert_eq!(config.rating.k_factor, 32.0);
        assert_eq!(config.rating.rounding, Rounding::Nearest);
        assert_eq!(config.scheduler.fixture_timeout_secs, 900);
    }

    #[test]
    fn sections_override_defaults() {
        let config = EngineConfig::from_toml(
            r#"
            database_url = "arena.db"

            [rating]
            k_factor = 16.0
            rounding = "truncate"

            [scheduler]
            fixture_timeout_secs = 60
            auto_advance = false
            "#,
        )
        .unwrap();

        assert_eq!(config.database_url, "arena.db");
        assert_eq!(config.rating.k_factor, 16.0);
        assert_eq!(config.rating.rounding, Rounding::Truncate);
        assert_eq!(config.rating.initial_elo, 1000);
        assert_eq!(config.scheduler.fixture_timeout_secs, 60);
        assert!(!config.scheduler.auto_advance);
        assert_eq!(config.fixture_timeout(), chrono::TimeDelta::seconds(60));
    }

    #[test]
    fn example_file_parses() {
        let config = EngineConfig::from_toml(include_str!("../batalja.toml")).unwrap();
        assert_eq!(config.database_url, "batalja.sqlite3");
        assert_eq!(config.matchmaker.search_budget, 10_000);
        assert_eq!(config.round_interval(), chrono::TimeDelta::zero());
    }

    #[test]
    fn rejects_non_positive_k() {
        assert!(matches!(
            EngineConfig::from_toml("[rating]\nk_factor = 0.0"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(matches!(
            EngineConfig::from_toml("[rating]\nkfactor = 10.0"),
            Err(ConfigError::Parse(_))
        ));
    }
}
