//! Main application configuration
//!
//! This module defines the primary configuration structures for the
//! arena-matchmaker service, including environment variable and TOML file
//! loading plus validation.

use crate::config::queue::{GameQueueConfig, GameRules};
use crate::config::rating::RatingSettings;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub matchmaking: MatchmakingSettings,
    pub rating: RatingSettings,
    /// Games with explicit queue rules
    pub games: Vec<GameQueueConfig>,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name for logging and metrics
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Port for health check and metrics endpoints
    pub health_port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
}

/// Matchmaking-specific settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakingSettings {
    /// Interval of the periodic pairing pass in milliseconds
    pub tick_interval_ms: u64,
    /// How long finished tickets stay queryable
    pub ticket_retention_seconds: u64,
    /// Accept joins for games that have no explicit rules
    pub allow_unlisted_games: bool,
    /// Rules applied to unlisted games
    pub default_rules: GameQueueConfig,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "arena-matchmaker".to_string(),
            log_level: "info".to_string(),
            health_port: 8080,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl Default for MatchmakingSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            ticket_retention_seconds: 600, // 10 minutes
            allow_unlisted_games: true,
            default_rules: GameQueueConfig::default(),
        }
    }
}

/// Parse an environment value, naming the variable on failure
fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("Invalid {} value: {}", name, value))
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        // Service settings
        if let Ok(name) = env::var("SERVICE_NAME") {
            self.service.name = name;
        }
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            self.service.log_level = log_level;
        }
        if let Ok(port) = env::var("HEALTH_PORT") {
            self.service.health_port = parse_env("HEALTH_PORT", &port)?;
        }
        if let Ok(timeout) = env::var("SHUTDOWN_TIMEOUT_SECONDS") {
            self.service.shutdown_timeout_seconds =
                parse_env("SHUTDOWN_TIMEOUT_SECONDS", &timeout)?;
        }

        // Matchmaking settings
        if let Ok(tick) = env::var("TICK_INTERVAL_MS") {
            self.matchmaking.tick_interval_ms = parse_env("TICK_INTERVAL_MS", &tick)?;
        }
        if let Ok(retention) = env::var("TICKET_RETENTION_SECONDS") {
            self.matchmaking.ticket_retention_seconds =
                parse_env("TICKET_RETENTION_SECONDS", &retention)?;
        }
        if let Ok(allow) = env::var("ALLOW_UNLISTED_GAMES") {
            self.matchmaking.allow_unlisted_games = parse_env("ALLOW_UNLISTED_GAMES", &allow)?;
        }
        // GAMES=chess=1v1,valorant=5v5
        if let Ok(games) = env::var("GAMES") {
            self.games = parse_games(&games)?;
        }
        if let Ok(max_wait) = env::var("MAX_WAIT_MS") {
            self.matchmaking.default_rules.max_wait_ms = parse_env("MAX_WAIT_MS", &max_wait)?;
            for game in &mut self.games {
                game.max_wait_ms = self.matchmaking.default_rules.max_wait_ms;
            }
        }

        // Rating settings
        if let Ok(tau) = env::var("GLICKO2_TAU") {
            self.rating.glicko2_config.tau = parse_env("GLICKO2_TAU", &tau)?;
        }
        if let Ok(min_rd) = env::var("RATING_MIN_DEVIATION") {
            self.rating.min_deviation = parse_env("RATING_MIN_DEVIATION", &min_rd)?;
        }
        if let Ok(max_rd) = env::var("RATING_MAX_DEVIATION") {
            self.rating.max_deviation = parse_env("RATING_MAX_DEVIATION", &max_rd)?;
        }
        if let Ok(retries) = env::var("RATING_MAX_UPDATE_RETRIES") {
            self.rating.max_update_retries = parse_env("RATING_MAX_UPDATE_RETRIES", &retries)?;
        }
        if let Ok(limit) = env::var("RATING_HISTORY_LIMIT") {
            self.rating.history_limit = Some(parse_env("RATING_HISTORY_LIMIT", &limit)?);
        }

        Ok(())
    }

    /// Rules lookup built from the explicit games and the default template
    pub fn game_rules(&self) -> GameRules {
        let fallback = self
            .matchmaking
            .allow_unlisted_games
            .then(|| self.matchmaking.default_rules.clone());
        GameRules::new(self.games.clone(), fallback)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_seconds)
    }

    /// Get pairing tick interval as Duration
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.matchmaking.tick_interval_ms)
    }

    /// Get ticket retention as a chrono Duration
    pub fn ticket_retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.matchmaking.ticket_retention_seconds as i64)
    }
}

fn parse_games(value: &str) -> Result<Vec<GameQueueConfig>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| -> Result<GameQueueConfig> {
            let (game_id, format) = item
                .split_once('=')
                .ok_or_else(|| anyhow!("Invalid GAMES entry (expected game=format): {}", item))?;
            Ok(GameQueueConfig::from_format(game_id.trim(), format.trim())?)
        })
        .collect()
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    // Validate log level
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.service.log_level)),
    }

    if config.service.health_port == 0 {
        return Err(anyhow!("Health port cannot be 0"));
    }
    if config.service.shutdown_timeout_seconds == 0 {
        return Err(anyhow!("Shutdown timeout must be greater than 0"));
    }

    if config.matchmaking.tick_interval_ms == 0 {
        return Err(anyhow!("Tick interval must be greater than 0"));
    }
    config
        .matchmaking
        .default_rules
        .validate()
        .context("Invalid default game rules")?;

    let mut seen = std::collections::HashSet::new();
    for game in &config.games {
        game.validate()?;
        if !seen.insert(game.game_id.as_str()) {
            return Err(anyhow!("Duplicate game rules for {}", game.game_id));
        }
    }

    config.rating.validate()?;

    Ok(())
}
