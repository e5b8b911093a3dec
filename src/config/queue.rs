//! Per-game queue rules

use crate::error::{MatchmakingError, Result};
use crate::types::GameId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Queue and pairing rules of one game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameQueueConfig {
    pub game_id: String,
    /// Seats in a formed session, counting party members
    pub session_size: usize,
    pub min_party_size: usize,
    pub max_party_size: usize,
    /// Width of a rating bracket in rating points
    pub bracket_width: f64,
    /// Search radius of a freshly queued entry
    pub base_radius: f64,
    /// Radius growth per second of waiting
    pub widen_rate_per_second: f64,
    pub max_radius: f64,
    /// Entries waiting longer than this are expired
    pub max_wait_ms: i64,
    /// Run a pairing pass right after every join
    pub match_on_join: bool,
}

impl Default for GameQueueConfig {
    fn default() -> Self {
        Self::one_v_one("default")
    }
}

impl GameQueueConfig {
    /// Two teams of `team_size` seats each
    pub fn teams(game_id: impl Into<String>, team_size: usize) -> Self {
        Self {
            game_id: game_id.into(),
            session_size: team_size * 2,
            min_party_size: 1,
            max_party_size: team_size.max(1),
            bracket_width: 100.0,
            base_radius: 100.0,
            widen_rate_per_second: 10.0,
            max_radius: 400.0,
            max_wait_ms: 10 * 60 * 1000,
            match_on_join: false,
        }
    }

    pub fn one_v_one(game_id: impl Into<String>) -> Self {
        Self::teams(game_id, 1)
    }

    pub fn two_v_two(game_id: impl Into<String>) -> Self {
        Self::teams(game_id, 2)
    }

    pub fn three_v_three(game_id: impl Into<String>) -> Self {
        Self::teams(game_id, 3)
    }

    pub fn four_v_four(game_id: impl Into<String>) -> Self {
        Self::teams(game_id, 4)
    }

    pub fn five_v_five(game_id: impl Into<String>) -> Self {
        Self::teams(game_id, 5)
    }

    /// Build rules from a team format name such as "1v1" or "5v5"
    pub fn from_format(game_id: impl Into<String>, format: &str) -> Result<Self> {
        let team_size = match format {
            "1v1" => 1,
            "2v2" => 2,
            "3v3" => 3,
            "4v4" => 4,
            "5v5" => 5,
            other => {
                return Err(MatchmakingError::ConfigurationError {
                    message: format!("Unknown team format: {}", other),
                })
            }
        };
        Ok(Self::teams(game_id, team_size))
    }

    /// Same rules under a different game id
    pub fn for_game(&self, game_id: impl Into<String>) -> Self {
        Self {
            game_id: game_id.into(),
            ..self.clone()
        }
    }

    /// Effective search radius after waiting `wait_ms`
    pub fn search_radius(&self, wait_ms: i64) -> f64 {
        let waited_seconds = wait_ms.max(0) as f64 / 1000.0;
        (self.base_radius + self.widen_rate_per_second * waited_seconds).min(self.max_radius)
    }

    /// Number of neighbouring brackets on each side an entry can reach
    pub fn bracket_reach(&self) -> i64 {
        (self.max_radius / self.bracket_width).ceil() as i64
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |message: String| -> Result<()> {
            Err(MatchmakingError::ConfigurationError { message })
        };

        if self.game_id.is_empty() {
            return fail("Game id cannot be empty".to_string());
        }
        if self.session_size < 2 {
            return fail(format!(
                "Session size for {} must be at least 2",
                self.game_id
            ));
        }
        if self.min_party_size == 0 || self.max_party_size < self.min_party_size {
            return fail(format!(
                "Party size bounds for {} must satisfy 1 <= min <= max",
                self.game_id
            ));
        }
        if self.max_party_size > self.session_size {
            return fail(format!(
                "Max party size for {} exceeds the session size",
                self.game_id
            ));
        }
        if self.bracket_width <= 0.0 {
            return fail(format!("Bracket width for {} must be positive", self.game_id));
        }
        if self.base_radius < 0.0 || self.max_radius < self.base_radius {
            return fail(format!(
                "Search radius for {} must satisfy 0 <= base <= max",
                self.game_id
            ));
        }
        if self.widen_rate_per_second < 0.0 {
            return fail(format!("Widen rate for {} cannot be negative", self.game_id));
        }
        if self.max_wait_ms <= 0 {
            return fail(format!("Max wait for {} must be positive", self.game_id));
        }

        Ok(())
    }
}

/// Rules lookup shared by the queue, the matcher and the leaderboard
#[derive(Debug, Clone)]
pub struct GameRules {
    games: HashMap<GameId, GameQueueConfig>,
    /// Template for games without explicit rules, `None` rejects them
    fallback: Option<GameQueueConfig>,
}

impl GameRules {
    pub fn new(games: Vec<GameQueueConfig>, fallback: Option<GameQueueConfig>) -> Self {
        Self {
            games: games
                .into_iter()
                .map(|game| (game.game_id.clone(), game))
                .collect(),
            fallback,
        }
    }

    /// Rules for `game_id`, explicit entry first, then the fallback template
    pub fn rules_for(&self, game_id: &str) -> Result<GameQueueConfig> {
        if let Some(rules) = self.games.get(game_id) {
            return Ok(rules.clone());
        }
        self.fallback
            .as_ref()
            .map(|template| template.for_game(game_id))
            .ok_or_else(|| MatchmakingError::UnknownGame {
                game_id: game_id.to_string(),
            })
    }

    /// Games configured explicitly
    pub fn configured_games(&self) -> Vec<GameId> {
        let mut games: Vec<GameId> = self.games.keys().cloned().collect();
        games.sort();
        games
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_team_presets() {
        let solo = GameQueueConfig::one_v_one("chess");
        assert_eq!(solo.session_size, 2);
        assert_eq!(solo.max_party_size, 1);

        let squads = GameQueueConfig::five_v_five("cs2");
        assert_eq!(squads.session_size, 10);
        assert_eq!(squads.max_party_size, 5);
        assert!(squads.validate().is_ok());

        let parsed = GameQueueConfig::from_format("val", "3v3").unwrap();
        assert_eq!(parsed, GameQueueConfig::three_v_three("val"));
        assert!(GameQueueConfig::from_format("val", "6v6").is_err());
    }

    #[test]
    fn test_search_radius_widens_and_caps() {
        let config = GameQueueConfig::one_v_one("chess");
        assert_eq!(config.search_radius(0), 100.0);
        assert_eq!(config.search_radius(5_000), 150.0);
        assert_eq!(config.search_radius(30_000), 400.0);
        assert_eq!(config.search_radius(-10), 100.0);
        assert_eq!(config.bracket_reach(), 4);
    }

    #[test]
    fn test_validation_rejects_bad_rules() {
        let mut config = GameQueueConfig::two_v_two("rl");
        config.max_party_size = 5;
        assert!(config.validate().is_err());

        let mut config = GameQueueConfig::two_v_two("rl");
        config.max_radius = 50.0;
        assert!(config.validate().is_err());

        let mut config = GameQueueConfig::two_v_two("rl");
        config.session_size = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_game_rules_lookup() {
        let rules = GameRules::new(
            vec![GameQueueConfig::five_v_five("cs2")],
            Some(GameQueueConfig::one_v_one("default")),
        );
        assert_eq!(rules.rules_for("cs2").unwrap().session_size, 10);

        let unlisted = rules.rules_for("chess").unwrap();
        assert_eq!(unlisted.game_id, "chess");
        assert_eq!(unlisted.session_size, 2);
        assert_eq!(rules.configured_games(), vec!["cs2".to_string()]);

        let strict = GameRules::new(vec![], None);
        assert!(matches!(
            strict.rules_for("chess"),
            Err(MatchmakingError::UnknownGame { .. })
        ));
    }
}
