//! Rating system configuration
//!
//! Wraps the skillratings `Glicko2Config` (tau and solver tolerance) with the
//! bounds and bookkeeping parameters used by the rating engine.

use crate::error::{MatchmakingError, Result};
use serde::{Deserialize, Serialize};
use skillratings::glicko2::Glicko2Config;

/// Extended configuration for the Glicko-2 rating system
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingSettings {
    /// Core Glicko-2 parameters
    pub glicko2_config: Glicko2Config,
    /// Initial rating for new players
    pub initial_rating: f64,
    /// Initial rating deviation for new players
    pub initial_deviation: f64,
    /// Initial volatility for new players
    pub initial_volatility: f64,
    /// Lower clamp for the rating deviation
    pub min_deviation: f64,
    /// Upper clamp for the rating deviation
    pub max_deviation: f64,
    /// Ratings with a deviation above this are provisional
    pub provisional_deviation_threshold: f64,
    /// Iteration bound of the volatility root-finder
    pub max_volatility_iterations: usize,
    /// Length of one inactivity period in days
    pub rating_period_days: f64,
    /// Days without play before the deviation starts growing
    pub inactivity_grace_days: f64,
    /// Attempts at persisting one match before giving up
    pub max_update_retries: u32,
    /// Keep at most this many history entries per player
    pub history_limit: Option<usize>,
}

impl Default for RatingSettings {
    fn default() -> Self {
        Self {
            glicko2_config: Glicko2Config {
                tau: 0.5,
                convergence_tolerance: 0.000_001,
            },
            initial_rating: 1500.0,
            initial_deviation: 350.0,
            initial_volatility: 0.06,
            min_deviation: 30.0,
            max_deviation: 350.0,
            provisional_deviation_threshold: 150.0,
            max_volatility_iterations: 100,
            rating_period_days: 1.0,
            inactivity_grace_days: 7.0,
            max_update_retries: 3,
            history_limit: None,
        }
    }
}

impl RatingSettings {
    /// Lower tau, volatility reacts slowly to surprising results
    pub fn conservative() -> Self {
        Self {
            glicko2_config: Glicko2Config {
                tau: 0.3,
                convergence_tolerance: 0.000_001,
            },
            ..Self::default()
        }
    }

    /// Higher tau, volatility reacts quickly to surprising results
    pub fn aggressive() -> Self {
        Self {
            glicko2_config: Glicko2Config {
                tau: 1.2,
                convergence_tolerance: 0.000_001,
            },
            ..Self::default()
        }
    }

    pub fn tau(&self) -> f64 {
        self.glicko2_config.tau
    }

    pub fn convergence_tolerance(&self) -> f64 {
        self.glicko2_config.convergence_tolerance
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        let fail = |message: &str| -> Result<()> {
            Err(MatchmakingError::ConfigurationError {
                message: message.to_string(),
            })
        };

        if self.glicko2_config.tau <= 0.0 {
            return fail("Tau must be positive");
        }
        if self.glicko2_config.convergence_tolerance <= 0.0 {
            return fail("Convergence tolerance must be positive");
        }
        if self.min_deviation <= 0.0 || self.max_deviation < self.min_deviation {
            return fail("Deviation bounds must satisfy 0 < min <= max");
        }
        if self.initial_deviation < self.min_deviation
            || self.initial_deviation > self.max_deviation
        {
            return fail("Initial deviation must lie within the deviation bounds");
        }
        if self.initial_volatility <= 0.0 {
            return fail("Initial volatility must be positive");
        }
        if self.max_volatility_iterations == 0 {
            return fail("Volatility iteration bound must be greater than 0");
        }
        if self.rating_period_days <= 0.0 {
            return fail("Rating period must be positive");
        }
        if self.inactivity_grace_days < 0.0 {
            return fail("Inactivity grace period cannot be negative");
        }
        if self.max_update_retries == 0 {
            return fail("At least one rating update attempt is required");
        }
        if self.history_limit == Some(0) {
            return fail("History limit must be greater than 0 when set");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = RatingSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.tau(), 0.5);
        assert_eq!(settings.convergence_tolerance(), 1e-6);
        assert!(RatingSettings::conservative().validate().is_ok());
        assert!(RatingSettings::aggressive().validate().is_ok());
    }

    #[test]
    fn test_invalid_settings() {
        let mut settings = RatingSettings::default();
        settings.min_deviation = 400.0;
        assert!(matches!(
            settings.validate(),
            Err(MatchmakingError::ConfigurationError { .. })
        ));

        let mut settings = RatingSettings::default();
        settings.glicko2_config.tau = 0.0;
        assert!(settings.validate().is_err());

        let mut settings = RatingSettings::default();
        settings.history_limit = Some(0);
        assert!(settings.validate().is_err());
    }
}
