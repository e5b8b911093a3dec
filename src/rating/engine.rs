//! Match settlement on top of the Glicko-2 period update
//!
//! A concluded match is one rating period for every participant. Team games
//! are reduced to a virtual opponent per side: the mean rating of the other
//! side and the root-mean-square of its deviations. For 1v1 this is exactly
//! the opponent's own rating.

use crate::config::RatingSettings;
use crate::error::{MatchmakingError, Result};
use crate::rating::glicko2::{self, GameResult, Glicko2Params};
use crate::types::{MatchOutcome, MatchResult, PlayerId, PlayerRating, RatingChange};
use chrono::{DateTime, Utc};
use skillratings::glicko2::Glicko2Rating;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Pure rating computations driven by [`RatingSettings`]
#[derive(Debug, Clone)]
pub struct RatingEngine {
    settings: RatingSettings,
    params: Glicko2Params,
}

impl RatingEngine {
    pub fn new(settings: RatingSettings) -> Result<Self> {
        settings.validate()?;
        let params = Glicko2Params::from(&settings);
        Ok(Self { settings, params })
    }

    pub fn settings(&self) -> &RatingSettings {
        &self.settings
    }

    /// Deviation still above the configured provisional threshold
    pub fn is_provisional(&self, rating: &PlayerRating) -> bool {
        rating.is_provisional(self.settings.provisional_deviation_threshold)
    }

    /// Rating handed to a player who never played `game_id`
    pub fn default_rating(&self, player_id: &str, game_id: &str) -> PlayerRating {
        PlayerRating::new(
            player_id,
            game_id,
            self.settings.initial_rating,
            self.settings.initial_deviation,
            self.settings.initial_volatility,
        )
    }

    /// Whole rating periods that count towards inactivity decay
    pub fn decay_periods(&self, days_inactive: f64) -> f64 {
        if days_inactive <= self.settings.inactivity_grace_days {
            return 0.0;
        }
        (days_inactive / self.settings.rating_period_days).floor()
    }

    /// Copy of `rating` with the deviation grown for the idle periods
    pub fn apply_inactivity_decay(&self, rating: &PlayerRating, days_inactive: f64) -> PlayerRating {
        let periods = self.decay_periods(days_inactive);
        let mut decayed = rating.clone();
        if periods > 0.0 {
            decayed.deviation = self.clamp_deviation(glicko2::inflate_deviation(
                rating.deviation,
                rating.volatility,
                periods,
            ));
        }
        decayed
    }

    fn clamp_deviation(&self, deviation: f64) -> f64 {
        deviation.clamp(self.settings.min_deviation, self.settings.max_deviation)
    }

    /// Compute the post-match record of every participant
    ///
    /// All updates use the pre-match `snapshots`, never a rating already
    /// updated by the same match. Versions are left untouched; the store
    /// checks them on write.
    pub fn update_ratings_after_match(
        &self,
        result: &MatchResult,
        snapshots: &HashMap<PlayerId, PlayerRating>,
        now: DateTime<Utc>,
    ) -> Result<Vec<PlayerRating>> {
        validate_match_result(result)?;

        let lookup = |player_id: &PlayerId| -> Result<&PlayerRating> {
            snapshots
                .get(player_id)
                .ok_or_else(|| MatchmakingError::RatingNotFound {
                    player_id: player_id.clone(),
                    game_id: result.game_id.clone(),
                })
        };

        let winners = result
            .winner_ids
            .iter()
            .map(lookup)
            .collect::<Result<Vec<_>>>()?;
        let losers = result
            .loser_ids
            .iter()
            .map(lookup)
            .collect::<Result<Vec<_>>>()?;

        let winners_view = virtual_opponent(&winners);
        let losers_view = virtual_opponent(&losers);

        let mut updated = Vec::with_capacity(winners.len() + losers.len());
        for player in &winners {
            updated.push(self.settle(player, &losers_view, MatchOutcome::Win, result, now)?);
        }
        for player in &losers {
            updated.push(self.settle(player, &winners_view, MatchOutcome::Loss, result, now)?);
        }

        Ok(updated)
    }

    fn settle(
        &self,
        player: &PlayerRating,
        opponent: &Glicko2Rating,
        outcome: MatchOutcome,
        result: &MatchResult,
        now: DateTime<Utc>,
    ) -> Result<PlayerRating> {
        let before = Glicko2Rating::from(player);
        let after = glicko2::rate_period(
            &before,
            &[GameResult::against(opponent, outcome.score())],
            &self.params,
        )?;

        let mut next = player.clone();
        next.rating = after.rating;
        next.deviation = self.clamp_deviation(after.deviation);
        next.volatility = after.volatility;
        next.matches_played += 1;
        match outcome {
            MatchOutcome::Win => {
                next.wins += 1;
                next.win_streak += 1;
            }
            MatchOutcome::Loss => {
                next.losses += 1;
                next.win_streak = 0;
            }
        }
        next.peak_rating = next.peak_rating.max(next.rating);
        next.last_match_at = Some(now);
        next.history.push(RatingChange {
            match_id: result.match_id,
            old_rating: player.rating,
            new_rating: next.rating,
            change: next.rating - player.rating,
            outcome,
            opponent_rating: opponent.rating,
            timestamp: now,
        });
        next.applied_matches.push(result.match_id);
        if let Some(limit) = self.settings.history_limit {
            if next.history.len() > limit {
                let excess = next.history.len() - limit;
                next.history.drain(..excess);
            }
        }

        debug!(
            "Player {} {:?} in match {}: {:.1} -> {:.1} (RD {:.1} -> {:.1})",
            player.player_id,
            outcome,
            result.match_id,
            player.rating,
            next.rating,
            player.deviation,
            next.deviation
        );

        Ok(next)
    }
}

/// Reject results with an empty side or a player on both sides
pub fn validate_match_result(result: &MatchResult) -> Result<()> {
    let invalid = |reason: String| MatchmakingError::InvalidMatchResult { reason };

    if result.winner_ids.is_empty() {
        return Err(invalid(format!("Match {} has no winners", result.match_id)));
    }
    if result.loser_ids.is_empty() {
        return Err(invalid(format!("Match {} has no losers", result.match_id)));
    }

    let mut seen = HashSet::new();
    for player_id in result.winner_ids.iter().chain(&result.loser_ids) {
        if player_id.is_empty() {
            return Err(invalid(format!(
                "Match {} contains an empty player id",
                result.match_id
            )));
        }
        if !seen.insert(player_id.as_str()) {
            return Err(invalid(format!(
                "Player {} appears more than once in match {}",
                player_id, result.match_id
            )));
        }
    }

    Ok(())
}

/// Mean rating and RMS deviation of one side
fn virtual_opponent(team: &[&PlayerRating]) -> Glicko2Rating {
    let count = team.len().max(1) as f64;
    let rating = team.iter().map(|p| p.rating).sum::<f64>() / count;
    let deviation = (team.iter().map(|p| p.deviation * p.deviation).sum::<f64>() / count).sqrt();
    let volatility = team.iter().map(|p| p.volatility).sum::<f64>() / count;
    Glicko2Rating {
        rating,
        deviation,
        volatility,
    }
}
