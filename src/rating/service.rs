//! Rating service: store access, lazy defaults and match settlement
//!
//! The service reads pre-match snapshots, lets the [`RatingEngine`] compute the
//! new records and persists them in one optimistic batch. A conflicting write
//! means another settlement touched one of the players in between; the whole
//! read-compute-write cycle is retried with fresh snapshots.

use crate::error::{MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::rating::engine::{validate_match_result, RatingEngine};
use crate::rating::storage::RatingStore;
use crate::types::{MatchResult, PlayerId, PlayerRating};
use crate::utils;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct RatingService {
    store: Arc<dyn RatingStore>,
    engine: RatingEngine,
    metrics: Arc<MetricsCollector>,
}

impl RatingService {
    pub fn new(
        store: Arc<dyn RatingStore>,
        engine: RatingEngine,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            store,
            engine,
            metrics,
        }
    }

    pub fn engine(&self) -> &RatingEngine {
        &self.engine
    }

    pub fn store(&self) -> Arc<dyn RatingStore> {
        self.store.clone()
    }

    /// Current rating of a player, with inactivity decay applied
    ///
    /// Players without a stored record get the default rating. The default is
    /// not persisted until their first settled match.
    pub async fn get_player_rating(&self, player_id: &str, game_id: &str) -> Result<PlayerRating> {
        self.get_player_rating_at(player_id, game_id, utils::current_timestamp())
            .await
    }

    pub async fn get_player_rating_at(
        &self,
        player_id: &str,
        game_id: &str,
        now: DateTime<Utc>,
    ) -> Result<PlayerRating> {
        match self.store.get(player_id, game_id).await? {
            Some(stored) => Ok(self
                .engine
                .apply_inactivity_decay(&stored, stored.days_inactive(now))),
            None => {
                debug!(
                    "No rating for player {} in game {}, using default",
                    player_id, game_id
                );
                Ok(self.engine.default_rating(player_id, game_id))
            }
        }
    }

    /// Settle a concluded match and persist every participant's new rating
    pub async fn update_ratings_after_match(
        &self,
        result: &MatchResult,
    ) -> Result<Vec<PlayerRating>> {
        validate_match_result(result)?;

        let timer = self.metrics.start_timer();
        let max_attempts = self.engine.settings().max_update_retries;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let now = utils::current_timestamp();
            let snapshots = self.load_snapshots(result, now).await?;
            ensure_not_applied(result, &snapshots)?;

            let updated = match self.engine.update_ratings_after_match(result, &snapshots, now) {
                Ok(updated) => updated,
                Err(e) => {
                    self.metrics.record_rating_update(false, timer.elapsed());
                    return Err(e);
                }
            };

            match self.store.upsert_all(updated).await {
                Ok(stored) => {
                    let duration = timer.stop();
                    self.metrics.record_rating_update(true, duration);
                    for rating in &stored {
                        self.metrics
                            .record_player_rating(&rating.game_id, rating.rating);
                    }
                    info!(
                        "Settled match {} in game {}: {} players updated in {:?} (attempt {})",
                        result.match_id,
                        result.game_id,
                        stored.len(),
                        duration,
                        attempt
                    );
                    return Ok(stored);
                }
                Err(MatchmakingError::PersistenceConflict {
                    player_id,
                    expected,
                    actual,
                }) => {
                    self.metrics.record_persistence_conflict();
                    if attempt >= max_attempts {
                        self.metrics.record_rating_update(false, timer.elapsed());
                        warn!(
                            "Giving up on match {} after {} attempts (last conflict on {})",
                            result.match_id, attempt, player_id
                        );
                        return Err(MatchmakingError::RatingUpdateFailed {
                            match_id: result.match_id.to_string(),
                            reason: format!(
                                "persistence conflict on player {} (expected version {}, found {}) after {} attempts",
                                player_id, expected, actual, attempt
                            ),
                        });
                    }
                    warn!(
                        "Persistence conflict on player {} for match {}, retrying ({}/{})",
                        player_id, result.match_id, attempt, max_attempts
                    );
                }
                Err(e) => {
                    self.metrics.record_rating_update(false, timer.elapsed());
                    return Err(e);
                }
            }
        }
    }

    async fn load_snapshots(
        &self,
        result: &MatchResult,
        now: DateTime<Utc>,
    ) -> Result<HashMap<PlayerId, PlayerRating>> {
        let mut snapshots = HashMap::new();
        for player_id in result.winner_ids.iter().chain(&result.loser_ids) {
            let rating = self
                .get_player_rating_at(player_id, &result.game_id, now)
                .await?;
            snapshots.insert(player_id.clone(), rating);
        }
        Ok(snapshots)
    }
}

/// Reject a match whose id already shows up in a participant's history
fn ensure_not_applied(
    result: &MatchResult,
    snapshots: &HashMap<PlayerId, PlayerRating>,
) -> Result<()> {
    let applied = snapshots
        .values()
        .any(|rating| rating.has_applied(result.match_id));
    if applied {
        return Err(MatchmakingError::InvalidMatchResult {
            reason: format!("Match {} was already applied", result.match_id),
        });
    }
    Ok(())
}
