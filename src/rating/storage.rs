//! Rating storage interface and implementations
//!
//! Writes are optimistic: a record carries the version it was read at and the
//! store rejects it with [`MatchmakingError::PersistenceConflict`] when the
//! stored version moved on. A record that was never stored has version 0.

use crate::error::{MatchmakingError, Result};
use crate::types::{GameId, PlayerId, PlayerRating};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// Read side of the rating store
#[async_trait]
pub trait RatingReader: Send + Sync {
    /// Stored rating of a player in a game, `None` if they never played it
    async fn get(&self, player_id: &str, game_id: &str) -> Result<Option<PlayerRating>>;

    /// All stored ratings of a game
    async fn list_by_game(&self, game_id: &str) -> Result<Vec<PlayerRating>>;
}

/// Write side of the rating store
#[async_trait]
pub trait RatingWriter: Send + Sync {
    /// Store one record, returning it with its new version
    async fn upsert(&self, rating: PlayerRating) -> Result<PlayerRating>;

    /// Store all records or none of them
    async fn upsert_all(&self, ratings: Vec<PlayerRating>) -> Result<Vec<PlayerRating>>;
}

/// Combined store used by the rating service
pub trait RatingStore: RatingReader + RatingWriter {}

impl<T: RatingReader + RatingWriter> RatingStore for T {}

type RatingKey = (GameId, PlayerId);

/// In-memory rating store
#[derive(Debug, Default)]
pub struct InMemoryRatingStore {
    ratings: RwLock<HashMap<RatingKey, PlayerRating>>,
}

impl InMemoryRatingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records across all games
    pub fn len(&self) -> Result<usize> {
        let ratings = self
            .ratings
            .read()
            .map_err(|_| MatchmakingError::lock_poisoned("ratings read"))?;
        Ok(ratings.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn key_of(rating: &PlayerRating) -> RatingKey {
    (rating.game_id.clone(), rating.player_id.clone())
}

fn check_version(stored: &HashMap<RatingKey, PlayerRating>, rating: &PlayerRating) -> Result<()> {
    let actual = stored
        .get(&key_of(rating))
        .map(|current| current.version)
        .unwrap_or(0);
    if actual != rating.version {
        return Err(MatchmakingError::PersistenceConflict {
            player_id: rating.player_id.clone(),
            expected: rating.version,
            actual,
        });
    }
    Ok(())
}

#[async_trait]
impl RatingReader for InMemoryRatingStore {
    async fn get(&self, player_id: &str, game_id: &str) -> Result<Option<PlayerRating>> {
        let ratings = self
            .ratings
            .read()
            .map_err(|_| MatchmakingError::lock_poisoned("ratings read"))?;

        Ok(ratings
            .get(&(game_id.to_string(), player_id.to_string()))
            .cloned())
    }

    async fn list_by_game(&self, game_id: &str) -> Result<Vec<PlayerRating>> {
        let ratings = self
            .ratings
            .read()
            .map_err(|_| MatchmakingError::lock_poisoned("ratings read"))?;

        Ok(ratings
            .values()
            .filter(|rating| rating.game_id == game_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RatingWriter for InMemoryRatingStore {
    async fn upsert(&self, rating: PlayerRating) -> Result<PlayerRating> {
        let mut stored = self.upsert_all(vec![rating]).await?;
        stored.pop().ok_or_else(|| MatchmakingError::InternalError {
            message: "Rating upsert returned no record".to_string(),
        })
    }

    async fn upsert_all(&self, ratings: Vec<PlayerRating>) -> Result<Vec<PlayerRating>> {
        let mut stored = self
            .ratings
            .write()
            .map_err(|_| MatchmakingError::lock_poisoned("ratings write"))?;

        // Check every record before touching any of them
        for rating in &ratings {
            check_version(&stored, rating)?;
        }

        let mut written = Vec::with_capacity(ratings.len());
        for mut rating in ratings {
            rating.version += 1;
            stored.insert(key_of(&rating), rating.clone());
            written.push(rating);
        }

        Ok(written)
    }
}
