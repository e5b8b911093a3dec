//! Leaderboards and rating distributions

use crate::config::GameRules;
use crate::error::Result;
use crate::rating::RatingReader;
use crate::types::{PlayerRating, RankTier};
use crate::utils::{bracket_floor, bracket_index};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Player count of one rating bracket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankBucket {
    pub bracket: i64,
    pub floor_rating: f64,
    pub players: usize,
}

/// Read-only views over stored ratings
pub struct Leaderboard {
    reader: Arc<dyn RatingReader>,
    rules: GameRules,
}

impl Leaderboard {
    pub fn new(reader: Arc<dyn RatingReader>, rules: GameRules) -> Self {
        Self { reader, rules }
    }

    /// Top `limit` players of a game
    ///
    /// Ordered by rating, then matches played, then player id, so equal
    /// ratings always come back in the same order.
    pub async fn get_leaderboard(&self, game_id: &str, limit: usize) -> Result<Vec<PlayerRating>> {
        self.rules.rules_for(game_id)?;
        let mut ratings = self.reader.list_by_game(game_id).await?;
        ratings.sort_by(leaderboard_order);
        ratings.truncate(limit);
        Ok(ratings)
    }

    /// Player counts per rating bracket, using the matcher's bracket width
    pub async fn get_rank_distribution(&self, game_id: &str) -> Result<Vec<RankBucket>> {
        let width = self.rules.rules_for(game_id)?.bracket_width;
        let ratings = self.reader.list_by_game(game_id).await?;

        let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
        for rating in &ratings {
            *counts.entry(bracket_index(rating.rating, width)).or_insert(0) += 1;
        }

        Ok(counts
            .into_iter()
            .map(|(bracket, players)| RankBucket {
                bracket,
                floor_rating: bracket_floor(bracket, width),
                players,
            })
            .collect())
    }

    /// Player counts per rank tier, every tier present
    pub async fn get_tier_distribution(&self, game_id: &str) -> Result<BTreeMap<RankTier, usize>> {
        let ratings = self.reader.list_by_game(game_id).await?;

        let mut counts: BTreeMap<RankTier, usize> =
            RankTier::ALL.iter().map(|tier| (*tier, 0)).collect();
        for rating in &ratings {
            *counts.entry(rating.tier()).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

fn leaderboard_order(a: &PlayerRating, b: &PlayerRating) -> Ordering {
    b.rating
        .total_cmp(&a.rating)
        .then_with(|| b.matches_played.cmp(&a.matches_played))
        .then_with(|| a.player_id.cmp(&b.player_id))
}
