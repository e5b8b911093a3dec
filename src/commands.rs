//! Externally exposed commands and the service facade handling them
//!
//! Every command is a plain serde struct so a transport layer can decode it
//! directly. [`MatchmakingService`] dispatches them to the queue, the matcher,
//! the session registry and the rating service. Concluded matches arrive
//! through a [`MatchResultSource`].

use crate::error::Result;
use crate::leaderboard::Leaderboard;
use crate::notification::NotificationSink;
use crate::queue::{PoolMatcher, QueueManager};
use crate::rating::RatingService;
use crate::session::SessionRegistry;
use crate::types::{
    GameId, MatchId, MatchPreferences, MatchResult, MatchmakingEvent, PlayerId, PlayerRating,
    PoolStats, Session, SessionId, SessionRef, SessionStatus,
};
use crate::utils;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinQueueCommand {
    pub player_id: PlayerId,
    pub game_id: GameId,
    pub party_size: usize,
    /// Game mode and region partition, unset fields form their own partition
    #[serde(default)]
    pub preferences: MatchPreferences,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaveQueueCommand {
    pub session_ref: SessionRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetSessionStatusCommand {
    pub session_ref: SessionRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetPoolStatsCommand {
    pub game_id: GameId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRatingsCommand {
    pub match_id: MatchId,
    pub game_id: GameId,
    pub winner_player_ids: Vec<PlayerId>,
    pub loser_player_ids: Vec<PlayerId>,
    /// Session to complete once the ratings are stored
    #[serde(default)]
    pub session_id: Option<SessionId>,
}

impl From<MatchResult> for UpdateRatingsCommand {
    fn from(result: MatchResult) -> Self {
        Self {
            match_id: result.match_id,
            game_id: result.game_id,
            winner_player_ids: result.winner_ids,
            loser_player_ids: result.loser_ids,
            session_id: result.session_id,
        }
    }
}

impl From<UpdateRatingsCommand> for MatchResult {
    fn from(command: UpdateRatingsCommand) -> Self {
        Self {
            match_id: command.match_id,
            game_id: command.game_id,
            winner_ids: command.winner_player_ids,
            loser_ids: command.loser_player_ids,
            session_id: command.session_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetPlayerRatingCommand {
    pub player_id: PlayerId,
    pub game_id: GameId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetLeaderboardCommand {
    pub game_id: GameId,
    pub limit: usize,
}

/// Supplies concluded matches from the match-play subsystem
#[async_trait]
pub trait MatchResultSource: Send + Sync {
    /// Next concluded match, `None` once the source is closed
    async fn next_result(&self) -> Option<MatchResult>;
}

/// In-process result source backed by a tokio mpsc channel
pub struct ChannelMatchResultSource {
    receiver: Mutex<mpsc::Receiver<MatchResult>>,
}

impl ChannelMatchResultSource {
    /// Create a source and the sender feeding it
    pub fn channel(capacity: usize) -> (mpsc::Sender<MatchResult>, Self) {
        let (sender, receiver) = mpsc::channel(capacity);
        (
            sender,
            Self {
                receiver: Mutex::new(receiver),
            },
        )
    }
}

#[async_trait]
impl MatchResultSource for ChannelMatchResultSource {
    async fn next_result(&self) -> Option<MatchResult> {
        self.receiver.lock().await.recv().await
    }
}

/// Facade over the matchmaking subsystems
pub struct MatchmakingService {
    queue: Arc<QueueManager>,
    matcher: Arc<PoolMatcher>,
    sessions: Arc<SessionRegistry>,
    ratings: Arc<RatingService>,
    leaderboard: Arc<Leaderboard>,
    notifier: Arc<dyn NotificationSink>,
}

impl MatchmakingService {
    pub fn new(
        queue: Arc<QueueManager>,
        matcher: Arc<PoolMatcher>,
        sessions: Arc<SessionRegistry>,
        ratings: Arc<RatingService>,
        leaderboard: Arc<Leaderboard>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            queue,
            matcher,
            sessions,
            ratings,
            leaderboard,
            notifier,
        }
    }

    pub fn queue(&self) -> Arc<QueueManager> {
        self.queue.clone()
    }

    pub fn matcher(&self) -> Arc<PoolMatcher> {
        self.matcher.clone()
    }

    pub fn sessions(&self) -> Arc<SessionRegistry> {
        self.sessions.clone()
    }

    pub async fn join_queue(&self, command: JoinQueueCommand) -> Result<SessionRef> {
        let session_ref = self
            .queue
            .join_queue_with_preferences(
                &command.player_id,
                &command.game_id,
                command.party_size,
                command.preferences,
            )
            .await?;

        let match_on_join = self
            .queue
            .rules()
            .rules_for(&command.game_id)
            .map(|rules| rules.match_on_join)
            .unwrap_or(false);
        if match_on_join {
            if let Err(e) = self.matcher.run_pass(&command.game_id).await {
                warn!("Pairing after join failed for {}: {}", command.game_id, e);
            }
        }

        Ok(session_ref)
    }

    pub async fn leave_queue(&self, command: LeaveQueueCommand) -> Result<()> {
        self.queue.leave_queue(command.session_ref).await
    }

    pub fn get_session_status(&self, command: GetSessionStatusCommand) -> Result<SessionStatus> {
        self.queue.get_session_status(command.session_ref)
    }

    /// Resolve once the ticket is matched, expired or withdrawn
    pub async fn wait_for_match(&self, session_ref: SessionRef) -> Result<Session> {
        self.queue.wait_for_match(session_ref).await
    }

    pub fn get_pool_stats(&self, command: GetPoolStatsCommand) -> Result<PoolStats> {
        self.queue.get_pool_stats(&command.game_id)
    }

    /// Settle a concluded match and complete its session
    pub async fn update_ratings(&self, command: UpdateRatingsCommand) -> Result<Vec<PlayerRating>> {
        let result = MatchResult::from(command);
        let previous = self.previous_ratings(&result).await;
        let updated = self.ratings.update_ratings_after_match(&result).await?;

        if let Some(session_id) = result.session_id {
            // Ratings are already stored; a session in the wrong state is only logged
            if let Err(e) = self.sessions.complete(session_id, result.match_id) {
                warn!(
                    "Could not complete session {} for match {}: {}",
                    session_id, result.match_id, e
                );
            }
        }

        let now = utils::current_timestamp();
        for rating in &updated {
            let old_rating = previous
                .iter()
                .find(|(player_id, _)| player_id == &rating.player_id)
                .map(|(_, old)| *old)
                .unwrap_or(rating.rating);
            let event = MatchmakingEvent::RatingUpdated {
                game_id: result.game_id.clone(),
                match_id: result.match_id,
                old_rating,
                new_rating: rating.rating,
                timestamp: now,
            };
            if let Err(e) = self.notifier.notify(&rating.player_id, event).await {
                warn!(
                    "Failed to deliver rating update to player '{}': {}",
                    rating.player_id, e
                );
            }
        }

        Ok(updated)
    }

    async fn previous_ratings(&self, result: &MatchResult) -> Vec<(PlayerId, f64)> {
        let mut previous = Vec::new();
        for player_id in result.winner_ids.iter().chain(&result.loser_ids) {
            if let Ok(rating) = self
                .ratings
                .get_player_rating(player_id, &result.game_id)
                .await
            {
                previous.push((player_id.clone(), rating.rating));
            }
        }
        previous
    }

    pub async fn get_player_rating(&self, command: GetPlayerRatingCommand) -> Result<PlayerRating> {
        self.ratings
            .get_player_rating(&command.player_id, &command.game_id)
            .await
    }

    /// Whether a rating is still settling in
    pub fn is_provisional(&self, rating: &PlayerRating) -> bool {
        self.ratings.engine().is_provisional(rating)
    }

    pub async fn get_leaderboard(&self, command: GetLeaderboardCommand) -> Result<Vec<PlayerRating>> {
        self.leaderboard
            .get_leaderboard(&command.game_id, command.limit)
            .await
    }

    /// Settle every result from `source` until it closes
    pub async fn run_settlement(&self, source: Arc<dyn MatchResultSource>) {
        info!("Match settlement loop started");
        while let Some(result) = source.next_result().await {
            let match_id = result.match_id;
            match self.update_ratings(UpdateRatingsCommand::from(result)).await {
                Ok(updated) => info!(
                    "Settled match {} ({} ratings updated)",
                    match_id,
                    updated.len()
                ),
                Err(e) => warn!("Failed to settle match {}: {}", match_id, e),
            }
        }
        info!("Match result source closed, settlement loop finished");
    }
}
