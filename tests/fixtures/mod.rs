//! Test fixtures and mock implementations for integration testing
#![allow(dead_code)]

use arena_matchmaker::commands::{JoinQueueCommand, MatchmakingService, UpdateRatingsCommand};
use arena_matchmaker::config::{GameQueueConfig, GameRules, RatingSettings};
use arena_matchmaker::error::Result;
use arena_matchmaker::leaderboard::Leaderboard;
use arena_matchmaker::metrics::MetricsCollector;
use arena_matchmaker::notification::RecordingNotificationSink;
use arena_matchmaker::queue::{PoolMatcher, QueueManager};
use arena_matchmaker::rating::{
    InMemoryRatingStore, RatingEngine, RatingReader, RatingService, RatingStore, RatingWriter,
};
use arena_matchmaker::session::SessionRegistry;
use arena_matchmaker::types::{MatchPreferences, PlayerRating, SessionId};
use arena_matchmaker::utils::generate_match_id;
use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use mockall::mock;
use std::sync::Arc;

mock! {
    pub Store {}

    #[async_trait]
    impl RatingReader for Store {
        async fn get(&self, player_id: &str, game_id: &str) -> Result<Option<PlayerRating>>;
        async fn list_by_game(&self, game_id: &str) -> Result<Vec<PlayerRating>>;
    }

    #[async_trait]
    impl RatingWriter for Store {
        async fn upsert(&self, rating: PlayerRating) -> Result<PlayerRating>;
        async fn upsert_all(&self, ratings: Vec<PlayerRating>) -> Result<Vec<PlayerRating>>;
    }
}

/// Every component of a running matchmaker, without background tasks
pub struct TestSystem {
    pub service: MatchmakingService,
    pub queue: Arc<QueueManager>,
    pub matcher: Arc<PoolMatcher>,
    pub sessions: Arc<SessionRegistry>,
    pub ratings: Arc<RatingService>,
    pub store: Arc<InMemoryRatingStore>,
    pub notifier: Arc<RecordingNotificationSink>,
    pub metrics: Arc<MetricsCollector>,
}

/// Build a system over explicit game rules, rejecting unlisted games
pub fn create_test_system(games: Vec<GameQueueConfig>) -> TestSystem {
    create_test_system_with(games, RatingSettings::default())
}

pub fn create_test_system_with(games: Vec<GameQueueConfig>, settings: RatingSettings) -> TestSystem {
    let metrics = Arc::new(MetricsCollector::new().expect("Failed to create metrics"));
    let store = Arc::new(InMemoryRatingStore::new());
    let rules = GameRules::new(games, None);

    let ratings = Arc::new(RatingService::new(
        store.clone(),
        RatingEngine::new(settings).expect("Invalid rating settings"),
        metrics.clone(),
    ));
    let queue = Arc::new(QueueManager::new(
        rules.clone(),
        ratings.clone(),
        ChronoDuration::seconds(600),
        metrics.clone(),
    ));
    let sessions = Arc::new(SessionRegistry::new(metrics.clone()));
    let notifier = Arc::new(RecordingNotificationSink::new());
    let matcher = Arc::new(PoolMatcher::new(
        queue.clone(),
        sessions.clone(),
        notifier.clone(),
        metrics.clone(),
    ));
    let leaderboard = Arc::new(Leaderboard::new(store.clone(), rules));

    let service = MatchmakingService::new(
        queue.clone(),
        matcher.clone(),
        sessions.clone(),
        ratings.clone(),
        leaderboard,
        notifier.clone(),
    );

    TestSystem {
        service,
        queue,
        matcher,
        sessions,
        ratings,
        store,
        notifier,
        metrics,
    }
}

/// Rating service over an arbitrary store, e.g. a mock
pub fn create_rating_service(store: Arc<dyn RatingStore>) -> RatingService {
    RatingService::new(
        store,
        RatingEngine::new(RatingSettings::default()).expect("Invalid rating settings"),
        Arc::new(MetricsCollector::new().expect("Failed to create metrics")),
    )
}

pub fn join(player_id: &str, game_id: &str, party_size: usize) -> JoinQueueCommand {
    JoinQueueCommand {
        player_id: player_id.to_string(),
        game_id: game_id.to_string(),
        party_size,
        preferences: MatchPreferences::default(),
    }
}

pub fn settle(
    game_id: &str,
    winners: &[&str],
    losers: &[&str],
    session_id: Option<SessionId>,
) -> UpdateRatingsCommand {
    UpdateRatingsCommand {
        match_id: generate_match_id(),
        game_id: game_id.to_string(),
        winner_player_ids: winners.iter().map(|id| id.to_string()).collect(),
        loser_player_ids: losers.iter().map(|id| id.to_string()).collect(),
        session_id,
    }
}

/// Store a rating directly, bypassing settlement
pub async fn seed_rating(
    store: &InMemoryRatingStore,
    player_id: &str,
    game_id: &str,
    rating: f64,
    deviation: f64,
) -> PlayerRating {
    store
        .upsert(PlayerRating::new(player_id, game_id, rating, deviation, 0.06))
        .await
        .expect("Failed to seed rating")
}
