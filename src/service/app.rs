//! Main application state and service coordination
//!
//! This module contains the production AppState that wires the queue, the
//! pool matcher, sessions and ratings together and owns the background tasks.

use crate::commands::{ChannelMatchResultSource, MatchResultSource, MatchmakingService};
use crate::config::AppConfig;
use crate::leaderboard::Leaderboard;
use crate::metrics::health::HealthServerConfig;
use crate::metrics::{HealthServer, MetricsCollector, MetricsService};
use crate::notification::{NotificationSink, TracingNotificationSink};
use crate::queue::{PoolMatcher, QueueManager};
use crate::rating::{InMemoryRatingStore, RatingEngine, RatingService};
use crate::session::SessionRegistry;
use crate::types::{MatchResult, PoolStats};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Capacity of the in-process match result channel
const RESULT_CHANNEL_CAPACITY: usize = 1024;

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    config: AppConfig,

    /// Command facade over the matchmaking subsystems
    matchmaking: Arc<MatchmakingService>,

    rating_store: Arc<InMemoryRatingStore>,

    leaderboard: Arc<Leaderboard>,

    metrics: Arc<MetricsCollector>,

    /// Set once the health endpoints are serving
    metrics_service: Mutex<Option<Arc<MetricsService>>>,

    /// Feeds concluded matches into the settlement loop
    result_sender: mpsc::Sender<MatchResult>,
    result_source: Mutex<Option<ChannelMatchResultSource>>,

    background_tasks: Mutex<Vec<JoinHandle<()>>>,

    is_running: Arc<RwLock<bool>>,

    started_at: Instant,
}

impl AppState {
    /// Build every component from configuration
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing arena-matchmaker service");
        info!(
            "Configuration: service={}, games={:?}, unlisted games allowed: {}",
            config.service.name,
            config.games.iter().map(|g| g.game_id.as_str()).collect::<Vec<_>>(),
            config.matchmaking.allow_unlisted_games
        );

        let metrics = Arc::new(MetricsCollector::new().map_err(|e| {
            ServiceError::Initialization {
                message: format!("Failed to create metrics collector: {}", e),
            }
        })?);

        let engine = RatingEngine::new(config.rating.clone()).map_err(|e| {
            ServiceError::Configuration {
                message: format!("Invalid rating settings: {}", e),
            }
        })?;
        let rules = config.game_rules();

        let rating_store = Arc::new(InMemoryRatingStore::new());
        let ratings = Arc::new(RatingService::new(
            rating_store.clone(),
            engine,
            metrics.clone(),
        ));
        let queue = Arc::new(QueueManager::new(
            rules.clone(),
            ratings.clone(),
            config.ticket_retention(),
            metrics.clone(),
        ));
        let sessions = Arc::new(SessionRegistry::new(metrics.clone()));
        let notifier: Arc<dyn NotificationSink> = Arc::new(TracingNotificationSink);
        let matcher = Arc::new(PoolMatcher::new(
            queue.clone(),
            sessions.clone(),
            notifier.clone(),
            metrics.clone(),
        ));
        let leaderboard = Arc::new(Leaderboard::new(rating_store.clone(), rules));

        let matchmaking = Arc::new(MatchmakingService::new(
            queue,
            matcher,
            sessions,
            ratings,
            leaderboard.clone(),
            notifier,
        ));

        let (result_sender, result_source) =
            ChannelMatchResultSource::channel(RESULT_CHANNEL_CAPACITY);

        Ok(Self {
            config,
            matchmaking,
            rating_store,
            leaderboard,
            metrics,
            metrics_service: Mutex::new(None),
            result_sender,
            result_source: Mutex::new(Some(result_source)),
            background_tasks: Mutex::new(Vec::new()),
            is_running: Arc::new(RwLock::new(false)),
            started_at: Instant::now(),
        })
    }

    /// Start the health endpoints, the pairing supervisor and maintenance tasks
    pub async fn start(self: Arc<Self>) -> Result<(), ServiceError> {
        info!("Starting arena-matchmaker service");

        *self.is_running.write().await = true;

        self.clone().start_metrics_service().await?;
        self.start_matchmaking_tasks()?;
        self.start_background_tasks()?;

        info!("✅ Arena-matchmaker service started successfully");
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of arena-matchmaker service");

        *self.is_running.write().await = false;
        self.matchmaking.matcher().stop();

        let metrics_service = self
            .metrics_service
            .lock()
            .map_err(|_| ServiceError::BackgroundTask {
                message: "metrics service lock poisoned".to_string(),
            })?
            .take();
        if let Some(metrics_service) = metrics_service {
            info!("Stopping metrics service...");
            if let Err(e) = metrics_service.stop().await {
                warn!("Failed to stop metrics service: {}", e);
            } else {
                info!("✅ Metrics service stopped");
            }
        }

        self.stop_background_tasks().await?;

        let queue_stats = self
            .matchmaking
            .queue()
            .get_stats()
            .map_err(|e| ServiceError::BackgroundTask {
                message: format!("Failed to get final queue stats: {}", e),
            })?;
        let session_stats = self
            .matchmaking
            .sessions()
            .get_stats()
            .map_err(|e| ServiceError::BackgroundTask {
                message: format!("Failed to get final session stats: {}", e),
            })?;

        info!("Final queue statistics: {:?}", queue_stats);
        info!("Final session statistics: {:?}", session_stats);
        info!("✅ Arena-matchmaker service shutdown completed");

        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn matchmaking(&self) -> Arc<MatchmakingService> {
        self.matchmaking.clone()
    }

    pub fn leaderboard(&self) -> Arc<Leaderboard> {
        self.leaderboard.clone()
    }

    pub fn rating_store(&self) -> Arc<InMemoryRatingStore> {
        self.rating_store.clone()
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    /// Sender for concluded matches; the settlement task applies them
    pub fn result_sender(&self) -> mpsc::Sender<MatchResult> {
        self.result_sender.clone()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Pool statistics of every game with queued tickets
    pub fn pool_stats(&self) -> crate::error::Result<Vec<PoolStats>> {
        let queue = self.matchmaking.queue();
        queue
            .active_games()?
            .iter()
            .map(|game_id| queue.get_pool_stats(game_id))
            .collect()
    }

    async fn start_metrics_service(self: Arc<Self>) -> Result<(), ServiceError> {
        let port = self.config.service.health_port;
        info!("Starting metrics and health endpoints on port {}", port);

        let health_config = HealthServerConfig {
            port,
            host: "0.0.0.0".to_string(),
        };
        let health_server = Arc::new(
            HealthServer::new(health_config, self.metrics.clone()).with_app_state(self.clone()),
        );
        let metrics_service = Arc::new(MetricsService::new(self.metrics.clone(), health_server));

        let handle = {
            let metrics_service = metrics_service.clone();
            tokio::spawn(async move {
                if let Err(e) = metrics_service.start().await {
                    error!("Metrics service failed: {}", e);
                } else {
                    info!("Metrics service task completed");
                }
            })
        };

        *self
            .metrics_service
            .lock()
            .map_err(|_| ServiceError::BackgroundTask {
                message: "metrics service lock poisoned".to_string(),
            })? = Some(metrics_service);
        self.push_task(handle)?;

        // Give the server a moment to bind
        tokio::time::sleep(Duration::from_millis(100)).await;

        info!("✅ Metrics service started on port {}", port);
        Ok(())
    }

    fn start_matchmaking_tasks(&self) -> Result<(), ServiceError> {
        let tick = self.config.tick_interval();
        info!("Starting pairing supervisor ({}ms tick)...", tick.as_millis());
        let supervisor = self.matchmaking.matcher().start(tick);
        self.push_task(supervisor)?;

        let source = self
            .result_source
            .lock()
            .map_err(|_| ServiceError::BackgroundTask {
                message: "result source lock poisoned".to_string(),
            })?
            .take()
            .ok_or_else(|| ServiceError::BackgroundTask {
                message: "Settlement loop already started".to_string(),
            })?;
        let source: Arc<dyn MatchResultSource> = Arc::new(source);

        info!("Starting match settlement task...");
        let matchmaking = self.matchmaking.clone();
        let settlement = tokio::spawn(async move {
            matchmaking.run_settlement(source).await;
        });
        self.push_task(settlement)?;

        Ok(())
    }

    fn start_background_tasks(&self) -> Result<(), ServiceError> {
        info!("Starting background maintenance tasks...");

        // Pool gauges
        let pool_metrics_task = {
            let queue = self.matchmaking.queue();
            let metrics = self.metrics.clone();
            let is_running = self.is_running.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(10));
                info!("Pool metrics task started");

                while *is_running.read().await {
                    interval.tick().await;

                    let games = match queue.active_games() {
                        Ok(games) => games,
                        Err(e) => {
                            warn!("Failed to list active games for metrics update: {}", e);
                            continue;
                        }
                    };
                    for game_id in games {
                        match queue.get_pool_stats(&game_id) {
                            Ok(stats) => {
                                debug!(
                                    "Updating metrics - game: {}, depth: {}, players: {}, health: {:?}",
                                    stats.game_id, stats.queue_depth, stats.players_waiting, stats.health
                                );
                                metrics.update_from_pool_stats(&stats);
                            }
                            Err(e) => warn!("Failed to get pool stats for {}: {}", game_id, e),
                        }
                    }
                }

                info!("Pool metrics task stopped");
            })
        };

        // Service health gauges
        let health_metrics_task = {
            let metrics = self.metrics.clone();
            let matchmaking = self.matchmaking.clone();
            let rating_store = self.rating_store.clone();
            let is_running = self.is_running.clone();
            let started_at = self.started_at;

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(30));
                info!("Health metrics task started");

                while *is_running.read().await {
                    interval.tick().await;

                    let uptime_seconds = started_at.elapsed().as_secs() as i64;
                    metrics.service().uptime_seconds.set(uptime_seconds);

                    let queue_ok = matchmaking.queue().get_stats().is_ok();
                    let sessions_ok = matchmaking.sessions().get_stats().is_ok();
                    let ratings_ok = rating_store.len().is_ok();
                    let pairing_ok = matchmaking.matcher().is_running();

                    metrics.update_component_health("queue", queue_ok);
                    metrics.update_component_health("sessions", sessions_ok);
                    metrics.update_component_health("ratings", ratings_ok);
                    metrics.update_component_health("pairing", pairing_ok);

                    // 2 = healthy, 1 = degraded, 0 = unhealthy
                    let status = if !(queue_ok && sessions_ok && ratings_ok) {
                        0
                    } else if !pairing_ok {
                        1
                    } else {
                        2
                    };
                    metrics.update_health_status(status);

                    debug!(
                        "Updated service health metrics - uptime: {}s, status: {}",
                        uptime_seconds, status
                    );
                }

                info!("Health metrics task stopped");
            })
        };

        self.push_task(pool_metrics_task)?;
        self.push_task(health_metrics_task)?;

        info!("2 background maintenance tasks started successfully");
        Ok(())
    }

    fn push_task(&self, handle: JoinHandle<()>) -> Result<(), ServiceError> {
        self.background_tasks
            .lock()
            .map_err(|_| ServiceError::BackgroundTask {
                message: "background task lock poisoned".to_string(),
            })?
            .push(handle);
        Ok(())
    }

    async fn stop_background_tasks(&self) -> Result<(), ServiceError> {
        let tasks: Vec<JoinHandle<()>> = {
            let mut tasks =
                self.background_tasks
                    .lock()
                    .map_err(|_| ServiceError::BackgroundTask {
                        message: "background task lock poisoned".to_string(),
                    })?;
            tasks.drain(..).collect()
        };

        let task_count = tasks.len();
        if task_count == 0 {
            info!("No background tasks to stop");
            return Ok(());
        }

        info!("Stopping {} background tasks...", task_count);
        for (i, task) in tasks.into_iter().enumerate() {
            debug!("Aborting background task {}/{}", i + 1, task_count);
            task.abort();
        }

        info!("✅ All {} background tasks stopped", task_count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{GetPlayerRatingCommand, JoinQueueCommand};
    use crate::types::MatchPreferences;
    use crate::config::GameQueueConfig;

    fn create_test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.games = vec![GameQueueConfig::one_v_one("chess")];
        config.matchmaking.tick_interval_ms = 20;
        config
    }

    #[tokio::test]
    async fn test_app_state_initialization() {
        let app_state = AppState::new(create_test_config()).await.unwrap();

        assert!(!app_state.is_running().await);
        assert_eq!(app_state.config().games.len(), 1);
        assert!(app_state.pool_stats().unwrap().is_empty());
        assert!(app_state.rating_store().is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_invalid_rating_settings_are_rejected() {
        let mut config = create_test_config();
        config.rating.min_deviation = 400.0;

        assert!(matches!(
            AppState::new(config).await,
            Err(ServiceError::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn test_background_pairing_and_settlement() {
        let app_state = Arc::new(AppState::new(create_test_config()).await.unwrap());
        app_state.start_matchmaking_tasks().unwrap();

        let service = app_state.matchmaking();
        let alice = service
            .join_queue(JoinQueueCommand {
                player_id: "alice".to_string(),
                game_id: "chess".to_string(),
                party_size: 1,
                preferences: MatchPreferences::default(),
            })
            .await
            .unwrap();
        service
            .join_queue(JoinQueueCommand {
                player_id: "bob".to_string(),
                game_id: "chess".to_string(),
                party_size: 1,
                preferences: MatchPreferences::default(),
            })
            .await
            .unwrap();

        let session = tokio::time::timeout(Duration::from_secs(5), service.wait_for_match(alice))
            .await
            .unwrap()
            .unwrap();

        app_state
            .result_sender()
            .send(MatchResult {
                match_id: crate::utils::generate_match_id(),
                game_id: "chess".to_string(),
                winner_ids: vec!["alice".to_string()],
                loser_ids: vec!["bob".to_string()],
                session_id: Some(session.session_id),
            })
            .await
            .unwrap();

        let mut settled = false;
        for _ in 0..100 {
            let rating = service
                .get_player_rating(GetPlayerRatingCommand {
                    player_id: "alice".to_string(),
                    game_id: "chess".to_string(),
                })
                .await
                .unwrap();
            if rating.matches_played == 1 {
                settled = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(settled);

        app_state.shutdown().await.unwrap();
    }
}
