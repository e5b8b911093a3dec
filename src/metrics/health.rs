//! HTTP surface for probes, Prometheus scrapes and read-only queue views
//!
//! Routes:
//! - `/health`, `/ready`, `/alive`: orchestration probes
//! - `/metrics`: Prometheus text exposition
//! - `/stats`: component report plus every active pool
//! - `/pools/{game_id}`: one game's pool snapshot
//! - `/leaderboard/{game_id}?limit=N`: top ratings of one game

use crate::commands::{GetLeaderboardCommand, GetPoolStatsCommand};
use crate::error::MatchmakingError;
use crate::metrics::collector::MetricsCollector;
use crate::service::app::AppState;
use crate::service::health::{HealthCheck, HealthStatus};
use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const SERVICE_NAME: &str = env!("CARGO_PKG_NAME");
const DEFAULT_LEADERBOARD_LIMIT: usize = 10;
const MAX_LEADERBOARD_LIMIT: usize = 500;

#[derive(Debug, Clone)]
pub struct HealthServerConfig {
    pub port: u16,
    /// Bind address, "0.0.0.0" for all interfaces
    pub host: String,
}

impl Default for HealthServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
        }
    }
}

/// Shared state handed to every route
#[derive(Clone)]
pub struct HealthServerState {
    pub metrics_collector: Arc<MetricsCollector>,
    pub app_state: Option<Arc<AppState>>,
}

pub struct HealthServer {
    config: HealthServerConfig,
    state: HealthServerState,
    shutdown_tx: broadcast::Sender<()>,
}

impl HealthServer {
    pub fn new(config: HealthServerConfig, metrics_collector: Arc<MetricsCollector>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            state: HealthServerState {
                metrics_collector,
                app_state: None,
            },
            shutdown_tx,
        }
    }

    /// Attach the running service; without it every probe reports 503
    pub fn with_app_state(mut self, app_state: Arc<AppState>) -> Self {
        self.state.app_state = Some(app_state);
        self
    }

    /// Bind and serve until [`HealthServer::stop`] is called
    pub async fn start(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .context("Invalid health server address")?;

        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind health server to {}", addr))?;
        info!("🩺 Health and metrics endpoints on http://{}", addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        axum::serve(listener, self.create_router())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                debug!("Health server received shutdown");
            })
            .await?;

        info!("Health server stopped");
        Ok(())
    }

    fn create_router(&self) -> Router {
        Router::new()
            .route("/", get(root_handler))
            .route("/health", get(health_handler))
            .route("/ready", get(ready_handler))
            .route("/alive", get(alive_handler))
            .route("/metrics", get(metrics_handler))
            .route("/stats", get(stats_handler))
            .route("/pools/{game_id}", get(pool_handler))
            .route("/leaderboard/{game_id}", get(leaderboard_handler))
            .with_state(self.state.clone())
    }

    pub async fn stop(&self) -> Result<()> {
        if let Err(e) = self.shutdown_tx.send(()) {
            // No receiver: the server never started or already stopped
            warn!("Health server was not running: {}", e);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Probe {
    Health,
    Ready,
    Alive,
}

impl Probe {
    async fn run(self, app_state: Arc<AppState>) -> Result<HealthStatus> {
        match self {
            Probe::Ready => HealthCheck::readiness_check(app_state).await,
            Probe::Health | Probe::Alive => HealthCheck::liveness_check(app_state).await,
        }
    }

    /// Degraded still serves traffic, except for the strict liveness probe
    fn accepts(self, status: &HealthStatus) -> bool {
        match (self, status) {
            (_, HealthStatus::Healthy) => true,
            (Probe::Alive, _) => false,
            (_, HealthStatus::Degraded) => true,
            (_, HealthStatus::Unhealthy) => false,
        }
    }
}

fn service_error(message: &str) -> Value {
    json!({
        "status": "unhealthy",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "error": message,
        "timestamp": chrono::Utc::now()
    })
}

async fn probe_response(state: &HealthServerState, probe: Probe) -> (StatusCode, Json<Value>) {
    debug!("{:?} probe requested", probe);

    let Some(app_state) = &state.app_state else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(service_error("Service not initialized")),
        );
    };

    let status = match probe.run(app_state.clone()).await {
        Ok(status) => status,
        Err(e) => {
            error!("{:?} probe failed: {}", probe, e);
            HealthStatus::Unhealthy
        }
    };
    let code = if probe.accepts(&status) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(json!({
            "status": status,
            "service": SERVICE_NAME,
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "/health",
            "/ready",
            "/alive",
            "/metrics",
            "/stats",
            "/pools/{game_id}",
            "/leaderboard/{game_id}"
        ]
    }))
}

async fn health_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    probe_response(&state, Probe::Health).await
}

async fn ready_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    probe_response(&state, Probe::Ready).await
}

async fn alive_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    probe_response(&state, Probe::Alive).await
}

async fn metrics_handler(State(state): State<HealthServerState>) -> Response {
    match HealthEndpoints::get_metrics_text(state.metrics_collector.clone()).await {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
            text,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to encode metrics".to_string(),
            )
                .into_response()
        }
    }
}

async fn stats_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    let Some(app_state) = &state.app_state else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(service_error("Service not initialized")),
        );
    };

    let health = match HealthCheck::check(app_state.clone()).await {
        Ok(health) => health,
        Err(e) => {
            error!("Failed to build service report: {}", e);
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(service_error("Failed to get service stats")),
            );
        }
    };
    let pools = app_state.pool_stats().unwrap_or_else(|e| {
        warn!("Failed to collect pool stats: {}", e);
        Vec::new()
    });

    (
        StatusCode::OK,
        Json(json!({
            "service": {
                "name": health.service,
                "version": health.version,
                "status": health.status,
                "uptime_seconds": health.stats.uptime_seconds
            },
            "queues": {
                "active_games": health.stats.active_games,
                "players_waiting": health.stats.players_waiting,
                "tickets_expired": health.stats.tickets_expired,
                "pools": pools
            },
            "sessions": {
                "formed": health.stats.sessions_formed,
                "awaiting_start": health.stats.sessions_awaiting_start
            },
            "ratings": {
                "rated_players": health.stats.rated_players
            },
            "components": health.checks,
            "timestamp": chrono::Utc::now()
        })),
    )
}

/// Map a matchmaking failure on a read route to a status code
fn read_error(game_id: &str, e: MatchmakingError) -> (StatusCode, Json<Value>) {
    let code = match e {
        MatchmakingError::UnknownGame { .. } => StatusCode::NOT_FOUND,
        _ => {
            error!("Read for game {} failed: {}", game_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        code,
        Json(json!({ "game_id": game_id, "error": e.to_string() })),
    )
}

async fn pool_handler(
    State(state): State<HealthServerState>,
    Path(game_id): Path<String>,
) -> impl IntoResponse {
    let Some(app_state) = &state.app_state else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(service_error("Service not initialized")),
        );
    };

    let command = GetPoolStatsCommand {
        game_id: game_id.clone(),
    };
    match app_state.matchmaking().get_pool_stats(command) {
        Ok(stats) => (StatusCode::OK, Json(json!(stats))),
        Err(e) => read_error(&game_id, e),
    }
}

#[derive(Debug, Deserialize)]
struct LeaderboardQuery {
    limit: Option<usize>,
}

async fn leaderboard_handler(
    State(state): State<HealthServerState>,
    Path(game_id): Path<String>,
    Query(query): Query<LeaderboardQuery>,
) -> impl IntoResponse {
    let Some(app_state) = &state.app_state else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(service_error("Service not initialized")),
        );
    };

    let limit = query
        .limit
        .unwrap_or(DEFAULT_LEADERBOARD_LIMIT)
        .min(MAX_LEADERBOARD_LIMIT);
    let command = GetLeaderboardCommand {
        game_id: game_id.clone(),
        limit,
    };

    let service = app_state.matchmaking();
    match service.get_leaderboard(command).await {
        Ok(ratings) => {
            let entries: Vec<Value> = ratings
                .iter()
                .enumerate()
                .map(|(index, rating)| {
                    json!({
                        "rank": index + 1,
                        "player_id": rating.player_id,
                        "rating": rating.rating,
                        "deviation": rating.deviation,
                        "tier": rating.tier().as_str(),
                        "provisional": service.is_provisional(rating),
                        "wins": rating.wins,
                        "losses": rating.losses
                    })
                })
                .collect();
            (
                StatusCode::OK,
                Json(json!({ "game_id": game_id, "entries": entries })),
            )
        }
        Err(e) => read_error(&game_id, e),
    }
}

/// Endpoint payloads without going through HTTP
pub struct HealthEndpoints;

impl HealthEndpoints {
    pub async fn get_health_status(app_state: Option<Arc<AppState>>) -> Result<Value> {
        let state = HealthServerState {
            metrics_collector: match &app_state {
                Some(app_state) => app_state.metrics(),
                None => Arc::new(MetricsCollector::new()?),
            },
            app_state,
        };
        let (_, Json(body)) = probe_response(&state, Probe::Health).await;
        Ok(body)
    }

    /// Metrics in Prometheus text format
    pub async fn get_metrics_text(metrics_collector: Arc<MetricsCollector>) -> Result<String> {
        let metric_families = metrics_collector.registry().gather();
        debug!("Encoding {} metric families", metric_families.len());

        TextEncoder::new()
            .encode_to_string(&metric_families)
            .context("Failed to encode metrics")
    }
}
