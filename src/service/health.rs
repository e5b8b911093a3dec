//! Health checks over the matchmaking components
//!
//! Readiness and liveness probes plus a detailed report used by the
//! `/stats` endpoint and the `--health-check` CLI mode.

use crate::service::app::AppState;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Set when the component is not healthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Games with at least one queued ticket
    pub active_games: usize,
    /// Players across every queue
    pub players_waiting: usize,
    pub sessions_formed: u64,
    /// Sessions formed but not yet played
    pub sessions_awaiting_start: usize,
    pub tickets_expired: u64,
    /// Players with a stored rating
    pub rated_players: usize,
    pub uptime_seconds: u64,
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(app_state: Arc<AppState>) -> Result<Self> {
        let mut checks = vec![Self::check_service_running(&app_state).await];
        checks.push(Self::check_queue(&app_state));
        checks.push(Self::check_sessions(&app_state));
        checks.push(Self::check_ratings(&app_state));
        checks.push(Self::check_pairing(&app_state));

        let status = Self::overall_status(&checks);
        let stats = Self::gather_service_stats(&app_state);

        Ok(HealthCheck {
            status,
            service: app_state.config().service.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        if app_state.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check - verify joins and settlements can be served
    pub async fn readiness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        if !app_state.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }

        let checks = [
            Self::check_queue(&app_state),
            Self::check_ratings(&app_state),
            Self::check_pairing(&app_state),
        ];
        Ok(Self::overall_status(&checks))
    }

    /// Worst status wins
    fn overall_status(checks: &[ComponentCheck]) -> HealthStatus {
        if checks.iter().any(|c| c.status == HealthStatus::Unhealthy) {
            HealthStatus::Unhealthy
        } else if checks.iter().any(|c| c.status == HealthStatus::Degraded) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    async fn check_service_running(app_state: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = if app_state.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn check_queue(app_state: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match app_state.matchmaking().queue().get_stats() {
            Ok(_) => (HealthStatus::Healthy, None),
            Err(e) => {
                error!("Queue stats check failed: {}", e);
                (
                    HealthStatus::Unhealthy,
                    Some(format!("Queue unavailable: {}", e)),
                )
            }
        };

        ComponentCheck {
            name: "queue".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn check_sessions(app_state: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match app_state.matchmaking().sessions().get_stats() {
            Ok(_) => (HealthStatus::Healthy, None),
            Err(e) => {
                error!("Session registry check failed: {}", e);
                (
                    HealthStatus::Degraded,
                    Some(format!("Session registry unavailable: {}", e)),
                )
            }
        };

        ComponentCheck {
            name: "sessions".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn check_ratings(app_state: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match app_state.rating_store().len() {
            Ok(_) => (HealthStatus::Healthy, None),
            Err(e) => {
                error!("Rating store check failed: {}", e);
                (
                    HealthStatus::Unhealthy,
                    Some(format!("Rating store unavailable: {}", e)),
                )
            }
        };

        ComponentCheck {
            name: "ratings".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// A stopped pairing loop still accepts joins, so it only degrades
    fn check_pairing(app_state: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = if app_state.matchmaking().matcher().is_running() {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Degraded,
                Some("Pairing loop is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "pairing".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn gather_service_stats(app_state: &AppState) -> ServiceStats {
        let mut stats = ServiceStats {
            uptime_seconds: app_state.uptime().as_secs(),
            ..ServiceStats::default()
        };

        match app_state.pool_stats() {
            Ok(pools) => {
                stats.active_games = pools.len();
                stats.players_waiting = pools.iter().map(|p| p.players_waiting).sum();
            }
            Err(e) => debug!("Failed to get pool stats for health check: {}", e),
        }

        match app_state.matchmaking().queue().get_stats() {
            Ok(queue_stats) => {
                stats.sessions_formed = queue_stats.sessions_formed;
                stats.tickets_expired = queue_stats.tickets_expired;
            }
            Err(e) => debug!("Failed to get queue stats for health check: {}", e),
        }

        match app_state.matchmaking().sessions().get_stats() {
            Ok(session_stats) => stats.sessions_awaiting_start = session_stats.awaiting_start,
            Err(e) => debug!("Failed to get session stats for health check: {}", e),
        }

        match app_state.rating_store().len() {
            Ok(count) => stats.rated_players = count,
            Err(e) => debug!("Failed to count ratings for health check: {}", e),
        }

        stats
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}
