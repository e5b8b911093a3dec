//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the arena-matchmaker queue,
//! session and rating subsystems using Prometheus metrics.

use crate::types::{PoolStats, SessionState};
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the matchmaking service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Queue admission and waiting metrics
    queue_metrics: QueueMetrics,

    /// Session lifecycle metrics
    session_metrics: SessionMetrics,

    /// Rating update metrics
    rating_metrics: RatingMetrics,

    /// Performance metrics
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Queue metrics, labelled by game
#[derive(Clone)]
pub struct QueueMetrics {
    /// Join attempts by outcome
    pub joins_total: IntCounterVec,

    /// Tickets withdrawn by their owner
    pub leaves_total: IntCounterVec,

    /// Tickets expired by the matcher
    pub timeouts_total: IntCounterVec,

    /// Waiting tickets
    pub queue_depth: IntGaugeVec,

    /// Waiting seats, counting party members
    pub players_waiting: IntGaugeVec,

    /// Time from join to match
    pub wait_time_seconds: HistogramVec,
}

/// Session metrics
#[derive(Clone)]
pub struct SessionMetrics {
    /// Sessions formed by the matcher
    pub sessions_formed_total: IntCounterVec,

    /// Sessions reaching a terminal state
    pub sessions_closed_total: IntCounterVec,

    /// Seats per formed session
    pub session_size: HistogramVec,
}

/// Rating metrics
#[derive(Clone)]
pub struct RatingMetrics {
    /// Match settlements by status
    pub rating_updates_total: IntCounterVec,

    /// Optimistic write conflicts
    pub persistence_conflicts_total: IntCounter,

    /// Ratings after settlement
    pub rating_distribution: HistogramVec,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// Queue operation durations
    pub queue_operation_duration: HistogramVec,

    /// Pairing pass duration per game
    pub pairing_pass_duration: HistogramVec,

    /// Rating calculation time
    pub rating_calculation_duration: Histogram,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let queue_metrics = QueueMetrics::new(&registry)?;
        let session_metrics = SessionMetrics::new(&registry)?;
        let rating_metrics = RatingMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            queue_metrics,
            session_metrics,
            rating_metrics,
            performance_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Get service metrics
    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    /// Get queue metrics
    pub fn queue(&self) -> &QueueMetrics {
        &self.queue_metrics
    }

    /// Get session metrics
    pub fn session(&self) -> &SessionMetrics {
        &self.session_metrics
    }

    /// Get rating metrics
    pub fn rating(&self) -> &RatingMetrics {
        &self.rating_metrics
    }

    /// Get performance metrics
    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Update queue gauges from a pool snapshot
    pub fn update_from_pool_stats(&self, stats: &PoolStats) {
        self.queue_metrics
            .queue_depth
            .with_label_values(&[stats.game_id.as_str()])
            .set(stats.queue_depth as i64);

        self.queue_metrics
            .players_waiting
            .with_label_values(&[stats.game_id.as_str()])
            .set(stats.players_waiting as i64);
    }

    /// Record a join attempt and how long admission took
    pub fn record_join(&self, game_id: &str, accepted: bool, duration: Duration) {
        let result = if accepted { "accepted" } else { "rejected" };

        self.queue_metrics
            .joins_total
            .with_label_values(&[game_id, result])
            .inc();

        self.performance_metrics
            .queue_operation_duration
            .with_label_values(&["join"])
            .observe(duration.as_secs_f64());
    }

    /// Record a ticket withdrawn by its owner
    pub fn record_leave(&self, game_id: &str, duration: Duration) {
        self.queue_metrics
            .leaves_total
            .with_label_values(&[game_id])
            .inc();

        self.performance_metrics
            .queue_operation_duration
            .with_label_values(&["leave"])
            .observe(duration.as_secs_f64());
    }

    /// Record a formed session and the waits of the tickets it consumed
    pub fn record_session_formed(&self, game_id: &str, slots: usize, waits_ms: &[i64]) {
        self.session_metrics
            .sessions_formed_total
            .with_label_values(&[game_id])
            .inc();

        self.session_metrics
            .session_size
            .with_label_values(&[game_id])
            .observe(slots as f64);

        for wait_ms in waits_ms {
            self.queue_metrics
                .wait_time_seconds
                .with_label_values(&[game_id])
                .observe(*wait_ms as f64 / 1000.0);
        }
    }

    /// Record tickets expired by one pairing pass
    pub fn record_timeouts(&self, game_id: &str, count: usize) {
        if count == 0 {
            return;
        }
        self.queue_metrics
            .timeouts_total
            .with_label_values(&[game_id])
            .inc_by(count as u64);
    }

    /// Record a session reaching a terminal state
    pub fn record_session_closed(&self, game_id: &str, state: SessionState) {
        self.session_metrics
            .sessions_closed_total
            .with_label_values(&[game_id, state.as_str()])
            .inc();
    }

    /// Record pairing pass duration
    pub fn record_pairing_pass(&self, game_id: &str, duration: Duration) {
        self.performance_metrics
            .pairing_pass_duration
            .with_label_values(&[game_id])
            .observe(duration.as_secs_f64());
    }

    /// Record a match settlement attempt
    pub fn record_rating_update(&self, success: bool, duration: Duration) {
        let status = if success { "success" } else { "failed" };

        self.rating_metrics
            .rating_updates_total
            .with_label_values(&[status])
            .inc();

        self.performance_metrics
            .rating_calculation_duration
            .observe(duration.as_secs_f64());
    }

    /// Record an optimistic write conflict
    pub fn record_persistence_conflict(&self) {
        self.rating_metrics.persistence_conflicts_total.inc();
    }

    /// Record a rating after settlement
    pub fn record_player_rating(&self, game_id: &str, rating: f64) {
        self.rating_metrics
            .rating_distribution
            .with_label_values(&[game_id])
            .observe(rating);
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds = IntGauge::new(
            "arena_matchmaker_uptime_seconds",
            "Service uptime in seconds",
        )?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let health_status = IntGauge::new(
            "arena_matchmaker_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new(
                "arena_matchmaker_component_health",
                "Component health status",
            ),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            health_status,
            component_health,
        })
    }
}

impl QueueMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let joins_total = IntCounterVec::new(
            Opts::new("arena_matchmaker_joins_total", "Queue join attempts"),
            &["game", "result"],
        )?;
        registry.register(Box::new(joins_total.clone()))?;

        let leaves_total = IntCounterVec::new(
            Opts::new("arena_matchmaker_leaves_total", "Tickets withdrawn"),
            &["game"],
        )?;
        registry.register(Box::new(leaves_total.clone()))?;

        let timeouts_total = IntCounterVec::new(
            Opts::new(
                "arena_matchmaker_timeouts_total",
                "Tickets expired without a match",
            ),
            &["game"],
        )?;
        registry.register(Box::new(timeouts_total.clone()))?;

        let queue_depth = IntGaugeVec::new(
            Opts::new("arena_matchmaker_queue_depth", "Waiting tickets"),
            &["game"],
        )?;
        registry.register(Box::new(queue_depth.clone()))?;

        let players_waiting = IntGaugeVec::new(
            Opts::new(
                "arena_matchmaker_players_waiting",
                "Players currently waiting in queue",
            ),
            &["game"],
        )?;
        registry.register(Box::new(players_waiting.clone()))?;

        let wait_time_seconds = HistogramVec::new(
            HistogramOpts::new(
                "arena_matchmaker_wait_time_seconds",
                "Time from join to match",
            )
            .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
            &["game"],
        )?;
        registry.register(Box::new(wait_time_seconds.clone()))?;

        Ok(Self {
            joins_total,
            leaves_total,
            timeouts_total,
            queue_depth,
            players_waiting,
            wait_time_seconds,
        })
    }
}

impl SessionMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let sessions_formed_total = IntCounterVec::new(
            Opts::new("arena_matchmaker_sessions_formed_total", "Sessions formed"),
            &["game"],
        )?;
        registry.register(Box::new(sessions_formed_total.clone()))?;

        let sessions_closed_total = IntCounterVec::new(
            Opts::new(
                "arena_matchmaker_sessions_closed_total",
                "Sessions completed or cancelled",
            ),
            &["game", "state"],
        )?;
        registry.register(Box::new(sessions_closed_total.clone()))?;

        let session_size = HistogramVec::new(
            HistogramOpts::new("arena_matchmaker_session_size", "Seats per formed session")
                .buckets(vec![2.0, 4.0, 6.0, 8.0, 10.0]),
            &["game"],
        )?;
        registry.register(Box::new(session_size.clone()))?;

        Ok(Self {
            sessions_formed_total,
            sessions_closed_total,
            session_size,
        })
    }
}

impl RatingMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let rating_updates_total = IntCounterVec::new(
            Opts::new(
                "arena_matchmaker_rating_updates_total",
                "Match settlements",
            ),
            &["status"],
        )?;
        registry.register(Box::new(rating_updates_total.clone()))?;

        let persistence_conflicts_total = IntCounter::new(
            "arena_matchmaker_persistence_conflicts_total",
            "Optimistic rating write conflicts",
        )?;
        registry.register(Box::new(persistence_conflicts_total.clone()))?;

        let rating_distribution = HistogramVec::new(
            HistogramOpts::new(
                "arena_matchmaker_rating_distribution",
                "Player rating distribution",
            )
            .buckets(vec![
                1000.0, 1200.0, 1400.0, 1600.0, 1900.0, 2200.0, 2500.0, 2800.0,
            ]),
            &["game"],
        )?;
        registry.register(Box::new(rating_distribution.clone()))?;

        Ok(Self {
            rating_updates_total,
            persistence_conflicts_total,
            rating_distribution,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let queue_operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "arena_matchmaker_queue_operation_duration_seconds",
                "Queue operation duration",
            )
            .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]),
            &["operation"],
        )?;
        registry.register(Box::new(queue_operation_duration.clone()))?;

        let pairing_pass_duration = HistogramVec::new(
            HistogramOpts::new(
                "arena_matchmaker_pairing_pass_duration_seconds",
                "Pairing pass duration",
            )
            .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["game"],
        )?;
        registry.register(Box::new(pairing_pass_duration.clone()))?;

        let rating_calculation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "arena_matchmaker_rating_calculation_duration_seconds",
                "Rating calculation time",
            )
            .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1]),
        )?;
        registry.register(Box::new(rating_calculation_duration.clone()))?;

        Ok(Self {
            queue_operation_duration,
            pairing_pass_duration,
            rating_calculation_duration,
        })
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("Failed to create default metrics collector")
    }
}
