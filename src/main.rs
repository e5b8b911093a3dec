//! Main entry point for the arena-matchmaker service
//!
//! Loads configuration, initializes logging, starts the matchmaking
//! components and waits for a shutdown signal.

use anyhow::Result;
use arena_matchmaker::config::AppConfig;
use arena_matchmaker::service::{AppState, HealthCheck, HealthStatus};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::time::Duration;
use tracing::{error, info, warn};

/// Arena Matchmaker - skill-based queueing with Glicko-2 ratings
#[derive(Parser)]
#[command(
    name = "arena-matchmaker",
    version,
    about = "Skill-based matchmaking service with Glicko-2 ratings",
    long_about = "Arena Matchmaker queues players into per-game rating brackets, pairs them \
                 into sessions with search windows that widen while they wait, and settles \
                 concluded matches into Glicko-2 ratings."
)]
struct Args {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Perform health check and exit
    #[arg(long, help = "Perform a health check and exit with status code")]
    health_check: bool,

    /// Log level override
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// Health port override
    #[arg(long, value_name = "PORT", help = "Override health and metrics port")]
    health_port: Option<u16>,

    /// Pairing tick override
    #[arg(long, value_name = "MS", help = "Override pairing tick interval in milliseconds")]
    tick_ms: Option<u64>,

    /// Reject games without explicit rules
    #[arg(long, help = "Only accept joins for games listed in the configuration")]
    listed_games_only: bool,

    /// Enable debug mode
    #[arg(short, long, help = "Enable debug mode with verbose logging")]
    debug: bool,

    /// Dry run mode (validate config and exit)
    #[arg(
        long,
        help = "Validate configuration and exit without starting service"
    )]
    dry_run: bool,
}

/// Initialize structured logging with the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Run one health report against a fresh service instance and exit
///
/// Exits 0 only when every component reports healthy.
async fn perform_health_check(config: AppConfig) -> Result<()> {
    info!("Performing health check...");

    let app_state = Arc::new(AppState::new(config).await?);
    let health = match HealthCheck::check(app_state.clone()).await {
        Ok(health) => health,
        Err(e) => {
            error!("Health check failed: {}", e);
            std::process::exit(1);
        }
    };

    println!("Health Check: {}", health.status);
    for check in &health.checks {
        match &check.message {
            Some(message) => println!("  {}: {} ({})", check.name, check.status, message),
            None => println!("  {}: {}", check.name, check.status),
        }
    }
    for game in &app_state.config().games {
        println!(
            "  Game {}: {} slots per session, widening {}/s up to {}",
            game.game_id, game.session_size, game.widen_rate_per_second, game.max_radius
        );
    }
    println!("  Rated Players: {}", health.stats.rated_players);

    std::process::exit(if health.status == HealthStatus::Healthy { 0 } else { 1 });
}

/// Wait for shutdown signals (SIGINT, SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C) signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

/// Log queue depth per game every 30 seconds
async fn health_check_task(app_state: Arc<AppState>) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));

    while app_state.is_running().await {
        interval.tick().await;

        match app_state.pool_stats() {
            Ok(pools) if pools.is_empty() => info!("📭 No players queued"),
            Ok(pools) => {
                for pool in pools {
                    info!(
                        "🎯 {}: {} waiting in {} tickets, avg wait {}ms, est {}ms ({:?})",
                        pool.game_id,
                        pool.players_waiting,
                        pool.queue_depth,
                        pool.avg_wait_ms,
                        pool.estimated_wait_ms,
                        pool.health
                    );
                }
            }
            Err(e) => warn!("Failed to read pool stats: {}", e),
        }
    }
}

fn display_startup_banner(config: &AppConfig) {
    info!("🚀 Arena Matchmaker Service");
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   Health port: {}", config.service.health_port);
    info!("   Pairing tick: {}ms", config.matchmaking.tick_interval_ms);
    for game in &config.games {
        info!(
            "   Game {}: {} slots, parties {}-{}, max wait {}ms",
            game.game_id,
            game.session_size,
            game.min_party_size,
            game.max_party_size,
            game.max_wait_ms
        );
    }
    info!(
        "   Unlisted games: {}",
        if config.matchmaking.allow_unlisted_games {
            "allowed"
        } else {
            "rejected"
        }
    );
    info!(
        "   Glicko-2: tau {}, deviation bounds {}-{}",
        config.rating.tau(),
        config.rating.min_deviation,
        config.rating.max_deviation
    );
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

/// Load configuration from file or environment, then apply CLI overrides
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = if let Some(config_path) = &args.config {
        AppConfig::from_file(config_path)?
    } else {
        AppConfig::from_env()?
    };

    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }

    if args.debug {
        config.service.log_level = "debug".to_string();
    }

    if let Some(port) = args.health_port {
        config.service.health_port = port;
    }

    if let Some(tick_ms) = args.tick_ms {
        config.matchmaking.tick_interval_ms = tick_ms;
    }

    if args.listed_games_only {
        config.matchmaking.allow_unlisted_games = false;
    }

    arena_matchmaker::config::validate_config(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    });

    // Initialize logging early (before any other operations)
    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if args.health_check {
        return perform_health_check(config).await;
    }

    if args.dry_run {
        info!("Configuration validation successful");
        display_startup_banner(&config);
        info!("Dry run completed - exiting without starting service");
        return Ok(());
    }

    display_startup_banner(&config);

    info!("Initializing service components...");
    let app_state = match AppState::new(config.clone()).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting service...");
    if let Err(e) = app_state.clone().start().await {
        error!("Failed to start service: {}", e);
        std::process::exit(1);
    }

    let health_task = {
        let app_state = app_state.clone();
        tokio::spawn(async move {
            health_check_task(app_state).await;
        })
    };

    info!("✅ Arena Matchmaker Service is running");
    info!("Press Ctrl+C to shutdown gracefully...");

    wait_for_shutdown_signal().await;

    info!("🛑 Shutdown signal received, beginning graceful shutdown...");
    health_task.abort();

    match tokio::time::timeout(config.shutdown_timeout(), app_state.shutdown()).await {
        Ok(Ok(())) => info!("✅ Graceful shutdown completed successfully"),
        Ok(Err(e)) => warn!("Shutdown finished with errors: {}", e),
        Err(_) => warn!("⚠️  Shutdown timeout exceeded, forcing exit"),
    }

    info!("🛑 Arena Matchmaker Service stopped");
    Ok(())
}
