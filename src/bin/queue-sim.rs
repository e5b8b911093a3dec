//! Queue Simulator CLI Tool
//!
//! Drives the matchmaking service in-process with simulated players and
//! prints how pairing and ratings behave.
//!
//! Usage:
//!   cargo run --bin queue-sim -- --help
//!   cargo run --bin queue-sim run --game chess --format 1v1 --players 40 --rounds 25
//!   cargo run --bin queue-sim run --game valorant --format 5v5 --players 100 --seed 7
//!   cargo run --bin queue-sim rate --rating 1500 --deviation 200 --opponent 1400:30:1 --opponent 1550:100:0

use anyhow::{anyhow, Context, Result};
use arena_matchmaker::commands::{
    GetLeaderboardCommand, GetPoolStatsCommand, JoinQueueCommand, UpdateRatingsCommand,
};
use arena_matchmaker::config::{AppConfig, GameQueueConfig, RatingSettings};
use arena_matchmaker::error::MatchmakingError;
use arena_matchmaker::rating::glicko2::{rate_period, GameResult, Glicko2Params};
use arena_matchmaker::service::AppState;
use arena_matchmaker::types::{MatchPreferences, RankTier, Session};
use arena_matchmaker::utils::generate_match_id;
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use skillratings::glicko2::Glicko2Rating;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "queue-sim")]
#[command(about = "In-process matchmaking and rating simulator for arena-matchmaker")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate players queueing, matching and reporting results
    Run {
        /// Game identifier
        #[arg(short, long, default_value = "chess")]
        game: String,
        /// Team format (1v1, 2v2, 3v3, 4v4, 5v5)
        #[arg(short, long, default_value = "1v1")]
        format: String,
        /// Number of simulated players
        #[arg(short, long, default_value = "40")]
        players: usize,
        /// Queue, pair and settle rounds
        #[arg(short, long, default_value = "25")]
        rounds: usize,
        /// Random seed for reproducible runs
        #[arg(long)]
        seed: Option<u64>,
        /// Leaderboard rows to print
        #[arg(long, default_value = "10")]
        top: usize,
    },
    /// Rate one player over a single rating period
    Rate {
        #[arg(long, default_value = "1500.0")]
        rating: f64,
        #[arg(long, default_value = "350.0")]
        deviation: f64,
        #[arg(long, default_value = "0.06")]
        volatility: f64,
        /// Opponent as rating:deviation:score, repeatable
        #[arg(long = "opponent", value_name = "R:RD:S")]
        opponents: Vec<String>,
    },
}

/// Hidden strength of a simulated player
struct SimPlayer {
    id: String,
    skill: f64,
}

fn parse_opponent(value: &str) -> Result<GameResult> {
    let parts: Vec<&str> = value.split(':').collect();
    if parts.len() != 3 {
        return Err(anyhow!(
            "Invalid opponent '{}', expected rating:deviation:score",
            value
        ));
    }
    let parse = |part: &str, what: &str| -> Result<f64> {
        part.trim()
            .parse()
            .with_context(|| format!("Invalid {} in opponent '{}'", what, value))
    };

    Ok(GameResult {
        opponent_rating: parse(parts[0], "rating")?,
        opponent_deviation: parse(parts[1], "deviation")?,
        score: parse(parts[2], "score")?,
    })
}

/// Elo-style chance that skill `a` beats skill `b`
fn true_win_probability(a: f64, b: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((b - a) / 400.0))
}

/// Split participants into two equal teams in seat order
fn split_teams(session: &Session) -> (Vec<String>, Vec<String>) {
    let half = session.participant_ids.len() / 2;
    let (a, b) = session.participant_ids.split_at(half);
    (a.to_vec(), b.to_vec())
}

async fn run_simulation(
    game: String,
    format: String,
    player_count: usize,
    rounds: usize,
    seed: Option<u64>,
    top: usize,
) -> Result<()> {
    let rules = GameQueueConfig::from_format(game.clone(), &format)?;
    if player_count < rules.session_size {
        return Err(anyhow!(
            "Need at least {} players for {}",
            rules.session_size,
            format
        ));
    }

    let mut config = AppConfig::default();
    config.games = vec![rules.clone()];
    config.matchmaking.allow_unlisted_games = false;

    let app_state = Arc::new(AppState::new(config).await?);
    let service = app_state.matchmaking();

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let players: Vec<SimPlayer> = (0..player_count)
        .map(|i| SimPlayer {
            id: format!("player-{:03}", i),
            skill: rng.random_range(900.0..2300.0),
        })
        .collect();
    let skills: HashMap<&str, f64> = players.iter().map(|p| (p.id.as_str(), p.skill)).collect();

    println!(
        "🎮 Simulating {} players in {} ({}) for {} rounds",
        player_count, game, format, rounds
    );

    let mut sessions_played = 0usize;
    let mut upsets = 0usize;

    for round in 1..=rounds {
        for player in &players {
            let joined = service
                .join_queue(JoinQueueCommand {
                    player_id: player.id.clone(),
                    game_id: game.clone(),
                    party_size: 1,
                    preferences: MatchPreferences::default(),
                })
                .await;
            match joined {
                // Still waiting from an earlier round
                Ok(_) | Err(MatchmakingError::AlreadyQueued { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let pool = service.get_pool_stats(GetPoolStatsCommand {
            game_id: game.clone(),
        })?;
        let report = service.matcher().run_pass(&game).await?;

        for session in &report.sessions {
            let (team_a, team_b) = split_teams(session);
            let mean = |team: &[String]| {
                team.iter().map(|id| skills[id.as_str()]).sum::<f64>() / team.len() as f64
            };
            let (skill_a, skill_b) = (mean(&team_a), mean(&team_b));
            let a_wins = rng.random_bool(true_win_probability(skill_a, skill_b));
            if a_wins != (skill_a >= skill_b) {
                upsets += 1;
            }

            let (winners, losers) = if a_wins {
                (team_a, team_b)
            } else {
                (team_b, team_a)
            };
            service
                .update_ratings(UpdateRatingsCommand {
                    match_id: generate_match_id(),
                    game_id: game.clone(),
                    winner_player_ids: winners,
                    loser_player_ids: losers,
                    session_id: Some(session.session_id),
                })
                .await?;
            sessions_played += 1;
        }

        println!(
            "  Round {:>3}: {} waiting ({:?}), {} sessions formed",
            round,
            pool.players_waiting,
            pool.health,
            report.sessions.len()
        );
    }

    let board = service
        .get_leaderboard(GetLeaderboardCommand {
            game_id: game.clone(),
            limit: top,
        })
        .await?;

    println!("\n🏆 Leaderboard");
    for (rank, rating) in board.iter().enumerate() {
        println!(
            "  {:>2}. {:<12} {:>7.1} ±{:>5.1}  skill {:>6.0}  {}-{}  {}",
            rank + 1,
            rating.player_id,
            rating.rating,
            rating.deviation,
            skills.get(rating.player_id.as_str()).copied().unwrap_or_default(),
            rating.wins,
            rating.losses,
            rating.tier().as_str()
        );
    }

    let tiers = app_state.leaderboard().get_tier_distribution(&game).await?;
    println!("\n📊 Tier distribution");
    for tier in RankTier::ALL {
        println!("  {:<12} {}", tier.as_str(), tiers.get(&tier).copied().unwrap_or(0));
    }

    println!(
        "\n📈 {} sessions played, {} upsets ({:.1}%)",
        sessions_played,
        upsets,
        if sessions_played > 0 {
            upsets as f64 * 100.0 / sessions_played as f64
        } else {
            0.0
        }
    );
    Ok(())
}

fn rate_once(rating: f64, deviation: f64, volatility: f64, opponents: &[String]) -> Result<()> {
    let results = opponents
        .iter()
        .map(|value| parse_opponent(value))
        .collect::<Result<Vec<_>>>()?;

    let player = Glicko2Rating {
        rating,
        deviation,
        volatility,
    };
    let params = Glicko2Params::from(&RatingSettings::default());
    let updated = rate_period(&player, &results, &params)?;

    println!("📐 Rating period with {} games", results.len());
    println!(
        "  Before: {:.4} ±{:.4} (σ {:.6})",
        player.rating, player.deviation, player.volatility
    );
    println!(
        "  After:  {:.4} ±{:.4} (σ {:.6})",
        updated.rating, updated.deviation, updated.volatility
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            game,
            format,
            players,
            rounds,
            seed,
            top,
        } => run_simulation(game, format, players, rounds, seed, top).await,
        Commands::Rate {
            rating,
            deviation,
            volatility,
            opponents,
        } => rate_once(rating, deviation, volatility, &opponents),
    }
}
