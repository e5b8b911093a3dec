//! Arena Matchmaker - skill-based matchmaking and Glicko-2 ratings
//!
//! This crate queues players into per-game rating brackets, pairs them into
//! sessions with widening search windows and settles concluded matches into
//! Glicko-2 ratings with optimistic concurrency.

pub mod commands;
pub mod config;
pub mod error;
pub mod leaderboard;
pub mod metrics;
pub mod notification;
pub mod queue;
pub mod rating;
pub mod service;
pub mod session;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{MatchmakingError, Result};
pub use types::*;

// Re-export key components
pub use commands::{MatchResultSource, MatchmakingService};
pub use leaderboard::Leaderboard;
pub use notification::NotificationSink;
pub use queue::{PoolMatcher, QueueManager};
pub use rating::{RatingEngine, RatingService, RatingStore};
pub use session::SessionRegistry;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
