//! Configuration management for the arena-matchmaker service
//!
//! This module handles configuration loading from environment variables and
//! TOML files, validation, and default values for queues and ratings.

pub mod app;
pub mod queue;
pub mod rating;

// Re-export commonly used types
pub use app::{validate_config, AppConfig, MatchmakingSettings, ServiceSettings};
pub use queue::{GameQueueConfig, GameRules};
pub use rating::RatingSettings;
