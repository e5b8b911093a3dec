//! Glicko-2 player ratings
//!
//! This module provides the rating period math, the match settlement engine,
//! the versioned rating store and the service tying them together.

pub mod engine;
pub mod glicko2;
pub mod service;
pub mod storage;

// Re-export commonly used types
pub use engine::RatingEngine;
pub use glicko2::{GameResult, Glicko2Params};
pub use service::RatingService;
pub use storage::{InMemoryRatingStore, RatingReader, RatingStore, RatingWriter};
