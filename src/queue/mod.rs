//! Matchmaking queue: ticket admission and pairing
//!
//! The [`QueueManager`] owns per-game bracket pools and ticket state. The
//! [`PoolMatcher`] periodically pairs waiting entries into sessions.

pub mod manager;
pub mod matcher;

pub use manager::{classify_health, estimate_wait_ms, QueueManager, QueueManagerStats};
pub use matcher::{plan_groups, PassReport, PoolMatcher};
