//! Formed sessions and their lifecycle
//!
//! A session is created by the pool matcher in `AwaitingStart`, then either
//! completed by the match-result path or cancelled. Terminal sessions are kept
//! as an audit trail and never change again.

pub mod registry;

pub use registry::{SessionRegistry, SessionRegistryStats};
