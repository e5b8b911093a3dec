//! Error types for the matchmaking service
//!
//! Queue, session and rating operations return [`MatchmakingError`] directly so
//! callers can branch on the failure kind. Bootstrap code (configuration, the
//! service wiring and the binaries) works with `anyhow` and wraps these errors.

/// Result type alias for matchmaking operations
pub type Result<T> = std::result::Result<T, MatchmakingError>;

/// Custom error types for specific matchmaking scenarios
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MatchmakingError {
    #[error("Player {player_id} is already queued for game {game_id}")]
    AlreadyQueued { player_id: String, game_id: String },

    #[error("Invalid party for game {game_id}: {reason}")]
    InvalidParty { game_id: String, reason: String },

    #[error("Not queued: {session_ref}")]
    NotQueued { session_ref: String },

    #[error("Matchmaking timed out for {session_ref} after {waited_ms}ms")]
    MatchmakingTimeout { session_ref: String, waited_ms: i64 },

    #[error("Rating not found for player {player_id} in game {game_id}")]
    RatingNotFound { player_id: String, game_id: String },

    #[error("Persistence conflict for player {player_id}: expected version {expected}, found {actual}")]
    PersistenceConflict {
        player_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Rating update failed for match {match_id}: {reason}")]
    RatingUpdateFailed { match_id: String, reason: String },

    #[error("Invalid match result: {reason}")]
    InvalidMatchResult { reason: String },

    #[error("Rating calculation failed: {reason}")]
    RatingCalculationFailed { reason: String },

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Invalid session transition for {session_id}: {from} -> {to}")]
    InvalidSessionTransition {
        session_id: String,
        from: String,
        to: String,
    },

    #[error("Unknown game: {game_id}")]
    UnknownGame { game_id: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl MatchmakingError {
    /// Whether the caller can recover locally by retrying the operation
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MatchmakingError::AlreadyQueued { .. }
                | MatchmakingError::NotQueued { .. }
                | MatchmakingError::MatchmakingTimeout { .. }
                | MatchmakingError::PersistenceConflict { .. }
        )
    }

    pub(crate) fn lock_poisoned(what: &str) -> Self {
        MatchmakingError::InternalError {
            message: format!("Failed to acquire {} lock", what),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let queued = MatchmakingError::AlreadyQueued {
            player_id: "p1".to_string(),
            game_id: "chess".to_string(),
        };
        assert!(queued.is_retryable());

        let invalid = MatchmakingError::InvalidMatchResult {
            reason: "empty winners".to_string(),
        };
        assert!(!invalid.is_retryable());
    }

    #[test]
    fn test_error_messages_carry_context() {
        let err = MatchmakingError::PersistenceConflict {
            player_id: "p7".to_string(),
            expected: 3,
            actual: 4,
        };
        let message = err.to_string();
        assert!(message.contains("p7"));
        assert!(message.contains("expected version 3"));

        let lock = MatchmakingError::lock_poisoned("bracket");
        assert_eq!(lock.to_string(), "Internal service error: Failed to acquire bracket lock");
    }
}
