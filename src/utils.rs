//! Utility functions for the matchmaking service

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generate a new queue ticket handle
pub fn generate_session_ref() -> Uuid {
    Uuid::new_v4()
}

/// Generate a new unique session ID
pub fn generate_session_id() -> Uuid {
    Uuid::new_v4()
}

/// Generate a new unique match ID
pub fn generate_match_id() -> Uuid {
    Uuid::new_v4()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Calculate the absolute difference between two ratings
pub fn rating_difference(rating1: f64, rating2: f64) -> f64 {
    (rating1 - rating2).abs()
}

/// Index of the rating bracket containing `rating`
///
/// Brackets are half-open ranges `[index * width, (index + 1) * width)`.
pub fn bracket_index(rating: f64, width: f64) -> i64 {
    (rating / width).floor() as i64
}

/// Lowest rating covered by a bracket
pub fn bracket_floor(index: i64, width: f64) -> f64 {
    index as f64 * width
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_unique_ids() {
        assert_ne!(generate_session_ref(), generate_session_ref());
        assert_ne!(generate_session_id(), generate_session_id());
        assert_ne!(generate_match_id(), generate_match_id());
    }

    #[test]
    fn test_rating_difference() {
        assert_eq!(rating_difference(1500.0, 1400.0), 100.0);
        assert_eq!(rating_difference(1400.0, 1500.0), 100.0);
        assert_eq!(rating_difference(1500.0, 1500.0), 0.0);
    }

    #[test]
    fn test_bracket_index() {
        assert_eq!(bracket_index(1500.0, 100.0), 15);
        assert_eq!(bracket_index(1599.99, 100.0), 15);
        assert_eq!(bracket_index(1600.0, 100.0), 16);
        assert_eq!(bracket_index(-20.0, 100.0), -1);
        assert_eq!(bracket_floor(15, 100.0), 1500.0);
    }
}
