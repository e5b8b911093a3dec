//! Core data types for the matchmaking service

use crate::error::{MatchmakingError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skillratings::glicko2::Glicko2Rating;
use uuid::Uuid;

/// Unique identifier for players
pub type PlayerId = String;

/// Identifier of a game (queue namespace), e.g. "chess" or "cs2"
pub type GameId = String;

/// Correlation handle returned by a join, one per queue ticket
pub type SessionRef = Uuid;

/// Unique identifier for formed sessions
pub type SessionId = Uuid;

/// Unique identifier for concluded matches
pub type MatchId = Uuid;

/// Outcome of a match from one participant's perspective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchOutcome {
    Win,
    Loss,
}

impl MatchOutcome {
    /// Glicko-2 score for this outcome
    pub fn score(self) -> f64 {
        match self {
            MatchOutcome::Win => 1.0,
            MatchOutcome::Loss => 0.0,
        }
    }
}

/// One entry of a player's rating history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingChange {
    pub match_id: MatchId,
    pub old_rating: f64,
    pub new_rating: f64,
    pub change: f64,
    pub outcome: MatchOutcome,
    /// Rating of the (possibly aggregated) opponent
    pub opponent_rating: f64,
    pub timestamp: DateTime<Utc>,
}

/// Display tier derived from a rating
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankTier {
    Bronze,
    Silver,
    Gold,
    Platinum,
    Diamond,
    Master,
    Grandmaster,
    Challenger,
}

impl RankTier {
    /// All tiers in ascending order
    pub const ALL: [RankTier; 8] = [
        RankTier::Bronze,
        RankTier::Silver,
        RankTier::Gold,
        RankTier::Platinum,
        RankTier::Diamond,
        RankTier::Master,
        RankTier::Grandmaster,
        RankTier::Challenger,
    ];

    pub fn from_rating(rating: f64) -> Self {
        match rating {
            r if r >= 2800.0 => RankTier::Challenger,
            r if r >= 2500.0 => RankTier::Grandmaster,
            r if r >= 2200.0 => RankTier::Master,
            r if r >= 1900.0 => RankTier::Diamond,
            r if r >= 1600.0 => RankTier::Platinum,
            r if r >= 1400.0 => RankTier::Gold,
            r if r >= 1200.0 => RankTier::Silver,
            _ => RankTier::Bronze,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RankTier::Bronze => "bronze",
            RankTier::Silver => "silver",
            RankTier::Gold => "gold",
            RankTier::Platinum => "platinum",
            RankTier::Diamond => "diamond",
            RankTier::Master => "master",
            RankTier::Grandmaster => "grandmaster",
            RankTier::Challenger => "challenger",
        }
    }
}

/// Long-lived skill record of a player in one game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRating {
    pub player_id: PlayerId,
    pub game_id: GameId,
    pub rating: f64,
    /// Rating deviation (RD)
    pub deviation: f64,
    /// Volatility (sigma)
    pub volatility: f64,
    pub matches_played: u32,
    pub wins: u32,
    pub losses: u32,
    pub win_streak: u32,
    pub peak_rating: f64,
    pub last_match_at: Option<DateTime<Utc>>,
    /// Most recent rating changes, possibly trimmed for display
    pub history: Vec<RatingChange>,
    /// Every match settled into this record; never trimmed
    #[serde(default)]
    pub applied_matches: Vec<MatchId>,
    /// Optimistic concurrency token, owned by the rating store
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

impl PlayerRating {
    /// Create a fresh, unplayed rating record
    pub fn new(
        player_id: impl Into<PlayerId>,
        game_id: impl Into<GameId>,
        rating: f64,
        deviation: f64,
        volatility: f64,
    ) -> Self {
        Self {
            player_id: player_id.into(),
            game_id: game_id.into(),
            rating,
            deviation,
            volatility,
            matches_played: 0,
            wins: 0,
            losses: 0,
            win_streak: 0,
            peak_rating: rating,
            last_match_at: None,
            history: Vec::new(),
            applied_matches: Vec::new(),
            version: 0,
            created_at: Utc::now(),
        }
    }

    /// Fraction of matches won, 0 when no match was played
    pub fn win_rate(&self) -> f64 {
        if self.matches_played == 0 {
            return 0.0;
        }
        self.wins as f64 / self.matches_played as f64
    }

    /// Confidence in the rating as a percentage of the maximum deviation
    pub fn confidence(&self, max_deviation: f64) -> f64 {
        (100.0 * (1.0 - self.deviation / max_deviation)).clamp(0.0, 100.0)
    }

    /// Whether `match_id` was already settled into this record
    pub fn has_applied(&self, match_id: MatchId) -> bool {
        self.applied_matches.contains(&match_id)
            || self.history.iter().any(|change| change.match_id == match_id)
    }

    pub fn is_provisional(&self, deviation_threshold: f64) -> bool {
        self.deviation > deviation_threshold
    }

    pub fn tier(&self) -> RankTier {
        RankTier::from_rating(self.rating)
    }

    /// Days since the last match, 0 for players who never played
    pub fn days_inactive(&self, now: DateTime<Utc>) -> f64 {
        match self.last_match_at {
            Some(last) => ((now - last).num_seconds().max(0) as f64) / 86_400.0,
            None => 0.0,
        }
    }
}

impl From<&PlayerRating> for Glicko2Rating {
    fn from(rating: &PlayerRating) -> Self {
        Glicko2Rating {
            rating: rating.rating,
            deviation: rating.deviation,
            volatility: rating.volatility,
        }
    }
}

/// Compatibility radius of a waiting queue entry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchWindow {
    /// Maximum accepted rating distance
    pub radius: f64,
}

impl SearchWindow {
    pub fn contains(&self, distance: f64) -> bool {
        distance <= self.radius
    }
}

/// Optional partition of a game pool
///
/// Entries only group with entries that carry identical preferences, so
/// `None` is its own partition rather than a wildcard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchPreferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl MatchPreferences {
    pub fn new(game_mode: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            game_mode: Some(game_mode.into()),
            region: Some(region.into()),
        }
    }
}

impl std::fmt::Display for MatchPreferences {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}",
            self.game_mode.as_deref().unwrap_or("any"),
            self.region.as_deref().unwrap_or("any")
        )
    }
}

/// A ticket waiting in a game's queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub session_ref: SessionRef,
    pub player_id: PlayerId,
    pub game_id: GameId,
    pub party_size: usize,
    pub rating_snapshot: f64,
    pub rating_deviation: f64,
    pub joined_at: DateTime<Utc>,
    /// Monotonic arrival counter, breaks ties between equal timestamps
    pub sequence: u64,
    pub search_window: SearchWindow,
    #[serde(default)]
    pub preferences: MatchPreferences,
}

impl QueueEntry {
    pub fn wait_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.joined_at).num_milliseconds().max(0)
    }

    /// Grow the search window; never shrinks it
    pub(crate) fn widen_to(&mut self, radius: f64) {
        if radius > self.search_window.radius {
            self.search_window.radius = radius;
        }
    }

    /// Same partition and both entries accept each other's rating distance
    pub fn is_compatible_with(&self, other: &QueueEntry) -> bool {
        if self.preferences != other.preferences {
            return false;
        }
        let distance = (self.rating_snapshot - other.rating_snapshot).abs();
        self.search_window.contains(distance) && other.search_window.contains(distance)
    }
}

/// Lifecycle state of a formed session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Forming,
    AwaitingStart,
    Cancelled,
    Completed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Cancelled | SessionState::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Forming => "forming",
            SessionState::AwaitingStart => "awaiting_start",
            SessionState::Cancelled => "cancelled",
            SessionState::Completed => "completed",
        }
    }
}

/// A group of queue entries paired for one match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub game_id: GameId,
    pub participant_ids: Vec<PlayerId>,
    /// Tickets consumed to form this session
    pub tickets: Vec<SessionRef>,
    /// Seats taken, counting party members
    pub slots: usize,
    pub average_rating: f64,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub match_id: Option<MatchId>,
    pub cancel_reason: Option<String>,
}

impl Session {
    /// Move to `next`, rejecting transitions outside the session lifecycle
    pub fn transition_to(&mut self, next: SessionState, now: DateTime<Utc>) -> Result<()> {
        let allowed = matches!(
            (self.state, next),
            (SessionState::Forming, SessionState::AwaitingStart)
                | (SessionState::Forming, SessionState::Cancelled)
                | (SessionState::AwaitingStart, SessionState::Completed)
                | (SessionState::AwaitingStart, SessionState::Cancelled)
        );
        if !allowed {
            return Err(MatchmakingError::InvalidSessionTransition {
                session_id: self.session_id.to_string(),
                from: self.state.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        self.state = next;
        self.updated_at = now;
        Ok(())
    }
}

/// Status of a queue ticket as seen by its owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionStatus {
    Queued {
        game_id: GameId,
        bracket: i64,
        joined_at: DateTime<Utc>,
    },
    Matched {
        session: Session,
    },
    Expired {
        waited_ms: i64,
    },
    Left,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Queued { .. })
    }
}

/// Coarse health of a game's queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueHealth {
    Healthy,
    Moderate,
    Slow,
}

/// Per-bracket slice of the pool statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BracketStats {
    pub bracket: i64,
    /// Lowest rating covered by the bracket
    pub floor_rating: f64,
    pub queue_depth: usize,
    pub avg_wait_ms: i64,
}

/// Read-only snapshot of a game's queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    pub game_id: GameId,
    /// Waiting tickets
    pub queue_depth: usize,
    /// Waiting seats, counting party members
    pub players_waiting: usize,
    pub avg_wait_ms: i64,
    pub estimated_wait_ms: i64,
    pub health: QueueHealth,
    pub by_bracket: Vec<BracketStats>,
}

/// Concluded match supplied by the match-play subsystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub match_id: MatchId,
    pub game_id: GameId,
    pub winner_ids: Vec<PlayerId>,
    pub loser_ids: Vec<PlayerId>,
    /// Session the match was created from, when known
    pub session_id: Option<SessionId>,
}

/// Events pushed to players through the notification sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MatchmakingEvent {
    SessionMatched {
        session_ref: SessionRef,
        session_id: SessionId,
        game_id: GameId,
        participant_ids: Vec<PlayerId>,
        timestamp: DateTime<Utc>,
    },
    MatchmakingTimedOut {
        session_ref: SessionRef,
        game_id: GameId,
        waited_ms: i64,
        timestamp: DateTime<Utc>,
    },
    RatingUpdated {
        game_id: GameId,
        match_id: MatchId,
        old_rating: f64,
        new_rating: f64,
        timestamp: DateTime<Utc>,
    },
}

impl MatchmakingEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            MatchmakingEvent::SessionMatched { .. } => "SessionMatched",
            MatchmakingEvent::MatchmakingTimedOut { .. } => "MatchmakingTimedOut",
            MatchmakingEvent::RatingUpdated { .. } => "RatingUpdated",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(rating: f64, radius: f64) -> QueueEntry {
        QueueEntry {
            session_ref: Uuid::new_v4(),
            player_id: format!("p{}", rating),
            game_id: "chess".to_string(),
            party_size: 1,
            rating_snapshot: rating,
            rating_deviation: 200.0,
            joined_at: Utc::now(),
            sequence: 0,
            search_window: SearchWindow { radius },
            preferences: MatchPreferences::default(),
        }
    }

    #[test]
    fn test_rank_tier_thresholds() {
        assert_eq!(RankTier::from_rating(1199.9), RankTier::Bronze);
        assert_eq!(RankTier::from_rating(1200.0), RankTier::Silver);
        assert_eq!(RankTier::from_rating(1500.0), RankTier::Gold);
        assert_eq!(RankTier::from_rating(1600.0), RankTier::Platinum);
        assert_eq!(RankTier::from_rating(1950.0), RankTier::Diamond);
        assert_eq!(RankTier::from_rating(2200.0), RankTier::Master);
        assert_eq!(RankTier::from_rating(2650.0), RankTier::Grandmaster);
        assert_eq!(RankTier::from_rating(3100.0), RankTier::Challenger);
    }

    #[test]
    fn test_player_rating_helpers() {
        let mut rating = PlayerRating::new("p1", "chess", 1500.0, 350.0, 0.06);
        assert_eq!(rating.win_rate(), 0.0);
        assert_eq!(rating.confidence(350.0), 0.0);
        assert!(rating.is_provisional(150.0));

        rating.matches_played = 4;
        rating.wins = 3;
        rating.deviation = 70.0;
        assert!((rating.win_rate() - 0.75).abs() < 1e-12);
        assert!((rating.confidence(350.0) - 80.0).abs() < 1e-9);
        assert!(!rating.is_provisional(150.0));
    }

    #[test]
    fn test_compatibility_uses_smaller_radius() {
        let a = entry(1500.0, 200.0);
        let b = entry(1620.0, 100.0);
        assert!(!a.is_compatible_with(&b));
        assert!(!b.is_compatible_with(&a));

        let c = entry(1580.0, 100.0);
        assert!(a.is_compatible_with(&c));
    }

    #[test]
    fn test_compatibility_requires_same_mode_and_region() {
        let mut a = entry(1500.0, 200.0);
        let mut b = entry(1510.0, 200.0);
        a.preferences = MatchPreferences::new("blitz", "eu");
        b.preferences = MatchPreferences::new("blitz", "na");
        assert!(!a.is_compatible_with(&b));

        b.preferences.region = Some("eu".to_string());
        assert!(a.is_compatible_with(&b));

        // Unset preferences form their own partition
        let c = entry(1505.0, 200.0);
        assert!(!a.is_compatible_with(&c));
        assert_eq!(c.preferences.to_string(), "any/any");
        assert_eq!(a.preferences.to_string(), "blitz/eu");
    }

    #[test]
    fn test_search_window_only_widens() {
        let mut e = entry(1500.0, 150.0);
        e.widen_to(120.0);
        assert_eq!(e.search_window.radius, 150.0);
        e.widen_to(180.0);
        assert_eq!(e.search_window.radius, 180.0);
    }

    #[test]
    fn test_session_lifecycle_transitions() {
        let now = Utc::now();
        let mut session = Session {
            session_id: Uuid::new_v4(),
            game_id: "chess".to_string(),
            participant_ids: vec!["a".to_string(), "b".to_string()],
            tickets: vec![Uuid::new_v4(), Uuid::new_v4()],
            slots: 2,
            average_rating: 1500.0,
            state: SessionState::Forming,
            created_at: now,
            updated_at: now,
            match_id: None,
            cancel_reason: None,
        };

        assert!(session.transition_to(SessionState::Completed, now).is_err());
        session.transition_to(SessionState::AwaitingStart, now).unwrap();
        session.transition_to(SessionState::Completed, now).unwrap();

        let err = session
            .transition_to(SessionState::Cancelled, now)
            .unwrap_err();
        assert!(matches!(
            err,
            MatchmakingError::InvalidSessionTransition { .. }
        ));
        assert_eq!(session.state, SessionState::Completed);
    }

    #[test]
    fn test_status_serialization_is_tagged() {
        let json = serde_json::to_value(SessionStatus::Expired { waited_ms: 1200 }).unwrap();
        assert_eq!(json["status"], "expired");
        assert_eq!(json["waited_ms"], 1200);
        assert!(SessionStatus::Left.is_terminal());
    }
}
