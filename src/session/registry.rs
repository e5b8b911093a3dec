//! Session registry

use crate::error::{MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::types::{GameId, MatchId, QueueEntry, Session, SessionId, SessionState};
use crate::utils;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// Session counts by lifecycle state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionRegistryStats {
    pub forming: usize,
    pub awaiting_start: usize,
    pub completed: usize,
    pub cancelled: usize,
}

/// In-memory registry of formed sessions
///
/// Methods are synchronous: the pool matcher opens sessions while it holds
/// bracket locks and must not yield there.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Session>>,
    metrics: Arc<MetricsCollector>,
}

impl SessionRegistry {
    pub fn new(metrics: Arc<MetricsCollector>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    /// Record a session formed from `entries`, ready to start
    pub fn open(
        &self,
        game_id: &str,
        entries: &[QueueEntry],
        now: DateTime<Utc>,
    ) -> Result<Session> {
        if entries.is_empty() {
            return Err(MatchmakingError::InternalError {
                message: format!("Cannot open a session for {} without entries", game_id),
            });
        }

        let slots: usize = entries.iter().map(|entry| entry.party_size).sum();
        let weighted_rating: f64 = entries
            .iter()
            .map(|entry| entry.rating_snapshot * entry.party_size as f64)
            .sum();

        let session = Session {
            session_id: utils::generate_session_id(),
            game_id: game_id.to_string(),
            participant_ids: entries.iter().map(|entry| entry.player_id.clone()).collect(),
            tickets: entries.iter().map(|entry| entry.session_ref).collect(),
            slots,
            average_rating: weighted_rating / slots.max(1) as f64,
            state: SessionState::Forming,
            created_at: now,
            updated_at: now,
            match_id: None,
            cancel_reason: None,
        };
        let session_id = session.session_id;

        {
            let mut sessions = self
                .sessions
                .write()
                .map_err(|_| MatchmakingError::lock_poisoned("sessions write"))?;
            sessions.insert(session_id, session);
        }

        let session = self.mark_awaiting_start(session_id)?;
        info!(
            "Opened session {} for game {} - participants: {:?}, slots: {}, avg rating: {:.1}",
            session_id, game_id, session.participant_ids, slots, session.average_rating
        );
        Ok(session)
    }

    pub fn get(&self, session_id: SessionId) -> Result<Session> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| MatchmakingError::lock_poisoned("sessions read"))?;

        sessions
            .get(&session_id)
            .cloned()
            .ok_or_else(|| MatchmakingError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    /// Sessions currently in `state`, oldest first
    pub fn list_by_state(&self, state: SessionState) -> Result<Vec<Session>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| MatchmakingError::lock_poisoned("sessions read"))?;

        let mut matching: Vec<Session> = sessions
            .values()
            .filter(|session| session.state == state)
            .cloned()
            .collect();
        matching.sort_by_key(|session| session.created_at);
        Ok(matching)
    }

    /// Sessions of one game that have not finished yet
    pub fn list_open(&self, game_id: &GameId) -> Result<Vec<Session>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| MatchmakingError::lock_poisoned("sessions read"))?;

        Ok(sessions
            .values()
            .filter(|session| &session.game_id == game_id && !session.state.is_terminal())
            .cloned()
            .collect())
    }

    /// Promote a forming session once all of its seats are filled
    pub fn mark_awaiting_start(&self, session_id: SessionId) -> Result<Session> {
        self.update(session_id, |session, now| {
            session.transition_to(SessionState::AwaitingStart, now)
        })
    }

    /// Mark a session as played, linking the concluded match
    pub fn complete(&self, session_id: SessionId, match_id: MatchId) -> Result<Session> {
        let session = self.update(session_id, |session, now| {
            session.transition_to(SessionState::Completed, now)?;
            session.match_id = Some(match_id);
            Ok(())
        })?;

        self.metrics
            .record_session_closed(&session.game_id, SessionState::Completed);
        info!("Session {} completed with match {}", session_id, match_id);
        Ok(session)
    }

    /// Cancel a session that will not be played
    pub fn cancel(&self, session_id: SessionId, reason: &str) -> Result<Session> {
        let session = self.update(session_id, |session, now| {
            session.transition_to(SessionState::Cancelled, now)?;
            session.cancel_reason = Some(reason.to_string());
            Ok(())
        })?;

        self.metrics
            .record_session_closed(&session.game_id, SessionState::Cancelled);
        warn!("Session {} cancelled: {}", session_id, reason);
        Ok(session)
    }

    fn update<F>(&self, session_id: SessionId, apply: F) -> Result<Session>
    where
        F: FnOnce(&mut Session, DateTime<Utc>) -> Result<()>,
    {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| MatchmakingError::lock_poisoned("sessions write"))?;

        let session =
            sessions
                .get_mut(&session_id)
                .ok_or_else(|| MatchmakingError::SessionNotFound {
                    session_id: session_id.to_string(),
                })?;

        // Work on a copy so a rejected transition leaves the record untouched
        let mut next = session.clone();
        apply(&mut next, utils::current_timestamp())?;
        *session = next.clone();
        Ok(next)
    }

    pub fn get_stats(&self) -> Result<SessionRegistryStats> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| MatchmakingError::lock_poisoned("sessions read"))?;

        let mut stats = SessionRegistryStats::default();
        for session in sessions.values() {
            match session.state {
                SessionState::Forming => stats.forming += 1,
                SessionState::AwaitingStart => stats.awaiting_start += 1,
                SessionState::Completed => stats.completed += 1,
                SessionState::Cancelled => stats.cancelled += 1,
            }
        }
        Ok(stats)
    }
}
