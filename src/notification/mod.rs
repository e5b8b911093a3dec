//! Outbound player notifications
//!
//! The matcher and the rating path push [`MatchmakingEvent`]s through a
//! [`NotificationSink`]. Delivery transport is up to the implementation.

use crate::error::{MatchmakingError, Result};
use crate::types::{MatchmakingEvent, PlayerId};
use async_trait::async_trait;
use std::sync::Mutex;
use tracing::info;

/// Trait for delivering matchmaking events to players
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, player_id: &str, event: MatchmakingEvent) -> Result<()>;
}

/// Sink that writes every event to the log
#[derive(Debug, Default, Clone)]
pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn notify(&self, player_id: &str, event: MatchmakingEvent) -> Result<()> {
        let payload = serde_json::to_string(&event).map_err(|e| MatchmakingError::InternalError {
            message: format!("Failed to serialize {} event: {}", event.kind(), e),
        })?;
        info!("Notify player '{}': {}", player_id, payload);
        Ok(())
    }
}

/// Sink that keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingNotificationSink {
    events: Mutex<Vec<(PlayerId, MatchmakingEvent)>>,
}

impl RecordingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded (player, event) pairs
    pub fn events(&self) -> Vec<(PlayerId, MatchmakingEvent)> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Events delivered to one player
    pub fn events_for(&self, player_id: &str) -> Vec<MatchmakingEvent> {
        self.events()
            .into_iter()
            .filter(|(recipient, _)| recipient == player_id)
            .map(|(_, event)| event)
            .collect()
    }

    pub fn count_of_kind(&self, kind: &str) -> usize {
        self.events()
            .iter()
            .filter(|(_, event)| event.kind() == kind)
            .count()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

#[async_trait]
impl NotificationSink for RecordingNotificationSink {
    async fn notify(&self, player_id: &str, event: MatchmakingEvent) -> Result<()> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| MatchmakingError::lock_poisoned("notifications"))?;
        events.push((player_id.to_string(), event));
        Ok(())
    }
}
