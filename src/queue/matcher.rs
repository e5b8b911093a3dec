//! Pairing passes over a game's pool
//!
//! [`plan_groups`] is the pure grouping rule: entries are considered in
//! arrival order, the oldest eligible anchor is grown greedily with the
//! oldest compatible entries until its session is exactly full. The
//! [`PoolMatcher`] runs that rule over every bracket of a game, isolates
//! per-bracket failures and notifies players once the locks are released.

use crate::error::Result;
use crate::metrics::MetricsCollector;
use crate::notification::NotificationSink;
use crate::queue::manager::{BracketPass, QueueManager};
use crate::session::SessionRegistry;
use crate::types::{GameId, MatchmakingEvent, QueueEntry, Session};
use crate::utils::current_timestamp;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Group candidates into full sessions
///
/// Returns index lists into `candidates`, one per session, in the order the
/// sessions were formed. Only entries accepted by `is_anchor` can start a
/// group; any candidate can join one.
pub fn plan_groups<F>(candidates: &[QueueEntry], session_size: usize, is_anchor: F) -> Vec<Vec<usize>>
where
    F: Fn(&QueueEntry) -> bool,
{
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by_key(|&i| (candidates[i].joined_at, candidates[i].sequence));

    let mut taken = vec![false; candidates.len()];
    let mut groups = Vec::new();

    loop {
        let formed = order
            .iter()
            .filter(|&&i| !taken[i] && is_anchor(&candidates[i]))
            .find_map(|&anchor| grow_group(candidates, &order, &taken, anchor, session_size));

        match formed {
            Some(group) => {
                for &i in &group {
                    taken[i] = true;
                }
                groups.push(group);
            }
            None => break,
        }
    }

    groups
}

fn grow_group(
    candidates: &[QueueEntry],
    order: &[usize],
    taken: &[bool],
    anchor: usize,
    session_size: usize,
) -> Option<Vec<usize>> {
    let mut slots = candidates[anchor].party_size;
    if slots > session_size {
        return None;
    }

    let mut group = vec![anchor];
    for &i in order {
        if slots == session_size {
            break;
        }
        if i == anchor || taken[i] {
            continue;
        }

        let candidate = &candidates[i];
        if slots + candidate.party_size > session_size {
            continue;
        }
        if group
            .iter()
            .all(|&member| candidates[member].is_compatible_with(candidate))
        {
            group.push(i);
            slots += candidate.party_size;
        }
    }

    (slots == session_size).then_some(group)
}

/// What one pairing pass over a game did
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    pub game_id: GameId,
    pub sessions: Vec<Session>,
    /// Entries that timed out
    pub expired: Vec<QueueEntry>,
    /// Brackets skipped because pairing them failed
    pub failed_brackets: Vec<i64>,
}

/// Periodic pairing over every active game
pub struct PoolMatcher {
    queue: Arc<QueueManager>,
    sessions: Arc<SessionRegistry>,
    notifier: Arc<dyn NotificationSink>,
    metrics: Arc<MetricsCollector>,
    running: AtomicBool,
}

impl PoolMatcher {
    pub fn new(
        queue: Arc<QueueManager>,
        sessions: Arc<SessionRegistry>,
        notifier: Arc<dyn NotificationSink>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            queue,
            sessions,
            notifier,
            metrics,
            running: AtomicBool::new(false),
        }
    }

    /// Run one pairing pass over a game
    pub async fn run_pass(&self, game_id: &str) -> Result<PassReport> {
        self.run_pass_at(game_id, current_timestamp()).await
    }

    pub async fn run_pass_at(&self, game_id: &str, now: DateTime<Utc>) -> Result<PassReport> {
        let timer = self.metrics.start_timer();
        let mut report = PassReport {
            game_id: game_id.to_string(),
            ..PassReport::default()
        };
        let mut formed: Vec<(Session, Vec<QueueEntry>)> = Vec::new();

        for anchor in self.queue.bracket_indices(game_id)? {
            match self.queue.pair_bracket(game_id, anchor, now, &self.sessions) {
                Ok(BracketPass {
                    formed: bracket_formed,
                    expired,
                }) => {
                    formed.extend(bracket_formed);
                    report.expired.extend(expired);
                }
                Err(e) => {
                    error!("Pairing failed for {} bracket {}: {}", game_id, anchor, e);
                    report.failed_brackets.push(anchor);
                }
            }
        }

        // Locks are released; tell the players
        for (session, members) in &formed {
            let waits: Vec<i64> = members.iter().map(|entry| entry.wait_ms(now)).collect();
            self.metrics
                .record_session_formed(game_id, session.slots, &waits);

            for entry in members {
                self.notify(
                    &entry.player_id,
                    MatchmakingEvent::SessionMatched {
                        session_ref: entry.session_ref,
                        session_id: session.session_id,
                        game_id: game_id.to_string(),
                        participant_ids: session.participant_ids.clone(),
                        timestamp: now,
                    },
                )
                .await;
            }
        }

        for entry in &report.expired {
            let waited_ms = entry.wait_ms(now);
            info!(
                "Ticket {} of player '{}' expired in {} after {}ms",
                entry.session_ref, entry.player_id, game_id, waited_ms
            );
            self.notify(
                &entry.player_id,
                MatchmakingEvent::MatchmakingTimedOut {
                    session_ref: entry.session_ref,
                    game_id: game_id.to_string(),
                    waited_ms,
                    timestamp: now,
                },
            )
            .await;
        }
        self.metrics.record_timeouts(game_id, report.expired.len());

        report.sessions = formed.into_iter().map(|(session, _)| session).collect();
        let duration = timer.stop();
        self.metrics.record_pairing_pass(game_id, duration);

        if !report.sessions.is_empty() || !report.expired.is_empty() {
            info!(
                "Pairing pass for {} - sessions: {}, expired: {}, failed brackets: {}, duration: {:.2}ms",
                game_id,
                report.sessions.len(),
                report.expired.len(),
                report.failed_brackets.len(),
                duration.as_secs_f64() * 1000.0
            );
        } else {
            debug!("Pairing pass for {} formed nothing", game_id);
        }

        Ok(report)
    }

    async fn notify(&self, player_id: &str, event: MatchmakingEvent) {
        let kind = event.kind();
        if let Err(e) = self.notifier.notify(player_id, event).await {
            warn!("Failed to deliver {} to player '{}': {}", kind, player_id, e);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop every pairing task at its next tick
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Start the supervisor that keeps one pairing task per active game
    ///
    /// The supervisor also prunes finished tickets on every tick.
    pub fn start(self: Arc<Self>, tick: Duration) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let matcher = Arc::clone(&self);

        let handle = tokio::spawn(async move {
            let mut game_tasks: HashMap<GameId, JoinHandle<()>> = HashMap::new();
            let mut ticker = interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            while matcher.is_running() {
                ticker.tick().await;

                match matcher.queue.active_games() {
                    Ok(games) => {
                        for game_id in games {
                            let finished = game_tasks
                                .get(&game_id)
                                .map(|task| task.is_finished())
                                .unwrap_or(true);
                            if finished {
                                let task =
                                    Arc::clone(&matcher).spawn_game_task(game_id.clone(), tick);
                                game_tasks.insert(game_id, task);
                            }
                        }
                    }
                    Err(e) => error!("Failed to list active games: {}", e),
                }

                if let Err(e) = matcher.queue.prune_finished_tickets(current_timestamp()) {
                    error!("Error during ticket pruning: {}", e);
                }
            }

            for (_, task) in game_tasks {
                task.abort();
            }
        });

        info!("Started pool matcher (tick {:?})", tick);
        handle
    }

    fn spawn_game_task(self: Arc<Self>, game_id: GameId, tick: Duration) -> JoinHandle<()> {
        info!("Starting pairing task for game {}", game_id);
        tokio::spawn(async move {
            let mut ticker = interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            while self.is_running() {
                ticker.tick().await;
                if let Err(e) = self.run_pass(&game_id).await {
                    error!("Pairing pass for {} failed: {}", game_id, e);
                }
            }
        })
    }
}
