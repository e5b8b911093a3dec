//! Queue manager for matchmaking tickets
//!
//! Each game owns a pool of rating brackets. A bracket is a mutex-guarded list
//! of waiting entries, so joins and leaves in different brackets never
//! contend. Tickets (the handles returned to players) live in a separate map
//! and carry a watch channel with their current [`SessionStatus`].
//!
//! Lock order, whenever more than one is held:
//! brackets (ascending index) -> session registry -> tickets -> active players.
//! No lock is held across an `.await`.

use crate::config::{GameQueueConfig, GameRules};
use crate::error::{MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::queue::matcher::plan_groups;
use crate::rating::RatingService;
use crate::session::SessionRegistry;
use crate::types::{
    BracketStats, GameId, MatchPreferences, PlayerId, PoolStats, QueueEntry,
    QueueHealth, SearchWindow, Session, SessionRef, SessionStatus,
};
use crate::utils::{bracket_floor, bracket_index, current_timestamp, generate_session_ref};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Statistics about queue manager operations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueManagerStats {
    /// Tickets handed out by successful joins
    pub tickets_issued: u64,
    /// Joins refused for any reason
    pub joins_rejected: u64,
    pub tickets_left: u64,
    pub tickets_matched: u64,
    pub tickets_expired: u64,
    pub sessions_formed: u64,
}

/// Outcome of pairing one anchor bracket
#[derive(Debug, Default)]
pub(crate) struct BracketPass {
    /// Sessions formed, each with the entries it consumed
    pub formed: Vec<(Session, Vec<QueueEntry>)>,
    /// Entries of the anchor bracket that waited too long
    pub expired: Vec<QueueEntry>,
}

#[derive(Debug, Default)]
struct Bracket {
    /// Waiting entries in arrival order
    entries: Vec<QueueEntry>,
}

struct GamePool {
    rules: GameQueueConfig,
    brackets: RwLock<BTreeMap<i64, Arc<Mutex<Bracket>>>>,
}

impl GamePool {
    fn new(rules: GameQueueConfig) -> Self {
        Self {
            rules,
            brackets: RwLock::new(BTreeMap::new()),
        }
    }

    /// Bracket at `index`, created on first use
    fn bracket(&self, index: i64) -> Result<Arc<Mutex<Bracket>>> {
        {
            let brackets = self
                .brackets
                .read()
                .map_err(|_| MatchmakingError::lock_poisoned("brackets read"))?;
            if let Some(bracket) = brackets.get(&index) {
                return Ok(bracket.clone());
            }
        }

        let mut brackets = self
            .brackets
            .write()
            .map_err(|_| MatchmakingError::lock_poisoned("brackets write"))?;
        Ok(brackets.entry(index).or_default().clone())
    }

    fn existing_bracket(&self, index: i64) -> Result<Option<Arc<Mutex<Bracket>>>> {
        let brackets = self
            .brackets
            .read()
            .map_err(|_| MatchmakingError::lock_poisoned("brackets read"))?;
        Ok(brackets.get(&index).cloned())
    }

    /// Brackets within `range`, ascending by index
    fn brackets_in(&self, range: RangeInclusive<i64>) -> Result<Vec<(i64, Arc<Mutex<Bracket>>)>> {
        let brackets = self
            .brackets
            .read()
            .map_err(|_| MatchmakingError::lock_poisoned("brackets read"))?;
        Ok(brackets
            .range(range)
            .map(|(index, bracket)| (*index, bracket.clone()))
            .collect())
    }

    fn indices(&self) -> Result<Vec<i64>> {
        let brackets = self
            .brackets
            .read()
            .map_err(|_| MatchmakingError::lock_poisoned("brackets read"))?;
        Ok(brackets.keys().copied().collect())
    }
}

struct Ticket {
    game_id: GameId,
    player_id: PlayerId,
    bracket: i64,
    status: watch::Sender<SessionStatus>,
    finished_at: Option<DateTime<Utc>>,
}

type ActiveKey = (GameId, PlayerId);

/// Claim on a (game, player) slot for a join in progress
///
/// Released on drop unless [`Reservation::keep`] was called, so a join that
/// fails or is cancelled mid-way never leaves the player marked as queued.
struct Reservation<'a> {
    manager: &'a QueueManager,
    key: ActiveKey,
    session_ref: SessionRef,
    kept: bool,
}

impl Reservation<'_> {
    /// The ticket was enqueued and now owns the slot
    fn keep(mut self) {
        self.kept = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.kept {
            self.manager.release(&self.key, self.session_ref);
        }
    }
}

/// Admission, withdrawal and status of queue tickets
pub struct QueueManager {
    rules: GameRules,
    ratings: Arc<RatingService>,
    pools: RwLock<HashMap<GameId, Arc<GamePool>>>,
    tickets: RwLock<HashMap<SessionRef, Ticket>>,
    /// Non-terminal ticket held by each (game, player)
    active: Mutex<HashMap<ActiveKey, SessionRef>>,
    sequence: AtomicU64,
    ticket_retention: ChronoDuration,
    stats: RwLock<QueueManagerStats>,
    metrics: Arc<MetricsCollector>,
}

impl QueueManager {
    pub fn new(
        rules: GameRules,
        ratings: Arc<RatingService>,
        ticket_retention: ChronoDuration,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            rules,
            ratings,
            pools: RwLock::new(HashMap::new()),
            tickets: RwLock::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
            ticket_retention,
            stats: RwLock::new(QueueManagerStats::default()),
            metrics,
        }
    }

    pub fn rules(&self) -> &GameRules {
        &self.rules
    }

    /// Put a player (and their party) into a game's queue
    pub async fn join_queue(
        &self,
        player_id: &str,
        game_id: &str,
        party_size: usize,
    ) -> Result<SessionRef> {
        self.join_queue_with_preferences(
            player_id,
            game_id,
            party_size,
            MatchPreferences::default(),
        )
        .await
    }

    /// Join restricted to a game mode and region
    ///
    /// Entries only group with entries of identical preferences.
    pub async fn join_queue_with_preferences(
        &self,
        player_id: &str,
        game_id: &str,
        party_size: usize,
        preferences: MatchPreferences,
    ) -> Result<SessionRef> {
        let timer = self.metrics.start_timer();

        info!(
            "Processing join - player_id: '{}', game: '{}', party_size: {}, partition: {}",
            player_id, game_id, party_size, preferences
        );

        let result = self
            .admit(player_id, game_id, party_size, preferences)
            .await;
        let duration = timer.stop();
        self.metrics.record_join(game_id, result.is_ok(), duration);

        {
            let mut stats = self
                .stats
                .write()
                .map_err(|_| MatchmakingError::lock_poisoned("stats"))?;
            match &result {
                Ok(_) => stats.tickets_issued += 1,
                Err(_) => stats.joins_rejected += 1,
            }
        }

        match &result {
            Ok(session_ref) => info!(
                "Join completed - player_id: '{}', game: '{}', ticket: {}, duration: {:.2}ms",
                player_id,
                game_id,
                session_ref,
                duration.as_secs_f64() * 1000.0
            ),
            Err(e) => warn!(
                "Join rejected - player_id: '{}', game: '{}': {}",
                player_id, game_id, e
            ),
        }

        result
    }

    async fn admit(
        &self,
        player_id: &str,
        game_id: &str,
        party_size: usize,
        preferences: MatchPreferences,
    ) -> Result<SessionRef> {
        let rules = self.rules.rules_for(game_id)?;

        if player_id.is_empty() {
            return Err(MatchmakingError::InvalidParty {
                game_id: game_id.to_string(),
                reason: "player id cannot be empty".to_string(),
            });
        }
        if party_size < rules.min_party_size || party_size > rules.max_party_size {
            return Err(MatchmakingError::InvalidParty {
                game_id: game_id.to_string(),
                reason: format!(
                    "party size {} outside {}..={}",
                    party_size, rules.min_party_size, rules.max_party_size
                ),
            });
        }

        let session_ref = generate_session_ref();
        let reservation = self.reserve(game_id, player_id, session_ref)?;

        // The reservation keeps a concurrent join of the same player out while
        // the rating is fetched. Dropping this future releases it.
        let rating = self.ratings.get_player_rating(player_id, game_id).await?;

        let now = current_timestamp();
        let entry = QueueEntry {
            session_ref,
            player_id: player_id.to_string(),
            game_id: game_id.to_string(),
            party_size,
            rating_snapshot: rating.rating,
            rating_deviation: rating.deviation,
            joined_at: now,
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            search_window: SearchWindow {
                radius: rules.search_radius(0),
            },
            preferences,
        };

        self.enqueue(&rules, entry)?;
        reservation.keep();

        Ok(session_ref)
    }

    fn reserve(
        &self,
        game_id: &str,
        player_id: &str,
        session_ref: SessionRef,
    ) -> Result<Reservation<'_>> {
        let key: ActiveKey = (game_id.to_string(), player_id.to_string());
        let mut active = self
            .active
            .lock()
            .map_err(|_| MatchmakingError::lock_poisoned("active players"))?;
        if active.contains_key(&key) {
            return Err(MatchmakingError::AlreadyQueued {
                player_id: player_id.to_string(),
                game_id: game_id.to_string(),
            });
        }
        active.insert(key.clone(), session_ref);

        Ok(Reservation {
            manager: self,
            key,
            session_ref,
            kept: false,
        })
    }

    fn enqueue(&self, rules: &GameQueueConfig, entry: QueueEntry) -> Result<()> {
        let index = bracket_index(entry.rating_snapshot, rules.bracket_width);
        let pool = self.pool_for(rules)?;
        let bracket = pool.bracket(index)?;

        let mut guard = bracket
            .lock()
            .map_err(|_| MatchmakingError::lock_poisoned("bracket"))?;
        {
            let mut tickets = self
                .tickets
                .write()
                .map_err(|_| MatchmakingError::lock_poisoned("tickets write"))?;
            let (status, _) = watch::channel(SessionStatus::Queued {
                game_id: entry.game_id.clone(),
                bracket: index,
                joined_at: entry.joined_at,
            });
            tickets.insert(
                entry.session_ref,
                Ticket {
                    game_id: entry.game_id.clone(),
                    player_id: entry.player_id.clone(),
                    bracket: index,
                    status,
                    finished_at: None,
                },
            );
        }

        debug!(
            "Queued {} in game {} bracket {} (rating {:.1}, radius {:.1})",
            entry.player_id, entry.game_id, index, entry.rating_snapshot, entry.search_window.radius
        );
        guard.entries.push(entry);
        Ok(())
    }

    fn release(&self, key: &ActiveKey, session_ref: SessionRef) {
        match self.active.lock() {
            Ok(mut active) => {
                if active.get(key) == Some(&session_ref) {
                    active.remove(key);
                }
            }
            Err(_) => warn!("Failed to release reservation for {:?}", key),
        }
    }

    /// Withdraw a waiting ticket
    pub async fn leave_queue(&self, session_ref: SessionRef) -> Result<()> {
        let timer = self.metrics.start_timer();
        let not_queued = || MatchmakingError::NotQueued {
            session_ref: session_ref.to_string(),
        };

        let (game_id, index) = {
            let tickets = self
                .tickets
                .read()
                .map_err(|_| MatchmakingError::lock_poisoned("tickets read"))?;
            let ticket = tickets.get(&session_ref).ok_or_else(not_queued)?;
            if ticket.status.borrow().is_terminal() {
                return Err(not_queued());
            }
            (ticket.game_id.clone(), ticket.bracket)
        };

        let pool = self.existing_pool(&game_id)?.ok_or_else(not_queued)?;
        let bracket = pool.existing_bracket(index)?.ok_or_else(not_queued)?;

        let entry = {
            let mut guard = bracket
                .lock()
                .map_err(|_| MatchmakingError::lock_poisoned("bracket"))?;
            // Absent here means a pairing pass consumed it first
            let position = guard
                .entries
                .iter()
                .position(|entry| entry.session_ref == session_ref)
                .ok_or_else(not_queued)?;
            let entry = guard.entries.remove(position);
            self.finish_tickets(vec![(session_ref, SessionStatus::Left)], current_timestamp())?;
            entry
        };

        {
            let mut stats = self
                .stats
                .write()
                .map_err(|_| MatchmakingError::lock_poisoned("stats"))?;
            stats.tickets_left += 1;
        }
        self.metrics.record_leave(&game_id, timer.stop());

        info!(
            "Player '{}' left the {} queue (ticket {})",
            entry.player_id, game_id, session_ref
        );
        Ok(())
    }

    /// Current status of a ticket
    pub fn get_session_status(&self, session_ref: SessionRef) -> Result<SessionStatus> {
        let tickets = self
            .tickets
            .read()
            .map_err(|_| MatchmakingError::lock_poisoned("tickets read"))?;

        tickets
            .get(&session_ref)
            .map(|ticket| ticket.status.borrow().clone())
            .ok_or_else(|| MatchmakingError::NotQueued {
                session_ref: session_ref.to_string(),
            })
    }

    /// Resolve once the ticket reaches a terminal state
    pub async fn wait_for_match(&self, session_ref: SessionRef) -> Result<Session> {
        let not_queued = || MatchmakingError::NotQueued {
            session_ref: session_ref.to_string(),
        };

        let mut receiver = {
            let tickets = self
                .tickets
                .read()
                .map_err(|_| MatchmakingError::lock_poisoned("tickets read"))?;
            tickets
                .get(&session_ref)
                .ok_or_else(not_queued)?
                .status
                .subscribe()
        };

        loop {
            let status = receiver.borrow_and_update().clone();
            match status {
                SessionStatus::Matched { session } => return Ok(session),
                SessionStatus::Expired { waited_ms } => {
                    return Err(MatchmakingError::MatchmakingTimeout {
                        session_ref: session_ref.to_string(),
                        waited_ms,
                    })
                }
                SessionStatus::Left => return Err(not_queued()),
                SessionStatus::Queued { .. } => {}
            }

            // The sender goes away when the ticket is pruned
            if receiver.changed().await.is_err() {
                return Err(not_queued());
            }
        }
    }

    /// Read-only snapshot of a game's queue
    pub fn get_pool_stats(&self, game_id: &str) -> Result<PoolStats> {
        self.get_pool_stats_at(game_id, current_timestamp())
    }

    pub fn get_pool_stats_at(&self, game_id: &str, now: DateTime<Utc>) -> Result<PoolStats> {
        let rules = self.rules.rules_for(game_id)?;

        let mut by_bracket = Vec::new();
        let mut queue_depth = 0;
        let mut players_waiting = 0;
        let mut total_wait_ms = 0i64;

        if let Some(pool) = self.existing_pool(game_id)? {
            for (index, bracket) in pool.brackets_in(i64::MIN..=i64::MAX)? {
                let guard = bracket
                    .lock()
                    .map_err(|_| MatchmakingError::lock_poisoned("bracket"))?;
                if guard.entries.is_empty() {
                    continue;
                }

                let bracket_wait: i64 = guard.entries.iter().map(|e| e.wait_ms(now)).sum();
                let depth = guard.entries.len();
                queue_depth += depth;
                players_waiting += guard.entries.iter().map(|e| e.party_size).sum::<usize>();
                total_wait_ms += bracket_wait;

                by_bracket.push(BracketStats {
                    bracket: index,
                    floor_rating: bracket_floor(index, rules.bracket_width),
                    queue_depth: depth,
                    avg_wait_ms: bracket_wait / depth as i64,
                });
            }
        }

        let avg_wait_ms = if queue_depth > 0 {
            total_wait_ms / queue_depth as i64
        } else {
            0
        };

        let stats = PoolStats {
            game_id: game_id.to_string(),
            queue_depth,
            players_waiting,
            avg_wait_ms,
            estimated_wait_ms: estimate_wait_ms(players_waiting, rules.session_size),
            health: classify_health(queue_depth, avg_wait_ms),
            by_bracket,
        };
        self.metrics.update_from_pool_stats(&stats);
        Ok(stats)
    }

    /// Games that currently have a pool
    pub fn active_games(&self) -> Result<Vec<GameId>> {
        let pools = self
            .pools
            .read()
            .map_err(|_| MatchmakingError::lock_poisoned("pools read"))?;
        let mut games: Vec<GameId> = pools.keys().cloned().collect();
        games.sort();
        Ok(games)
    }

    /// Bracket indices of a game, ascending
    pub fn bracket_indices(&self, game_id: &str) -> Result<Vec<i64>> {
        match self.existing_pool(game_id)? {
            Some(pool) => pool.indices(),
            None => Ok(Vec::new()),
        }
    }

    /// Pair entries anchored in one bracket
    ///
    /// Locks every bracket within reach of `anchor` in ascending order, widens
    /// search windows, expires stale anchor entries and forms as many sessions
    /// as the greedy FIFO grouping allows. Everything happens while the locks
    /// are held, so an entry is consumed by exactly one of match, leave or
    /// expiry.
    pub(crate) fn pair_bracket(
        &self,
        game_id: &str,
        anchor: i64,
        now: DateTime<Utc>,
        sessions: &SessionRegistry,
    ) -> Result<BracketPass> {
        let mut pass = BracketPass::default();
        let pool = match self.existing_pool(game_id)? {
            Some(pool) => pool,
            None => return Ok(pass),
        };
        let rules = &pool.rules;
        let reach = rules.bracket_reach();

        let window = pool.brackets_in(anchor.saturating_sub(reach)..=anchor.saturating_add(reach))?;
        let mut guards = Vec::with_capacity(window.len());
        for (index, bracket) in &window {
            let guard = bracket
                .lock()
                .map_err(|_| MatchmakingError::lock_poisoned("bracket"))?;
            guards.push((*index, guard));
        }

        // Expire stale entries of the anchor bracket
        if let Some((_, anchor_guard)) = guards.iter_mut().find(|(index, _)| *index == anchor) {
            let (expired, waiting): (Vec<QueueEntry>, Vec<QueueEntry>) = anchor_guard
                .entries
                .drain(..)
                .partition(|entry| entry.wait_ms(now) > rules.max_wait_ms);
            anchor_guard.entries = waiting;
            pass.expired = expired;
        }
        if !pass.expired.is_empty() {
            let updates = pass
                .expired
                .iter()
                .map(|entry| {
                    (
                        entry.session_ref,
                        SessionStatus::Expired {
                            waited_ms: entry.wait_ms(now),
                        },
                    )
                })
                .collect();
            self.finish_tickets(updates, now)?;
        }

        for (_, guard) in guards.iter_mut() {
            for entry in guard.entries.iter_mut() {
                entry.widen_to(rules.search_radius(entry.wait_ms(now)));
            }
        }

        let candidates: Vec<QueueEntry> = guards
            .iter()
            .flat_map(|(_, guard)| guard.entries.iter().cloned())
            .collect();
        let width = rules.bracket_width;
        let groups = plan_groups(&candidates, rules.session_size, |entry| {
            bracket_index(entry.rating_snapshot, width) == anchor
        });
        if groups.is_empty() {
            return Ok(pass);
        }

        let mut consumed = HashSet::new();
        for group in &groups {
            let members: Vec<QueueEntry> = group.iter().map(|&i| candidates[i].clone()).collect();
            let session = match sessions.open(game_id, &members, now) {
                Ok(session) => session,
                Err(e) => {
                    warn!("Failed to open session in {} bracket {}: {}", game_id, anchor, e);
                    break;
                }
            };

            let updates = members
                .iter()
                .map(|entry| {
                    (
                        entry.session_ref,
                        SessionStatus::Matched {
                            session: session.clone(),
                        },
                    )
                })
                .collect();
            if let Err(e) = self.finish_tickets(updates, now) {
                warn!("Failed to hand session {} to its tickets: {}", session.session_id, e);
                if let Err(e) = sessions.cancel(session.session_id, "tickets unavailable") {
                    warn!("Failed to cancel session {}: {}", session.session_id, e);
                }
                break;
            }

            consumed.extend(members.iter().map(|entry| entry.session_ref));
            pass.formed.push((session, members));
        }

        for (_, guard) in guards.iter_mut() {
            guard
                .entries
                .retain(|entry| !consumed.contains(&entry.session_ref));
        }
        drop(guards);

        let mut stats = self
            .stats
            .write()
            .map_err(|_| MatchmakingError::lock_poisoned("stats"))?;
        stats.sessions_formed += pass.formed.len() as u64;
        stats.tickets_matched += consumed.len() as u64;
        stats.tickets_expired += pass.expired.len() as u64;

        Ok(pass)
    }

    /// Move tickets to a terminal status and free their players
    fn finish_tickets(
        &self,
        updates: Vec<(SessionRef, SessionStatus)>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut tickets = self
            .tickets
            .write()
            .map_err(|_| MatchmakingError::lock_poisoned("tickets write"))?;

        let mut released = Vec::with_capacity(updates.len());
        for (session_ref, status) in updates {
            if let Some(ticket) = tickets.get_mut(&session_ref) {
                ticket.status.send_replace(status);
                ticket.finished_at = Some(now);
                released.push((
                    (ticket.game_id.clone(), ticket.player_id.clone()),
                    session_ref,
                ));
            }
        }

        let mut active = self
            .active
            .lock()
            .map_err(|_| MatchmakingError::lock_poisoned("active players"))?;
        for (key, session_ref) in released {
            if active.get(&key) == Some(&session_ref) {
                active.remove(&key);
            }
        }

        Ok(())
    }

    /// Drop terminal tickets older than the retention period
    pub fn prune_finished_tickets(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut tickets = self
            .tickets
            .write()
            .map_err(|_| MatchmakingError::lock_poisoned("tickets write"))?;

        let before = tickets.len();
        let retention = self.ticket_retention;
        tickets.retain(|_, ticket| match ticket.finished_at {
            Some(finished_at) => finished_at + retention > now,
            None => true,
        });
        let pruned = before - tickets.len();

        if pruned > 0 {
            debug!("Pruned {} finished tickets", pruned);
        }
        Ok(pruned)
    }

    pub fn get_stats(&self) -> Result<QueueManagerStats> {
        let stats = self
            .stats
            .read()
            .map_err(|_| MatchmakingError::lock_poisoned("stats"))?;
        Ok(stats.clone())
    }

    fn existing_pool(&self, game_id: &str) -> Result<Option<Arc<GamePool>>> {
        let pools = self
            .pools
            .read()
            .map_err(|_| MatchmakingError::lock_poisoned("pools read"))?;
        Ok(pools.get(game_id).cloned())
    }

    fn pool_for(&self, rules: &GameQueueConfig) -> Result<Arc<GamePool>> {
        if let Some(pool) = self.existing_pool(&rules.game_id)? {
            return Ok(pool);
        }

        let mut pools = self
            .pools
            .write()
            .map_err(|_| MatchmakingError::lock_poisoned("pools write"))?;
        let pool = pools.entry(rules.game_id.clone()).or_insert_with(|| {
            info!(
                "Created pool for game {} (session size {}, bracket width {:.0})",
                rules.game_id, rules.session_size, rules.bracket_width
            );
            Arc::new(GamePool::new(rules.clone()))
        });
        Ok(pool.clone())
    }
}

/// Rough time to a match from the number of waiting seats
pub fn estimate_wait_ms(players_waiting: usize, session_size: usize) -> i64 {
    if players_waiting >= session_size {
        30_000
    } else if players_waiting * 2 >= session_size {
        90_000
    } else {
        180_000
    }
}

/// Coarse queue health from depth and average wait
pub fn classify_health(queue_depth: usize, avg_wait_ms: i64) -> QueueHealth {
    if queue_depth >= 50 && avg_wait_ms < 120_000 {
        QueueHealth::Healthy
    } else if queue_depth >= 20 && avg_wait_ms < 300_000 {
        QueueHealth::Moderate
    } else {
        QueueHealth::Slow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RatingSettings;
    use crate::rating::{InMemoryRatingStore, RatingEngine, RatingReader, RatingWriter};
    use crate::types::PlayerRating;

    fn create_test_manager(games: Vec<GameQueueConfig>) -> (QueueManager, Arc<InMemoryRatingStore>) {
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let store = Arc::new(InMemoryRatingStore::new());
        let ratings = Arc::new(RatingService::new(
            store.clone(),
            RatingEngine::new(RatingSettings::default()).unwrap(),
            metrics.clone(),
        ));
        let manager = QueueManager::new(
            GameRules::new(games, Some(GameQueueConfig::one_v_one("default"))),
            ratings,
            ChronoDuration::seconds(600),
            metrics,
        );
        (manager, store)
    }

    async fn seed_rating(store: &InMemoryRatingStore, player_id: &str, game_id: &str, rating: f64) {
        store
            .upsert(PlayerRating::new(player_id, game_id, rating, 100.0, 0.06))
            .await
            .unwrap();
    }

    fn create_test_registry() -> SessionRegistry {
        SessionRegistry::new(Arc::new(MetricsCollector::new().unwrap()))
    }

    #[tokio::test]
    async fn test_join_creates_queued_ticket() {
        let (manager, _) = create_test_manager(vec![]);

        let session_ref = manager.join_queue("alice", "chess", 1).await.unwrap();
        let status = manager.get_session_status(session_ref).unwrap();

        match status {
            SessionStatus::Queued { game_id, bracket, .. } => {
                assert_eq!(game_id, "chess");
                assert_eq!(bracket, 15);
            }
            other => panic!("unexpected status {:?}", other),
        }
        assert_eq!(manager.active_games().unwrap(), vec!["chess".to_string()]);
    }

    #[tokio::test]
    async fn test_duplicate_join_is_rejected() {
        let (manager, _) = create_test_manager(vec![]);

        manager.join_queue("alice", "chess", 1).await.unwrap();
        let err = manager.join_queue("alice", "chess", 1).await.unwrap_err();
        assert!(matches!(err, MatchmakingError::AlreadyQueued { .. }));

        // Other games are independent
        assert!(manager.join_queue("alice", "go", 1).await.is_ok());
        assert_eq!(manager.get_stats().unwrap().joins_rejected, 1);
    }

    /// Store whose next read can be made to stall or fail once
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemoryRatingStore,
        stall_next: std::sync::atomic::AtomicBool,
        fail_next: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl RatingReader for FlakyStore {
        async fn get(&self, player_id: &str, game_id: &str) -> Result<Option<PlayerRating>> {
            if self.stall_next.swap(false, Ordering::SeqCst) {
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            }
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(MatchmakingError::InternalError {
                    message: "rating store unavailable".to_string(),
                });
            }
            self.inner.get(player_id, game_id).await
        }

        async fn list_by_game(&self, game_id: &str) -> Result<Vec<PlayerRating>> {
            self.inner.list_by_game(game_id).await
        }
    }

    #[async_trait::async_trait]
    impl RatingWriter for FlakyStore {
        async fn upsert(&self, rating: PlayerRating) -> Result<PlayerRating> {
            self.inner.upsert(rating).await
        }

        async fn upsert_all(&self, ratings: Vec<PlayerRating>) -> Result<Vec<PlayerRating>> {
            self.inner.upsert_all(ratings).await
        }
    }

    fn create_flaky_manager() -> (QueueManager, Arc<FlakyStore>) {
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let store = Arc::new(FlakyStore::default());
        let ratings = Arc::new(RatingService::new(
            store.clone(),
            RatingEngine::new(RatingSettings::default()).unwrap(),
            metrics.clone(),
        ));
        let manager = QueueManager::new(
            GameRules::new(vec![GameQueueConfig::one_v_one("chess")], None),
            ratings,
            ChronoDuration::seconds(600),
            metrics,
        );
        (manager, store)
    }

    #[tokio::test]
    async fn test_cancelled_join_releases_player() {
        let (manager, store) = create_flaky_manager();
        store.stall_next.store(true, Ordering::SeqCst);

        // Caller gives up while the rating read is still pending
        let abandoned = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            manager.join_queue("alice", "chess", 1),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(manager.get_pool_stats("chess").unwrap().queue_depth, 0);

        let session_ref = manager.join_queue("alice", "chess", 1).await.unwrap();
        assert!(matches!(
            manager.get_session_status(session_ref).unwrap(),
            SessionStatus::Queued { .. }
        ));
        assert_eq!(manager.get_pool_stats("chess").unwrap().queue_depth, 1);
    }

    #[tokio::test]
    async fn test_failed_rating_read_releases_player() {
        let (manager, store) = create_flaky_manager();
        store.fail_next.store(true, Ordering::SeqCst);

        assert!(matches!(
            manager.join_queue("alice", "chess", 1).await,
            Err(MatchmakingError::InternalError { .. })
        ));
        assert!(manager.join_queue("alice", "chess", 1).await.is_ok());
        assert!(matches!(
            manager.join_queue("alice", "chess", 1).await,
            Err(MatchmakingError::AlreadyQueued { .. })
        ));
    }

    #[tokio::test]
    async fn test_party_size_is_validated() {
        let (manager, _) = create_test_manager(vec![GameQueueConfig::two_v_two("rl")]);

        assert!(manager.join_queue("duo", "rl", 2).await.is_ok());
        assert!(matches!(
            manager.join_queue("trio", "rl", 3).await,
            Err(MatchmakingError::InvalidParty { .. })
        ));
        assert!(matches!(
            manager.join_queue("ghost", "rl", 0).await,
            Err(MatchmakingError::InvalidParty { .. })
        ));
    }

    #[tokio::test]
    async fn test_leave_then_leave_again() {
        let (manager, _) = create_test_manager(vec![]);

        let session_ref = manager.join_queue("alice", "chess", 1).await.unwrap();
        manager.leave_queue(session_ref).await.unwrap();

        assert_eq!(manager.get_session_status(session_ref).unwrap(), SessionStatus::Left);
        assert!(matches!(
            manager.leave_queue(session_ref).await,
            Err(MatchmakingError::NotQueued { .. })
        ));
        // The player can queue again after leaving
        assert!(manager.join_queue("alice", "chess", 1).await.is_ok());
    }

    #[tokio::test]
    async fn test_pair_bracket_forms_session() {
        let (manager, store) = create_test_manager(vec![]);
        seed_rating(&store, "alice", "chess", 1520.0).await;
        seed_rating(&store, "bob", "chess", 1580.0).await;
        let registry = create_test_registry();

        let a = manager.join_queue("alice", "chess", 1).await.unwrap();
        let b = manager.join_queue("bob", "chess", 1).await.unwrap();

        let pass = manager
            .pair_bracket("chess", 15, current_timestamp(), &registry)
            .unwrap();

        assert_eq!(pass.formed.len(), 1);
        let (session, members) = &pass.formed[0];
        assert_eq!(session.tickets, vec![a, b]);
        assert_eq!(members.len(), 2);

        for ticket in [a, b] {
            match manager.get_session_status(ticket).unwrap() {
                SessionStatus::Matched { session: matched } => {
                    assert_eq!(matched.session_id, session.session_id)
                }
                other => panic!("unexpected status {:?}", other),
            }
        }
        assert_eq!(manager.get_pool_stats("chess").unwrap().queue_depth, 0);
        assert!(matches!(
            manager.leave_queue(a).await,
            Err(MatchmakingError::NotQueued { .. })
        ));
    }

    #[tokio::test]
    async fn test_distant_ratings_wait_until_windows_widen() {
        let (manager, store) = create_test_manager(vec![]);
        seed_rating(&store, "low", "chess", 1450.0).await;
        seed_rating(&store, "high", "chess", 1650.0).await;
        let registry = create_test_registry();

        manager.join_queue("low", "chess", 1).await.unwrap();
        manager.join_queue("high", "chess", 1).await.unwrap();

        let now = current_timestamp();
        let pass = manager.pair_bracket("chess", 14, now, &registry).unwrap();
        assert!(pass.formed.is_empty());

        // 200 points apart: the windows reach 200 after 10 seconds
        let later = now + ChronoDuration::seconds(11);
        let pass = manager.pair_bracket("chess", 14, later, &registry).unwrap();
        assert_eq!(pass.formed.len(), 1);
    }

    #[tokio::test]
    async fn test_expired_entries_are_removed() {
        let mut rules = GameQueueConfig::one_v_one("chess");
        rules.max_wait_ms = 1_000;
        let (manager, _) = create_test_manager(vec![rules]);
        let registry = create_test_registry();

        let session_ref = manager.join_queue("alone", "chess", 1).await.unwrap();
        let later = current_timestamp() + ChronoDuration::seconds(5);
        let pass = manager.pair_bracket("chess", 15, later, &registry).unwrap();

        assert_eq!(pass.expired.len(), 1);
        assert!(matches!(
            manager.get_session_status(session_ref).unwrap(),
            SessionStatus::Expired { .. }
        ));
        assert!(matches!(
            manager.wait_for_match(session_ref).await,
            Err(MatchmakingError::MatchmakingTimeout { .. })
        ));
        assert!(manager.join_queue("alone", "chess", 1).await.is_ok());
    }

    #[tokio::test]
    async fn test_pool_stats() {
        let (manager, store) = create_test_manager(vec![GameQueueConfig::two_v_two("rl")]);
        seed_rating(&store, "a", "rl", 1510.0).await;
        seed_rating(&store, "b", "rl", 1720.0).await;

        manager.join_queue("a", "rl", 2).await.unwrap();
        manager.join_queue("b", "rl", 1).await.unwrap();

        let stats = manager.get_pool_stats("rl").unwrap();
        assert_eq!(stats.queue_depth, 2);
        assert_eq!(stats.players_waiting, 3);
        assert_eq!(stats.by_bracket.len(), 2);
        assert_eq!(stats.by_bracket[0].floor_rating, 1500.0);
        assert_eq!(stats.estimated_wait_ms, 90_000);
        assert_eq!(stats.health, QueueHealth::Slow);

        let empty = manager.get_pool_stats("go").unwrap();
        assert_eq!(empty.queue_depth, 0);
        assert_eq!(empty.estimated_wait_ms, 180_000);
    }

    #[tokio::test]
    async fn test_finished_tickets_are_pruned() {
        let (manager, _) = create_test_manager(vec![]);

        let session_ref = manager.join_queue("alice", "chess", 1).await.unwrap();
        manager.leave_queue(session_ref).await.unwrap();

        let now = current_timestamp();
        assert_eq!(manager.prune_finished_tickets(now).unwrap(), 0);
        assert_eq!(
            manager
                .prune_finished_tickets(now + ChronoDuration::seconds(601))
                .unwrap(),
            1
        );
        assert!(matches!(
            manager.get_session_status(session_ref),
            Err(MatchmakingError::NotQueued { .. })
        ));
    }

    #[test]
    fn test_health_and_estimate_thresholds() {
        assert_eq!(classify_health(60, 30_000), QueueHealth::Healthy);
        assert_eq!(classify_health(60, 200_000), QueueHealth::Moderate);
        assert_eq!(classify_health(25, 100_000), QueueHealth::Moderate);
        assert_eq!(classify_health(5, 1_000), QueueHealth::Slow);

        assert_eq!(estimate_wait_ms(10, 10), 30_000);
        assert_eq!(estimate_wait_ms(5, 10), 90_000);
        assert_eq!(estimate_wait_ms(4, 10), 180_000);
    }
}
