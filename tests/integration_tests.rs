//! Integration tests for the arena-matchmaker service
//!
//! These tests drive the whole system through the command facade:
//! - Queue admission and withdrawal
//! - Pairing with widening search windows and exact party fill
//! - Timeouts and ticket status tracking
//! - Match settlement into Glicko-2 ratings and leaderboards

mod fixtures;

use arena_matchmaker::commands::{
    GetLeaderboardCommand, GetPlayerRatingCommand, GetPoolStatsCommand, GetSessionStatusCommand,
    JoinQueueCommand, LeaveQueueCommand, MatchmakingService,
};
use arena_matchmaker::config::GameQueueConfig;
use arena_matchmaker::error::MatchmakingError;
use arena_matchmaker::types::{MatchPreferences, QueueHealth, SessionState, SessionStatus};
use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

use fixtures::{create_test_system, join, seed_rating, settle};

#[tokio::test]
async fn test_complete_one_v_one_workflow() {
    let system = create_test_system(vec![GameQueueConfig::one_v_one("chess")]);
    let service = &system.service;

    // Step 1: two fresh players queue up
    let alice = service.join_queue(join("alice", "chess", 1)).await.unwrap();
    let bob = service.join_queue(join("bob", "chess", 1)).await.unwrap();

    let status = service
        .get_session_status(GetSessionStatusCommand { session_ref: alice })
        .unwrap();
    assert!(matches!(status, SessionStatus::Queued { .. }));

    // Step 2: a pairing pass forms the session
    let report = system.matcher.run_pass("chess").await.unwrap();
    assert_eq!(report.sessions.len(), 1);
    let session = &report.sessions[0];
    assert_eq!(session.participant_ids, vec!["alice", "bob"]);
    assert_eq!(session.state, SessionState::AwaitingStart);
    assert_eq!(system.notifier.count_of_kind("SessionMatched"), 2);

    for ticket in [alice, bob] {
        match service
            .get_session_status(GetSessionStatusCommand { session_ref: ticket })
            .unwrap()
        {
            SessionStatus::Matched { session: matched } => {
                assert_eq!(matched.session_id, session.session_id)
            }
            other => panic!("expected a matched ticket, got {:?}", other),
        }
    }

    // Step 3: the match is reported and settled
    let updated = service
        .update_ratings(settle("chess", &["alice"], &["bob"], Some(session.session_id)))
        .await
        .unwrap();
    assert_eq!(updated.len(), 2);

    let winner = &updated[0];
    let loser = &updated[1];
    assert_eq!(winner.player_id, "alice");
    assert!((winner.rating - 1662.31).abs() < 0.5);
    assert!((loser.rating - 1337.69).abs() < 0.5);
    assert!((winner.deviation - 290.32).abs() < 0.5);
    assert_eq!(winner.version, 1);

    let stored_session = system.sessions.get(session.session_id).unwrap();
    assert_eq!(stored_session.state, SessionState::Completed);
    assert_eq!(system.notifier.count_of_kind("RatingUpdated"), 2);

    println!("✅ Complete one-versus-one workflow test passed");
}

#[tokio::test]
async fn test_search_window_widens_with_wait() {
    let system = create_test_system(vec![GameQueueConfig::one_v_one("chess")]);
    seed_rating(&system.store, "low", "chess", 1500.0, 80.0).await;
    seed_rating(&system.store, "high", "chess", 1880.0, 80.0).await;

    let service = &system.service;
    service.join_queue(join("low", "chess", 1)).await.unwrap();
    service.join_queue(join("high", "chess", 1)).await.unwrap();

    // 380 rating points apart: too far for a fresh window of 100
    let report = system.matcher.run_pass("chess").await.unwrap();
    assert!(report.sessions.is_empty());

    // After a minute both windows reach the 400 cap
    let later = Utc::now() + ChronoDuration::seconds(60);
    let report = system.matcher.run_pass_at("chess", later).await.unwrap();
    assert_eq!(report.sessions.len(), 1);
    assert!((report.sessions[0].average_rating - 1690.0).abs() < 1e-9);

    println!("✅ Search window widening test passed");
}

#[tokio::test]
async fn test_parties_fill_sessions_exactly() {
    let system = create_test_system(vec![GameQueueConfig::five_v_five("valorant")]);
    let service = &system.service;

    let full = service.join_queue(join("stack_of_five", "valorant", 5)).await.unwrap();
    let trio = service.join_queue(join("trio", "valorant", 3)).await.unwrap();
    let quad = service.join_queue(join("quad", "valorant", 4)).await.unwrap();
    let duo = service.join_queue(join("duo", "valorant", 2)).await.unwrap();

    let report = system.matcher.run_pass("valorant").await.unwrap();
    assert_eq!(report.sessions.len(), 1);

    // Oldest first: 5 + 3 + 2, the party of four cannot fit the last two seats
    let session = &report.sessions[0];
    assert_eq!(session.slots, 10);
    assert_eq!(session.tickets, vec![full, trio, duo]);

    let status = service
        .get_session_status(GetSessionStatusCommand { session_ref: quad })
        .unwrap();
    assert!(matches!(status, SessionStatus::Queued { .. }));

    let stats = service
        .get_pool_stats(GetPoolStatsCommand {
            game_id: "valorant".to_string(),
        })
        .unwrap();
    assert_eq!(stats.queue_depth, 1);
    assert_eq!(stats.players_waiting, 4);

    println!("✅ Exact party fill test passed");
}

#[tokio::test]
async fn test_admission_errors() {
    let system = create_test_system(vec![GameQueueConfig::two_v_two("rl")]);
    let service = &system.service;

    assert!(matches!(
        service.join_queue(join("alice", "unknown", 1)).await,
        Err(MatchmakingError::UnknownGame { .. })
    ));
    assert!(matches!(
        service.join_queue(join("alice", "rl", 3)).await,
        Err(MatchmakingError::InvalidParty { .. })
    ));
    assert!(matches!(
        service.join_queue(join("alice", "rl", 0)).await,
        Err(MatchmakingError::InvalidParty { .. })
    ));

    assert_ok!(service.join_queue(join("alice", "rl", 2)).await);
    assert!(matches!(
        service.join_queue(join("alice", "rl", 1)).await,
        Err(MatchmakingError::AlreadyQueued { .. })
    ));

    let stats = system.queue.get_stats().unwrap();
    assert_eq!(stats.tickets_issued, 1);
    assert_eq!(stats.joins_rejected, 4);

    println!("✅ Admission error test passed");
}

#[tokio::test]
async fn test_leave_queue_frees_player() {
    let system = create_test_system(vec![GameQueueConfig::one_v_one("chess")]);
    let service = &system.service;

    let depth = |service: &MatchmakingService| {
        service
            .get_pool_stats(GetPoolStatsCommand {
                game_id: "chess".to_string(),
            })
            .unwrap()
            .queue_depth
    };

    let ticket = service.join_queue(join("alice", "chess", 1)).await.unwrap();
    service.join_queue(join("bob", "chess", 1)).await.unwrap();
    assert_eq!(depth(service), 2);

    assert_ok!(service.leave_queue(LeaveQueueCommand { session_ref: ticket }).await);
    assert_eq!(depth(service), 1);

    assert_eq!(
        service
            .get_session_status(GetSessionStatusCommand { session_ref: ticket })
            .unwrap(),
        SessionStatus::Left
    );
    assert!(matches!(
        service.leave_queue(LeaveQueueCommand { session_ref: ticket }).await,
        Err(MatchmakingError::NotQueued { .. })
    ));
    // The repeated leave touches nothing
    assert_eq!(depth(service), 1);
    assert_eq!(
        service
            .get_session_status(GetSessionStatusCommand { session_ref: ticket })
            .unwrap(),
        SessionStatus::Left
    );
    assert_err!(service.wait_for_match(ticket).await);

    // A withdrawn player may queue again straight away
    assert_ok!(service.join_queue(join("alice", "chess", 1)).await);

    println!("✅ Leave queue test passed");
}

#[tokio::test]
async fn test_regions_queue_separately() {
    let system = create_test_system(vec![GameQueueConfig::one_v_one("chess")]);
    let service = &system.service;
    let in_region = |player_id: &str, region: &str| JoinQueueCommand {
        preferences: MatchPreferences::new("blitz", region),
        ..join(player_id, "chess", 1)
    };

    let alice = service.join_queue(in_region("alice", "eu")).await.unwrap();
    let bob = service.join_queue(in_region("bob", "na")).await.unwrap();
    let report = system.matcher.run_pass("chess").await.unwrap();
    assert!(report.sessions.is_empty());

    let carol = service.join_queue(in_region("carol", "eu")).await.unwrap();
    let report = system.matcher.run_pass("chess").await.unwrap();
    assert_eq!(report.sessions.len(), 1);
    assert_eq!(report.sessions[0].tickets, vec![alice, carol]);

    assert!(matches!(
        service
            .get_session_status(GetSessionStatusCommand { session_ref: bob })
            .unwrap(),
        SessionStatus::Queued { .. }
    ));

    println!("✅ Region partition test passed");
}

#[tokio::test]
async fn test_waiting_players_time_out() {
    let mut rules = GameQueueConfig::one_v_one("chess");
    rules.max_wait_ms = 1_000;
    let system = create_test_system(vec![rules]);
    let service = &system.service;

    let ticket = service.join_queue(join("lonely", "chess", 1)).await.unwrap();

    let later = Utc::now() + ChronoDuration::seconds(5);
    let report = system.matcher.run_pass_at("chess", later).await.unwrap();
    assert_eq!(report.expired.len(), 1);

    match service
        .get_session_status(GetSessionStatusCommand { session_ref: ticket })
        .unwrap()
    {
        SessionStatus::Expired { waited_ms } => assert!(waited_ms > 1_000),
        other => panic!("expected an expired ticket, got {:?}", other),
    }
    assert!(matches!(
        service.wait_for_match(ticket).await,
        Err(MatchmakingError::MatchmakingTimeout { .. })
    ));
    assert_eq!(system.notifier.count_of_kind("MatchmakingTimedOut"), 1);

    // Timed out players can rejoin
    assert_ok!(service.join_queue(join("lonely", "chess", 1)).await);

    println!("✅ Queue timeout test passed");
}

#[tokio::test]
async fn test_wait_for_match_resolves_when_paired() {
    let system = create_test_system(vec![GameQueueConfig::one_v_one("chess")]);
    let queue = system.queue.clone();

    let alice = system
        .service
        .join_queue(join("alice", "chess", 1))
        .await
        .unwrap();
    let waiter = tokio::spawn(async move { queue.wait_for_match(alice).await });

    system
        .service
        .join_queue(join("bob", "chess", 1))
        .await
        .unwrap();
    system.matcher.run_pass("chess").await.unwrap();

    let session = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("waiter did not resolve")
        .unwrap()
        .unwrap();
    assert_eq!(session.participant_ids, vec!["alice", "bob"]);

    println!("✅ Wait for match test passed");
}

#[tokio::test]
async fn test_settlement_is_idempotent_per_match() {
    let system = create_test_system(vec![GameQueueConfig::one_v_one("chess")]);
    let service = &system.service;

    let command = settle("chess", &["alice"], &["bob"], None);
    assert_ok!(service.update_ratings(command.clone()).await);

    assert!(matches!(
        service.update_ratings(command).await,
        Err(MatchmakingError::InvalidMatchResult { .. })
    ));

    let alice = service
        .get_player_rating(GetPlayerRatingCommand {
            player_id: "alice".to_string(),
            game_id: "chess".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(alice.matches_played, 1);

    println!("✅ Settlement idempotency test passed");
}

#[tokio::test]
async fn test_repeated_wins_climb_the_leaderboard() {
    let system = create_test_system(vec![GameQueueConfig::one_v_one("chess")]);
    let service = &system.service;

    for _ in 0..5 {
        service
            .update_ratings(settle("chess", &["champion"], &["rival"], None))
            .await
            .unwrap();
    }
    service
        .update_ratings(settle("chess", &["rookie"], &["rival"], None))
        .await
        .unwrap();

    let board = service
        .get_leaderboard(GetLeaderboardCommand {
            game_id: "chess".to_string(),
            limit: 10,
        })
        .await
        .unwrap();
    let order: Vec<&str> = board.iter().map(|r| r.player_id.as_str()).collect();
    assert_eq!(order, vec!["champion", "rookie", "rival"]);

    let champion = &board[0];
    assert_eq!(champion.wins, 5);
    assert_eq!(champion.win_streak, 5);
    assert_eq!(champion.history.len(), 5);
    assert!(champion.deviation < 350.0);
    assert_eq!(champion.peak_rating, champion.rating);

    let rival = &board[2];
    assert_eq!(rival.losses, 6);
    assert_eq!(rival.win_streak, 0);

    println!("✅ Leaderboard progression test passed");
}

#[tokio::test]
async fn test_pool_stats_reflect_queue() {
    let system = create_test_system(vec![GameQueueConfig::one_v_one("chess")]);
    let service = &system.service;

    for player in ["a", "b", "c"] {
        seed_rating(&system.store, player, "chess", 1500.0, 80.0).await;
    }
    seed_rating(&system.store, "far", "chess", 2400.0, 80.0).await;
    for player in ["a", "b", "c", "far"] {
        service.join_queue(join(player, "chess", 1)).await.unwrap();
    }

    let stats = service
        .get_pool_stats(GetPoolStatsCommand {
            game_id: "chess".to_string(),
        })
        .unwrap();
    assert_eq!(stats.queue_depth, 4);
    assert_eq!(stats.players_waiting, 4);
    assert_eq!(stats.by_bracket.len(), 2);
    assert_eq!(stats.by_bracket[0].bracket, 15);
    assert_eq!(stats.by_bracket[0].queue_depth, 3);
    assert_eq!(stats.estimated_wait_ms, 30_000);
    assert_eq!(stats.health, QueueHealth::Slow);

    system.matcher.run_pass("chess").await.unwrap();
    let stats = service
        .get_pool_stats(GetPoolStatsCommand {
            game_id: "chess".to_string(),
        })
        .unwrap();
    assert_eq!(stats.queue_depth, 2);

    println!("✅ Pool stats test passed");
}
