mod common;

use arbiter::config::SessionConfig;
use arbiter::error::SessionError;
use arbiter::host::{Dimension, EffectKind, PlayMode, Vec3};
use arbiter::session::{Outcome, Phase};
use common::Harness;

#[tokio::test(start_paused = true)]
async fn spawn_selection_relocates_teams_then_counts_down() {
    let mut h = Harness::new();
    let alice = h.join("alice", false);
    let bob = h.join("bob", false);
    let carol = h.join("carol", false);
    h.console("teamset red alice bob").unwrap();

    let started = h.console("start").unwrap();
    assert_eq!(started.affected, 3);
    assert_eq!(h.phase(), Phase::Preparing);
    assert_eq!(h.world.mode(alice), Some(PlayMode::Spectator));
    for id in [alice, bob, carol] {
        assert_eq!(h.world.position(id), Some(Vec3::new(0.0, 100.0, 0.0)));
    }

    h.world.move_to(alice, Vec3::new(10.0, 70.0, 10.0), Dimension::Overworld);
    h.world.move_to(bob, Vec3::new(20.0, 70.0, 30.0), Dimension::Overworld);
    h.world.move_to(carol, Vec3::new(-5.0, 64.0, 5.0), Dimension::Overworld);
    h.broadcasts();

    h.advance_secs(59).await;
    assert_eq!(h.phase(), Phase::Preparing);
    let cues = h.broadcasts();
    assert!(cues.contains(&"[Competition] Time remaining: 30s".to_owned()));
    assert!(cues.contains(&"[Competition] Final 10 seconds!".to_owned()));
    assert!(cues.contains(&"[Competition] 1".to_owned()));

    h.advance_secs(1).await;
    assert_eq!(h.phase(), Phase::CountdownRunning);
    assert_eq!(h.world.position(alice), Some(Vec3::new(15.0, 70.0, 20.0)));
    assert_eq!(h.world.position(bob), Some(Vec3::new(15.0, 70.0, 20.0)));
    assert_eq!(h.world.position(carol), Some(Vec3::new(-5.0, 64.0, 5.0)));
    assert_eq!(h.world.mode(carol), Some(PlayMode::Survival));
    assert_eq!(h.ctx.controller().remaining(), Some(12_600));
    assert!(
        h.broadcasts()
            .contains(&"The competition has officially begun!".to_owned())
    );
}

#[tokio::test(start_paused = true)]
async fn countdown_fires_milestones_and_ends_on_time() {
    let mut h = Harness::new();
    h.join("alice", false);

    assert_eq!(h.console("countdown 35").unwrap().affected, 1);
    assert_eq!(h.phase(), Phase::CountdownRunning);

    h.advance_secs(5).await;
    assert_eq!(h.ctx.controller().remaining(), Some(30));
    assert!(
        h.broadcasts()
            .contains(&"[Competition] Time remaining: 30s".to_owned())
    );

    h.advance_secs(20).await;
    assert!(h.broadcasts().contains(&"title: Final 10 seconds".to_owned()));

    h.advance_secs(10).await;
    assert_eq!(h.phase(), Phase::Ended);
    assert_eq!(h.ctx.controller().status().outcome, Some(Outcome::TimeUp));
    assert!(h.broadcasts().contains(&"Game over! Time is up!".to_owned()));
    assert_eq!(h.ctx.controller().remaining(), None);

    assert!(matches!(
        h.console("countdown 10"),
        Err(SessionError::AlreadyRunning(_))
    ));
    assert_eq!(h.console("reset").unwrap().affected, 1);
    assert_eq!(h.phase(), Phase::Idle);
    assert!(h.console("reset").unwrap().is_noop());
}

#[tokio::test(start_paused = true)]
async fn countdown_arguments_are_validated_before_anything_starts() {
    let mut h = Harness::new();
    for bad in ["countdown 0", "countdown 86401", "countdown soon", "countdown 1 2"] {
        assert!(
            matches!(h.console(bad), Err(SessionError::InvalidArgument(_))),
            "{bad} should be rejected"
        );
        assert_eq!(h.phase(), Phase::Idle);
        assert_eq!(h.ctx.controller().remaining(), None);
    }

    assert_eq!(h.console("countdown 86400").unwrap().affected, 1);
    assert!(matches!(
        h.console("countdown 100"),
        Err(SessionError::AlreadyRunning(_))
    ));
    let report = h.console("checkcountdown").unwrap();
    assert_eq!(report.replies, vec!["Time remaining: 24h", "Exact: 24h 0m 0s"]);
    h.advance_secs(3).await;
    assert_eq!(h.ctx.controller().remaining(), Some(86_397));

    h.console("stopcountdown").unwrap();
    assert_eq!(h.phase(), Phase::Idle);
    assert!(matches!(
        h.console("stopcountdown"),
        Err(SessionError::NotRunning(_))
    ));
    assert!(h.console("checkcountdown").unwrap().is_noop());
}

#[tokio::test(start_paused = true)]
async fn initiator_is_left_out_of_spawn_selection() {
    let mut h = Harness::new();
    let referee = h.join("referee", true);
    let alice = h.join("alice", false);
    let bob = h.join("bob", false);
    let far = Vec3::new(1000.0, 64.0, 1000.0);
    h.world.move_to(referee, far, Dimension::Overworld);

    h.run_as(referee, "start").unwrap();
    assert_eq!(h.world.position(referee), Some(far));
    assert_eq!(h.world.mode(referee), Some(PlayMode::Survival));

    h.world.move_to(alice, Vec3::new(0.0, 64.0, 0.0), Dimension::Overworld);
    h.world.move_to(bob, Vec3::new(10.0, 64.0, 0.0), Dimension::Overworld);
    h.advance_secs(60).await;

    assert_eq!(h.phase(), Phase::CountdownRunning);
    assert_eq!(h.world.position(alice), Some(Vec3::new(5.0, 64.0, 0.0)));
    assert_eq!(h.world.position(bob), Some(Vec3::new(5.0, 64.0, 0.0)));
    assert_eq!(h.world.position(referee), Some(far));
    assert_eq!(h.world.mode(referee), Some(PlayMode::Survival));
}

#[tokio::test(start_paused = true)]
async fn rejected_second_countdown_leaves_the_first_untouched() {
    let mut h = Harness::new();
    h.join("alice", false);
    h.console("countdown 40").unwrap();
    h.advance_secs(5).await;

    assert!(matches!(
        h.console("countdown 100"),
        Err(SessionError::AlreadyRunning(_))
    ));
    let mut seen = h.broadcasts();
    h.advance_secs(5).await;
    assert_eq!(h.ctx.controller().remaining(), Some(30));

    h.advance_secs(30).await;
    assert_eq!(h.phase(), Phase::Ended);
    seen.extend(h.broadcasts());
    let count = |text: &str| seen.iter().filter(|l| l.as_str() == text).count();
    assert_eq!(count("[Competition] Time remaining: 30s"), 1);
    assert_eq!(count("title: Final 10 seconds"), 1);
    assert_eq!(count("Game over! Time is up!"), 1);

    h.advance_secs(70).await;
    assert!(h.broadcasts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn default_countdown_length_comes_from_config() {
    let mut h = Harness::new();
    h.console("countdown").unwrap();
    assert_eq!(h.ctx.controller().remaining(), Some(12_600));
}

#[tokio::test(start_paused = true)]
async fn stopped_countdown_never_ticks_again() {
    let mut h = Harness::new();
    h.join("alice", false);
    h.console("countdown 40").unwrap();
    h.advance_secs(3).await;
    h.console("stopcountdown").unwrap();
    h.broadcasts();

    h.advance_secs(60).await;
    assert!(h.broadcasts().is_empty());
    assert_eq!(h.phase(), Phase::Idle);
}

#[tokio::test(start_paused = true)]
async fn cancelled_preparation_never_completes() {
    let mut h = Harness::new();
    h.join("alice", false);
    h.console("start").unwrap();
    h.advance_secs(30).await;

    let reset = h.console("cancelstart").unwrap();
    assert_eq!(reset.affected, 1);
    assert_eq!(h.phase(), Phase::Idle);
    h.broadcasts();

    h.advance_secs(45).await;
    assert_eq!(h.phase(), Phase::Idle);
    assert!(h.broadcasts().is_empty());
    assert!(matches!(
        h.console("cancelstart"),
        Err(SessionError::NotRunning(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn completion_queued_before_cancel_is_discarded_by_the_next_run() {
    let mut h = Harness::new();
    h.join("alice", false);
    h.console("start").unwrap();

    // The completion is queued but not yet drained when the operator
    // cancels and starts again.
    h.advance_undrained(60).await;
    assert!(h.ctx.pending_tasks() > 0);
    h.console("cancelstart").unwrap();
    h.console("start").unwrap();

    h.tick();
    assert_eq!(h.phase(), Phase::Preparing);
    let status = h.ctx.controller().status();
    assert_eq!(status.timer.map(|(name, _)| name), Some("spawn_selection"));

    h.advance_secs(60).await;
    assert_eq!(h.phase(), Phase::CountdownRunning);
}

#[tokio::test(start_paused = true)]
async fn preparation_hold_restrains_everyone_but_the_initiator() {
    let mut h = Harness::new();
    let referee = h.join("referee", true);
    let bob = h.join("bob", false);

    let held = h.run_as(referee, "startprep").unwrap();
    assert_eq!(held.affected, 1);
    assert_eq!(h.phase(), Phase::Preparing);
    assert_eq!(h.world.mode(referee), Some(PlayMode::Survival));
    assert_eq!(h.world.mode(bob), Some(PlayMode::Spectator));
    assert_eq!(h.world.position(bob), Some(Vec3::new(0.0, 100.0, 0.0)));
    let kinds: Vec<_> = h.world.effects(bob).iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![EffectKind::Blindness, EffectKind::Slowness, EffectKind::MiningFatigue]
    );
    assert!(
        h.world
            .messages_for(bob)
            .contains(&"Preparation phase".to_owned())
    );

    assert!(matches!(
        h.console("startprep"),
        Err(SessionError::AlreadyRunning(_))
    ));

    h.run_as(referee, "start").unwrap();
    assert!(h.world.effects(bob).is_empty());
    assert!(matches!(
        h.console("start"),
        Err(SessionError::AlreadyRunning(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn preparation_with_nobody_else_online_is_a_noop() {
    let mut h = Harness::new();
    let referee = h.join("referee", true);
    assert!(h.run_as(referee, "startprep").unwrap().is_noop());
    assert_eq!(h.phase(), Phase::Idle);
}

#[tokio::test(start_paused = true)]
async fn winner_ends_the_session_and_stops_the_countdown() {
    let mut h = Harness::new();
    let alice = h.join("alice", false);
    h.join("bob", false);
    h.console("countdown 600").unwrap();
    h.console("endondragonkill").unwrap();
    h.advance_secs(3).await;

    h.world.complete_objective(alice);
    h.advance_secs(2).await;

    assert_eq!(h.phase(), Phase::Ended);
    let status = h.ctx.controller().status();
    assert!(matches!(status.outcome, Some(Outcome::Winner(ref w)) if w.name == "alice"));
    assert!(!status.objective_watch);
    assert_eq!(h.ctx.controller().remaining(), None);

    let kinds: Vec<_> = h.world.effects(alice).iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&EffectKind::HeroOfTheVillage));
    assert!(kinds.contains(&EffectKind::Glowing));
    assert!(h.broadcasts().contains(&"Winner: alice".to_owned()));

    h.broadcasts();
    h.advance_secs(30).await;
    assert!(h.broadcasts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_is_idempotent_and_silences_engines() {
    let mut h = Harness::new();
    h.join("alice", false);
    h.console("countdown 120").unwrap();
    h.console("endportalmonitor").unwrap();
    h.console("teamset blue alice").unwrap();

    assert!(h.ctx.shutdown("test").await);
    assert!(!h.ctx.shutdown("test").await);
    assert!(h.ctx.is_shut_down());
    assert_eq!(h.phase(), Phase::Idle);
    assert!(h.ctx.teams().is_empty());

    h.broadcasts();
    h.advance_secs(10).await;
    assert!(h.broadcasts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn session_events_are_written_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.jsonl");
    let mut h = Harness::with_events_file(SessionConfig::default(), &path);
    h.join("alice", false);
    h.console("countdown 12").unwrap();
    h.advance_secs(12).await;
    assert_eq!(h.phase(), Phase::Ended);

    let raw = std::fs::read_to_string(&path).unwrap();
    let events: Vec<serde_json::Value> = raw
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    let types: Vec<_> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
    assert_eq!(
        types,
        vec!["PhaseChanged", "MilestoneReached", "PhaseChanged", "CountdownFinished"]
    );
    let sequences: Vec<_> = events.iter().map(|e| e["sequence"].as_u64().unwrap()).collect();
    assert!(sequences.windows(2).all(|w| w[0] < w[1]));
}
