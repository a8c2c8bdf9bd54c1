mod common;

use std::sync::Arc;

use arbiter::config::SessionConfig;
use arbiter::error::SessionError;
use arbiter::host::{Audience, BlockPos, Dimension, ProviderTeam, TeamProvider, Vec3};
use arbiter::session::SessionContext;
use arbiter::teams::TeamColor;
use common::Harness;
use tokio::runtime::Handle;

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn namespace_and_slash_are_optional() {
    let mut h = Harness::new();
    h.join("alice", false);
    for line in ["teamlist", "/teamlist", "competition teamlist", "/Competition TEAMLIST"] {
        assert_eq!(h.console(line).unwrap().affected, 1, "{line}");
    }
}

#[tokio::test(start_paused = true)]
async fn unknown_verbs_suggest_the_closest_one() {
    let mut h = Harness::new();
    let err = h.console("teamsett red alice").unwrap_err();
    assert_eq!(
        err.to_string(),
        "invalid argument: unknown command 'teamsett', did you mean 'teamset'?"
    );
    assert!(matches!(h.console(""), Err(SessionError::InvalidArgument(_))));
    assert!(matches!(
        h.console("teamset red \"alice"),
        Err(SessionError::InvalidArgument(_))
    ));
}

// ---------------------------------------------------------------------------
// Teams
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn team_assignment_reports_each_participant() {
    let mut h = Harness::new();
    let alice = h.join("alice", false);
    let bob = h.join("bob", false);

    let set = h.console("teamset red alice bob").unwrap();
    assert_eq!(set.affected, 2);
    assert_eq!(set.replies, vec!["alice joined the Red team.", "bob joined the Red team."]);
    assert_eq!(h.world.scoreboard_team(alice), Some(TeamColor::Red));
    assert!(h.world.has_scoreboard_team(TeamColor::Red));
    assert!(
        h.world
            .messages_for(bob)
            .iter()
            .any(|m| m.contains("assigned to the Red team"))
    );

    let moved = h.console("teamset BLUE alice").unwrap();
    assert_eq!(moved.replies, vec!["alice moved from the Red team to the Blue team."]);
    let same = h.console("teamset blue alice").unwrap();
    assert_eq!(same.replies, vec!["alice is already on the Blue team."]);
    assert_eq!(h.ctx.teams().team_of(alice), Some(TeamColor::Blue));
}

#[tokio::test(start_paused = true)]
async fn bad_team_arguments_assign_nobody() {
    let mut h = Harness::new();
    let alice = h.join("alice", false);

    let err = h.console("teamset rde alice").unwrap_err();
    assert!(err.to_string().contains("did you mean 'red'"));

    let err = h.console("teamset red alice ghost").unwrap_err();
    assert!(matches!(err, SessionError::TargetNotFound(_)));
    assert_eq!(h.ctx.teams().team_of(alice), None);
    assert_eq!(h.world.scoreboard_team(alice), None);

    assert!(matches!(
        h.console("teamset red"),
        Err(SessionError::InvalidArgument(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn team_listing_groups_online_participants() {
    let mut h = Harness::new();
    assert!(h.console("teamlist").unwrap().is_noop());

    h.join("alice", false);
    h.join("bob", false);
    h.join("carol", false);
    h.console("teamset green alice bob").unwrap();

    let listing = h.console("teamlist").unwrap();
    assert_eq!(listing.affected, 3);
    assert_eq!(
        listing.replies,
        vec![
            "Teams:",
            "  Green (2): alice, bob",
            "  Ungrouped (1): carol",
            "Online participants: 3",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn team_removal_and_checks() {
    let mut h = Harness::new();
    let alice = h.join("alice", false);
    h.join("bob", false);
    h.console("teamset purple alice").unwrap();

    let check = h.console("teamcheck alice").unwrap();
    assert_eq!(check.replies, vec!["alice is on the Purple team."]);
    assert_eq!(check.affected, 1);
    assert!(h.run_as(alice, "teamcheck").unwrap().affected == 1);
    assert!(matches!(
        h.console("teamcheck"),
        Err(SessionError::InvalidArgument(_))
    ));

    let removed = h.console("teamremove alice bob").unwrap();
    assert_eq!(removed.affected, 1);
    assert_eq!(
        removed.replies,
        vec!["alice was removed from the Purple team.", "bob is not on a team."]
    );
    assert_eq!(h.world.scoreboard_team(alice), None);
    assert!(h.console("teamcheck alice").unwrap().is_noop());
}

#[tokio::test(start_paused = true)]
async fn offline_members_can_still_be_removed() {
    let mut h = Harness::new();
    let alice = h.join("alice", false);
    h.console("teamset cyan alice").unwrap();
    h.world.leave(alice);

    let removed = h.console("teamremove alice").unwrap();
    assert_eq!(removed.affected, 1);
    assert!(h.ctx.teams().is_empty());
}

#[tokio::test(start_paused = true)]
async fn clearing_and_initialising_teams() {
    let mut h = Harness::new();
    let alice = h.join("alice", false);
    h.join("bob", false);
    assert!(h.console("teamclear").unwrap().is_noop());

    h.console("teamset red alice").unwrap();
    h.console("teamset yellow bob").unwrap();
    let cleared = h.console("teamclear").unwrap();
    assert_eq!(cleared.replies, vec!["Cleared 2 team assignment(s)."]);
    assert_eq!(h.world.scoreboard_team(alice), None);

    let init = h.console("teaminit").unwrap();
    assert_eq!(init.affected, 7);
    for color in TeamColor::ALL {
        assert!(h.world.has_scoreboard_team(color));
    }
}

#[tokio::test(start_paused = true)]
async fn team_assignment_is_restored_on_rejoin() {
    let mut h = Harness::new();
    let alice = h.join("alice", false);
    h.console("teamset orange alice").unwrap();
    h.world.leave(alice);
    h.join("alice", false);
    assert_eq!(h.world.scoreboard_team(alice), Some(TeamColor::Orange));
}

struct Addon(Vec<ProviderTeam>);

impl TeamProvider for Addon {
    fn name(&self) -> &str {
        "BetterTeams"
    }

    fn teams(&self) -> Vec<ProviderTeam> {
        self.0.clone()
    }
}

fn with_provider(h: &mut Harness, teams: Vec<ProviderTeam>) {
    h.ctx = SessionContext::new(
        Arc::new(SessionConfig::default()),
        Handle::current(),
        h.world.probe(),
    )
    .with_team_provider(Some(Arc::new(Addon(teams))));
}

#[tokio::test(start_paused = true)]
async fn external_teams_are_broadcast() {
    let mut h = Harness::new();
    assert!(matches!(
        h.console("showteams"),
        Err(SessionError::TargetNotFound(_))
    ));

    with_provider(&mut h, Vec::new());
    let err = h.console("showteams").unwrap_err();
    assert_eq!(err.to_string(), "not found: BetterTeams reports no teams");

    with_provider(
        &mut h,
        vec![
            ProviderTeam {
                name: "Wolves".into(),
                members: vec!["alice".into(), "bob".into()],
            },
            ProviderTeam {
                name: "Owls".into(),
                members: Vec::new(),
            },
        ],
    );
    let shown = h.console("showteams").unwrap();
    assert_eq!(shown.replies, vec!["Broadcast 2 team(s) from BetterTeams."]);
    let lines = h.broadcasts();
    assert!(lines.contains(&"Teams (BetterTeams):".to_owned()));
    assert!(lines.contains(&"Wolves: alice, bob".to_owned()));
    assert!(lines.contains(&"Owls: (no members)".to_owned()));
}

// ---------------------------------------------------------------------------
// Watchers
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn portal_discovery_is_announced_once_and_listed() {
    let mut h = Harness::new();
    let alice = h.join("alice", false);
    h.world.move_to(alice, Vec3::new(100.5, 70.0, 100.5), Dimension::Overworld);
    for dx in 0..3 {
        h.world.place_feature(Dimension::Overworld, BlockPos::new(100 + dx, 70, 100));
    }

    assert!(h.console("listportals").unwrap().is_noop());
    h.console("endportalmonitor").unwrap();
    assert!(matches!(
        h.console("endportalmonitor"),
        Err(SessionError::AlreadyRunning(_))
    ));
    h.broadcasts();

    h.advance_secs(5).await;
    let announcements: Vec<_> = h
        .broadcasts()
        .into_iter()
        .filter(|l| l.contains("A portal frame has been discovered"))
        .collect();
    assert_eq!(announcements.len(), 1);

    let listing = h.console("listportals").unwrap();
    assert_eq!(listing.affected, 1);
    assert_eq!(listing.replies[0], "Discovered end portals (1):");
    assert!(listing.replies[1].starts_with("1. (100, 70, 100)"));
    assert!(listing.replies[1].ends_with("[present]"));

    h.console("stopendportalmonitor").unwrap();
    assert!(matches!(
        h.console("stopendportalmonitor"),
        Err(SessionError::NotRunning(_))
    ));
    h.world
        .remove_feature(&Dimension::Overworld, BlockPos::new(100, 70, 100));
    let listing = h.console("listportals").unwrap();
    assert!(listing.replies[1].ends_with("[gone]"));

    assert_eq!(h.console("clearportals").unwrap().affected, 1);
    assert!(h.console("clearportals").unwrap().is_noop());
    assert!(h.ctx.features().is_empty());
}

#[tokio::test(start_paused = true)]
async fn dragon_status_reports_monitor_and_slayers() {
    let mut h = Harness::new();
    let alice = h.join("alice", false);

    let status = h.console("checkdragonstatus").unwrap();
    assert_eq!(status.affected, 1);
    assert_eq!(
        status.replies,
        vec![
            "Dragon kill monitoring: stopped",
            "Online dragon slayers: none",
            "Winner: none yet",
        ]
    );

    h.world.complete_objective(alice);
    let status = h.console("checkdragonstatus").unwrap();
    assert_eq!(status.replies[1], "Online dragon slayers: alice");

    h.world.fail_probes(Some("world unloaded"));
    let status = h.console("checkdragonstatus").unwrap();
    assert!(status.replies[1].starts_with("Online dragon slayers: unavailable"));
    h.world.fail_probes(None);

    h.console("endondragonkill").unwrap();
    assert!(matches!(
        h.console("endondragonkill"),
        Err(SessionError::AlreadyRunning(_))
    ));
    h.advance_secs(2).await;
    let status = h.console("checkdragonstatus").unwrap();
    assert_eq!(status.replies[0], "Dragon kill monitoring: stopped");
    assert_eq!(status.replies[2], "Winner: alice");
    assert!(matches!(
        h.console("stopdragonmonitor"),
        Err(SessionError::NotRunning(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_portal_needs_a_participant_and_records_nothing() {
    let mut h = Harness::new();
    let referee = h.join("referee", true);

    assert!(matches!(
        h.console("testportal"),
        Err(SessionError::InvalidArgument(_))
    ));
    h.broadcasts();

    let sent = h.run_as(referee, "testportal").unwrap();
    assert_eq!(sent.affected, 1);
    let deliveries = h.deliveries();
    assert!(deliveries.iter().any(|(audience, line)| {
        *audience == Audience::Everyone && line.contains("A portal frame has been discovered")
    }));
    assert!(h.ctx.features().is_empty());
}
