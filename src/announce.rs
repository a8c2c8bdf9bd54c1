//! Participant-facing announcements.
//!
//! Every broadcast the coordinator makes is built here so wording, titles
//! and sound cues stay consistent between command handlers, timers and
//! watchers.

use crate::host::{BlockPos, Dimension, Notice, SoundCue, Vec3};
use crate::teams::SpawnGroup;
use crate::timer::{FINAL_INDICATOR_SECS, format_duration};

const TAG: &str = "[Competition]";
const RULE: &str = "=============================================";

fn tagged(text: impl std::fmt::Display) -> String {
    format!("{TAG} {text}")
}

// ---------------------------------------------------------------------------
// Countdown
// ---------------------------------------------------------------------------

/// Countdown started.
#[must_use]
pub fn countdown_started(total_seconds: i64) -> Notice {
    Notice::chat(tagged(format!(
        "The countdown has started: {}",
        format_duration(total_seconds)
    )))
    .with_title("Competition started!", Some(&format!("Time limit: {}", format_duration(total_seconds))))
    .with_sound(SoundCue::LevelUp, 1.0)
}

/// A countdown milestone. Cue intensity rises as time runs out; the final
/// milestone gets the large "ending" title instead of a chat line.
#[must_use]
pub fn countdown_milestone(remaining: i64) -> Notice {
    if remaining <= FINAL_INDICATOR_SECS {
        return Notice::title(format!("Final {remaining} seconds"), Some("Ending soon"))
            .with_sound(SoundCue::Pling, 1.0);
    }
    let (cue, pitch) = match remaining {
        r if r >= 1800 => (SoundCue::Hat, 0.8),
        r if r >= 300 => (SoundCue::Hat, 1.0),
        _ => (SoundCue::Bell, 1.0),
    };
    Notice::chat(tagged(format!("Time remaining: {}", format_duration(remaining))))
        .with_sound(cue, pitch)
}

/// Periodic reminder between milestones.
#[must_use]
pub fn countdown_reminder(remaining: i64) -> Notice {
    Notice::chat(tagged(format!("{} left in the competition", format_duration(remaining))))
}

/// Countdown stopped by an operator.
#[must_use]
pub fn countdown_stopped() -> Notice {
    Notice::chat(tagged("The countdown was stopped by an administrator."))
}

/// Countdown reached zero.
#[must_use]
pub fn time_up() -> Notice {
    Notice::chat(RULE)
        .line("Game over! Time is up!")
        .line("Thank you for playing.")
        .line(RULE)
        .with_title("Game over!", Some("Time is up!"))
        .with_sound(SoundCue::Firework, 1.0)
}

// ---------------------------------------------------------------------------
// Preparation
// ---------------------------------------------------------------------------

/// Shown to participants placed in the preparation hold.
#[must_use]
pub fn preparation_hold() -> Notice {
    Notice::chat(tagged("Preparation phase: wait for the referee to start the competition."))
        .with_title("Preparation phase", Some("Wait for the referee"))
}

/// Shown to participants switched to spawn selection.
#[must_use]
pub fn spawn_selection_private() -> Notice {
    Notice::chat("You are now a spectator. Pick your team's spawn point!")
        .with_sound(SoundCue::Bell, 1.0)
}

/// Broadcast when spawn selection begins.
#[must_use]
pub fn spawn_selection_started(seconds: i64) -> Notice {
    Notice::chat(RULE)
        .line("The competition start sequence has begun!")
        .line(format!(
            "Choose your spawn point. Positions are recorded in {}",
            format_duration(seconds)
        ))
        .line("and each team starts at the average position of its members.")
        .line(RULE)
        .with_title("Choose your spawn", Some(&format!("Positions recorded in {}", format_duration(seconds))))
        .with_sound(SoundCue::LevelUp, 1.0)
}

/// Spawn-selection countdown cue: plain at 30 seconds, urgent at 10,
/// then an audible count with rising pitch.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn spawn_selection_tick(remaining: i64) -> Notice {
    match remaining {
        r if r > 10 => Notice::chat(tagged(format!("Time remaining: {}", format_duration(r))))
            .with_sound(SoundCue::Hat, 1.0),
        r if r > 5 => Notice::chat(tagged(format!("Final {r} seconds!"))).with_sound(SoundCue::Pling, 1.2),
        r => {
            let step = (5 - r.max(0)) as f32;
            Notice::chat(tagged(r)).with_sound(SoundCue::Pling, 0.1f32.mul_add(step, 1.0))
        }
    }
}

/// Private notice after relocation to a spawn.
#[must_use]
pub fn relocated(group: SpawnGroup) -> Notice {
    Notice::chat(format!("You have been moved to the {group} spawn point."))
}

/// Log line for a computed spawn.
#[must_use]
pub fn spawn_computed(group: SpawnGroup, spawn: Vec3, members: usize) -> String {
    format!("{group} average position {spawn} from {members} member(s)")
}

/// Broadcast when play begins after spawn selection.
#[must_use]
pub fn competition_begins() -> Notice {
    Notice::chat(RULE)
        .line("The competition has officially begun!")
        .line("Every participant has been moved to their team's spawn point.")
        .line(RULE)
        .with_title("Competition started!", Some("Good luck!"))
        .with_sound(SoundCue::Firework, 1.0)
}

/// Broadcast when an operator cancels preparation.
#[must_use]
pub fn start_cancelled() -> Notice {
    Notice::chat(tagged(
        "The start sequence was cancelled by an administrator. You are now a spectator.",
    ))
}

// ---------------------------------------------------------------------------
// Permissions
// ---------------------------------------------------------------------------

/// Sent to a participant whose commands were revoked.
#[must_use]
pub fn commands_revoked() -> Notice {
    Notice::chat(tagged("Your command permissions have been revoked by an administrator."))
}

/// Sent to a participant whose commands were restored.
#[must_use]
pub fn commands_restored() -> Notice {
    Notice::chat(tagged("Your command permissions have been restored."))
}

// ---------------------------------------------------------------------------
// Teams
// ---------------------------------------------------------------------------

/// Private notice after a team assignment.
#[must_use]
pub fn team_assigned(team: crate::teams::TeamColor) -> Notice {
    Notice::chat(format!(
        "{}You have been assigned to the {} team!",
        team.color_code(),
        team.display_name()
    ))
}

/// Private notice after leaving a team.
#[must_use]
pub fn team_removed() -> Notice {
    Notice::chat("You have been removed from your team.")
}

/// Broadcast of the external team add-on's teams.
#[must_use]
pub fn provider_teams(provider: &str, teams: &[crate::host::ProviderTeam]) -> Notice {
    let mut notice = Notice::chat(RULE).line(format!("Teams ({provider}):"));
    for team in teams {
        let members = if team.members.is_empty() {
            "(no members)".to_owned()
        } else {
            team.members.join(", ")
        };
        notice = notice.line(format!("{}: {members}", team.name));
    }
    notice.line(RULE)
}

// ---------------------------------------------------------------------------
// Watchers
// ---------------------------------------------------------------------------

/// Broadcast when a watcher is started or stopped.
#[must_use]
pub fn watcher_state(what: &str, running: bool) -> Notice {
    let state = if running { "started" } else { "stopped" };
    Notice::chat(tagged(format!("{what} monitoring {state}.")))
}

/// Broadcast when the objective watcher starts.
#[must_use]
pub fn objective_watch_started() -> Notice {
    watcher_state("Dragon kill", true)
        .line(tagged("The first participant to slay the dragon ends the competition!"))
}

/// Broadcast when the session ends with a winner.
#[must_use]
pub fn winner_declared(name: &str) -> Notice {
    Notice::chat(RULE)
        .line("Competition over! The dragon has been slain!")
        .line(format!("Winner: {name}"))
        .line("Congratulations to the winner!")
        .line(RULE)
        .with_title("Competition over!", Some("The dragon has been slain!"))
        .with_sound(SoundCue::Firework, 1.0)
}

/// Private congratulation for the winner.
#[must_use]
pub fn winner_private() -> Notice {
    Notice::chat("Congratulations! You slew the dragon and won the competition!")
        .with_sound(SoundCue::Challenge, 1.0)
}

/// Broadcast when the feature watcher admits a new discovery.
#[must_use]
pub fn feature_discovered(
    discoverer: &str,
    discoverer_position: BlockPos,
    frame: BlockPos,
    dimension: &Dimension,
) -> Notice {
    Notice::chat(RULE)
        .line("[End Portal] A portal frame has been discovered!")
        .line(format!("Discoverer: {discoverer} at {discoverer_position}"))
        .line(format!("Frame position: {frame} ({})", dimension.display_name()))
        .line(RULE)
        .with_sound(SoundCue::Bell, 1.0)
}
