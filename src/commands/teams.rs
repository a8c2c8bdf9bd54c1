//! Team management verbs.

use tracing::info;

use crate::announce;
use crate::commands::{Caller, CommandOutcome, usage};
use crate::error::SessionError;
use crate::host::{Audience, Participant, ParticipantId, Simulation};
use crate::session::SessionContext;
use crate::teams::{Assignment, TeamColor};

fn online_target(sim: &dyn Simulation, name: &str) -> Result<Participant, SessionError> {
    sim.find(name)
        .ok_or_else(|| SessionError::TargetNotFound(format!("participant '{name}' is not online")))
}

/// `teamset <color> <participant>...`
///
/// Every name is resolved before anyone is assigned.
pub fn set(
    ctx: &SessionContext,
    sim: &mut dyn Simulation,
    args: &[String],
) -> Result<CommandOutcome, SessionError> {
    let [color, names @ ..] = args else {
        return Err(usage("teamset <color> <participant>..."));
    };
    if names.is_empty() {
        return Err(usage("teamset <color> <participant>..."));
    }
    let team: TeamColor = color.parse()?;
    let view: &dyn Simulation = sim;
    let targets = names
        .iter()
        .map(|name| online_target(view, name))
        .collect::<Result<Vec<_>, _>>()?;

    sim.ensure_scoreboard_team(team);
    let notice = announce::team_assigned(team);
    let mut replies = Vec::with_capacity(targets.len());
    for participant in &targets {
        let name = &participant.name;
        let line = match ctx.teams().assign(participant.id, name, team) {
            Assignment::Fresh => format!("{name} joined the {} team.", team.display_name()),
            Assignment::Moved { from } => format!(
                "{name} moved from the {} team to the {} team.",
                from.display_name(),
                team.display_name()
            ),
            Assignment::Unchanged => {
                format!("{name} is already on the {} team.", team.display_name())
            }
        };
        sim.assign_scoreboard_team(participant.id, Some(team));
        sim.deliver(Audience::Only(participant.id), &notice);
        replies.push(line);
    }
    Ok(CommandOutcome::lines(targets.len(), replies))
}

/// `teamlist`: every color with online members, then the ungrouped.
pub fn list(ctx: &SessionContext, sim: &dyn Simulation) -> CommandOutcome {
    let online = sim.online();
    if online.is_empty() {
        return CommandOutcome::noop("No participants are online.");
    }
    let mut lines = vec!["Teams:".to_owned()];
    for team in TeamColor::ALL {
        let members: Vec<_> = online
            .iter()
            .filter(|p| ctx.teams().team_of(p.id) == Some(team))
            .map(|p| p.name.as_str())
            .collect();
        if !members.is_empty() {
            lines.push(format!(
                "  {} ({}): {}",
                team.display_name(),
                members.len(),
                members.join(", ")
            ));
        }
    }
    let ungrouped: Vec<_> = online
        .iter()
        .filter(|p| ctx.teams().team_of(p.id).is_none())
        .map(|p| p.name.as_str())
        .collect();
    if !ungrouped.is_empty() {
        lines.push(format!(
            "  Ungrouped ({}): {}",
            ungrouped.len(),
            ungrouped.join(", ")
        ));
    }
    lines.push(format!("Online participants: {}", online.len()));
    CommandOutcome::lines(online.len(), lines)
}

/// `teamclear`
pub fn clear(ctx: &SessionContext, sim: &mut dyn Simulation) -> CommandOutcome {
    let previous = ctx.teams().memberships();
    let cleared = ctx.teams().clear();
    if cleared == 0 {
        return CommandOutcome::noop("No team assignments to clear.");
    }
    for (id, _) in &previous {
        if sim.participant(*id).is_some() {
            sim.assign_scoreboard_team(*id, None);
        }
    }
    info!(cleared, "team assignments cleared");
    CommandOutcome::new(cleared, format!("Cleared {cleared} team assignment(s)."))
}

/// Resolves an online participant, or an offline one still in the
/// registry.
fn member_target(
    ctx: &SessionContext,
    sim: &dyn Simulation,
    name: &str,
) -> Result<(ParticipantId, String), SessionError> {
    if let Some(p) = sim.find(name) {
        return Ok((p.id, p.name));
    }
    ctx.teams()
        .memberships()
        .into_iter()
        .find(|(_, m)| m.name.eq_ignore_ascii_case(name))
        .map(|(id, m)| (id, m.name))
        .ok_or_else(|| SessionError::TargetNotFound(format!("no participant named '{name}'")))
}

/// `teamremove <participant>...`
pub fn remove(
    ctx: &SessionContext,
    sim: &mut dyn Simulation,
    args: &[String],
) -> Result<CommandOutcome, SessionError> {
    if args.is_empty() {
        return Err(usage("teamremove <participant>..."));
    }
    let view: &dyn Simulation = sim;
    let targets = args
        .iter()
        .map(|name| member_target(ctx, view, name))
        .collect::<Result<Vec<_>, _>>()?;

    let mut removed = 0;
    let mut replies = Vec::with_capacity(targets.len());
    for (id, name) in targets {
        match ctx.teams().remove(id) {
            Some(team) => {
                if sim.participant(id).is_some() {
                    sim.assign_scoreboard_team(id, None);
                    sim.deliver(Audience::Only(id), &announce::team_removed());
                }
                replies.push(format!("{name} was removed from the {} team.", team.display_name()));
                removed += 1;
            }
            None => replies.push(format!("{name} is not on a team.")),
        }
    }
    Ok(CommandOutcome::lines(removed, replies))
}

/// `teamcheck [participant]`: defaults to the caller.
pub fn check(
    ctx: &SessionContext,
    sim: &dyn Simulation,
    caller: &Caller,
    args: &[String],
) -> Result<CommandOutcome, SessionError> {
    let (id, name) = match (args, caller.id()) {
        ([name], _) => member_target(ctx, sim, name)?,
        ([], Some(id)) => {
            let me = sim
                .participant(id)
                .ok_or_else(|| SessionError::TargetNotFound("caller is not online".into()))?;
            (me.id, me.name)
        }
        _ => return Err(usage("teamcheck <participant>")),
    };
    Ok(match ctx.teams().team_of(id) {
        Some(team) => CommandOutcome::new(
            1,
            format!("{name} is on the {} team.", team.display_name()),
        ),
        None => CommandOutcome::noop(format!("{name} is not on a team.")),
    })
}

/// `teaminit`
pub fn init(sim: &mut dyn Simulation) -> CommandOutcome {
    for team in TeamColor::ALL {
        sim.ensure_scoreboard_team(team);
    }
    CommandOutcome::new(
        TeamColor::ALL.len(),
        format!("Initialized {} scoreboard teams.", TeamColor::ALL.len()),
    )
}

/// `showteams`: broadcasts the external add-on's teams.
pub fn show_provider(
    ctx: &SessionContext,
    sim: &mut dyn Simulation,
) -> Result<CommandOutcome, SessionError> {
    let provider = ctx
        .team_provider()
        .ok_or_else(|| SessionError::TargetNotFound("no external team provider is installed".into()))?;
    let teams = provider.teams();
    if teams.is_empty() {
        return Err(SessionError::TargetNotFound(format!(
            "{} reports no teams",
            provider.name()
        )));
    }
    sim.deliver(
        Audience::Everyone,
        &announce::provider_teams(provider.name(), &teams),
    );
    Ok(CommandOutcome::new(
        teams.len(),
        format!("Broadcast {} team(s) from {}.", teams.len(), provider.name()),
    ))
}
