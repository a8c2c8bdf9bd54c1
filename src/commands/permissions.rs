//! Command-permission verbs.
//!
//! Revocation strips the elevated capability and records whether the
//! participant held it, so a restore never grants more than was taken.

use chrono::Utc;
use tracing::info;

use crate::announce;
use crate::commands::{Caller, CommandOutcome, usage};
use crate::error::SessionError;
use crate::host::{Audience, ParticipantId, Simulation};
use crate::observability::Event;
use crate::permission::DisabledEntry;
use crate::session::SessionContext;

/// `closecmds`: disables every other online participant.
pub fn close(ctx: &SessionContext, sim: &mut dyn Simulation, caller: &Caller) -> CommandOutcome {
    let others: Vec<_> = sim
        .online()
        .into_iter()
        .filter(|p| Some(p.id) != caller.id())
        .collect();
    if others.is_empty() {
        return CommandOutcome::noop("No other participants are online.");
    }

    let notice = announce::commands_revoked();
    let mut revoked = 0;
    for participant in &others {
        let id = participant.id;
        let elevated = sim.is_elevated(id);
        if ctx.gate().disable(id, &participant.name, elevated) {
            if elevated {
                sim.set_elevated(id, false);
            }
            sim.refresh_commands(id);
            sim.deliver(Audience::Only(id), &notice);
            revoked += 1;
        } else {
            ctx.gate().enforce(sim, id);
        }
    }

    if revoked == 0 {
        return CommandOutcome::noop("Every other online participant is already restricted.");
    }
    info!(revoked, total = ctx.gate().len(), "command permissions revoked");
    ctx.events().emit(Event::PermissionsRevoked {
        timestamp: Utc::now(),
        count: revoked,
    });
    CommandOutcome::new(
        revoked,
        format!("Revoked command permissions from {revoked} participant(s)."),
    )
}

fn reinstate(sim: &mut dyn Simulation, id: ParticipantId, entry: &DisabledEntry) {
    if entry.was_elevated {
        sim.set_elevated(id, true);
    }
    if sim.participant(id).is_some() {
        sim.refresh_commands(id);
        sim.deliver(Audience::Only(id), &announce::commands_restored());
    }
}

/// `restorecmds <participant>`: the participant may be offline.
pub fn restore(
    ctx: &SessionContext,
    sim: &mut dyn Simulation,
    caller: &Caller,
    args: &[String],
) -> Result<CommandOutcome, SessionError> {
    let [name] = args else {
        return Err(usage("restorecmds <participant>"));
    };
    let (id, shown_name) = match sim.find(name) {
        Some(p) => (p.id, p.name),
        None => ctx
            .gate()
            .find_by_name(name)
            .map(|(id, entry)| (id, entry.name))
            .ok_or_else(|| SessionError::TargetNotFound(format!("no participant named '{name}'")))?,
    };
    if Some(id) == caller.id() {
        return Err(SessionError::InvalidArgument(
            "you cannot restore your own command permissions".into(),
        ));
    }
    let entry = ctx.gate().restore(id).ok_or_else(|| {
        SessionError::InvalidArgument(format!("{shown_name} does not have disabled commands"))
    })?;
    reinstate(sim, id, &entry);

    info!(participant = %id, name = %shown_name, "command permissions restored");
    ctx.events().emit(Event::PermissionsRestored {
        timestamp: Utc::now(),
        count: 1,
    });
    Ok(CommandOutcome::new(
        1,
        format!("Restored command permissions for {shown_name}."),
    ))
}

/// `restoreallcmds`
pub fn restore_all(ctx: &SessionContext, sim: &mut dyn Simulation) -> CommandOutcome {
    let restored = ctx.gate().restore_all();
    if restored.is_empty() {
        return CommandOutcome::noop("No participants have disabled commands.");
    }
    for (id, entry) in &restored {
        reinstate(sim, *id, entry);
    }
    let count = restored.len();
    info!(count, "all command permissions restored");
    ctx.events().emit(Event::PermissionsRestored {
        timestamp: Utc::now(),
        count,
    });
    CommandOutcome::new(
        count,
        format!("Restored command permissions for {count} participant(s)."),
    )
}

/// `listdisabled`: online entries in full, offline entries up to the
/// configured limit.
pub fn list(ctx: &SessionContext, sim: &dyn Simulation) -> CommandOutcome {
    let entries = ctx.gate().entries();
    if entries.is_empty() {
        return CommandOutcome::noop("No participants have disabled commands.");
    }
    let (online, offline): (Vec<_>, Vec<_>) = entries
        .iter()
        .partition(|(id, _)| sim.participant(*id).is_some());

    let mut lines = vec![format!("Disabled participants ({}):", entries.len())];
    if !online.is_empty() {
        lines.push(format!("Online ({}):", online.len()));
        lines.extend(online.iter().map(|(_, e)| format!("  - {}", e.name)));
    }
    if !offline.is_empty() {
        let limit = ctx.config().permissions.offline_listing_limit;
        lines.push(format!("Offline ({}):", offline.len()));
        lines.extend(
            offline
                .iter()
                .take(limit)
                .map(|(id, e)| format!("  - {} ({})", e.name, id.short())),
        );
        if offline.len() > limit {
            lines.push(format!("  ... and {} more", offline.len() - limit));
        }
    }
    CommandOutcome::lines(entries.len(), lines)
}
