//! Watcher verbs: the dragon-kill win condition and end-portal discovery.

use tracing::warn;

use crate::announce;
use crate::commands::{Caller, CommandOutcome};
use crate::error::SessionError;
use crate::host::{Audience, Simulation};
use crate::session::SessionContext;
use crate::watcher::objective;

/// `endondragonkill`
pub fn start_objective(
    ctx: &SessionContext,
    sim: &mut dyn Simulation,
) -> Result<CommandOutcome, SessionError> {
    ctx.controller().start_objective_watch(sim)?;
    Ok(CommandOutcome::new(1, "Dragon kill monitoring started."))
}

/// `stopdragonmonitor`
pub fn stop_objective(
    ctx: &SessionContext,
    sim: &mut dyn Simulation,
) -> Result<CommandOutcome, SessionError> {
    ctx.controller().stop_objective_watch(sim)?;
    Ok(CommandOutcome::new(1, "Dragon kill monitoring stopped."))
}

/// `checkdragonstatus`
#[must_use]
pub fn objective_status(ctx: &SessionContext) -> CommandOutcome {
    let running = ctx.controller().status().objective_watch;
    let mut lines = vec![format!(
        "Dragon kill monitoring: {}",
        if running { "running" } else { "stopped" }
    )];
    match objective::detect_achievers(ctx.probe()) {
        Ok(found) if found.is_empty() => lines.push("Online dragon slayers: none".into()),
        Ok(found) => {
            let names: Vec<_> = found.iter().map(|p| p.name.as_str()).collect();
            lines.push(format!("Online dragon slayers: {}", names.join(", ")));
        }
        Err(e) => {
            warn!(error = %e, "objective status check failed");
            lines.push(format!("Online dragon slayers: unavailable ({e})"));
        }
    }
    lines.push(match ctx.objective().winner() {
        Some(w) => format!("Winner: {}", w.name),
        None => "Winner: none yet".into(),
    });
    CommandOutcome::lines(1, lines)
}

/// `endportalmonitor`
pub fn start_feature(
    ctx: &SessionContext,
    sim: &mut dyn Simulation,
) -> Result<CommandOutcome, SessionError> {
    ctx.controller().start_feature_watch(sim)?;
    Ok(CommandOutcome::new(1, "End portal monitoring started."))
}

/// `stopendportalmonitor`
pub fn stop_feature(
    ctx: &SessionContext,
    sim: &mut dyn Simulation,
) -> Result<CommandOutcome, SessionError> {
    ctx.controller().stop_feature_watch(sim)?;
    Ok(CommandOutcome::new(1, "End portal monitoring stopped."))
}

/// `listportals`
#[must_use]
pub fn list_features(ctx: &SessionContext) -> CommandOutcome {
    let records = ctx.features().list();
    if records.is_empty() {
        return CommandOutcome::noop("No end portals have been discovered.");
    }
    let mut lines = vec![format!("Discovered end portals ({}):", records.len())];
    for (index, record) in records.iter().enumerate() {
        let presence = match ctx.probe().feature_present(&record.dimension, record.frame) {
            Ok(true) => "present",
            Ok(false) => "gone",
            Err(_) => "unknown",
        };
        lines.push(format!(
            "{}. {} ({}) found by {} at {}, {} min ago [{presence}]",
            index + 1,
            record.frame,
            record.dimension.display_name(),
            record.discoverer,
            record.discoverer_position,
            record.age().as_secs() / 60,
        ));
    }
    CommandOutcome::lines(records.len(), lines)
}

/// `clearportals`
#[must_use]
pub fn clear_features(ctx: &SessionContext) -> CommandOutcome {
    match ctx.features().clear() {
        0 => CommandOutcome::noop("No portal records to clear."),
        n => CommandOutcome::new(n, format!("Cleared {n} portal record(s).")),
    }
}

/// `testportal`: announces a discovery at the caller's feet without
/// recording it.
pub fn test_feature(
    sim: &mut dyn Simulation,
    caller: &Caller,
) -> Result<CommandOutcome, SessionError> {
    let id = caller.id().ok_or_else(|| {
        SessionError::InvalidArgument("testportal must be run by a participant".into())
    })?;
    let me = sim
        .participant(id)
        .ok_or_else(|| SessionError::TargetNotFound("caller is not online".into()))?;
    let here = me.position.block();
    sim.deliver(
        Audience::Everyone,
        &announce::feature_discovered(&me.name, here, here, &me.dimension),
    );
    Ok(CommandOutcome::new(1, "Test portal announcement sent."))
}
