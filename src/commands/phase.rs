//! Session lifecycle verbs: preparation, start, cancel, countdown.

use crate::commands::{Caller, CommandOutcome, usage};
use crate::error::SessionError;
use crate::host::Simulation;
use crate::session::SessionContext;
use crate::timer::{format_duration, format_exact};

/// `startprep`
pub fn start_prep(
    ctx: &SessionContext,
    sim: &mut dyn Simulation,
    caller: &Caller,
) -> Result<CommandOutcome, SessionError> {
    let held = ctx.controller().start_preparation(sim, caller.id())?;
    if held == 0 {
        return Ok(CommandOutcome::noop(
            "No other participants are online; nothing to prepare.",
        ));
    }
    Ok(CommandOutcome::new(
        held,
        format!("Preparation phase started for {held} participant(s)."),
    ))
}

/// `start`
pub fn start(
    ctx: &SessionContext,
    sim: &mut dyn Simulation,
    caller: &Caller,
) -> Result<CommandOutcome, SessionError> {
    let affected = ctx.controller().start(sim, caller.id())?;
    Ok(CommandOutcome::new(
        affected,
        format!(
            "Start sequence begun: spawn selection ends in {}.",
            format_duration(ctx.config().preparation.seconds())
        ),
    ))
}

/// `cancelstart`
pub fn cancel_start(
    ctx: &SessionContext,
    sim: &mut dyn Simulation,
    caller: &Caller,
) -> Result<CommandOutcome, SessionError> {
    let reset = ctx.controller().cancel(sim, caller.id())?;
    Ok(CommandOutcome::new(
        reset,
        format!("Start sequence cancelled; {reset} participant(s) reset to spectator."),
    ))
}

/// `reset`
pub fn reset(ctx: &SessionContext) -> Result<CommandOutcome, SessionError> {
    if ctx.controller().reset()? {
        Ok(CommandOutcome::new(1, "Session reset to idle."))
    } else {
        Ok(CommandOutcome::noop("Session is already idle."))
    }
}

/// `countdown [seconds]`
pub fn countdown(
    ctx: &SessionContext,
    sim: &mut dyn Simulation,
    args: &[String],
) -> Result<CommandOutcome, SessionError> {
    let seconds = match args {
        [] => None,
        [raw] => Some(raw.parse::<i64>().map_err(|_| {
            SessionError::InvalidArgument(format!("'{raw}' is not a whole number of seconds"))
        })?),
        _ => return Err(usage("countdown [seconds]")),
    };
    let total = ctx.controller().start_countdown(sim, seconds)?;
    Ok(CommandOutcome::new(
        1,
        format!("Countdown started: {}.", format_duration(total)),
    ))
}

/// `stopcountdown`
pub fn stop_countdown(
    ctx: &SessionContext,
    sim: &mut dyn Simulation,
) -> Result<CommandOutcome, SessionError> {
    ctx.controller().stop_countdown(sim)?;
    Ok(CommandOutcome::new(1, "Countdown stopped."))
}

/// `checkcountdown`
#[must_use]
pub fn check_countdown(ctx: &SessionContext) -> CommandOutcome {
    match ctx.controller().remaining() {
        None => CommandOutcome::noop("No countdown is running."),
        Some(remaining) => CommandOutcome::lines(
            1,
            vec![
                format!("Time remaining: {}", format_duration(remaining)),
                format!("Exact: {}", format_exact(remaining)),
            ],
        ),
    }
}
