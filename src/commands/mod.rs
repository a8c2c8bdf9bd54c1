//! Operator command console.
//!
//! Parses a command line (`/start`, `competition countdown 600`,
//! `teamset red alice "bob smith"`) into a [`Verb`] and its arguments,
//! checks the caller's capability and dispatches to the handler. Every
//! handler runs on the simulation thread with mutable host access.
//!
//! A successful call returns a [`CommandOutcome`] whose `affected` count is
//! the number of entities changed, 0 for a no-op. Failures are
//! [`SessionError`]s raised before any state changes.

pub mod permissions;
pub mod phase;
pub mod teams;
pub mod watchers;

use std::fmt;
use std::str::FromStr;

use tracing::{debug, info};

use crate::error::SessionError;
use crate::host::{ParticipantId, Simulation};
use crate::observability::metrics;
use crate::session::SessionContext;

/// Optional namespace word accepted before a verb.
pub const NAMESPACE: &str = "competition";

/// Every operator verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// Preparation hold
    StartPrep,
    /// Spawn selection, then countdown
    Start,
    /// Abort preparation or countdown
    CancelStart,
    /// Return an ended session to idle
    Reset,
    /// Start the countdown
    Countdown,
    /// Stop the countdown
    StopCountdown,
    /// Report remaining time
    CheckCountdown,
    /// Revoke everyone else's commands
    CloseCmds,
    /// Restore one participant
    RestoreCmds,
    /// Restore everyone
    RestoreAllCmds,
    /// List the disabled registry
    ListDisabled,
    /// Assign participants to a team
    TeamSet,
    /// Show teams
    TeamList,
    /// Remove every assignment
    TeamClear,
    /// Remove participants from their team
    TeamRemove,
    /// Show one participant's team
    TeamCheck,
    /// Create the host scoreboard teams
    TeamInit,
    /// Broadcast the external add-on's teams
    ShowTeams,
    /// Start the win-condition watcher
    EndOnDragonKill,
    /// Stop the win-condition watcher
    StopDragonMonitor,
    /// Report win-condition progress
    CheckDragonStatus,
    /// Start the feature watcher
    EndPortalMonitor,
    /// Stop the feature watcher
    StopEndPortalMonitor,
    /// List feature records
    ListPortals,
    /// Forget feature records
    ClearPortals,
    /// Broadcast a sample discovery
    TestPortal,
}

impl Verb {
    /// Every verb, in help order.
    pub const ALL: [Self; 26] = [
        Self::StartPrep,
        Self::Start,
        Self::CancelStart,
        Self::Reset,
        Self::Countdown,
        Self::StopCountdown,
        Self::CheckCountdown,
        Self::CloseCmds,
        Self::RestoreCmds,
        Self::RestoreAllCmds,
        Self::ListDisabled,
        Self::TeamSet,
        Self::TeamList,
        Self::TeamClear,
        Self::TeamRemove,
        Self::TeamCheck,
        Self::TeamInit,
        Self::ShowTeams,
        Self::EndOnDragonKill,
        Self::StopDragonMonitor,
        Self::CheckDragonStatus,
        Self::EndPortalMonitor,
        Self::StopEndPortalMonitor,
        Self::ListPortals,
        Self::ClearPortals,
        Self::TestPortal,
    ];

    /// The word typed by the operator.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::StartPrep => "startprep",
            Self::Start => "start",
            Self::CancelStart => "cancelstart",
            Self::Reset => "reset",
            Self::Countdown => "countdown",
            Self::StopCountdown => "stopcountdown",
            Self::CheckCountdown => "checkcountdown",
            Self::CloseCmds => "closecmds",
            Self::RestoreCmds => "restorecmds",
            Self::RestoreAllCmds => "restoreallcmds",
            Self::ListDisabled => "listdisabled",
            Self::TeamSet => "teamset",
            Self::TeamList => "teamlist",
            Self::TeamClear => "teamclear",
            Self::TeamRemove => "teamremove",
            Self::TeamCheck => "teamcheck",
            Self::TeamInit => "teaminit",
            Self::ShowTeams => "showteams",
            Self::EndOnDragonKill => "endondragonkill",
            Self::StopDragonMonitor => "stopdragonmonitor",
            Self::CheckDragonStatus => "checkdragonstatus",
            Self::EndPortalMonitor => "endportalmonitor",
            Self::StopEndPortalMonitor => "stopendportalmonitor",
            Self::ListPortals => "listportals",
            Self::ClearPortals => "clearportals",
            Self::TestPortal => "testportal",
        }
    }

    /// Whether the caller must hold the elevated capability.
    #[must_use]
    pub const fn requires_elevation(self) -> bool {
        !matches!(self, Self::TeamCheck)
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Verb {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let word = s.trim().to_ascii_lowercase();
        if let Some(verb) = Self::ALL.into_iter().find(|v| v.name() == word) {
            return Ok(verb);
        }
        let nearest = Self::ALL
            .into_iter()
            .map(|v| (strsim::damerau_levenshtein(&word, v.name()), v))
            .filter(|(d, _)| *d <= 3)
            .min_by_key(|(d, _)| *d);
        Err(SessionError::InvalidArgument(match nearest {
            Some((_, v)) => format!("unknown command '{s}', did you mean '{v}'?"),
            None => format!("unknown command '{s}'"),
        }))
    }
}

/// Who issued a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    /// The host console; always elevated.
    Console,
    /// An online participant.
    Participant(ParticipantId),
}

impl Caller {
    /// The participant identity, `None` for the console.
    #[must_use]
    pub const fn id(&self) -> Option<ParticipantId> {
        match self {
            Self::Console => None,
            Self::Participant(id) => Some(*id),
        }
    }

    fn is_elevated(&self, sim: &dyn Simulation) -> bool {
        match self {
            Self::Console => true,
            Self::Participant(id) => sim.is_elevated(*id),
        }
    }
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Console => f.write_str("console"),
            Self::Participant(id) => write!(f, "{id}"),
        }
    }
}

/// Result of a successful verb.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Number of entities affected; 0 for a no-op
    pub affected: usize,
    /// Feedback lines for the caller
    pub replies: Vec<String>,
}

impl CommandOutcome {
    /// An outcome with one reply line.
    #[must_use]
    pub fn new(affected: usize, reply: impl Into<String>) -> Self {
        Self {
            affected,
            replies: vec![reply.into()],
        }
    }

    /// A no-op outcome.
    #[must_use]
    pub fn noop(reply: impl Into<String>) -> Self {
        Self::new(0, reply)
    }

    /// An outcome with several reply lines.
    #[must_use]
    pub const fn lines(affected: usize, replies: Vec<String>) -> Self {
        Self { affected, replies }
    }

    /// Whether the call changed nothing.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.affected == 0
    }
}

/// A parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// The verb
    pub verb: Verb,
    /// Remaining words, shell-unquoted
    pub args: Vec<String>,
}

/// Parses a command line. A leading `/` and the [`NAMESPACE`] word are
/// optional; arguments follow shell quoting rules.
///
/// # Errors
///
/// [`SessionError::InvalidArgument`] for an empty line, unbalanced quotes
/// or an unknown verb.
pub fn parse(line: &str) -> Result<Invocation, SessionError> {
    let line = line.trim();
    let line = line.strip_prefix('/').unwrap_or(line);
    let mut words = shlex::split(line)
        .ok_or_else(|| SessionError::InvalidArgument("unbalanced quotes".into()))?
        .into_iter();
    let mut first = words
        .next()
        .ok_or_else(|| SessionError::InvalidArgument("empty command".into()))?;
    if first.eq_ignore_ascii_case(NAMESPACE) {
        first = words.next().ok_or_else(|| {
            SessionError::InvalidArgument(format!("usage: {NAMESPACE} <command> [args...]"))
        })?;
    }
    Ok(Invocation {
        verb: first.parse()?,
        args: words.collect(),
    })
}

/// Dispatches operator verbs against a session.
#[derive(Debug, Clone, Copy)]
pub struct Console<'a> {
    ctx: &'a SessionContext,
}

impl<'a> Console<'a> {
    /// Creates a console over `ctx`.
    #[must_use]
    pub const fn new(ctx: &'a SessionContext) -> Self {
        Self { ctx }
    }

    /// Parses and runs one command line.
    ///
    /// # Errors
    ///
    /// Any [`SessionError`] from parsing, the capability check or the verb.
    pub fn execute(
        &self,
        sim: &mut dyn Simulation,
        caller: &Caller,
        line: &str,
    ) -> Result<CommandOutcome, SessionError> {
        let invocation = parse(line)?;
        self.run(sim, caller, &invocation)
    }

    /// Runs an already parsed invocation.
    ///
    /// # Errors
    ///
    /// [`SessionError::PermissionDenied`] when the caller lacks the elevated
    /// capability, or the verb's own error.
    pub fn run(
        &self,
        sim: &mut dyn Simulation,
        caller: &Caller,
        invocation: &Invocation,
    ) -> Result<CommandOutcome, SessionError> {
        let verb = invocation.verb;
        if verb.requires_elevation() && !caller.is_elevated(sim) {
            metrics::record_command(verb.name(), "denied");
            return Err(SessionError::PermissionDenied(format!(
                "'{verb}' requires operator permissions"
            )));
        }

        let result = self.dispatch(sim, caller, verb, &invocation.args);
        match &result {
            Ok(outcome) => {
                info!(%verb, %caller, affected = outcome.affected, "command executed");
                metrics::record_command(verb.name(), if outcome.is_noop() { "noop" } else { "ok" });
            }
            Err(e) => {
                debug!(%verb, %caller, error = %e, "command failed");
                metrics::record_command(verb.name(), e.kind());
            }
        }
        result
    }

    fn dispatch(
        &self,
        sim: &mut dyn Simulation,
        caller: &Caller,
        verb: Verb,
        args: &[String],
    ) -> Result<CommandOutcome, SessionError> {
        let ctx = self.ctx;
        match verb {
            Verb::StartPrep => phase::start_prep(ctx, sim, caller),
            Verb::Start => phase::start(ctx, sim, caller),
            Verb::CancelStart => phase::cancel_start(ctx, sim, caller),
            Verb::Reset => phase::reset(ctx),
            Verb::Countdown => phase::countdown(ctx, sim, args),
            Verb::StopCountdown => phase::stop_countdown(ctx, sim),
            Verb::CheckCountdown => Ok(phase::check_countdown(ctx)),
            Verb::CloseCmds => Ok(permissions::close(ctx, sim, caller)),
            Verb::RestoreCmds => permissions::restore(ctx, sim, caller, args),
            Verb::RestoreAllCmds => Ok(permissions::restore_all(ctx, sim)),
            Verb::ListDisabled => Ok(permissions::list(ctx, sim)),
            Verb::TeamSet => teams::set(ctx, sim, args),
            Verb::TeamList => Ok(teams::list(ctx, sim)),
            Verb::TeamClear => Ok(teams::clear(ctx, sim)),
            Verb::TeamRemove => teams::remove(ctx, sim, args),
            Verb::TeamCheck => teams::check(ctx, sim, caller, args),
            Verb::TeamInit => Ok(teams::init(sim)),
            Verb::ShowTeams => teams::show_provider(ctx, sim),
            Verb::EndOnDragonKill => watchers::start_objective(ctx, sim),
            Verb::StopDragonMonitor => watchers::stop_objective(ctx, sim),
            Verb::CheckDragonStatus => Ok(watchers::objective_status(ctx)),
            Verb::EndPortalMonitor => watchers::start_feature(ctx, sim),
            Verb::StopEndPortalMonitor => watchers::stop_feature(ctx, sim),
            Verb::ListPortals => Ok(watchers::list_features(ctx)),
            Verb::ClearPortals => Ok(watchers::clear_features(ctx)),
            Verb::TestPortal => watchers::test_feature(sim, caller),
        }
    }
}

fn usage(text: &str) -> SessionError {
    SessionError::InvalidArgument(format!("usage: {text}"))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::runtime::Handle;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::config::SessionConfig;
    use crate::host::Vec3;
    use crate::sandbox::SandboxWorld;

    #[test]
    fn every_verb_round_trips_through_its_name() {
        for verb in Verb::ALL {
            assert_eq!(verb.name().parse::<Verb>().unwrap(), verb);
        }
    }

    #[test]
    fn parse_accepts_slash_and_namespace() {
        let plain = parse("countdown 600").unwrap();
        let slashed = parse("/competition countdown 600").unwrap();
        assert_eq!(plain, slashed);
        assert_eq!(plain.verb, Verb::Countdown);
        assert_eq!(plain.args, vec!["600"]);
    }

    #[test]
    fn parse_unquotes_arguments() {
        let inv = parse(r#"teamset red alice "bob smith""#).unwrap();
        assert_eq!(inv.args, vec!["red", "alice", "bob smith"]);
    }

    #[test]
    fn parse_rejects_empty_and_bare_namespace() {
        assert!(matches!(parse("  "), Err(SessionError::InvalidArgument(_))));
        assert!(matches!(parse("/competition"), Err(SessionError::InvalidArgument(_))));
        assert!(matches!(parse(r#"teamset "red"#), Err(SessionError::InvalidArgument(_))));
    }

    #[test]
    fn unknown_verb_suggests_nearest() {
        let err = "stopcountdwn".parse::<Verb>().unwrap_err();
        assert!(err.to_string().contains("did you mean 'stopcountdown'"));
        let err = "xyzzyplugh".parse::<Verb>().unwrap_err();
        assert!(!err.to_string().contains("did you mean"));
    }

    #[test]
    fn only_teamcheck_skips_elevation() {
        let open: Vec<_> = Verb::ALL
            .into_iter()
            .filter(|v| !v.requires_elevation())
            .collect();
        assert_eq!(open, vec![Verb::TeamCheck]);
    }

    #[test]
    fn console_checks_elevation_before_dispatch() {
        tokio_test::block_on(async {
            let world = SandboxWorld::new();
            let ctx = SessionContext::new(
                Arc::new(SessionConfig::default()),
                Handle::current(),
                world.probe(),
            );
            let mut host = world.host();
            let op = world.join("op", Vec3::default(), true);
            let guest = world.join("guest", Vec3::default(), false);
            let console = Console::new(&ctx);

            assert_ok!(console.execute(&mut host, &Caller::Participant(op), "teaminit"));
            assert_ok!(console.execute(&mut host, &Caller::Console, "teamcheck op"));
            let err = assert_err!(console.execute(&mut host, &Caller::Participant(guest), "teaminit"));
            assert_eq!(err.kind(), "permission_denied");
            assert!(ctx.shutdown("test").await);
        });
    }
}
