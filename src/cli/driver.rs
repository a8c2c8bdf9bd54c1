//! Line protocol for hosting a session against the sandbox world.
//!
//! Each input line is either an operator command (`/countdown 600`), a
//! world event (`join alice op`, `objective alice`) or a pause
//! (`wait 5s`). Output is plain text, one line per reply or delivery.

use std::fmt::Write as _;
use std::time::Duration;

use crate::commands::{Caller, CommandOutcome, Console, NAMESPACE, Verb};
use crate::error::SessionError;
use crate::host::{Audience, BlockPos, Dimension, Notice, ParticipantId, Vec3};
use crate::sandbox::{SandboxHost, SandboxWorld};
use crate::session::SessionContext;

/// Where new participants appear.
pub const SPAWN_POINT: Vec3 = Vec3::new(0.5, 64.0, 0.5);

/// One parsed input line.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// Blank line or `#` comment
    Nothing,
    /// Operator command from the console
    Command(String),
    /// Connect a participant, optionally elevated
    Join {
        /// Display name
        name: String,
        /// Grant the elevated capability
        op: bool,
    },
    /// Disconnect a participant
    Leave(String),
    /// Move a participant
    Move {
        /// Display name
        name: String,
        /// Target position
        to: Vec3,
        /// Target dimension, unchanged when absent
        dimension: Option<Dimension>,
    },
    /// Mark the win objective satisfied
    Objective(String),
    /// Place a feature block
    Frame(Dimension, BlockPos),
    /// Remove a feature block
    Unframe(Dimension, BlockPos),
    /// Raw command typed by a participant
    As {
        /// Display name
        name: String,
        /// Command text
        raw: String,
    },
    /// Print the session status
    Status,
    /// Keep ticking without reading input
    Wait(Duration),
}

fn input_error(message: impl Into<String>) -> SessionError {
    SessionError::InvalidArgument(message.into())
}

fn number<T: std::str::FromStr>(word: &str) -> Result<T, SessionError> {
    word.parse()
        .map_err(|_| input_error(format!("'{word}' is not a number")))
}

fn block(words: &[String]) -> Result<(Dimension, BlockPos), SessionError> {
    let [dimension, x, y, z] = words else {
        return Err(input_error("expected <dimension> <x> <y> <z>"));
    };
    let dimension = dimension
        .parse::<Dimension>()
        .unwrap_or_else(|never| match never {});
    Ok((dimension, BlockPos::new(number(x)?, number(y)?, number(z)?)))
}

impl Input {
    /// Parses one input line.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidArgument`] for an unknown keyword or
    /// malformed arguments.
    pub fn parse(line: &str) -> Result<Self, SessionError> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(Self::Nothing);
        }
        if line.starts_with('/') {
            return Ok(Self::Command(line.to_owned()));
        }
        let words = shlex::split(line).ok_or_else(|| input_error("unbalanced quotes"))?;
        let Some((keyword, rest)) = words.split_first() else {
            return Ok(Self::Nothing);
        };
        match (keyword.as_str(), rest) {
            ("join", [name]) => Ok(Self::Join {
                name: name.clone(),
                op: false,
            }),
            ("join", [name, flag]) if flag == "op" => Ok(Self::Join {
                name: name.clone(),
                op: true,
            }),
            ("leave", [name]) => Ok(Self::Leave(name.clone())),
            ("move", [name, x, y, z, tail @ ..]) if tail.len() <= 1 => Ok(Self::Move {
                name: name.clone(),
                to: Vec3::new(number(x)?, number(y)?, number(z)?),
                dimension: tail
                    .first()
                    .map(|d| d.parse::<Dimension>().unwrap_or_else(|never| match never {})),
            }),
            ("objective", [name]) => Ok(Self::Objective(name.clone())),
            ("frame", rest) => block(rest).map(|(d, p)| Self::Frame(d, p)),
            ("unframe", rest) => block(rest).map(|(d, p)| Self::Unframe(d, p)),
            ("as", [name, _, ..]) => {
                let raw = line
                    .split_once(char::is_whitespace)
                    .map(|(_, tail)| tail.trim_start())
                    .and_then(|tail| tail.split_once(char::is_whitespace))
                    .map(|(_, raw)| raw.trim().to_owned())
                    .unwrap_or_default();
                Ok(Self::As {
                    name: name.clone(),
                    raw,
                })
            }
            ("status", []) => Ok(Self::Status),
            ("wait", [span]) => humantime::parse_duration(span)
                .map(Self::Wait)
                .map_err(|e| input_error(format!("bad duration '{span}': {e}"))),
            (NAMESPACE, _) => Ok(Self::Command(line.to_owned())),
            (other, _) => Err(input_error(format!("unrecognized input '{other}'"))),
        }
    }
}

/// Applies input lines to a session and renders what happened.
pub struct Driver<'a> {
    ctx: &'a SessionContext,
    world: SandboxWorld,
    host: SandboxHost,
}

impl<'a> Driver<'a> {
    /// Creates a driver for `ctx`, which must read `world` through its probe.
    #[must_use]
    pub fn new(ctx: &'a SessionContext, world: SandboxWorld) -> Self {
        let host = world.host();
        Self { ctx, world, host }
    }

    /// The world being driven.
    #[must_use]
    pub const fn world(&self) -> &SandboxWorld {
        &self.world
    }

    /// One simulation tick: drains deferred work and renders deliveries.
    pub fn tick(&mut self) -> Vec<String> {
        self.ctx.on_host_tick(&mut self.host);
        self.deliveries()
    }

    /// Applies one input and renders the replies and any deliveries it
    /// caused. [`Input::Wait`] is the caller's business and renders
    /// nothing here.
    pub fn apply(&mut self, input: Input) -> Vec<String> {
        let mut out = match self.apply_inner(input) {
            Ok(lines) => lines,
            Err(e) => vec![render_error(&e)],
        };
        out.extend(self.deliveries());
        out
    }

    fn resolve(&self, name: &str) -> Result<ParticipantId, SessionError> {
        self.world
            .id_of(name)
            .ok_or_else(|| SessionError::TargetNotFound(format!("no participant named '{name}'")))
    }

    fn apply_inner(&mut self, input: Input) -> Result<Vec<String>, SessionError> {
        match input {
            Input::Nothing | Input::Wait(_) => Ok(Vec::new()),
            Input::Command(line) => {
                let outcome = Console::new(self.ctx).execute(&mut self.host, &Caller::Console, &line);
                Ok(render_outcome(outcome))
            }
            Input::Join { name, op } => {
                let id = self.world.join(&name, SPAWN_POINT, op);
                self.ctx.on_participant_join(&mut self.host, id);
                Ok(vec![format!("* {name} joined")])
            }
            Input::Leave(name) => {
                let id = self.resolve(&name)?;
                self.world.leave(id);
                Ok(vec![format!("* {name} left")])
            }
            Input::Move {
                name,
                to,
                dimension,
            } => {
                let id = self.resolve(&name)?;
                let dimension = match dimension {
                    Some(d) => d,
                    None => self
                        .ctx
                        .probe()
                        .participants()
                        .ok()
                        .and_then(|all| all.into_iter().find(|p| p.id == id))
                        .map(|p| p.dimension)
                        .unwrap_or_default(),
                };
                self.world.move_to(id, to, dimension.clone());
                Ok(vec![format!("* {name} moved to {to} in {dimension}")])
            }
            Input::Objective(name) => {
                let id = self.resolve(&name)?;
                self.world.complete_objective(id);
                Ok(vec![format!("* {name} completed the objective")])
            }
            Input::Frame(dimension, pos) => {
                self.world.place_feature(dimension.clone(), pos);
                Ok(vec![format!("* frame placed at {pos} in {dimension}")])
            }
            Input::Unframe(dimension, pos) => {
                let existed = self.world.remove_feature(&dimension, pos);
                Ok(vec![if existed {
                    format!("* frame removed at {pos} in {dimension}")
                } else {
                    format!("* no frame at {pos} in {dimension}")
                }])
            }
            Input::As { name, raw } => {
                let id = self.resolve(&name)?;
                Ok(self.participant_command(id, &raw))
            }
            Input::Status => {
                let status = self.ctx.controller().status();
                let mut line = format!("status phase={} epoch={}", status.phase, status.epoch);
                if let Some((timer, remaining)) = status.timer {
                    let _ = write!(line, " {timer}={remaining}s");
                }
                if let Some(outcome) = status.outcome {
                    let _ = write!(line, " outcome=\"{outcome}\"");
                }
                Ok(vec![line])
            }
        }
    }

    /// Runs a participant's raw command through the interceptor chain,
    /// then the console when it names a competition verb.
    fn participant_command(&mut self, id: ParticipantId, raw: &str) -> Vec<String> {
        let raw = raw.strip_prefix('/').unwrap_or(raw);
        if let crate::host::Verdict::Deny(message) = self.ctx.intercept(id, raw) {
            return vec![format!("denied: {message}")];
        }
        let first = raw.split_whitespace().next().unwrap_or_default();
        let is_verb = first.eq_ignore_ascii_case(NAMESPACE) || first.parse::<Verb>().is_ok();
        if !is_verb {
            return vec![format!("forwarded: {raw}")];
        }
        let outcome =
            Console::new(self.ctx).execute(&mut self.host, &Caller::Participant(id), raw);
        render_outcome(outcome)
    }

    fn audience(&self, audience: Audience) -> String {
        let name = |id| self.world.name_of(id).unwrap_or_else(|| "?".into());
        match audience {
            Audience::Everyone => "all".into(),
            Audience::Only(id) => format!("@{}", name(id)),
            Audience::AllExcept(id) => format!("all-but-{}", name(id)),
        }
    }

    fn deliveries(&self) -> Vec<String> {
        self.world
            .take_outbox()
            .into_iter()
            .flat_map(|(audience, notice)| render_notice(&self.audience(audience), &notice))
            .collect()
    }
}

impl std::fmt::Debug for Driver<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver").field("ctx", self.ctx).finish_non_exhaustive()
    }
}

/// Removes `§x` formatting codes.
#[must_use]
pub fn plain(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '§' {
            chars.next();
        } else {
            out.push(c);
        }
    }
    out
}

fn render_notice(to: &str, notice: &Notice) -> Vec<String> {
    let mut lines: Vec<_> = notice
        .lines
        .iter()
        .map(|line| format!("[{to}] {}", plain(line)))
        .collect();
    if let Some(title) = &notice.title {
        let subtitle = title
            .subtitle
            .as_deref()
            .map(|s| format!(" / {s}"))
            .unwrap_or_default();
        lines.push(format!("[{to}] title: {}{subtitle}", title.headline));
    }
    lines
}

fn render_error(e: &SessionError) -> String {
    format!("error[{}] {e}", e.kind())
}

fn render_outcome(outcome: Result<CommandOutcome, SessionError>) -> Vec<String> {
    match outcome {
        Ok(outcome) => {
            let mut lines: Vec<_> = outcome.replies.iter().map(|r| format!("> {r}")).collect();
            lines.push(format!("ok {}", outcome.affected));
            lines
        }
        Err(e) => vec![render_error(&e)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use std::sync::Arc;
    use tokio::runtime::Handle;

    #[test]
    fn parses_world_events() {
        assert_eq!(
            Input::parse("join alice op").unwrap(),
            Input::Join {
                name: "alice".into(),
                op: true
            }
        );
        assert_eq!(
            Input::parse("frame the_end 1 2 3").unwrap(),
            Input::Frame(Dimension::End, BlockPos::new(1, 2, 3))
        );
        assert_eq!(
            Input::parse("wait 2s").unwrap(),
            Input::Wait(Duration::from_secs(2))
        );
        assert_eq!(Input::parse("  # note").unwrap(), Input::Nothing);
    }

    #[test]
    fn parses_commands_and_participant_lines() {
        assert_eq!(
            Input::parse("/countdown 60").unwrap(),
            Input::Command("/countdown 60".into())
        );
        assert_eq!(
            Input::parse("competition start").unwrap(),
            Input::Command("competition start".into())
        );
        assert_eq!(
            Input::parse("as bob /give @s diamond 64").unwrap(),
            Input::As {
                name: "bob".into(),
                raw: "/give @s diamond 64".into()
            }
        );
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(Input::parse("teleport alice").is_err());
        assert!(Input::parse("move alice 1 two 3").is_err());
        assert!(Input::parse("wait soon").is_err());
    }

    #[test]
    fn strips_formatting_codes() {
        assert_eq!(plain("§cYou joined §lRed"), "You joined Red");
    }

    #[tokio::test]
    async fn console_command_renders_reply_and_delivery() {
        let world = SandboxWorld::new();
        let ctx = SessionContext::new(Arc::new(SessionConfig::default()), Handle::current(), world.probe());
        let mut driver = Driver::new(&ctx, world);
        driver.apply(Input::parse("join alice").unwrap());

        let out = driver.apply(Input::parse("/teamset red alice").unwrap());
        assert!(out.contains(&"> alice joined the Red team.".to_owned()));
        assert!(out.contains(&"ok 1".to_owned()));
        assert!(out.contains(&"[@alice] You have been assigned to the Red team!".to_owned()));
    }

    #[tokio::test]
    async fn participant_commands_pass_through_the_gate() {
        let world = SandboxWorld::new();
        let ctx = SessionContext::new(Arc::new(SessionConfig::default()), Handle::current(), world.probe());
        let mut driver = Driver::new(&ctx, world);
        driver.apply(Input::parse("join ref op").unwrap());
        driver.apply(Input::parse("join bob op").unwrap());
        driver.apply(Input::parse("as ref /closecmds").unwrap());

        let denied = driver.apply(Input::parse("as bob /gamemode creative").unwrap());
        assert_eq!(denied[0], "denied: Your command permissions have been revoked by an administrator.");
        let chat = driver.apply(Input::parse("as bob /msg ref hi").unwrap());
        assert_eq!(chat, vec!["forwarded: msg ref hi"]);
        let blocked = driver.apply(Input::parse("as bob /teamcheck").unwrap());
        assert!(blocked[0].starts_with("denied:"));

        driver.apply(Input::parse("join carol").unwrap());
        let check = driver.apply(Input::parse("as carol /teamcheck").unwrap());
        assert_eq!(check, vec!["> carol is not on a team.", "ok 0"]);
        let start = driver.apply(Input::parse("as carol /start").unwrap());
        assert_eq!(
            start,
            vec!["error[permission_denied] permission denied: 'start' requires operator permissions"]
        );
    }
}
