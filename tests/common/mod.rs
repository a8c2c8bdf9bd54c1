//! Shared integration-test harness: an in-process session over the sandbox
//! world, and helpers for driving the `arbiter` binary over stdin.

#![allow(dead_code)]

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::sync::Arc;
use std::time::Duration;

use arbiter::commands::{Caller, CommandOutcome, Console};
use arbiter::config::SessionConfig;
use arbiter::error::SessionError;
use arbiter::host::{Audience, Notice, ParticipantId, Vec3};
use arbiter::observability::EventEmitter;
use arbiter::sandbox::{SandboxHost, SandboxWorld};
use arbiter::session::{Phase, SessionContext};
use tokio::runtime::Handle;

/// Where harness participants appear.
pub const SPAWN: Vec3 = Vec3::new(0.5, 64.0, 0.5);

/// A session wired to a sandbox world on the current tokio runtime.
pub struct Harness {
    pub world: SandboxWorld,
    pub host: SandboxHost,
    pub ctx: SessionContext,
}

impl Harness {
    /// Default configuration, events discarded.
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        Self::build(config, EventEmitter::noop())
    }

    /// Events written as JSONL to `path`.
    #[allow(clippy::missing_panics_doc)]
    pub fn with_events_file(config: SessionConfig, path: &Path) -> Self {
        Self::build(config, EventEmitter::from_file(path).expect("events file"))
    }

    fn build(config: SessionConfig, events: EventEmitter) -> Self {
        let world = SandboxWorld::new();
        let ctx = SessionContext::with_events(
            Arc::new(config),
            Handle::current(),
            world.probe(),
            Arc::new(events),
        );
        Self {
            host: world.host(),
            world,
            ctx,
        }
    }

    /// Connects a participant and runs the join hook.
    pub fn join(&mut self, name: &str, op: bool) -> ParticipantId {
        let id = self.world.join(name, SPAWN, op);
        self.ctx.on_participant_join(&mut self.host, id);
        id
    }

    /// Runs a command as the console.
    pub fn console(&mut self, line: &str) -> Result<CommandOutcome, SessionError> {
        Console::new(&self.ctx).execute(&mut self.host, &Caller::Console, line)
    }

    /// Runs a command as a participant.
    pub fn run_as(&mut self, id: ParticipantId, line: &str) -> Result<CommandOutcome, SessionError> {
        Console::new(&self.ctx).execute(&mut self.host, &Caller::Participant(id), line)
    }

    /// One host tick.
    pub fn tick(&mut self) -> usize {
        self.ctx.on_host_tick(&mut self.host)
    }

    pub fn phase(&self) -> Phase {
        self.ctx.controller().phase()
    }

    /// Advances paused time one second at a time, letting background
    /// engines run and draining the queue after each second.
    pub async fn advance_secs(&mut self, secs: u64) {
        for _ in 0..secs {
            step().await;
            self.tick();
        }
    }

    /// Like [`advance_secs`](Self::advance_secs) without draining, so
    /// deferred work piles up in the queue.
    pub async fn advance_undrained(&mut self, secs: u64) {
        for _ in 0..secs {
            step().await;
        }
    }

    /// Every delivery since the last call, rendered as text lines.
    pub fn deliveries(&self) -> Vec<(Audience, String)> {
        self.world
            .take_outbox()
            .into_iter()
            .flat_map(|(audience, notice)| {
                render(&notice)
                    .into_iter()
                    .map(move |line| (audience, line))
            })
            .collect()
    }

    /// Text of every delivery to everyone since the last call.
    pub fn broadcasts(&self) -> Vec<String> {
        self.deliveries()
            .into_iter()
            .filter(|(a, _)| *a == Audience::Everyone)
            .map(|(_, line)| line)
            .collect()
    }
}

async fn step() {
    tokio::time::advance(Duration::from_secs(1)).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

/// Chat lines followed by the title headline.
pub fn render(notice: &Notice) -> Vec<String> {
    let mut lines = notice.lines.clone();
    if let Some(title) = &notice.title {
        lines.push(format!("title: {}", title.headline));
    }
    lines
}

/// Runs the binary with `args`, feeding `script` on stdin, and waits.
#[allow(clippy::missing_panics_doc)]
pub fn run_script(args: &[&str], script: &str) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_arbiter"))
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn arbiter");
    child
        .stdin
        .take()
        .expect("stdin not captured")
        .write_all(script.as_bytes())
        .expect("failed to write script");
    child.wait_with_output().expect("failed to wait for arbiter")
}

/// Runs the binary with `args` and no input.
#[allow(clippy::missing_panics_doc)]
pub fn spawn_command(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_arbiter"))
        .args(args)
        .stdin(Stdio::null())
        .output()
        .expect("failed to run arbiter")
}

/// Stdout lines of a finished run.
pub fn stdout_lines(output: &Output) -> Vec<String> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_owned)
        .collect()
}
