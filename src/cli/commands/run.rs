//! `run`: hosts a session against the in-memory sandbox world.
//!
//! The simulation is ticked at `--tick-rate` Hz on this task; every drain
//! of deferred work happens here. Input lines are read from stdin and all
//! output goes to stdout, leaving stderr to diagnostics.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Handle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::cli::args::RunArgs;
use crate::cli::driver::{Driver, Input};
use crate::config::load_or_default;
use crate::error::ArbiterError;
use crate::observability::{Event, EventEmitter};
use crate::sandbox::SandboxWorld;
use crate::session::SessionContext;

/// Host a session until stdin closes or `cancel` fires.
///
/// # Errors
///
/// Returns a config error if the configuration cannot be loaded, or an
/// I/O error if the events file or metrics listener cannot be opened.
pub async fn run(args: &RunArgs, cancel: CancellationToken) -> Result<(), ArbiterError> {
    let loaded = load_or_default(args.config.as_deref())?;

    if let Some(port) = args.metrics_port {
        crate::observability::init_metrics(Some(port))?;
        tracing::info!(port, "Prometheus metrics endpoint started");
    }

    let events = Arc::new(match &args.events_file {
        Some(path) => EventEmitter::from_file(path)?,
        None => EventEmitter::noop(),
    });

    let world = SandboxWorld::new();
    let ctx = SessionContext::with_events(
        loaded.config,
        Handle::current(),
        world.probe(),
        Arc::clone(&events),
    );
    events.emit(Event::SessionStarted {
        timestamp: Utc::now(),
        tick_rate: args.tick_rate,
    });
    tracing::info!(tick_rate = args.tick_rate, "session hosted on sandbox world");

    let mut driver = Driver::new(&ctx, world);
    let mut ticker = tokio::time::interval(Duration::from_secs(1) / args.tick_rate.max(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let reason = loop {
        tokio::select! {
            () = cancel.cancelled() => break "interrupted",
            _ = ticker.tick() => print(&driver.tick())?,
            line = lines.next_line() => match line? {
                None => break "end of input",
                Some(line) => match Input::parse(&line) {
                    Ok(Input::Wait(span)) => {
                        if pause(&mut driver, &mut ticker, &cancel, span).await? {
                            break "interrupted";
                        }
                    }
                    Ok(input) => print(&driver.apply(input))?,
                    Err(e) => print(&[format!("error[{}] {e}", e.kind())])?,
                },
            },
        }
    };

    ctx.shutdown(reason).await;
    print(&driver.tick())?;
    Ok(())
}

/// Keeps ticking for `span` without reading input. Returns `true` when
/// cancelled first.
async fn pause(
    driver: &mut Driver<'_>,
    ticker: &mut Interval,
    cancel: &CancellationToken,
    span: Duration,
) -> Result<bool, ArbiterError> {
    let deadline = tokio::time::sleep(span);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            () = cancel.cancelled() => return Ok(true),
            () = &mut deadline => return Ok(false),
            _ = ticker.tick() => print(&driver.tick())?,
        }
    }
}

fn print(lines: &[String]) -> Result<(), ArbiterError> {
    if lines.is_empty() {
        return Ok(());
    }
    let mut out = std::io::stdout().lock();
    for line in lines {
        writeln!(out, "{line}")?;
    }
    out.flush()?;
    Ok(())
}
