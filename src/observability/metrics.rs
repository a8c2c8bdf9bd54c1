//! Metrics collection for `arbiter`.
//!
//! Prometheus-compatible metrics behind the `metrics` facade. Every
//! recording function is a no-op until [`init_metrics`] installs a recorder,
//! so library code records unconditionally.

use std::sync::atomic::{AtomicBool, Ordering};

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::ArbiterError;

/// Guard to prevent double-initialization of the metrics recorder.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Engine names that may appear as a label value.
const KNOWN_ENGINES: [&str; 4] = ["countdown", "spawn_selection", "objective", "feature"];

/// Buckets unknown engine names so ad hoc names cannot grow label
/// cardinality.
#[must_use]
pub fn sanitize_engine_label(engine: &str) -> &str {
    if KNOWN_ENGINES.contains(&engine) {
        engine
    } else {
        "__other__"
    }
}

/// Initializes the global metrics recorder.
///
/// When `port` is `Some`, a Prometheus HTTP listener is started on
/// `127.0.0.1:<port>`. When `None`, the recorder is installed without an
/// HTTP endpoint.
///
/// # Errors
///
/// Returns `ArbiterError::Io` if the recorder or HTTP listener cannot be
/// installed (e.g. port already in use).
pub fn init_metrics(port: Option<u16>) -> Result<(), ArbiterError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(());
    }
    port.map_or_else(
        || PrometheusBuilder::new().install_recorder().map(|_| ()),
        |p| {
            PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], p))
                .install()
        },
    )
    .map_err(|e| ArbiterError::Io(std::io::Error::other(e.to_string())))?;

    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    describe_counter!(
        "arbiter_phase_transitions_total",
        "Session phase transitions"
    );
    describe_counter!(
        "arbiter_milestones_total",
        "Countdown milestones reached"
    );
    describe_gauge!(
        "arbiter_countdown_remaining_seconds",
        "Seconds left on the running countdown"
    );
    describe_counter!(
        "arbiter_tick_failures_total",
        "Failed timer ticks and watcher polls"
    );
    describe_counter!(
        "arbiter_detections_total",
        "Watcher detections by outcome"
    );
    describe_counter!("arbiter_tasks_enqueued_total", "Deferred tasks enqueued");
    describe_counter!("arbiter_tasks_drained_total", "Deferred tasks executed");
    describe_gauge!(
        "arbiter_tasks_pending",
        "Deferred tasks left after the last drain"
    );
    describe_counter!(
        "arbiter_commands_total",
        "Operator verbs executed, by verb and result"
    );
    describe_counter!(
        "arbiter_commands_denied_total",
        "Commands vetoed by the permission gate"
    );
    describe_counter!(
        "arbiter_reconciled_total",
        "Out-of-band elevations removed by reconciliation"
    );
    describe_gauge!(
        "arbiter_participants_disabled",
        "Participants in the disabled registry"
    );
}

/// Records a session phase transition.
pub fn record_phase_transition(from: &str, to: &str) {
    counter!(
        "arbiter_phase_transitions_total",
        "from" => from.to_owned(),
        "to" => to.to_owned()
    )
    .increment(1);
}

/// Records an operator verb. `verb` comes from the fixed verb table.
pub fn record_command(verb: &'static str, result: &'static str) {
    counter!("arbiter_commands_total", "verb" => verb, "result" => result).increment(1);
}

/// Records a countdown milestone.
pub fn record_milestone(engine: &str) {
    counter!("arbiter_milestones_total", "engine" => sanitize_engine_label(engine).to_owned())
        .increment(1);
}

/// Sets the remaining-seconds gauge for a timer.
#[allow(clippy::cast_precision_loss)]
pub fn set_countdown_remaining(engine: &str, remaining: i64) {
    gauge!(
        "arbiter_countdown_remaining_seconds",
        "engine" => sanitize_engine_label(engine).to_owned()
    )
    .set(remaining as f64);
}

/// Records a failed tick or poll.
pub fn record_tick_failure(engine: &str) {
    counter!("arbiter_tick_failures_total", "engine" => sanitize_engine_label(engine).to_owned())
        .increment(1);
}

/// Records a watcher detection as admitted or suppressed.
pub fn record_detection(engine: &str, admitted: bool) {
    let outcome = if admitted { "admitted" } else { "suppressed" };
    counter!(
        "arbiter_detections_total",
        "engine" => sanitize_engine_label(engine).to_owned(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Records a deferred task entering the queue.
pub fn record_task_enqueued(label: &'static str) {
    counter!("arbiter_tasks_enqueued_total", "task" => label).increment(1);
}

/// Records one drain pass.
#[allow(clippy::cast_precision_loss)]
pub fn record_drain(ran: usize, left: usize) {
    counter!("arbiter_tasks_drained_total").increment(ran as u64);
    gauge!("arbiter_tasks_pending").set(left as f64);
}

/// Records a vetoed command.
pub fn record_command_denied() {
    counter!("arbiter_commands_denied_total").increment(1);
}

/// Records elevations removed by a reconciliation pass.
pub fn record_reconciled(corrected: usize) {
    counter!("arbiter_reconciled_total").increment(corrected as u64);
}

/// Sets the size of the disabled registry.
#[allow(clippy::cast_precision_loss)]
pub fn set_disabled(count: usize) {
    gauge!("arbiter_participants_disabled").set(count as f64);
}
