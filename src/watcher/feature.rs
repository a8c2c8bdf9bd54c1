//! Spatial feature watcher.
//!
//! Scans a box around every online participant for feature blocks. Each
//! sighting goes through [`FeatureRecords`] de-duplication; only admitted
//! records reach the callback. Expired records are swept on a separate
//! cadence.

use std::sync::Arc;

use tokio::runtime::Handle;

use crate::config::FeatureWatchConfig;
use crate::error::EngineError;
use crate::host::WorldProbe;
use crate::observability::metrics;
use crate::watcher::{FeatureRecord, FeatureRecords, FeatureSighting, PollControl, Sweep, WatcherEngine};

/// Engine name used in logs and metrics.
pub const NAME: &str = "feature";

/// Every feature block within the scan box of an online participant.
///
/// # Errors
///
/// Returns [`EngineError::WatcherTickFailure`] when the world cannot be read.
pub fn scan(
    probe: &dyn WorldProbe,
    radius: i32,
    height: i32,
) -> Result<Vec<FeatureSighting>, EngineError> {
    let failure = |e: EngineError| EngineError::WatcherTickFailure {
        watcher: NAME.to_owned(),
        message: e.to_string(),
    };
    let mut sightings = Vec::new();
    for participant in probe.participants().map_err(failure)? {
        let standing = participant.position.block();
        let frames = probe
            .features_near(&participant.dimension, standing, radius, height)
            .map_err(failure)?;
        sightings.extend(frames.into_iter().map(|frame| FeatureSighting {
            dimension: participant.dimension.clone(),
            frame,
            discoverer: participant.name.clone(),
            discoverer_position: standing,
        }));
    }
    Ok(sightings)
}

/// Starts the feature watcher.
///
/// `on_admit` runs on the watcher task for every admitted record; it must
/// only enqueue work.
pub fn start<F>(
    runtime: &Handle,
    config: &FeatureWatchConfig,
    probe: Arc<dyn WorldProbe>,
    records: Arc<FeatureRecords>,
    mut on_admit: F,
) -> WatcherEngine
where
    F: FnMut(FeatureRecord) + Send + 'static,
{
    let (radius, height) = (config.scan_radius, config.scan_height);
    let sweeper = Arc::clone(&records);
    WatcherEngine::start(
        runtime,
        NAME,
        config.poll,
        move || scan(probe.as_ref(), radius, height),
        move |sighting| {
            match records.admit(sighting) {
                Some(record) => {
                    metrics::record_detection(NAME, true);
                    on_admit(record);
                }
                None => metrics::record_detection(NAME, false),
            }
            PollControl::Continue
        },
        Some(Sweep {
            delay: config.sweep_delay,
            every: config.sweep,
            purge: Box::new(move || sweeper.purge_expired()),
        }),
    )
}
