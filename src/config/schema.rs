//! Session configuration schema.
//!
//! Every field has a default, so an empty document (or no file at all)
//! yields the stock competition settings. Durations are written as human
//! strings such as `"60s"` or `"3h 30m"`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::host::Vec3;
use crate::timer::{DEFAULT_COUNTDOWN_SECS, DEFAULT_MILESTONES, Milestones};

// ============================================================================
// Root
// ============================================================================

/// Root configuration for one coordinator process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Where held participants wait during preparation
    pub holding_area: Vec3,

    /// Preparation hold and spawn selection
    pub preparation: PreparationConfig,

    /// Competition countdown
    pub countdown: CountdownConfig,

    /// Win-condition watcher
    pub objective_watch: ObjectiveWatchConfig,

    /// Spatial feature watcher
    pub feature_watch: FeatureWatchConfig,

    /// Permission gate
    pub permissions: PermissionConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            holding_area: Vec3::new(0.0, 100.0, 0.0),
            preparation: PreparationConfig::default(),
            countdown: CountdownConfig::default(),
            objective_watch: ObjectiveWatchConfig::default(),
            feature_watch: FeatureWatchConfig::default(),
            permissions: PermissionConfig::default(),
        }
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Preparation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreparationConfig {
    /// Length of spawn selection
    #[serde(with = "human_duration")]
    pub duration: Duration,

    /// Spawn-selection cues, in seconds remaining
    pub milestones: Vec<i64>,

    /// How long the hold effects last
    #[serde(with = "human_duration")]
    pub hold_effects: Duration,
}

impl Default for PreparationConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(60),
            milestones: vec![30, 10, 5, 4, 3, 2, 1],
            hold_effects: Duration::from_secs(3600),
        }
    }
}

impl PreparationConfig {
    /// Spawn-selection length in whole seconds.
    #[must_use]
    pub fn seconds(&self) -> i64 {
        duration_secs(self.duration)
    }

    /// Spawn-selection milestones.
    #[must_use]
    pub fn milestone_set(&self) -> Milestones {
        Milestones::new(self.milestones.iter().copied())
    }
}

/// Countdown settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CountdownConfig {
    /// Length used when `countdown` is given no argument
    #[serde(with = "human_duration")]
    pub default: Duration,

    /// Broadcast milestones, in seconds remaining
    pub milestones: Vec<i64>,

    /// Interval of the "time remaining" reminder; zero disables it
    #[serde(with = "human_duration")]
    pub reminder_every: Duration,
}

impl Default for CountdownConfig {
    fn default() -> Self {
        Self {
            default: Duration::from_secs(DEFAULT_COUNTDOWN_SECS.unsigned_abs()),
            milestones: DEFAULT_MILESTONES.to_vec(),
            reminder_every: Duration::from_secs(1800),
        }
    }
}

impl CountdownConfig {
    /// Default length in whole seconds.
    #[must_use]
    pub fn default_seconds(&self) -> i64 {
        duration_secs(self.default)
    }

    /// Milestones with the configured reminder.
    #[must_use]
    pub fn milestone_set(&self) -> Milestones {
        Milestones::new(self.milestones.iter().copied())
            .with_reminder(duration_secs(self.reminder_every))
    }
}

/// Win-condition watcher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ObjectiveWatchConfig {
    /// Poll interval
    #[serde(with = "human_duration")]
    pub poll: Duration,
}

impl Default for ObjectiveWatchConfig {
    fn default() -> Self {
        Self {
            poll: Duration::from_secs(1),
        }
    }
}

/// Spatial feature watcher settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeatureWatchConfig {
    /// Scan interval
    #[serde(with = "human_duration")]
    pub poll: Duration,

    /// Interval between expiry sweeps
    #[serde(with = "human_duration")]
    pub sweep: Duration,

    /// Delay before the first sweep
    #[serde(with = "human_duration")]
    pub sweep_delay: Duration,

    /// Age after which a record expires
    #[serde(with = "human_duration")]
    pub ttl: Duration,

    /// Sightings closer than this to a live record are re-detections
    pub min_distance: f64,

    /// Horizontal scan radius around each participant, in blocks
    pub scan_radius: i32,

    /// Vertical scan half-height around each participant, in blocks
    pub scan_height: i32,
}

impl Default for FeatureWatchConfig {
    fn default() -> Self {
        Self {
            poll: Duration::from_secs(1),
            sweep: Duration::from_secs(60),
            sweep_delay: Duration::from_secs(5),
            ttl: Duration::from_secs(30 * 60),
            min_distance: 10.0,
            scan_radius: 10,
            scan_height: 5,
        }
    }
}

/// Permission gate settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PermissionConfig {
    /// Host ticks between reconciliation passes
    pub reconcile_every_ticks: u64,

    /// Offline entries shown by `listdisabled`
    pub offline_listing_limit: usize,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            reconcile_every_ticks: 100,
            offline_listing_limit: 5,
        }
    }
}

fn duration_secs(d: Duration) -> i64 {
    i64::try_from(d.as_secs()).unwrap_or(i64::MAX)
}

// ============================================================================
// Human-readable durations
// ============================================================================

mod human_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        humantime::parse_duration(raw.trim())
            .map_err(|e| D::Error::custom(format!("invalid duration '{raw}': {e}")))
    }
}
