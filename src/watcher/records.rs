//! De-duplication records for spatial feature detections.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;

use crate::host::{BlockPos, Dimension};

/// A raw feature detection, before de-duplication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSighting {
    /// Dimension of the feature
    pub dimension: Dimension,
    /// Block position of the feature
    pub frame: BlockPos,
    /// Name of the participant who found it
    pub discoverer: String,
    /// Where the discoverer stood
    pub discoverer_position: BlockPos,
}

/// An admitted detection.
#[derive(Debug, Clone)]
pub struct FeatureRecord {
    /// Fingerprint: `dimension:x:y:z`
    pub key: String,
    /// Dimension of the feature
    pub dimension: Dimension,
    /// Block position of the feature
    pub frame: BlockPos,
    /// Name of the participant who found it
    pub discoverer: String,
    /// Where the discoverer stood
    pub discoverer_position: BlockPos,
    /// Monotonic admission time, drives expiry
    pub first_seen: Instant,
    /// Wall-clock admission time, for reports
    pub discovered_at: DateTime<Utc>,
}

impl FeatureRecord {
    /// Age of the record.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.first_seen.elapsed()
    }
}

/// Builds the fingerprint for a feature position.
#[must_use]
pub fn feature_key(dimension: &Dimension, pos: BlockPos) -> String {
    format!("{}:{}:{}:{}", dimension.key(), pos.x, pos.y, pos.z)
}

/// Concurrent store of admitted detections with TTL expiry.
#[derive(Debug)]
pub struct FeatureRecords {
    records: DashMap<String, FeatureRecord>,
    admitting: Mutex<()>,
    min_distance: f64,
    ttl: Duration,
}

impl FeatureRecords {
    /// Creates an empty store.
    ///
    /// Sightings closer than `min_distance` to an unexpired record in the
    /// same dimension count as the same feature; records expire after `ttl`.
    #[must_use]
    pub fn new(min_distance: f64, ttl: Duration) -> Self {
        Self {
            records: DashMap::new(),
            admitting: Mutex::new(()),
            min_distance,
            ttl,
        }
    }

    /// Configured time-to-live.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_live(&self, record: &FeatureRecord) -> bool {
        record.age() < self.ttl
    }

    /// Whether an unexpired record lies within the minimum distance.
    #[must_use]
    pub fn is_duplicate(&self, dimension: &Dimension, pos: BlockPos) -> bool {
        self.records.iter().any(|r| {
            r.dimension == *dimension
                && self.is_live(&r)
                && r.frame.distance(&pos) < self.min_distance
        })
    }

    /// Records a sighting unless it re-detects a known feature.
    ///
    /// Returns the new record when the sighting is admitted. Admissions are
    /// serialized so the proximity scan and the insert act as one step.
    pub fn admit(&self, sighting: FeatureSighting) -> Option<FeatureRecord> {
        let _admitting = self.admitting.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_duplicate(&sighting.dimension, sighting.frame) {
            return None;
        }
        let key = feature_key(&sighting.dimension, sighting.frame);
        let record = FeatureRecord {
            key: key.clone(),
            dimension: sighting.dimension,
            frame: sighting.frame,
            discoverer: sighting.discoverer,
            discoverer_position: sighting.discoverer_position,
            first_seen: Instant::now(),
            discovered_at: Utc::now(),
        };
        match self.records.entry(key) {
            Entry::Occupied(mut slot) => {
                if self.is_live(slot.get()) {
                    return None;
                }
                slot.insert(record.clone());
            }
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
            }
        }
        Some(record)
    }

    /// Removes records older than the TTL; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.records.len();
        self.records.retain(|_, r| r.age() < self.ttl);
        before.saturating_sub(self.records.len())
    }

    /// All records, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<FeatureRecord> {
        let mut all: Vec<_> = self.records.iter().map(|r| r.value().clone()).collect();
        all.sort_by_key(|r| r.first_seen);
        all
    }

    /// Removes every record; returns how many were removed.
    pub fn clear(&self) -> usize {
        let removed = self.records.len();
        self.records.clear();
        removed
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no record is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
