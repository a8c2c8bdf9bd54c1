//! Configuration validation.
//!
//! Runs on the deserialized [`SessionConfig`] and collects every issue
//! instead of stopping at the first one.

use std::collections::HashSet;
use std::time::Duration;

use crate::config::schema::SessionConfig;
use crate::error::{Severity, ValidationIssue};
use crate::timer::MAX_COUNTDOWN_SECS;

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Issues that prevent loading
    pub errors: Vec<ValidationIssue>,

    /// Informational issues
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Returns `true` if there are any errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns `true` if validation passed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Semantic validator for [`SessionConfig`].
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Validator {
    /// Creates a new validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a configuration.
    pub fn validate(&mut self, config: &SessionConfig) -> ValidationResult {
        self.errors.clear();
        self.warnings.clear();

        self.validate_preparation(config);
        self.validate_countdown(config);
        self.validate_watchers(config);
        self.validate_permissions(config);

        ValidationResult {
            errors: std::mem::take(&mut self.errors),
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    // ========================================================================
    // Sections
    // ========================================================================

    fn validate_preparation(&mut self, config: &SessionConfig) {
        let prep = &config.preparation;
        let secs = prep.seconds();
        if !(1..=MAX_COUNTDOWN_SECS).contains(&secs) {
            self.add_error(
                "preparation.duration",
                &format!("must be between 1s and {MAX_COUNTDOWN_SECS}s, got {secs}s"),
            );
        }
        self.validate_milestones(&prep.milestones, "preparation.milestones", secs);
        self.require_nonzero(prep.hold_effects, "preparation.hold_effects");
    }

    fn validate_countdown(&mut self, config: &SessionConfig) {
        let countdown = &config.countdown;
        let secs = countdown.default_seconds();
        if !(1..=MAX_COUNTDOWN_SECS).contains(&secs) {
            self.add_error(
                "countdown.default",
                &format!("must be between 1s and {MAX_COUNTDOWN_SECS}s, got {secs}s"),
            );
        }
        self.validate_milestones(&countdown.milestones, "countdown.milestones", secs);
        if !countdown.reminder_every.is_zero() && countdown.reminder_every < Duration::from_secs(1) {
            self.add_error(
                "countdown.reminder_every",
                "must be zero (disabled) or at least one second",
            );
        }
    }

    fn validate_watchers(&mut self, config: &SessionConfig) {
        self.require_nonzero(config.objective_watch.poll, "objective_watch.poll");

        let feature = &config.feature_watch;
        self.require_nonzero(feature.poll, "feature_watch.poll");
        self.require_nonzero(feature.sweep, "feature_watch.sweep");
        self.require_nonzero(feature.ttl, "feature_watch.ttl");
        if feature.min_distance.is_nan() || feature.min_distance < 0.0 {
            self.add_error("feature_watch.min_distance", "must be zero or positive");
        }
        if feature.scan_radius < 1 {
            self.add_error("feature_watch.scan_radius", "must be at least 1");
        }
        if feature.scan_height < 1 {
            self.add_error("feature_watch.scan_height", "must be at least 1");
        }
        if feature.ttl < feature.sweep {
            self.add_warning(
                "feature_watch.ttl",
                "shorter than the sweep interval; records may outlive their ttl",
            );
        }
    }

    fn validate_permissions(&mut self, config: &SessionConfig) {
        if config.permissions.reconcile_every_ticks < 1 {
            self.add_error("permissions.reconcile_every_ticks", "must be at least 1");
        }
    }

    fn validate_milestones(&mut self, marks: &[i64], base_path: &str, total: i64) {
        let mut seen = HashSet::new();
        for (i, mark) in marks.iter().enumerate() {
            let path = format!("{base_path}[{i}]");
            if !(1..=MAX_COUNTDOWN_SECS).contains(mark) {
                self.add_error(
                    &path,
                    &format!("must be between 1 and {MAX_COUNTDOWN_SECS}, got {mark}"),
                );
            } else if *mark >= total {
                self.add_warning(&path, "not below the duration; it will never fire");
            }
            if !seen.insert(*mark) {
                self.add_warning(&path, &format!("duplicate milestone {mark}"));
            }
        }
    }

    fn require_nonzero(&mut self, value: Duration, path: &str) {
        if value.is_zero() {
            self.add_error(path, "must be greater than zero");
        }
    }

    // ========================================================================
    // Helper Methods
    // ========================================================================

    fn add_error(&mut self, path: &str, message: &str) {
        self.errors.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Error,
        });
    }

    fn add_warning(&mut self, path: &str, message: &str) {
        self.warnings.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Warning,
        });
    }
}
