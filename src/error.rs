//! Error types for `arbiter`
//!
//! This module provides the error hierarchy used across the session
//! coordinator: operator-facing session errors, background engine errors,
//! configuration errors, and the process exit codes they map onto.

use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for `arbiter` CLI operations.
///
/// These codes follow Unix conventions.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// General error
    pub const ERROR: i32 = 1;

    /// Configuration error (invalid YAML, validation failure)
    pub const CONFIG_ERROR: i32 = 2;

    /// I/O error (file not found, permission denied)
    pub const IO_ERROR: i32 = 3;

    /// Background engine error (queue closed, tick failure)
    pub const ENGINE_ERROR: i32 = 4;

    /// Session error (phase precondition violated, bad argument)
    pub const SESSION_ERROR: i32 = 5;

    /// Usage error (invalid arguments, missing required options)
    pub const USAGE_ERROR: i32 = 64;

    /// Interrupted by SIGINT (Ctrl+C)
    pub const INTERRUPTED: i32 = 130;

    /// Terminated by SIGTERM
    pub const TERMINATED: i32 = 143;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for `arbiter` operations.
///
/// Aggregates all domain-specific errors and provides a unified
/// interface for exit code mapping.
#[derive(Debug, Error)]
pub enum ArbiterError {
    /// Configuration loading or validation error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Operator-facing session error
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Background engine error
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ArbiterError {
    /// Returns the appropriate exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Json(_) | Self::Yaml(_) => ExitCode::CONFIG_ERROR,
            Self::Session(_) => ExitCode::SESSION_ERROR,
            Self::Engine(_) => ExitCode::ENGINE_ERROR,
            Self::Io(_) => ExitCode::IO_ERROR,
        }
    }
}

// ============================================================================
// Session Errors
// ============================================================================

/// Errors returned synchronously to the caller of an operator verb.
///
/// Every one of these is raised before any engine is started, so a
/// failed call never leaves partial state behind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Bad numeric range, unknown color, malformed arguments
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A phase or engine that must be idle is already running
    #[error("already running: {0}")]
    AlreadyRunning(String),

    /// A phase or engine that must be running is idle
    #[error("not running: {0}")]
    NotRunning(String),

    /// A referenced participant or provider could not be resolved
    #[error("not found: {0}")]
    TargetNotFound(String),

    /// The caller lacks the elevated capability
    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

impl SessionError {
    /// Short machine-readable name of the error kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::AlreadyRunning(_) => "already_running",
            Self::NotRunning(_) => "not_running",
            Self::TargetNotFound(_) => "target_not_found",
            Self::PermissionDenied(_) => "permission_denied",
        }
    }
}

// ============================================================================
// Engine Errors
// ============================================================================

/// Errors raised inside background timer and watcher engines.
///
/// Tick and poll failures are isolated: they are logged and counted,
/// and the engine keeps running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// A single watcher poll failed
    #[error("watcher '{watcher}' poll failed: {message}")]
    WatcherTickFailure {
        /// Name of the watcher that failed
        watcher: String,
        /// Failure description
        message: String,
    },

    /// A single timer tick failed
    #[error("timer tick failed at {remaining}s remaining: {message}")]
    TimerTickFailure {
        /// Remaining seconds when the tick failed
        remaining: i64,
        /// Failure description
        message: String,
    },

    /// The world could not be read from a background thread
    #[error("world probe unavailable: {0}")]
    ProbeUnavailable(String),

    /// The simulation-thread task queue has been shut down
    #[error("task queue closed")]
    QueueClosed,
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML parsing failed
    #[error("parse error in {path}: {message}")]
    ParseError {
        /// Path to the configuration file
        path: PathBuf,
        /// Line number where the error occurred (if available)
        line: Option<usize>,
        /// Error message from the parser
        message: String,
    },

    /// Configuration validation failed
    #[error("validation failed for {path}: {}", summarize(errors))]
    ValidationError {
        /// Path to the configuration file
        path: String,
        /// List of validation issues found
        errors: Vec<ValidationIssue>,
    },

    /// Referenced configuration file not found
    #[error("file not found: {path}")]
    MissingFile {
        /// Path to the missing file
        path: PathBuf,
    },

    /// Field has an invalid value
    #[error("invalid value for '{field}': got '{value}', expected {expected}")]
    InvalidValue {
        /// Name of the field with invalid value
        field: String,
        /// The actual value provided
        value: String,
        /// Description of what was expected
        expected: String,
    },
}

fn summarize(errors: &[ValidationIssue]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ============================================================================
// Validation Types
// ============================================================================

/// A single validation issue found during configuration validation.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Dotted path to the problematic field (e.g., "countdown.milestones[2]")
    pub path: String,
    /// Description of the validation issue
    pub message: String,
    /// Severity level of the issue
    pub severity: Severity,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {} at {}", prefix, self.message, self.path)
    }
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Validation failure that prevents the configuration from being used
    Error,
    /// Potential issue that does not prevent loading
    Warning,
}
