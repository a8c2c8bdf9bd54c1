//! Configuration loader.
//!
//! Pipeline: read, strip a UTF-8 BOM, parse YAML, deserialize, validate,
//! freeze behind an `Arc`.

use std::path::Path;
use std::sync::Arc;

use crate::config::schema::SessionConfig;
use crate::config::validation::Validator;
use crate::error::{ConfigError, ValidationIssue};

/// Upper bound on configuration file size.
pub const MAX_CONFIG_BYTES: u64 = 1024 * 1024;

/// A loaded configuration plus the warnings found while validating it.
#[derive(Debug)]
pub struct LoadResult {
    /// Validated configuration
    pub config: Arc<SessionConfig>,

    /// Non-fatal issues
    pub warnings: Vec<ValidationIssue>,
}

/// Loads and validates a configuration file.
///
/// An empty file yields the defaults.
///
/// # Errors
///
/// Returns an error if:
/// - the file is missing, unreadable, or larger than [`MAX_CONFIG_BYTES`]
/// - YAML parsing or deserialization fails
/// - validation finds errors
pub fn load_config(path: &Path) -> Result<LoadResult, ConfigError> {
    let metadata = std::fs::metadata(path).map_err(|_| ConfigError::MissingFile {
        path: path.to_path_buf(),
    })?;
    if metadata.len() > MAX_CONFIG_BYTES {
        return Err(ConfigError::InvalidValue {
            field: "file_size".to_string(),
            value: format!("{} bytes", metadata.len()),
            expected: format!("at most {MAX_CONFIG_BYTES} bytes"),
        });
    }

    let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::MissingFile {
        path: path.to_path_buf(),
    })?;
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(&raw);

    let config = parse_config(raw, path)?;
    let result = Validator::new().validate(&config);
    if result.has_errors() {
        return Err(ConfigError::ValidationError {
            path: path.display().to_string(),
            errors: result.errors,
        });
    }
    for issue in &result.warnings {
        tracing::warn!(path = %path.display(), "{issue}");
    }

    Ok(LoadResult {
        config: Arc::new(config),
        warnings: result.warnings,
    })
}

/// Loads `path` when given, otherwise returns the defaults.
///
/// # Errors
///
/// See [`load_config`].
pub fn load_or_default(path: Option<&Path>) -> Result<LoadResult, ConfigError> {
    path.map_or_else(
        || {
            Ok(LoadResult {
                config: Arc::new(SessionConfig::default()),
                warnings: Vec::new(),
            })
        },
        load_config,
    )
}

fn parse_config(raw: &str, path: &Path) -> Result<SessionConfig, ConfigError> {
    if raw.trim().is_empty() {
        return Ok(SessionConfig::default());
    }
    serde_yaml::from_str(raw).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        line: e.location().map(|l| l.line()),
        message: e.to_string(),
    })
}
