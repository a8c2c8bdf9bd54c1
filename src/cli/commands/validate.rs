//! `validate`: checks session configuration files without hosting.

use crate::cli::args::ValidateArgs;
use crate::config::load_config;
use crate::error::{ArbiterError, ConfigError};

/// Validate every file in order, stopping at the first invalid one.
///
/// # Errors
///
/// Returns a config error for a missing, unparsable or invalid file, and
/// under `--strict` for a file with warnings.
pub fn run(args: &ValidateArgs) -> Result<(), ArbiterError> {
    for path in &args.files {
        tracing::info!(file = %path.display(), "validating configuration");
        let loaded = load_config(path)?;

        if args.strict && !loaded.warnings.is_empty() {
            return Err(ConfigError::ValidationError {
                path: path.display().to_string(),
                errors: loaded.warnings,
            }
            .into());
        }

        println!(
            "{}: ok ({} warning(s))",
            path.display(),
            loaded.warnings.len()
        );
    }
    Ok(())
}
