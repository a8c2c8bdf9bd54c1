//! Session configuration: schema, loading, and validation.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{LoadResult, load_config, load_or_default};
pub use schema::{
    CountdownConfig, FeatureWatchConfig, ObjectiveWatchConfig, PermissionConfig,
    PreparationConfig, SessionConfig,
};
pub use validation::{ValidationResult, Validator};
