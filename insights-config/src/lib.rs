//! Shared configuration loading and logging setup for catalog insights
//! workers.

mod loader;
mod telemetry;

pub use loader::{
    CONFIG_JSON_VAR, CONFIG_PATH_VAR, ConfigSource, load_from_env, load_from_file,
    validate,
};
pub use telemetry::{DEFAULT_LOG_FILTER, init_tracing};
