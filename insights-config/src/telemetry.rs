use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Quiet defaults with scan progress visible. Override via `RUST_LOG`.
pub const DEFAULT_LOG_FILTER: &str = "info,catalog_scan::storage=warn,catalog_scan::latest_leaf=warn";

/// Installs the global subscriber. Fails if one is already set.
pub fn init_tracing() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_parses_and_installs_once() {
        assert!(EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
        assert!(init_tracing().is_ok());
        assert!(init_tracing().is_err());
    }
}
