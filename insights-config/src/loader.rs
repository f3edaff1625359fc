use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use insights_core::WorkerConfig;
use tracing::info;

pub const CONFIG_PATH_VAR: &str = "INSIGHTS_CONFIG_PATH";
pub const CONFIG_JSON_VAR: &str = "INSIGHTS_CONFIG_JSON";

/// Where the active configuration came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Inline,
    Default,
}

/// Loads and validates the worker configuration. `$INSIGHTS_CONFIG_PATH`
/// wins over `$INSIGHTS_CONFIG_JSON`; with neither set the defaults apply.
pub fn load_from_env() -> anyhow::Result<(WorkerConfig, ConfigSource)> {
    let (config, source) = resolve(
        env::var(CONFIG_PATH_VAR).ok(),
        env::var(CONFIG_JSON_VAR).ok(),
    )?;
    validate(&config)?;
    info!(source = ?source, "loaded worker configuration");
    Ok((config, source))
}

fn resolve(
    path_var: Option<String>,
    json_var: Option<String>,
) -> anyhow::Result<(WorkerConfig, ConfigSource)> {
    if let Some(path) = path_var.filter(|raw| !raw.trim().is_empty()) {
        let path = PathBuf::from(path);
        return Ok((load_from_file(&path)?, ConfigSource::File(path)));
    }
    if let Some(raw) = json_var.filter(|raw| !raw.trim().is_empty()) {
        let config = serde_json::from_str(&raw)
            .with_context(|| format!("invalid worker config in {CONFIG_JSON_VAR}"))?;
        return Ok((config, ConfigSource::Inline));
    }
    Ok((WorkerConfig::default(), ConfigSource::Default))
}

/// Reads a `.toml` or `.json` worker config. Missing sections keep their
/// defaults.
pub fn load_from_file(path: &Path) -> anyhow::Result<WorkerConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read worker config {}", path.display()))?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => toml::from_str(&contents)
            .with_context(|| format!("invalid worker config {}", path.display())),
        Some("json") => serde_json::from_str(&contents)
            .with_context(|| format!("invalid worker config {}", path.display())),
        _ => bail!(
            "worker config {} must be a .toml or .json file",
            path.display()
        ),
    }
}

/// Rejects settings the scan engine cannot run with.
pub fn validate(config: &WorkerConfig) -> anyhow::Result<()> {
    if !(1..=100).contains(&config.tables.max_batch_size) {
        bail!(
            "tables.max_batch_size must be between 1 and 100, got {}",
            config.tables.max_batch_size
        );
    }
    let minimums = [
        ("tables.count_lower_bound_probe", config.tables.count_lower_bound_probe),
        ("queue.bulk_enqueue_size", config.queue.bulk_enqueue_size),
        ("queue.max_dequeue_count", config.queue.max_dequeue_count as usize),
        ("scan.leaf_batch_size", config.scan.leaf_batch_size),
        ("scan.max_leaf_attempts", config.scan.max_leaf_attempts as usize),
        ("results.bucket_count", config.results.bucket_count as usize),
        ("drivers.batch_concurrency", config.drivers.batch_concurrency),
        ("drivers.fetch_concurrency", config.drivers.fetch_concurrency),
    ];
    if let Some((name, _)) = minimums.iter().find(|(_, value)| *value == 0) {
        bail!("{name} must be at least 1");
    }
    Ok(())
}
