use anyhow::{Context, Result};
use std::path::PathBuf;

/// Centralized path management for smartdub

/// Get the smartdub config directory
pub fn smartdub_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Unable to determine user config directory")?
        .join("smartdub");

    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("creating config directory at {}", config_dir.display()))?;

    Ok(config_dir)
}

/// Get the smartdub cache directory, parent of per-run scratch directories
pub fn smartdub_cache_dir() -> Result<PathBuf> {
    let cache_dir = cache_base(dirs::cache_dir()).join("smartdub");

    std::fs::create_dir_all(&cache_dir)
        .with_context(|| format!("creating cache directory at {}", cache_dir.display()))?;

    Ok(cache_dir)
}

/// Falls back to `~/.cache` with the home directory expanded.
fn cache_base(cache_dir: Option<PathBuf>) -> PathBuf {
    cache_dir.unwrap_or_else(|| PathBuf::from(shellexpand::tilde("~/.cache").into_owned()))
}

/// Default location of the config file
pub fn default_config_path() -> Result<PathBuf> {
    Ok(smartdub_config_dir()?.join("config.toml"))
}
