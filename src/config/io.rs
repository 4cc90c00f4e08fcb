//! Config I/O operations: load, save, and environment overrides.

use anyhow::{Context, Result};
use log::warn;
use std::path::{Path, PathBuf};

use crate::config::config_struct::Config;

const APP_DIR: &str = "acoustic-link";

/// Environment variable that overrides the stored API key
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

// ============================================================================
// PATHS
// ============================================================================

/// Get the config file path
pub fn get_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_default()
        .join(APP_DIR)
        .join("config.json")
}

/// Default location of the manuscript file
pub fn default_manuscript_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_default()
        .join(APP_DIR)
        .join("manuscript.json")
}

// ============================================================================
// CONFIG LOADING
// ============================================================================

/// Load config from `path`. Missing or unreadable files give defaults.
pub fn load_config_from(path: &Path) -> Config {
    if !path.exists() {
        return Config::default();
    }

    let data = match std::fs::read_to_string(path) {
        Ok(d) => d,
        Err(e) => {
            warn!("[Config] Could not read {}: {}", path.display(), e);
            return Config::default();
        }
    };

    match serde_json::from_str(&data) {
        Ok(c) => c,
        Err(e) => {
            warn!("[Config] Ignoring malformed {}: {}", path.display(), e);
            Config::default()
        }
    }
}

/// Load config from `path` and apply environment overrides
pub fn load_config(path: &Path) -> Config {
    let mut config = load_config_from(path);
    apply_env_overrides(&mut config, std::env::var(API_KEY_ENV).ok());
    config
}

pub fn apply_env_overrides(config: &mut Config, api_key: Option<String>) {
    if let Some(key) = api_key.filter(|k| !k.trim().is_empty()) {
        config.gemini_api_key = key;
    }
}

// ============================================================================
// CONFIG SAVING
// ============================================================================

/// Save config to disk
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating config directory {}", dir.display()))?;
    }
    let data = serde_json::to_string_pretty(config)?;
    std::fs::write(path, data).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Persist the returning-author flag without touching anything else on disk
/// (an environment key never gets written back).
pub fn mark_returning_author(path: &Path) -> Result<()> {
    let mut config = load_config_from(path);
    if config.returning_author {
        return Ok(());
    }
    config.returning_author = true;
    save_config(&config, path)
}
