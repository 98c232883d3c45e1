//! Locating and layering config files.
//!
//! `<config dir>/config.toml` is read first, then `./parley.toml` on top of
//! it. `PARLEY_CONFIG_DIR` replaces the platform config directory.

use std::path::{Path, PathBuf};

use crate::{ConfigError, ParleyConfig, Result};

const APP_NAME: &str = "parley";
const USER_CONFIG_FILE: &str = "config.toml";
const PROJECT_CONFIG_FILE: &str = "parley.toml";
const CONFIG_DIR_ENV: &str = "PARLEY_CONFIG_DIR";

/// A merged configuration and how it was assembled.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: ParleyConfig,
    /// Files that contributed, lowest precedence first.
    pub loaded_from: Vec<PathBuf>,
    /// Layers that failed to parse plus [`ParleyConfig::warnings`].
    pub warnings: Vec<String>,
}

/// Merge the user config and the project config found in `project_dir`
/// (the working directory when `None`). Missing files are skipped; broken
/// ones are skipped with a warning.
pub fn load_config(project_dir: Option<&Path>) -> Result<LoadedConfig> {
    let user = config_dir().map(|d| d.join(USER_CONFIG_FILE));
    let project = project_dir
        .map(|d| d.join(PROJECT_CONFIG_FILE))
        .unwrap_or_else(|| PathBuf::from(PROJECT_CONFIG_FILE));
    Ok(load_layers(user.into_iter().chain([project])))
}

/// Load exactly one file. A missing or malformed file is an error.
pub fn load_single(path: &Path) -> Result<LoadedConfig> {
    let config = read_file(path)?;
    let warnings = config.warnings();
    Ok(LoadedConfig {
        config,
        loaded_from: vec![path.to_path_buf()],
        warnings,
    })
}

/// Directory for the database when none is configured.
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join(APP_NAME))
        .unwrap_or_else(|| PathBuf::from(".").join(APP_NAME))
}

/// Directory for rolling log files when none is configured.
pub fn default_log_dir() -> PathBuf {
    config_dir()
        .unwrap_or_else(|| PathBuf::from(".").join(APP_NAME))
        .join("logs")
}

fn config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

fn load_layers(paths: impl IntoIterator<Item = PathBuf>) -> LoadedConfig {
    let mut config = ParleyConfig::new();
    let mut loaded_from = Vec::new();
    let mut warnings = Vec::new();

    for path in paths {
        if !path.is_file() {
            continue;
        }
        match read_file(&path) {
            Ok(layer) => {
                config.merge(layer);
                loaded_from.push(path);
            }
            Err(e) => warnings.push(format!("Failed to load {}: {}", path.display(), e)),
        }
    }

    warnings.extend(config.warnings());
    LoadedConfig {
        config,
        loaded_from,
        warnings,
    }
}

fn read_file(path: &Path) -> Result<ParleyConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    ParleyConfig::from_toml(&contents)
}
