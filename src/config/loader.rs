use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult, ConfigError};

use super::apply::apply_config;
use super::types::{ConfigFile, Settings};

/// Loads a configuration file from the provided path or default locations.
///
/// # Errors
///
/// Returns an error when the config file cannot be read or parsed.
pub fn load_config(path: Option<&Path>) -> AppResult<Option<ConfigFile>> {
    if let Some(path) = path {
        return Ok(Some(load_config_file(path)?));
    }

    for candidate in ["loadctl.toml", "loadctl.json"] {
        let candidate = PathBuf::from(candidate);
        if candidate.exists() {
            return Ok(Some(load_config_file(&candidate)?));
        }
    }

    Ok(None)
}

/// Defaults overlaid with the config file, if any.
///
/// # Errors
///
/// Returns an error when the config file cannot be loaded or holds invalid
/// values.
pub fn load_settings(path: Option<&Path>) -> AppResult<Settings> {
    let mut settings = Settings::default();
    if let Some(config) = load_config(path)? {
        apply_config(&mut settings, &config)?;
    }
    Ok(settings)
}

pub(crate) fn load_config_file(path: &Path) -> AppResult<ConfigFile> {
    let content = std::fs::read_to_string(path).map_err(|err| {
        AppError::config(ConfigError::ReadConfig {
            path: path.to_path_buf(),
            source: err,
        })
    })?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => toml::from_str(&content).map_err(|err| {
            AppError::config(ConfigError::ParseToml {
                path: path.to_path_buf(),
                source: err,
            })
        }),
        Some("json") => serde_json::from_str(&content).map_err(|err| {
            AppError::config(ConfigError::ParseJson {
                path: path.to_path_buf(),
                source: err,
            })
        }),
        Some(ext) => Err(AppError::config(ConfigError::UnsupportedExtension {
            ext: ext.to_owned(),
        })),
        None => Err(AppError::config(ConfigError::MissingExtension)),
    }
}
