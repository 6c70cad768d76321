//! Configuration loading

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{ConfigError, Result};

use super::defaults::config_file_names;
use super::types::Config;
use super::validation::validate_config;

/// A loaded configuration together with the workspace it belongs to
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Parsed and validated configuration
    pub config: Config,
    /// Path of the file it was read from
    pub path: PathBuf,
    /// Directory holding the configuration file
    pub workspace_root: PathBuf,
}

/// Load configuration from a file
pub fn load_config(path: &Path) -> Result<Config> {
    let is_yaml = path
        .extension()
        .is_some_and(|e| e == "yaml" || e == "yml");
    let format = if is_yaml { "YAML" } else { "TOML" };
    info!(path = %path.display(), format, "loading config");

    let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

    let config: Config = if is_yaml {
        serde_yaml::from_str(&content).map_err(ConfigError::YamlError)?
    } else {
        toml::from_str(&content).map_err(ConfigError::TomlError)?
    };

    validate_config(&config)?;
    debug!(path = %path.display(), "config loaded and validated");
    Ok(config)
}

/// Find the configuration file in a directory or its parents.
///
/// The first match wins. Parents are walked until the filesystem root.
pub fn find_config(start_dir: &Path) -> Option<PathBuf> {
    debug!(start_dir = %start_dir.display(), "searching for config file");
    let mut current = start_dir.to_path_buf();

    loop {
        for name in config_file_names() {
            let config_path = current.join(name);
            if config_path.is_file() {
                info!(path = %config_path.display(), "found config file");
                return Some(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    debug!("no config file found");
    None
}

/// Load configuration from directory (searching parent directories)
pub fn load_config_from_dir(dir: &Path) -> Result<LoadedConfig> {
    let path = find_config(dir).ok_or_else(|| ConfigError::NotFound(dir.to_path_buf()))?;
    let config = load_config(&path)?;
    let workspace_root = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| dir.to_path_buf());

    Ok(LoadedConfig {
        config,
        path,
        workspace_root,
    })
}

/// Load configuration or fall back to an empty workspace rooted at `dir`
pub fn load_config_or_default(dir: &Path) -> LoadedConfig {
    match load_config_from_dir(dir) {
        Ok(loaded) => loaded,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "no usable config found, using defaults");
            LoadedConfig {
                config: Config::default(),
                path: dir.join(super::defaults::DEFAULT_CONFIG_TOML),
                workspace_root: dir.to_path_buf(),
            }
        }
    }
}
