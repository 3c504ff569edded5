//! TOML config loading: read from a path or the platform default.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::schema::TandemConfig;
use crate::validation;
use tandem_common::ConfigError;

/// Load config from a specific TOML file path.
///
/// Deserializes with serde defaults for any missing fields. After loading,
/// the config is validated; a validation failure is logged as a warning and
/// the parsed config is returned as-is.
pub fn load_from_path(path: &Path) -> Result<TandemConfig, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }
        Err(e) => {
            return Err(ConfigError::ParseError(format!(
                "failed to read {}: {e}",
                path.display()
            )));
        }
    };

    let config: TandemConfig = toml::from_str(&content)
        .map_err(|e| ConfigError::ParseError(format!("failed to parse TOML: {e}")))?;

    if let Err(e) = validation::validate(&config) {
        warn!("config validation warning: {e}, using parsed config as-is");
    }

    info!("loaded config from {}", path.display());
    Ok(config)
}

/// Load config from the platform-specific default path.
///
/// On Linux: `~/.config/tandem/config.toml`
/// On macOS: `~/Library/Application Support/tandem/config.toml`
///
/// If the file does not exist, a default config file is created and the
/// defaults returned.
pub fn load_default() -> Result<TandemConfig, ConfigError> {
    let path = default_config_path()?;

    match load_from_path(&path) {
        Ok(config) => Ok(config),
        Err(ConfigError::FileNotFound(_)) => {
            info!("no config found at {}, creating default", path.display());
            create_default_config(&path)?;
            Ok(TandemConfig::default())
        }
        Err(e) => Err(e),
    }
}

/// The platform default config file path.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let base = dirs::config_dir().ok_or_else(|| {
        ConfigError::ParseError("could not determine platform config directory".into())
    })?;
    Ok(base.join("tandem").join("config.toml"))
}

/// Write a default config file at `path`, creating parent directories.
pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            ConfigError::ParseError(format!("failed to create {}: {e}", parent.display()))
        })?;
    }
    let content = toml::to_string_pretty(&TandemConfig::default())
        .map_err(|e| ConfigError::ParseError(format!("failed to serialize defaults: {e}")))?;
    std::fs::write(path, content).map_err(|e| {
        ConfigError::ParseError(format!("failed to write {}: {e}", path.display()))
    })?;
    Ok(())
}
