//! User configuration loading for solargraph-bridge.
//!
//! User config location: $XDG_CONFIG_HOME/solargraph-bridge/config.toml
//! Fallback: the platform config directory reported by `dirs`.

use std::path::PathBuf;

use super::settings::SettingsLayer;

const APP_DIR: &str = "solargraph-bridge";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum UserConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

pub type UserConfigResult<T> = Result<T, UserConfigError>;

/// Returns the path to the user configuration file.
///
/// The path is determined by:
/// 1. If $XDG_CONFIG_HOME is set: $XDG_CONFIG_HOME/solargraph-bridge/config.toml
/// 2. Otherwise: `dirs::config_dir()`/solargraph-bridge/config.toml
///
/// Returns None if no config directory can be determined.
pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME")
        && !xdg_config.is_empty()
    {
        return Some(PathBuf::from(xdg_config).join(APP_DIR).join(CONFIG_FILE));
    }

    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
}

/// Load the user configuration layer.
///
/// A missing file is not an error: `Ok(None)` keeps the zero-config
/// experience.
pub fn load_user_config() -> UserConfigResult<Option<SettingsLayer>> {
    let Some(path) = user_config_path() else {
        return Ok(None);
    };
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path).map_err(|source| UserConfigError::Read {
        path: path.clone(),
        source,
    })?;
    toml::from_str::<SettingsLayer>(&contents)
        .map(Some)
        .map_err(|source| UserConfigError::Parse { path, source })
}
