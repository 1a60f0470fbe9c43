//! Configuration management for hostlink

mod agent;
mod launcher;
pub mod serde_utils;

pub use agent::{AgentConfig, LogSource, ProxyRule};
pub use launcher::{AgentBinaries, LauncherConfig};

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hostlink")
}

/// Default path of the agent configuration file
pub fn default_agent_config_path() -> PathBuf {
    default_config_dir().join("agent.toml")
}

/// Default path of the launcher configuration file
pub fn default_launcher_config_path() -> PathBuf {
    default_config_dir().join("launcher.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Load configuration, falling back to defaults when the file is absent or unreadable
pub fn load_or_default<T>(path: &Path) -> T
where
    T: serde::de::DeserializeOwned + Default,
{
    if !path.exists() {
        tracing::debug!("No config at {:?}, using defaults", path);
        return T::default();
    }

    load_config(path).unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from {:?}: {}", path, e);
        T::default()
    })
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}
