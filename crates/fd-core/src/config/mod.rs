//! Configuration management for Fleetdeck

mod control;
pub mod serde_utils;

pub use control::{
    AlertConfig, BridgeConfig, ControlConfig, PreflightConfig, ReconcileConfig, SyncConfig,
    DEFAULT_IPC_PORT,
};

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fleetdeck")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Get the default directory for persisted state
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fleetdeck")
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

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = ControlConfig::default();
        config.ipc_port = 30001;
        config.alerts.cooldown = Duration::from_secs(42);
        save_config(&path, &config).unwrap();

        let loaded: ControlConfig = load_config(&path).unwrap();
        assert_eq!(loaded.ipc_port, 30001);
        assert_eq!(loaded.alerts.cooldown, Duration::from_secs(42));
        assert_eq!(loaded.preflight.ttl, config.preflight.ttl);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result: Result<ControlConfig, _> = load_config(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "ipc_port = 4000\n[reconcile]\nsettle_delay = 250\n").unwrap();

        let loaded: ControlConfig = load_config(&path).unwrap();
        assert_eq!(loaded.ipc_port, 4000);
        assert_eq!(loaded.reconcile.settle_delay, Duration::from_millis(250));
        assert_eq!(loaded.preflight.probe_timeout, Duration::from_secs(35));
    }
}
