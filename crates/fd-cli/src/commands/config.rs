//! Config command implementations

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::output::{print_error, print_info, print_success};
use fd_core::config::{self, ControlConfig};

/// Config file the CLI reads: `--config` or the default location
pub fn config_path(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(config::default_config_path)
}

/// Load the config file, or defaults when there is none
pub fn load_or_default(config_path: Option<&Path>) -> Result<ControlConfig> {
    let path = self::config_path(config_path);
    if !path.exists() {
        return Ok(ControlConfig::default());
    }
    config::load_config(&path).with_context(|| format!("Failed to load config from {:?}", path))
}

/// Print the effective configuration as TOML
pub fn config_show(config_path: Option<&Path>) -> Result<()> {
    let path = self::config_path(config_path);
    if path.exists() {
        print_info(&format!("Configuration file: {:?}", path));
    } else {
        print_info(&format!("No configuration file at {:?}; showing defaults", path));
    }
    println!();

    let config = load_or_default(config_path)?;
    let content = toml::to_string_pretty(&config).context("Failed to render config")?;
    println!("{}", content);
    Ok(())
}

/// Write the default configuration
pub fn config_init(config_path: Option<&Path>, force: bool) -> Result<()> {
    let path = self::config_path(config_path);

    if path.exists() && !force {
        print_error(&format!("Config file already exists: {:?}", path));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    config::save_config(&path, &ControlConfig::default())
        .with_context(|| format!("Failed to write config file: {:?}", path))?;
    print_success(&format!("Created configuration file: {:?}", path));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        config_init(Some(&path), false).unwrap();
        assert!(path.exists());

        let loaded = load_or_default(Some(&path)).unwrap();
        assert_eq!(loaded.ipc_port, ControlConfig::default().ipc_port);
    }

    #[test]
    fn test_init_does_not_clobber_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "ipc_port = 4000\n").unwrap();

        config_init(Some(&path), false).unwrap();
        assert_eq!(load_or_default(Some(&path)).unwrap().ipc_port, 4000);

        config_init(Some(&path), true).unwrap();
        assert_eq!(
            load_or_default(Some(&path)).unwrap().ipc_port,
            ControlConfig::default().ipc_port
        );
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_or_default(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.ssh_binary, "ssh");
    }
}
