use crate::error::{FstransError, Result};
use std::path::Path;

use crate::config::paths::*;
use crate::config::schema::*;

/// Load the configuration from the default location.
///
/// A missing file is not an error: the defaults apply.
pub fn load_config() -> Result<Config> {
    let config_path = get_config_path()?;
    if !config_path.exists() {
        tracing::debug!(
            "No config file at {}, using defaults",
            config_path.display()
        );
        let config = Config::default();
        validate_config(&config)?;
        return Ok(config);
    }
    load_config_from(&config_path)
}

pub fn load_config_from(path: &Path) -> Result<Config> {
    let toml_content = std::fs::read_to_string(path).map_err(|e| {
        FstransError::Config(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;

    let config: Config = toml::from_str(&toml_content)
        .map_err(|e| FstransError::Config(format!("Failed to parse config: {}", e)))?;

    validate_config(&config)?;
    Ok(config)
}

pub fn save_config(config: &Config) -> Result<()> {
    let config_path = get_config_path()?;
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            FstransError::Config(format!("Failed to create config directory: {}", e))
        })?;
    }
    let toml_str = toml::to_string_pretty(config)
        .map_err(|e| FstransError::Config(format!("Failed to serialize config: {}", e)))?;
    std::fs::write(&config_path, toml_str)
        .map_err(|e| FstransError::Config(format!("Failed to write config file: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config_from_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[wait]\nwait_recheck_ms = 25\n").unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.wait.get_wait_recheck_ms(), 25);
        assert_eq!(config.wait.get_grace_spin_limit(), 64);
        assert_eq!(config.registry.get_binding_cache_limit(), 64);
    }

    #[test]
    fn test_load_config_rejects_zero_recheck() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[wait]\nwait_recheck_ms = 0\n").unwrap();

        let result = load_config_from(&path);
        assert!(matches!(result, Err(FstransError::Config(_))));
    }

    #[test]
    fn test_load_config_rejects_malformed_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[wait\n").unwrap();

        let result = load_config_from(&path);
        assert!(matches!(result, Err(FstransError::Config(_))));
    }
}
