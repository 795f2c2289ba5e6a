//! Configuration management for tweety.
//!
//! Loads configuration from ${TWEETY_HOME}/config.toml with sensible defaults.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::DEFAULT_MODEL_ID;

pub mod paths {
    //! Path resolution for tweety configuration and data directories.
    //!
    //! TWEETY_HOME resolution order:
    //! 1. TWEETY_HOME environment variable (if set)
    //! 2. ~/.config/tweety (default)

    use std::path::PathBuf;

    /// Returns the tweety home directory.
    ///
    /// Checks TWEETY_HOME env var first, falls back to ~/.config/tweety
    pub fn tweety_home() -> PathBuf {
        if let Ok(home) = std::env::var("TWEETY_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir()
            .map(|h| h.join(".config").join("tweety"))
            .expect("Could not determine home directory")
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        tweety_home().join("config.toml")
    }

    /// Returns the directory holding the persisted session blobs.
    pub fn session_dir() -> PathBuf {
        tweety_home().join("session")
    }

    /// Returns the directory the CLI writes log files into.
    pub fn logs_dir() -> PathBuf {
        tweety_home().join("logs")
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Catalog id of the model to load on startup.
    pub model: String,

    /// System prompt prepended to every completion request.
    pub system_prompt: String,

    /// Milliseconds between simulated model-load progress ticks.
    pub load_tick_ms: u64,

    /// Milliseconds between streamed response deltas.
    pub delta_delay_ms: u64,
}

impl Config {
    const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";
    const DEFAULT_LOAD_TICK_MS: u64 = 300;
    const DEFAULT_DELTA_DELAY_MS: u64 = 24;

    /// Loads configuration from the default config path.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Writes the full config to a path, creating parent directories as needed.
    /// Uses atomic write (temp file + rename) to prevent corruption.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let contents =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        let tmp_path = path.with_extension("toml.tmp");
        fs::write(&tmp_path, contents)
            .with_context(|| format!("Failed to write config to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to replace config at {}", path.display()))?;
        Ok(())
    }

    /// Delay between simulated load progress ticks.
    pub fn load_tick(&self) -> Duration {
        Duration::from_millis(self.load_tick_ms)
    }

    /// Delay between streamed response deltas.
    pub fn delta_delay(&self) -> Duration {
        Duration::from_millis(self.delta_delay_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL_ID.to_string(),
            system_prompt: Self::DEFAULT_SYSTEM_PROMPT.to_string(),
            load_tick_ms: Self::DEFAULT_LOAD_TICK_MS,
            delta_delay_ms: Self::DEFAULT_DELTA_DELAY_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let temp = TempDir::new().unwrap();
        let config = Config::load_from(&temp.path().join("config.toml")).unwrap();

        assert_eq!(config.model, DEFAULT_MODEL_ID);
        assert_eq!(config.system_prompt, Config::DEFAULT_SYSTEM_PROMPT);
        assert_eq!(config.load_tick_ms, 300);
    }

    #[test]
    fn test_load_partial_config_keeps_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "model = \"gemma-2b\"\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.model, "gemma-2b");
        assert_eq!(config.system_prompt, Config::DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn test_save_and_reload_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        let config = Config {
            model: "mistral-7b".to_string(),
            delta_delay_ms: 1,
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.model, "mistral-7b");
        assert_eq!(reloaded.delta_delay_ms, 1);
    }

    #[test]
    fn test_load_malformed_config_errors() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "model = [not toml").unwrap();

        assert!(Config::load_from(&path).is_err());
    }
}
