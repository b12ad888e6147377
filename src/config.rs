//! Engine configuration.
//!
//! Persisted as JSON in the platform config directory
//! (`~/.config/tastewarp/config.json` on Linux). Every field has a default so
//! older or partial files keep loading as new settings are added.

use crate::audio::mixer::DEFAULT_WINDOW_SECONDS;
use crate::error::Result;
use crate::history::DEFAULT_RECENT_EXPORTS;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Directory name used under the platform config and data directories.
const APP_DIR: &str = "tastewarp";

/// Returns the path to the config file: `<config dir>/tastewarp/config.json`
pub fn config_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(APP_DIR);
    path.push("config.json");
    path
}

/// Returns the default export directory: `<data dir>/tastewarp/exports`
pub fn default_export_dir() -> PathBuf {
    let mut path = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(APP_DIR);
    path.push("exports");
    path
}

/// Persisted engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Where exports are written. `None` uses [`default_export_dir`].
    pub export_dir: Option<PathBuf>,

    /// File name prefix for exports.
    pub export_prefix: String,

    /// Length of the trailing export window.
    pub export_window_secs: u32,

    /// Number of exports remembered in the recent list.
    pub recent_exports: usize,

    /// Fixed seed for the random effects. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            export_dir: None,
            export_prefix: "tastewarp_export".to_string(),
            export_window_secs: DEFAULT_WINDOW_SECONDS,
            recent_exports: DEFAULT_RECENT_EXPORTS,
            seed: None,
        }
    }
}

impl EngineConfig {
    /// Load the config from the platform location, falling back to defaults
    /// on any error.
    pub fn load() -> Self {
        Self::load_or_default(config_path())
    }

    /// Load the config from `path`, falling back to defaults on any error.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse config ({}), using defaults", e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::info!("No config file found ({}), using defaults", e);
                Self::default()
            }
        }
    }

    /// Load the config from `path`.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read and `Config` if it is not
    /// valid JSON.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Save the config to the platform location as pretty JSON.
    pub fn save(&self) -> Result<()> {
        self.save_to(config_path())
    }

    /// Save the config to `path` as pretty JSON, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be written.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        tracing::debug!("Saved config to {}", path.display());
        Ok(())
    }

    /// Export directory with the platform default applied.
    pub fn resolved_export_dir(&self) -> PathBuf {
        self.export_dir.clone().unwrap_or_else(default_export_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.export_prefix, "tastewarp_export");
        assert_eq!(config.export_window_secs, 60);
        assert_eq!(config.recent_exports, 10);
        assert!(config.seed.is_none());
        assert!(config.resolved_export_dir().ends_with("tastewarp/exports"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = EngineConfig {
            export_dir: Some(dir.path().join("out")),
            export_prefix: "jam".to_string(),
            export_window_secs: 30,
            recent_exports: 3,
            seed: Some(7),
        };
        config.save_to(&path).unwrap();

        assert_eq!(EngineConfig::load_from(&path).unwrap(), config);
        assert_eq!(EngineConfig::load_or_default(&path), config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "export_window_secs": 15 }"#).unwrap();

        let config = EngineConfig::load_or_default(&path);
        assert_eq!(config.export_window_secs, 15);
        assert_eq!(config.export_prefix, "tastewarp_export");
    }

    #[test]
    fn test_bad_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "not json").unwrap();

        assert!(matches!(
            EngineConfig::load_from(&path),
            Err(crate::error::EngineError::Config(_))
        ));
        assert_eq!(EngineConfig::load_or_default(&path), EngineConfig::default());
        assert_eq!(
            EngineConfig::load_or_default(dir.path().join("missing.json")),
            EngineConfig::default()
        );
    }
}
