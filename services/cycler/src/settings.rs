//! Last-used cycling settings, persisted between runs.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Settings file name.
const SETTINGS_FILE: &str = "settings.json";

/// Get the settings file path.
pub fn settings_path() -> Result<PathBuf> {
    ProjectDirs::from("io", "vmcycle", "cycler")
        .map(|dirs| dirs.config_dir().join(SETTINGS_FILE))
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))
}

/// Batch size and interval from the last run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Seconds between cycles.
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval: u64,
}

fn default_batch_size() -> usize {
    1
}

fn default_cycle_interval() -> u64 {
    60
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            cycle_interval: default_cycle_interval(),
        }
    }
}

impl Settings {
    /// Load from the platform config directory.
    pub fn load() -> Self {
        match settings_path() {
            Ok(path) => Self::load_from(&path),
            Err(e) => {
                warn!(error = %e, "Using default settings");
                Self::default()
            }
        }
    }

    /// Load from `path`. A missing or unreadable file yields defaults.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        let parsed = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {:?}", path))
            .and_then(|contents| {
                serde_json::from_str(&contents)
                    .with_context(|| format!("Failed to parse settings from {:?}", path))
            });

        match parsed {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, "Using default settings");
                Self::default()
            }
        }
    }

    /// Save to the platform config directory.
    pub fn save(&self) -> Result<()> {
        self.save_to(&settings_path()?)
    }

    /// Save to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {:?}", dir))?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents).with_context(|| format!("Failed to write settings to {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(&dir.path().join("absent.json"));
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.batch_size, 1);
        assert_eq!(settings.cycle_interval, 60);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILE);
        let settings = Settings {
            batch_size: 3,
            cycle_interval: 120,
        };

        settings.save_to(&path).unwrap();
        assert_eq!(Settings::load_from(&path), settings);
    }

    #[test]
    fn test_missing_keys_and_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);

        fs::write(&path, r#"{"batch_size": 4}"#).unwrap();
        assert_eq!(
            Settings::load_from(&path),
            Settings {
                batch_size: 4,
                cycle_interval: 60
            }
        );

        fs::write(&path, "{not json").unwrap();
        assert_eq!(Settings::load_from(&path), Settings::default());
    }
}
