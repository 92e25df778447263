//! Persisted DFU options.
//!
//! Options live in a JSON file (camelCase keys, every key optional). The
//! command line can point at a file with `--config`; otherwise
//! `dfu_settings.json` in the working directory is used if present.
//!
//! ```json
//! { "attMtu": 247, "ackTimeoutMs": 5000, "deviceType": 82 }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::dfu::{DfuConfig, DfuError, DfuResult};

/// Default settings file name.
pub const SETTINGS_FILENAME: &str = "dfu_settings.json";

/// Manages persistence of DFU options to a JSON file.
pub struct SettingsManager {
    settings_file_path: PathBuf,
}

impl SettingsManager {
    /// Settings stored in `dir` under the default file name.
    pub fn new(dir: &Path) -> Self {
        Self::with_path(dir.join(SETTINGS_FILENAME))
    }

    /// Settings stored at an explicit file path.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            settings_file_path: path.into(),
        }
    }

    /// Load options from disk, returning defaults if the file doesn't exist.
    pub fn load(&self) -> DfuResult<DfuConfig> {
        if !self.settings_file_path.exists() {
            debug!(
                "No settings at {}, using defaults",
                self.settings_file_path.display()
            );
            return Ok(DfuConfig::default());
        }

        let contents = fs::read_to_string(&self.settings_file_path)?;

        // Handle empty file gracefully
        if contents.trim().is_empty() {
            return Ok(DfuConfig::default());
        }

        serde_json::from_str(&contents).map_err(|e| DfuError::InvalidSettings {
            reason: format!("{}: {}", self.settings_file_path.display(), e),
        })
    }

    /// Save options to disk.
    pub fn save(&self, config: &DfuConfig) -> DfuResult<()> {
        // Ensure parent directory exists
        if let Some(parent) = self.settings_file_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(config)?;
        fs::write(&self.settings_file_path, contents)?;

        Ok(())
    }

    /// Get the path where settings are stored.
    pub fn settings_path(&self) -> &Path {
        &self.settings_file_path
    }
}
