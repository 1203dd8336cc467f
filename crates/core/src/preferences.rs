//! Persisted user preferences.
//!
//! Stored as TOML under the user config directory. Only the settings the
//! ingest engine consumes live here.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CaseflowError, Result};

pub const MIN_NUMBER_OF_FILE_INGEST_THREADS: usize = 1;
pub const MAX_NUMBER_OF_FILE_INGEST_THREADS: usize = 16;
pub const DEFAULT_NUMBER_OF_FILE_INGEST_THREADS: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct PreferencesFile {
    #[serde(default = "default_file_ingest_threads")]
    number_of_file_ingest_threads: i64,
}

fn default_file_ingest_threads() -> i64 {
    DEFAULT_NUMBER_OF_FILE_INGEST_THREADS as i64
}

impl Default for PreferencesFile {
    fn default() -> Self {
        Self {
            number_of_file_ingest_threads: default_file_ingest_threads(),
        }
    }
}

/// Handle to the preferences file. Reads are served from the loaded copy,
/// writes go straight back to disk.
#[derive(Debug, Clone)]
pub struct UserPreferences {
    path: PathBuf,
    values: PreferencesFile,
}

impl UserPreferences {
    /// Return the default preferences path: ~/.config/caseflow/preferences.toml
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .ok_or_else(|| CaseflowError::Config("could not determine user config directory".into()))?
            .join("caseflow");
        Ok(dir.join("preferences.toml"))
    }

    /// Load preferences from the given path, or the default path.
    /// A missing file yields defaults; nothing is written until a setter runs.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };

        let values = if path.exists() {
            debug!(?path, "Loading preferences");
            let content = std::fs::read_to_string(&path)?;
            toml::from_str(&content)?
        } else {
            debug!(?path, "Preferences file not found, using defaults");
            PreferencesFile::default()
        };

        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw stored value; may be out of range if the file was edited by hand.
    pub fn number_of_file_ingest_threads(&self) -> i64 {
        self.values.number_of_file_ingest_threads
    }

    pub fn set_number_of_file_ingest_threads(&mut self, value: usize) -> Result<()> {
        self.values.number_of_file_ingest_threads = value as i64;
        self.save()
    }

    /// Read the file ingest thread count, falling back to the default and
    /// persisting it when the stored value is outside [1, 16]. A failed write
    /// is logged; the in-range value is still returned.
    pub fn resolved_file_ingest_threads(&mut self) -> usize {
        let stored = self.values.number_of_file_ingest_threads;
        let in_range = stored >= MIN_NUMBER_OF_FILE_INGEST_THREADS as i64
            && stored <= MAX_NUMBER_OF_FILE_INGEST_THREADS as i64;
        if in_range {
            return stored as usize;
        }

        warn!(
            stored,
            default = DEFAULT_NUMBER_OF_FILE_INGEST_THREADS,
            "File ingest thread count out of range, resetting to default"
        );
        if let Err(e) = self.set_number_of_file_ingest_threads(DEFAULT_NUMBER_OF_FILE_INGEST_THREADS) {
            warn!(error = %e, path = %self.path.display(), "Failed to persist file ingest thread count");
        }
        DEFAULT_NUMBER_OF_FILE_INGEST_THREADS
    }

    /// Write the current values back to disk, creating the parent directory.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let toml_str = toml::to_string_pretty(&self.values)?;
        std::fs::write(&self.path, toml_str)?;
        Ok(())
    }
}
