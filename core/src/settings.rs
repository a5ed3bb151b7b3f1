//! Persisted session configuration.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::prelude::{SettingsError, SettingsResult};
use crate::projection::timeseries::{TimeSeriesOptions, DEFAULT_MAX_ENS};

pub const DEFAULT_BAUD: u32 = 115_200;
pub const DEFAULT_OUTPUT_DIR: &str = "recordings";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CommSettings {
    pub port: String,
    pub baud: u32,
    pub output_dir: PathBuf,
}

impl Default for CommSettings {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud: DEFAULT_BAUD,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub comm: CommSettings,
    pub timeseries: TimeSeriesOptions,
}

impl Settings {
    /// Replaces values that cannot be used with their defaults.
    pub fn sanitize(mut self) -> Self {
        if self.comm.baud == 0 {
            log::warn!("baud 0 in settings, using {}", DEFAULT_BAUD);
            self.comm.baud = DEFAULT_BAUD;
        }
        if self.comm.output_dir.as_os_str().is_empty() {
            self.comm.output_dir = PathBuf::from(DEFAULT_OUTPUT_DIR);
        }
        if self.timeseries.max_ens == 0 {
            log::warn!("max_ens 0 in settings, using {}", DEFAULT_MAX_ENS);
            self.timeseries.max_ens = DEFAULT_MAX_ENS;
        }
        self
    }
}

/// YAML-backed settings shared between the session and the query surface.
/// An in-memory store never touches disk.
pub struct SettingsStore {
    path: Option<PathBuf>,
    settings: RwLock<Settings>,
}

impl SettingsStore {
    /// Reads `path`, falling back to defaults when it is missing or invalid.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = if path.exists() {
            match Self::read(&path) {
                Ok(settings) => settings,
                Err(err) => {
                    log::warn!("{}; using default settings", err);
                    Settings::default()
                }
            }
        } else {
            log::info!("no settings at {}, using defaults", path.display());
            Settings::default()
        };
        Self {
            path: Some(path),
            settings: RwLock::new(settings),
        }
    }

    pub fn read(path: &Path) -> SettingsResult<Settings> {
        let contents = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Settings =
            serde_yaml::from_str(&contents).map_err(|source| SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(settings.sanitize())
    }

    pub fn in_memory(settings: Settings) -> Self {
        Self {
            path: None,
            settings: RwLock::new(settings.sanitize()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn snapshot(&self) -> Settings {
        self.settings.read().clone()
    }

    /// Applies `change` and writes the result through.
    pub fn update<F>(&self, change: F) -> SettingsResult<Settings>
    where
        F: FnOnce(&mut Settings),
    {
        let updated = {
            let mut settings = self.settings.write();
            change(&mut settings);
            *settings = settings.clone().sanitize();
            settings.clone()
        };
        self.write(&updated)?;
        Ok(updated)
    }

    fn write(&self, settings: &Settings) -> SettingsResult<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        let encoded = serde_yaml::to_string(settings)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| SettingsError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, encoded).map_err(|source| SettingsError::Io {
            path: path.clone(),
            source,
        })
    }
}
