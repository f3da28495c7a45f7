//! User preferences persisted as `config.json` in the per-OS config dir.
//!
//! A missing or corrupt file loads as defaults (logged). Keys this version
//! doesn't know about are carried through untouched on save.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Recent-folder list length.
pub const MAX_RECENT: usize = 10;

const FILE_NAME: &str = "config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("config json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no config directory for this platform")]
    NoConfigDir,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    /// Most recent first.
    #[serde(default)]
    pub recent_folders: Vec<PathBuf>,
    /// `None` follows the system theme.
    #[serde(default)]
    pub dark_mode: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "picsort", "picsort")
        .map(|dirs| dirs.config_dir().join(FILE_NAME))
}

/// Read preferences from `path`. A missing file is not an error.
pub fn load(path: &Path) -> Result<Preferences, ConfigError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Preferences::default()),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    Ok(serde_json::from_str(&text)?)
}

/// Write preferences atomically (temp file + rename).
pub fn save(path: &Path, prefs: &Preferences) -> Result<(), ConfigError> {
    let io_err = |source: io::Error| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let json = serde_json::to_string_pretty(prefs)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)?;
    debug!("saved config to {}", path.display());
    Ok(())
}

/// Preferences bound to their file. Every setter saves immediately.
pub struct ConfigStore {
    path: PathBuf,
    prefs: Preferences,
}

impl ConfigStore {
    /// Open the store at `path`, falling back to defaults if it can't be read.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let prefs = load(&path).unwrap_or_else(|e| {
            warn!("ignoring unreadable config {}: {}", path.display(), e);
            Preferences::default()
        });
        ConfigStore { path, prefs }
    }

    pub fn open_default() -> Result<Self, ConfigError> {
        let path = default_config_path().ok_or(ConfigError::NoConfigDir)?;
        Ok(Self::at(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn preferences(&self) -> &Preferences {
        &self.prefs
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        save(&self.path, &self.prefs)
    }

    /// Recent folders that still exist, most recent first.
    pub fn recent_folders(&self) -> Vec<PathBuf> {
        self.prefs
            .recent_folders
            .iter()
            .filter(|p| p.is_dir())
            .take(MAX_RECENT)
            .cloned()
            .collect()
    }

    /// Move `dir` to the front of the recent list and save.
    pub fn add_recent_folder(&mut self, dir: &Path) -> Result<(), ConfigError> {
        let dir = dir.to_path_buf();
        let recent = &mut self.prefs.recent_folders;
        recent.retain(|p| *p != dir);
        recent.insert(0, dir);
        recent.truncate(MAX_RECENT);
        self.save()
    }

    pub fn dark_mode(&self) -> Option<bool> {
        self.prefs.dark_mode
    }

    pub fn set_dark_mode(&mut self, dark: Option<bool>) -> Result<(), ConfigError> {
        self.prefs.dark_mode = dark;
        self.save()
    }
}
