//! Runtime configuration and persisted user preferences.

use crate::process::Strategy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// Directory name under the platform config dir
pub const APP_ID: &str = "ytdl-gui";
const PREFERENCES_FILE: &str = "preferences.json";

pub const DOWNLOADER_ENV: &str = "YTDL_GUI_DOWNLOADER";
pub const MUXER_ENV: &str = "YTDL_GUI_MUXER";
pub const STRATEGY_ENV: &str = "YTDL_GUI_STRATEGY";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Downloader program, resolved through `PATH`
    pub downloader: String,
    /// Muxer that must be present for merges and recodes
    pub muxer: String,
    pub strategy: Strategy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            downloader: "yt-dlp".to_string(),
            muxer: "ffmpeg".to_string(),
            strategy: Strategy::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let strategy = match non_empty(STRATEGY_ENV) {
            Some(raw) => raw.parse::<Strategy>().unwrap_or_else(|e| {
                warn!("{}: {}, using {}", STRATEGY_ENV, e, defaults.strategy);
                defaults.strategy
            }),
            None => defaults.strategy,
        };

        Self {
            downloader: non_empty(DOWNLOADER_ENV).unwrap_or(defaults.downloader),
            muxer: non_empty(MUXER_ENV).unwrap_or(defaults.muxer),
            strategy,
        }
    }

    /// Tools checked on startup
    pub fn required_tools(&self) -> [&str; 2] {
        [self.downloader.as_str(), self.muxer.as_str()]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub last_download_path: Option<PathBuf>,
}

impl Preferences {
    /// The saved folder, if it still exists.
    pub fn usable_download_path(&self) -> Option<&Path> {
        self.last_download_path
            .as_deref()
            .filter(|p| p.is_dir())
    }
}

/// Where the session persists the last-used output folder.
pub trait PreferenceStore {
    fn load(&self) -> Preferences;
    fn save(&mut self, prefs: &Preferences) -> Result<()>;

    fn remember_download_path(&mut self, path: &Path) -> Result<()> {
        let mut prefs = self.load();
        prefs.last_download_path = Some(path.to_path_buf());
        self.save(&prefs)
    }
}

/// JSON file under the platform config directory.
pub struct JsonPreferenceStore {
    path: PathBuf,
}

impl JsonPreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config_dir>/ytdl-gui/preferences.json`, or `None` without a config dir
    pub fn default_location() -> Option<Self> {
        dirs::config_dir().map(|dir| Self::new(dir.join(APP_ID).join(PREFERENCES_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PreferenceStore for JsonPreferenceStore {
    fn load(&self) -> Preferences {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(path = %self.path.display(), "no preferences loaded: {}", e);
                return Preferences::default();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), "ignoring corrupt preferences: {}", e);
            Preferences::default()
        })
    }

    fn save(&mut self, prefs: &Preferences) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(prefs).context("Failed to encode preferences")?;
        fs::write(&self.path, json)
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }
}

/// Non-persistent store, used when there is no config dir.
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    prefs: Preferences,
}

impl PreferenceStore for MemoryPreferenceStore {
    fn load(&self) -> Preferences {
        self.prefs.clone()
    }

    fn save(&mut self, prefs: &Preferences) -> Result<()> {
        self.prefs = prefs.clone();
        Ok(())
    }
}
