// ── Settings persistence ──────────────────────────────────────────────────────
//
// Recent files and per-file language overrides, stored as JSON in
// `<config dir>/construct/settings.json`.  Read once at startup, written
// through on every mutation.  Only the control thread touches it.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use etcetera::base_strategy::{choose_base_strategy, BaseStrategy};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{ConstructError, Result};

/// Length of the recent-files list.
pub(crate) const MAX_RECENT: usize = 5;

// ── Format version ────────────────────────────────────────────────────────────

const SETTINGS_VERSION: u32 = 1;

// ── On-disk types ─────────────────────────────────────────────────────────────

/// Root of the JSON settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Settings {
    pub(crate) version: u32,
    /// Normalised absolute paths, most recent first.
    #[serde(default)]
    pub(crate) recent_files: Vec<PathBuf>,
    /// Normalised path → language tag.
    #[serde(default)]
    pub(crate) language_overrides: BTreeMap<PathBuf, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            recent_files: Vec::new(),
            language_overrides: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Move `path` to the front, dropping duplicates and the oldest entries.
    pub(crate) fn push_recent(&mut self, path: &Path) {
        self.recent_files.retain(|p| p != path);
        self.recent_files.insert(0, path.to_path_buf());
        self.recent_files.truncate(MAX_RECENT);
    }

    pub(crate) fn remove_recent(&mut self, path: &Path) -> bool {
        let before = self.recent_files.len();
        self.recent_files.retain(|p| p != path);
        self.recent_files.len() != before
    }

    pub(crate) fn clear_recent(&mut self) {
        self.recent_files.clear();
    }

    /// Drop entries that are no longer readable files.  Returns `true` if
    /// anything was removed.
    pub(crate) fn prune_recent(&mut self) -> bool {
        let before = self.recent_files.len();
        self.recent_files.retain(|p| fs::File::open(p).is_ok() && p.is_file());
        self.recent_files.len() != before
    }

    pub(crate) fn language_override(&self, path: &Path) -> Option<&str> {
        self.language_overrides.get(path).map(String::as_str)
    }

    /// `None` clears the override.
    pub(crate) fn set_language_override(&mut self, path: &Path, tag: Option<&str>) {
        match tag {
            Some(tag) => {
                self.language_overrides.insert(path.to_path_buf(), tag.to_owned());
            }
            None => {
                self.language_overrides.remove(path);
            }
        }
    }
}

// ── Store interface ───────────────────────────────────────────────────────────

/// Where settings live.  `App` owns one and calls `save` after every change.
pub(crate) trait SettingsStore: Send {
    /// Never fails: anything unreadable yields defaults.
    fn load(&self) -> Settings;
    fn save(&self, settings: &Settings) -> Result<()>;
}

// ── JSON file store ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub(crate) struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// `<config dir>/construct/settings.json` for the current user.
    pub(crate) fn at_default_location() -> Result<Self> {
        let strategy = choose_base_strategy()
            .map_err(|e| ConstructError::Io(std::io::Error::other(e.to_string())))?;
        Ok(Self::new(strategy.config_dir().join("construct").join("settings.json")))
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonFileStore {
    fn load(&self) -> Settings {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Settings::default(),
            Err(e) => {
                log::warn!("cannot read settings {}: {e}", self.path.display());
                return Settings::default();
            }
        };
        match serde_json::from_slice::<Settings>(&data) {
            Ok(s) if s.version == SETTINGS_VERSION => s,
            Ok(s) => {
                log::warn!("ignoring settings with unknown version {}", s.version);
                Settings::default()
            }
            Err(e) => {
                log::warn!("ignoring corrupt settings {}: {e}", self.path.display());
                Settings::default()
            }
        }
    }

    fn save(&self, settings: &Settings) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        // Write-then-rename: readers never see a half-written file.
        let tmp = self.path.with_extension("json.tmp");
        let file = fs::File::create(&tmp)?;
        serde_json::to_writer_pretty(file, settings)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

// ── In-memory store ───────────────────────────────────────────────────────────

/// Shares its contents between clones, so a test can keep one handle and give
/// the other to `App`.
#[derive(Debug, Clone, Default)]
pub(crate) struct MemoryStore {
    inner: Arc<Mutex<Settings>>,
}

impl MemoryStore {
    #[cfg(test)]
    pub(crate) fn snapshot(&self) -> Settings {
        self.inner.lock().clone()
    }
}

impl SettingsStore for MemoryStore {
    fn load(&self) -> Settings {
        self.inner.lock().clone()
    }

    fn save(&self, settings: &Settings) -> Result<()> {
        *self.inner.lock() = settings.clone();
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
