//! Durable settings storage with group and array scoping.
//!
//! The projects list persists itself through the [`SettingsStore`] trait,
//! which mirrors the classic desktop "settings" interface: values live under
//! slash separated keys, [`begin_group`](SettingsStore::begin_group) pushes a
//! key prefix, and arrays are written element by element after
//! [`set_array_index`](SettingsStore::set_array_index).
//!
//! # Key Layout
//!
//! ```text
//! app/settings/editor      = ""
//! app/settings/verbose     = false
//! app/projects/1/path      = "/home/user/nucleo-blink"
//! app/projects/2/path      = "/home/user/f4-uart"
//! app/projects/size        = 2
//! ```
//!
//! Array elements are stored 1-based, and the element count is stored under
//! `<array>/size` when the array is closed.
//!
//! [`Settings`] is the bundled implementation: a flat map serialized to a JSON
//! file with an atomic temp-file-and-rename write on [`sync`](SettingsStore::sync).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// Prefix of the persisted application preferences.
pub const APP_SETTINGS_PREFIX: &str = "app/settings/";

/// Errors that can occur while reading or writing the settings file.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read settings at {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings at {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write settings at {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize settings: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("settings at {} must be a JSON object", .path.display())]
    InvalidSchema { path: PathBuf },
}

/// Group/array scoped key-value store.
///
/// Implementations are only ever driven from one thread at a time: the
/// projects list touches its store exclusively from inside worker pool jobs.
pub trait SettingsStore: Send {
    /// Appends `prefix` to the current key prefix.
    fn begin_group(&mut self, prefix: &str);

    /// Restores the prefix that was active before the matching `begin_group`.
    fn end_group(&mut self);

    /// Removes `key` and everything nested below it.
    fn remove(&mut self, key: &str);

    /// Starts writing the array stored under `prefix`.
    fn begin_write_array(&mut self, prefix: &str);

    /// Starts reading the array stored under `prefix` and returns its size.
    fn begin_read_array(&mut self, prefix: &str) -> usize;

    /// Selects the array element subsequent keys refer to.
    fn set_array_index(&mut self, index: usize);

    /// Stores `value` under `key` relative to the current prefix.
    fn set_value(&mut self, key: &str, value: Value);

    /// Reads the value under `key` relative to the current prefix.
    fn value(&self, key: &str) -> Option<Value>;

    /// Closes the innermost array. Write arrays record their size.
    fn end_array(&mut self);

    /// Flushes pending changes to durable storage.
    fn sync(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Settings store shared between the interactive side and worker jobs.
pub type SharedStore = Arc<Mutex<dyn SettingsStore>>;

#[derive(Debug, Clone)]
enum Scope {
    Group(String),
    Array {
        prefix: String,
        index: Option<usize>,
        highest: Option<usize>,
        write: bool,
    },
}

/// JSON file backed [`SettingsStore`].
#[derive(Debug, Default)]
pub struct Settings {
    path: Option<PathBuf>,
    values: BTreeMap<String, Value>,
    scopes: Vec<Scope>,
}

impl Settings {
    /// Creates a store that lives only in memory. `sync` is a no-op.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens the settings file at `path`, starting empty if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, is not valid
    /// JSON, or is not a JSON object.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let values = load_values(&path)?;
        debug!(path = %path.display(), keys = values.len(), "Loaded settings");

        Ok(Self {
            path: Some(path),
            values,
            scopes: Vec::new(),
        })
    }

    /// Path of the backing file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether `key` (relative to the current prefix) holds a value.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(&self.full_key(key))
    }

    /// All stored keys, fully qualified, in lexical order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    fn prefix_segments(&self) -> Vec<String> {
        let mut segments = Vec::new();
        for scope in &self.scopes {
            match scope {
                Scope::Group(prefix) => segments.push(prefix.clone()),
                Scope::Array { prefix, index, .. } => {
                    segments.push(prefix.clone());
                    if let Some(index) = index {
                        segments.push((index + 1).to_string());
                    }
                }
            }
        }
        segments
    }

    fn full_key(&self, key: &str) -> String {
        join_key(self.prefix_segments(), key)
    }
}

impl SettingsStore for Settings {
    fn begin_group(&mut self, prefix: &str) {
        self.scopes.push(Scope::Group(normalize(prefix)));
    }

    fn end_group(&mut self) {
        match self.scopes.last() {
            Some(Scope::Group(_)) => {
                self.scopes.pop();
            }
            _ => warn!("end_group called without a matching begin_group"),
        }
    }

    fn remove(&mut self, key: &str) {
        let full = self.full_key(key);
        if full.is_empty() {
            self.values.clear();
            return;
        }
        let nested = format!("{full}/");
        self.values
            .retain(|existing, _| existing != &full && !existing.starts_with(&nested));
    }

    fn begin_write_array(&mut self, prefix: &str) {
        self.scopes.push(Scope::Array {
            prefix: normalize(prefix),
            index: None,
            highest: None,
            write: true,
        });
    }

    fn begin_read_array(&mut self, prefix: &str) -> usize {
        let prefix = normalize(prefix);
        let size = self
            .values
            .get(&self.full_key(&format!("{prefix}/size")))
            .and_then(Value::as_u64)
            .and_then(|size| usize::try_from(size).ok())
            .unwrap_or(0);
        self.scopes.push(Scope::Array {
            prefix,
            index: None,
            highest: None,
            write: false,
        });
        size
    }

    fn set_array_index(&mut self, new_index: usize) {
        match self.scopes.last_mut() {
            Some(Scope::Array { index, highest, .. }) => {
                *index = Some(new_index);
                *highest = Some(highest.map_or(new_index, |h| h.max(new_index)));
            }
            _ => warn!(index = new_index, "set_array_index called outside of an array"),
        }
    }

    fn set_value(&mut self, key: &str, value: Value) {
        let full = self.full_key(key);
        self.values.insert(full, value);
    }

    fn value(&self, key: &str) -> Option<Value> {
        self.values.get(&self.full_key(key)).cloned()
    }

    fn end_array(&mut self) {
        let Some(Scope::Array {
            prefix,
            highest,
            write,
            ..
        }) = self.scopes.last().cloned()
        else {
            warn!("end_array called without a matching begin_*_array");
            return;
        };
        self.scopes.pop();

        if write {
            let size = highest.map_or(0, |h| h + 1);
            let key = self.full_key(&format!("{prefix}/size"));
            self.values.insert(key, Value::from(size));
        }
    }

    fn sync(&mut self) -> Result<(), StoreError> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        write_values(&path, &self.values)
    }
}

/// Writes the default application preferences that are not set yet.
pub fn init_app_settings(store: &mut dyn SettingsStore) {
    let defaults = [("editor", Value::from("")), ("verbose", Value::from(false))];
    for (key, value) in defaults {
        let full = format!("{APP_SETTINGS_PREFIX}{key}");
        if store.value(&full).is_none() {
            store.set_value(&full, value);
        }
    }
}

/// Reads an application preference such as `verbose` or `editor`.
#[must_use]
pub fn app_setting(store: &dyn SettingsStore, key: &str) -> Option<Value> {
    store.value(&format!("{APP_SETTINGS_PREFIX}{key}"))
}

/// Stores an application preference.
pub fn set_app_setting(store: &mut dyn SettingsStore, key: &str, value: Value) {
    store.set_value(&format!("{APP_SETTINGS_PREFIX}{key}"), value);
}

fn normalize(segment: &str) -> String {
    segment.trim_matches('/').to_string()
}

fn join_key(mut segments: Vec<String>, key: &str) -> String {
    let key = normalize(key);
    if !key.is_empty() {
        segments.push(key);
    }
    segments.retain(|segment| !segment.is_empty());
    segments.join("/")
}

fn load_values(path: &Path) -> Result<BTreeMap<String, Value>, StoreError> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }

    let raw = fs::read_to_string(path).map_err(|source| StoreError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if raw.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    let parsed: Value = serde_json::from_str(&raw).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    match parsed {
        Value::Object(map) => Ok(map.into_iter().collect()),
        _ => Err(StoreError::InvalidSchema {
            path: path.to_path_buf(),
        }),
    }
}

fn write_values(path: &Path, values: &BTreeMap<String, Value>) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| StoreError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let serialized = serde_json::to_string_pretty(values).map_err(StoreError::Serialize)?;
    let temp_path = path.with_extension("json.tmp");

    fs::write(&temp_path, serialized).map_err(|source| StoreError::Write {
        path: temp_path.clone(),
        source,
    })?;

    fs::rename(&temp_path, path).map_err(|source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(())
}
