//! Per-installation player settings.
//!
//! A small key/value store that survives restarts: the player's display
//! name, their chosen skin and the room they last asked for. Two
//! implementations are provided: [`MemorySettings`] for tests and
//! headless clients, and [`JsonFileSettings`], which persists to a JSON
//! object on disk.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use rand::Rng;
use serde_json::Value;
use tether_protocol::{JoinOptions, RoomSelector};
use tether_schema::{DEFAULT_DISPLAY_NAME, SkinCatalog};
use tracing::{debug, info};

/// Display name to join with.
pub const PLAYER_NAME_KEY: &str = "PlayerName";
/// Selected skin index.
pub const SKIN_ID_KEY: &str = "SkinId";
/// Name of the room to join when not using quick play.
pub const ROOM_NAME_KEY: &str = "RoomId";
/// `"quickplay"` (also the default) joins any room with space; anything
/// else joins by name.
pub const JOIN_MODE_KEY: &str = "JoinMode";

pub const JOIN_MODE_QUICKPLAY: &str = "quickplay";
/// Join the room stored under [`ROOM_NAME_KEY`].
pub const JOIN_MODE_NAMED: &str = "join";

/// Room joined by name when no room name is stored.
pub const DEFAULT_ROOM: &str = "default";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write settings file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to serialize settings: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Persistent string and integer settings.
///
/// Reads never fail: a missing key, or a key holding a value of the other
/// type, yields `default`.
pub trait SettingsStore {
    fn get_string(&self, key: &str, default: &str) -> String;

    fn get_int(&self, key: &str, default: i64) -> i64;

    fn set_string(&mut self, key: &str, value: &str) -> Result<(), SettingsError>;

    fn set_int(&mut self, key: &str, value: i64) -> Result<(), SettingsError>;
}

/// Settings held in memory only.
#[derive(Debug, Clone, Default)]
pub struct MemorySettings {
    values: BTreeMap<String, Value>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

impl SettingsStore for MemorySettings {
    fn get_string(&self, key: &str, default: &str) -> String {
        self.values
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_owned()
    }

    fn get_int(&self, key: &str, default: i64) -> i64 {
        self.values
            .get(key)
            .and_then(Value::as_i64)
            .unwrap_or(default)
    }

    fn set_string(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        self.values.insert(key.to_owned(), Value::from(value));
        Ok(())
    }

    fn set_int(&mut self, key: &str, value: i64) -> Result<(), SettingsError> {
        self.values.insert(key.to_owned(), Value::from(value));
        Ok(())
    }
}

/// Settings persisted as a flat JSON object. Every write rewrites the file.
#[derive(Debug)]
pub struct JsonFileSettings {
    path: PathBuf,
    inner: MemorySettings,
}

impl JsonFileSettings {
    /// Opens the settings file at `path`, starting empty if it doesn't
    /// exist yet. The file is only created on the first write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let inner = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|source| SettingsError::Read {
                path: path.clone(),
                source,
            })?;
            let values: BTreeMap<String, Value> =
                serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
                    path: path.clone(),
                    source,
                })?;
            debug!(path = %path.display(), keys = values.len(), "settings loaded");
            MemorySettings { values }
        } else {
            MemorySettings::new()
        };
        Ok(Self { path, inner })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<(), SettingsError> {
        let content =
            serde_json::to_string_pretty(&self.inner.values).map_err(SettingsError::Serialize)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| SettingsError::Write {
                    path: self.path.clone(),
                    source,
                })?;
            }
        }
        fs::write(&self.path, content).map_err(|source| SettingsError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

impl SettingsStore for JsonFileSettings {
    fn get_string(&self, key: &str, default: &str) -> String {
        self.inner.get_string(key, default)
    }

    fn get_int(&self, key: &str, default: i64) -> i64 {
        self.inner.get_int(key, default)
    }

    fn set_string(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        self.inner.set_string(key, value)?;
        self.save()
    }

    fn set_int(&mut self, key: &str, value: i64) -> Result<(), SettingsError> {
        self.inner.set_int(key, value)?;
        self.save()
    }
}

/// The skin this installation uses.
///
/// If nothing valid is stored, picks one at random and persists it, so the
/// choice is made once per installation rather than once per launch.
pub fn stored_skin(
    store: &mut impl SettingsStore,
    catalog: SkinCatalog,
) -> Result<u32, SettingsError> {
    let stored = store.get_int(SKIN_ID_KEY, -1);
    if catalog.contains(stored) {
        return Ok(catalog.clamp(stored));
    }
    let picked = rand::rng().random_range(0..catalog.size().max(1));
    store.set_int(SKIN_ID_KEY, i64::from(picked))?;
    info!(skin = picked, "no stored skin, picked one");
    Ok(picked)
}

/// Join options from the stored display name and skin.
pub fn join_options_from_settings(
    store: &mut impl SettingsStore,
    catalog: SkinCatalog,
) -> Result<JoinOptions, SettingsError> {
    let skin = stored_skin(store, catalog)?;
    let name = store.get_string(PLAYER_NAME_KEY, DEFAULT_DISPLAY_NAME);
    Ok(JoinOptions::new(name, i64::from(skin)))
}

/// The room the player asked for: any room in quick play, otherwise the
/// stored room name. A player who never picked a mode gets quick play.
pub fn selector_from_settings(store: &impl SettingsStore) -> RoomSelector {
    if store.get_string(JOIN_MODE_KEY, JOIN_MODE_QUICKPLAY) == JOIN_MODE_QUICKPLAY {
        return RoomSelector::Any;
    }
    let name = store.get_string(ROOM_NAME_KEY, DEFAULT_ROOM);
    if name.trim().is_empty() {
        RoomSelector::named(DEFAULT_ROOM)
    } else {
        RoomSelector::named(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_settings_missing_key_returns_default() {
        let store = MemorySettings::new();
        assert_eq!(store.get_string(PLAYER_NAME_KEY, "Player"), "Player");
        assert_eq!(store.get_int(SKIN_ID_KEY, 3), 3);
    }

    #[test]
    fn test_memory_settings_wrong_type_returns_default() {
        let mut store = MemorySettings::new();
        store.set_string(SKIN_ID_KEY, "red").unwrap();
        assert_eq!(store.get_int(SKIN_ID_KEY, 1), 1);
    }

    #[test]
    fn test_stored_skin_valid_value_is_kept() {
        let mut store = MemorySettings::new();
        store.set_int(SKIN_ID_KEY, 2).unwrap();
        assert_eq!(stored_skin(&mut store, SkinCatalog::new(5)).unwrap(), 2);
    }

    #[test]
    fn test_stored_skin_missing_picks_and_persists() {
        let mut store = MemorySettings::new();
        let picked = stored_skin(&mut store, SkinCatalog::new(5)).unwrap();
        assert!(picked < 5);
        assert_eq!(store.get_int(SKIN_ID_KEY, -1), i64::from(picked));
        // Stable from now on.
        assert_eq!(stored_skin(&mut store, SkinCatalog::new(5)).unwrap(), picked);
    }

    #[test]
    fn test_stored_skin_out_of_range_is_replaced() {
        let mut store = MemorySettings::new();
        store.set_int(SKIN_ID_KEY, 42).unwrap();
        let picked = stored_skin(&mut store, SkinCatalog::new(3)).unwrap();
        assert!(picked < 3);
        assert_eq!(store.get_int(SKIN_ID_KEY, -1), i64::from(picked));
    }

    #[test]
    fn test_join_options_from_settings_uses_stored_name() {
        let mut store = MemorySettings::new();
        store.set_string(PLAYER_NAME_KEY, "Ada").unwrap();
        store.set_int(SKIN_ID_KEY, 1).unwrap();
        let options = join_options_from_settings(&mut store, SkinCatalog::new(5)).unwrap();
        assert_eq!(options.display_name, "Ada");
        assert_eq!(options.cosmetic_index, 1);
    }

    #[test]
    fn test_join_options_from_settings_default_name() {
        let mut store = MemorySettings::new();
        let options = join_options_from_settings(&mut store, SkinCatalog::new(5)).unwrap();
        assert_eq!(options.display_name, "Player");
    }

    #[test]
    fn test_selector_from_settings() {
        let mut store = MemorySettings::new();
        assert_eq!(selector_from_settings(&store), RoomSelector::Any);

        store.set_string(JOIN_MODE_KEY, JOIN_MODE_NAMED).unwrap();
        assert_eq!(selector_from_settings(&store), RoomSelector::named("default"));

        store.set_string(ROOM_NAME_KEY, "R1").unwrap();
        assert_eq!(selector_from_settings(&store), RoomSelector::named("R1"));

        store.set_string(JOIN_MODE_KEY, JOIN_MODE_QUICKPLAY).unwrap();
        assert_eq!(selector_from_settings(&store), RoomSelector::Any);
    }

    #[test]
    fn test_json_file_settings_persist_across_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut store = JsonFileSettings::open(&path).unwrap();
        assert!(!path.exists());
        store.set_string(PLAYER_NAME_KEY, "Ada").unwrap();
        store.set_int(SKIN_ID_KEY, 4).unwrap();
        assert!(path.exists());

        let reopened = JsonFileSettings::open(&path).unwrap();
        assert_eq!(reopened.get_string(PLAYER_NAME_KEY, ""), "Ada");
        assert_eq!(reopened.get_int(SKIN_ID_KEY, -1), 4);
    }

    #[test]
    fn test_json_file_settings_corrupt_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            JsonFileSettings::open(&path),
            Err(SettingsError::Parse { .. })
        ));
    }
}
