//! Filesystem-backed device override store.
//!
//! Overrides are a flat JSON object mapping a MAC suffix to a partial
//! device record. Keys beginning with `_` are treated as comments and
//! ignored. Writes go through a temp file in the same directory followed
//! by an atomic rename, so concurrent readers never observe a partial
//! file. Last writer wins; there is no locking.

use crate::mac::MacSuffix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// A partial device record that takes precedence over remote values.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OverrideEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
}

impl OverrideEntry {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.room.is_none() && self.sku.is_none()
    }
}

/// Map from MAC suffix to override entry. BTreeMap keeps the on-disk
/// JSON sorted by key, matching how operators diff the file.
pub type OverrideMap = BTreeMap<MacSuffix, OverrideEntry>;

/// Errors from loading or saving the override file.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Handle to the override JSON file.
#[derive(Debug, Clone)]
pub struct OverrideStore {
    path: PathBuf,
}

impl OverrideStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load overrides, creating an empty file (and parent directories)
    /// if none exists. Comment keys and keys that are not valid MAC
    /// suffixes are dropped with a warning.
    pub fn load(&self) -> Result<OverrideMap, StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        if !self.path.exists() {
            self.save(&OverrideMap::new())?;
            return Ok(OverrideMap::new());
        }

        let raw = fs::read_to_string(&self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        let data: BTreeMap<String, serde_json::Value> =
            serde_json::from_str(&raw).map_err(|source| StoreError::Json {
                path: self.path.clone(),
                source,
            })?;

        let mut map = OverrideMap::new();
        for (key, value) in data {
            if key.starts_with('_') {
                continue;
            }
            let suffix = match MacSuffix::parse(&key) {
                Ok(suffix) => suffix,
                Err(e) => {
                    warn!(key, error = %e, "skipping override with invalid MAC key");
                    continue;
                }
            };
            match serde_json::from_value::<OverrideEntry>(value) {
                Ok(entry) => {
                    map.insert(suffix, entry);
                }
                Err(e) => {
                    warn!(key, error = %e, "skipping malformed override entry");
                }
            }
        }
        Ok(map)
    }

    /// Save overrides atomically: write to a temp file in the target
    /// directory, then rename over the real file.
    pub fn save(&self, overrides: &OverrideMap) -> Result<(), StoreError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        let json = serde_json::to_string_pretty(overrides).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;
        tmp.write_all(json.as_bytes()).map_err(io_err)?;
        tmp.write_all(b"\n").map_err(io_err)?;

        // NamedTempFile removes the temp file on drop if persist fails
        tmp.persist(&self.path)
            .map_err(|e| io_err(e.error))?;

        // Container processes read this file as a non-root user
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o644)).map_err(io_err)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suffix(s: &str) -> MacSuffix {
        MacSuffix::parse(s).unwrap()
    }

    fn entry(name: Option<&str>, room: Option<&str>, sku: Option<&str>) -> OverrideEntry {
        OverrideEntry {
            name: name.map(String::from),
            room: room.map(String::from),
            sku: sku.map(String::from),
        }
    }

    #[test]
    fn test_load_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = OverrideStore::new(dir.path().join("conf.d/device-overrides.json"));
        let map = store.load().unwrap();
        assert!(map.is_empty());
        assert!(store.path().exists());
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = OverrideStore::new(dir.path().join("device-overrides.json"));

        let mut map = OverrideMap::new();
        map.insert(
            suffix("A4C138AABBCC"),
            entry(Some("fridge_sensor"), Some("kitchen"), Some("H5075")),
        );
        map.insert(suffix("A4C138DDEEFF"), entry(None, Some("garage"), None));

        store.save(&map).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded, map);
    }

    #[test]
    fn test_comment_keys_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device-overrides.json");
        fs::write(
            &path,
            r#"{
  "_comment": "maintained by device-admin rename",
  "A4C138AABBCC": {"name": "fridge_sensor"}
}"#,
        )
        .unwrap();

        let store = OverrideStore::new(&path);
        let map = store.load().unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(
            map.get(&suffix("A4C138AABBCC")).unwrap().name.as_deref(),
            Some("fridge_sensor")
        );
    }

    #[test]
    fn test_invalid_mac_key_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device-overrides.json");
        fs::write(&path, r#"{"nothex": {"name": "x"}}"#).unwrap();

        let store = OverrideStore::new(&path);
        let map = store.load().unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn test_partial_entry_serialization_omits_missing_fields() {
        let e = entry(Some("fridge_sensor"), None, None);
        let json = serde_json::to_string(&e).unwrap();
        assert_eq!(json, r#"{"name":"fridge_sensor"}"#);
    }

    #[test]
    fn test_save_is_replace_not_merge() {
        let dir = tempfile::tempdir().unwrap();
        let store = OverrideStore::new(dir.path().join("device-overrides.json"));

        let mut map = OverrideMap::new();
        map.insert(suffix("A4C138AABBCC"), entry(Some("one"), None, None));
        store.save(&map).unwrap();

        let mut second = OverrideMap::new();
        second.insert(suffix("A4C138DDEEFF"), entry(Some("two"), None, None));
        store.save(&second).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, second);
    }
}
