//! Module overrides persisted as a JSON object keyed by module id.
//!
//! ```json
//! { "system.help": { "enabled": true, "mode": "any", "hardcoded": false } }
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use voxterm_core::collab::OverrideStore;
use voxterm_core::error::StoreError;
use voxterm_core::types::Overrides;

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OverrideStore for JsonFileStore {
    /// Missing file means no overrides. A file that is not a JSON object is
    /// an error; the caller decides whether to start without overrides.
    fn load(&self) -> Result<Map<String, Value>, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("overrides: {} does not exist yet", self.path.display());
                return Ok(Map::new());
            }
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&raw)? {
            Value::Object(map) => {
                info!("overrides: loaded {} entries from {}", map.len(), self.path.display());
                Ok(map)
            }
            other => {
                warn!("overrides: {} holds {other} instead of an object", self.path.display());
                Ok(Map::new())
            }
        }
    }

    /// Write to a temp file next to the target, then rename over it.
    fn save(&self, overrides: &Overrides) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(overrides)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        info!("overrides: saved {} entries to {}", overrides.len(), self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxterm_core::types::{ModuleId, ModuleOverride, RunMode};

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("overrides.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn saves_and_loads_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested").join("overrides.json"));

        let mut overrides = Overrides::new();
        overrides.insert(
            ModuleId::from("system.count"),
            ModuleOverride {
                enabled: false,
                mode: RunMode::Debug,
                hardcoded: false,
            },
        );
        store.save(&overrides).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded["system.count"]["enabled"], false);
        assert_eq!(loaded["system.count"]["mode"], "debug");
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn malformed_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overrides.json");
        fs::write(&path, "{ not json").unwrap();
        let err = JsonFileStore::new(&path).load().unwrap_err();
        assert!(matches!(err, StoreError::Encoding(_)));
    }

    #[test]
    fn non_object_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overrides.json");
        fs::write(&path, "[1, 2]").unwrap();
        assert!(JsonFileStore::new(&path).load().unwrap().is_empty());
    }
}
