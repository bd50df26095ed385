use log::*;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::{WrtApiError, WrtResult};

pub const STORAGE_KEY_SESSION: &str = "ubus_session";
pub const STORAGE_KEY_CREDENTIALS: &str = "saved_credentials";

/// Small string key/value store persisted between runs.
pub trait ClientStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> WrtResult<()>;
    fn remove(&self, key: &str) -> WrtResult<()>;
}

#[derive(Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClientStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.items.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> WrtResult<()> {
        let mut items = self
            .items
            .lock()
            .map_err(|_| WrtApiError::Storage("lock poisoned".to_string()))?;
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> WrtResult<()> {
        let mut items = self
            .items
            .lock()
            .map_err(|_| WrtApiError::Storage("lock poisoned".to_string()))?;
        items.remove(key);
        Ok(())
    }
}

/// A json object file, rewritten on every change.
pub struct FileStorage {
    path: PathBuf,
    items: Mutex<Map<String, Value>>,
}

impl FileStorage {
    pub fn open(path: &Path) -> WrtResult<Self> {
        let items = if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|err| WrtApiError::Storage(format!("read {} failed: {}", path.display(), err)))?;
            match serde_json::from_str::<Value>(&content) {
                Ok(Value::Object(map)) => map,
                _ => {
                    warn!("storage file {} is not a json object, starting empty", path.display());
                    Map::new()
                }
            }
        } else {
            Map::new()
        };
        Ok(FileStorage {
            path: path.to_path_buf(),
            items: Mutex::new(items),
        })
    }

    fn flush(&self, items: &Map<String, Value>) -> WrtResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| WrtApiError::Storage(format!("create {} failed: {}", parent.display(), err)))?;
        }
        let content = serde_json::to_string_pretty(items)
            .map_err(|err| WrtApiError::Storage(err.to_string()))?;
        std::fs::write(&self.path, content)
            .map_err(|err| WrtApiError::Storage(format!("write {} failed: {}", self.path.display(), err)))
    }
}

impl ClientStorage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        let items = self.items.lock().ok()?;
        items.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
    }

    fn set(&self, key: &str, value: &str) -> WrtResult<()> {
        let mut items = self
            .items
            .lock()
            .map_err(|_| WrtApiError::Storage("lock poisoned".to_string()))?;
        items.insert(key.to_string(), Value::String(value.to_string()));
        self.flush(&items)
    }

    fn remove(&self, key: &str) -> WrtResult<()> {
        let mut items = self
            .items
            .lock()
            .map_err(|_| WrtApiError::Storage("lock poisoned".to_string()))?;
        if items.remove(key).is_some() {
            self.flush(&items)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_storage_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("storage.json");

        let storage = FileStorage::open(&path).unwrap();
        assert!(storage.get(STORAGE_KEY_SESSION).is_none());
        storage.set(STORAGE_KEY_SESSION, "feedface").unwrap();

        let reopened = FileStorage::open(&path).unwrap();
        assert_eq!(reopened.get(STORAGE_KEY_SESSION).unwrap(), "feedface");
        reopened.remove(STORAGE_KEY_SESSION).unwrap();
        assert!(FileStorage::open(&path).unwrap().get(STORAGE_KEY_SESSION).is_none());
    }

    #[test]
    fn test_garbage_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        std::fs::write(&path, "not json").unwrap();
        let storage = FileStorage::open(&path).unwrap();
        assert!(storage.get(STORAGE_KEY_CREDENTIALS).is_none());
    }
}
