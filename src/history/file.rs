use async_trait::async_trait;
use log::{ debug, warn };
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;

use crate::error::{ ChatError, ChatResult };
use crate::history::KeyValueStore;

/// Keeps every key in one JSON object on disk. Writes go to a temporary file
/// that is renamed over the previous one.
pub struct FileKeyValueStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileKeyValueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn read_entries(&self) -> ChatResult<HashMap<String, String>> {
        match fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(HashMap::new()),
            Ok(content) =>
                serde_json
                    ::from_str(&content)
                    .map_err(|e|
                        ChatError::PersistenceCorruption(
                            format!("{} is not a valid store file: {}", self.path.display(), e)
                        )
                    ),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(ChatError::Storage(format!("Failed to read {}: {}", self.path.display(), e))),
        }
    }
}

#[async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn get(&self, key: &str) -> ChatResult<Option<String>> {
        Ok(self.read_entries().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> ChatResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut entries = match self.read_entries().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Overwriting unreadable store file {}: {}", self.path.display(), e);
                HashMap::new()
            }
        };
        entries.insert(key.to_string(), value.to_string());

        let io_err = |e: std::io::Error| ChatError::Storage(format!("{}: {}", self.path.display(), e));
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let json = serde_json
            ::to_string_pretty(&entries)
            .map_err(|e| ChatError::Storage(e.to_string()))?;
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, json).await.map_err(io_err)?;
        fs::rename(&temp_path, &self.path).await.map_err(io_err)?;
        debug!("Wrote key '{}' to {}", key, self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sessions.json");

        let store = FileKeyValueStore::new(&path);
        assert_eq!(store.get("cortex_sessions").await.unwrap(), None);
        store.set("cortex_sessions", "[]").await.unwrap();
        store.set("other", "x").await.unwrap();

        let reopened = FileKeyValueStore::new(&path);
        assert_eq!(reopened.get("cortex_sessions").await.unwrap().as_deref(), Some("[]"));
        assert_eq!(reopened.get("other").await.unwrap().as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn corrupt_file_is_reported_then_replaced_on_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        std::fs::write(&path, "not json").unwrap();

        let store = FileKeyValueStore::new(&path);
        assert!(matches!(store.get("k").await, Err(ChatError::PersistenceCorruption(_))));

        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }
}
