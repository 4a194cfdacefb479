use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::ChatResult;
use crate::history::KeyValueStore;

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct InMemoryKeyValueStore {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> ChatResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> ChatResult<()> {
        self.entries.write().await.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
