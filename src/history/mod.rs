mod file;
mod library;
mod memory;
mod redis;

pub use self::file::FileKeyValueStore;
pub use self::library::SessionLibrary;
pub use self::memory::InMemoryKeyValueStore;
pub use self::redis::RedisKeyValueStore;

use async_trait::async_trait;
use log::{ error, info };
use std::sync::Arc;

use crate::cli::Args;
use crate::error::{ ChatError, ChatResult };
use crate::models::chat::ChatSession;

/// Key-value storage collaborator the session collection is persisted into.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> ChatResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> ChatResult<()>;
}

pub fn create_kv_store(args: &Args) -> ChatResult<Arc<dyn KeyValueStore>> {
    match args.history_type.to_lowercase().as_str() {
        "redis" => {
            let store = RedisKeyValueStore::new(&args.history_host)?;
            Ok(Arc::new(store))
        }
        "file" => Ok(Arc::new(FileKeyValueStore::new(&args.history_path))),
        "memory" => Ok(Arc::new(InMemoryKeyValueStore::new())),
        _ =>
            Err(
                ChatError::Configuration(
                    format!("Unsupported history store type: {}", args.history_type)
                )
            ),
    }
}

/// Loads and saves the full ordered session collection under one key.
#[derive(Clone)]
pub struct SessionStore {
    backend: Arc<dyn KeyValueStore>,
    key: String,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            backend,
            key: key.into(),
        }
    }

    /// Never fails: an absent, unreachable or corrupt record yields an empty
    /// collection and is logged.
    pub async fn load(&self) -> Vec<ChatSession> {
        let raw = match self.backend.get(&self.key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                info!("No stored sessions under '{}'", self.key);
                return Vec::new();
            }
            Err(e) => {
                error!("Failed to read sessions from storage: {}", e);
                return Vec::new();
            }
        };

        match parse_sessions(&raw) {
            Ok(sessions) => {
                info!("Loaded {} stored sessions", sessions.len());
                sessions
            }
            Err(e) => {
                error!("{}; starting with empty history", e);
                Vec::new()
            }
        }
    }

    /// Replaces the stored record with `sessions`.
    pub async fn save(&self, sessions: &[ChatSession]) -> ChatResult<()> {
        let json = serde_json
            ::to_string(sessions)
            .map_err(|e| ChatError::Storage(format!("Failed to serialize sessions: {}", e)))?;
        self.backend.set(&self.key, &json).await
    }
}

fn parse_sessions(raw: &str) -> ChatResult<Vec<ChatSession>> {
    serde_json::from_str(raw).map_err(|e| ChatError::PersistenceCorruption(e.to_string()))
}

/// Replaces a session with the same id in place, otherwise puts it first.
pub fn upsert_session(sessions: &mut Vec<ChatSession>, session: ChatSession) {
    match sessions.iter().position(|s| s.id == session.id) {
        Some(index) => {
            sessions[index] = session;
        }
        None => sessions.insert(0, session),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::chat::Message;
    use chrono::{ TimeZone, Utc };

    pub(crate) fn session(id: &str, title: &str) -> ChatSession {
        ChatSession {
            id: id.to_string(),
            title: title.to_string(),
            messages: vec![Message::greeting("hi"), Message::user(title.to_string(), vec![])],
            created_at: Utc::now(),
            last_model_id: None,
        }
    }

    #[test]
    fn upsert_keeps_position_of_known_ids() {
        let mut sessions = vec![session("a", "A"), session("b", "B"), session("c", "C")];
        upsert_session(&mut sessions, session("b", "B2"));
        let ids: Vec<_> = sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert_eq!(sessions[1].title, "B2");
    }

    #[test]
    fn upsert_prepends_new_ids() {
        let mut sessions = vec![session("a", "A")];
        upsert_session(&mut sessions, session("z", "Z"));
        assert_eq!(sessions[0].id, "z");
        assert_eq!(sessions.len(), 2);
    }

    #[tokio::test]
    async fn round_trips_precise_timestamps() {
        let store = SessionStore::new(Arc::new(InMemoryKeyValueStore::new()), "k");
        let mut s = session("a", "A");
        s.created_at = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        s.messages[1].timestamp = Utc.timestamp_opt(1_700_000_001, 987_654_321).unwrap();

        store.save(&[s.clone()]).await.unwrap();
        let loaded = store.load().await;
        assert_eq!(loaded, vec![s]);
    }

    #[tokio::test]
    async fn corrupt_record_loads_as_empty() {
        let backend = Arc::new(InMemoryKeyValueStore::new());
        backend.set("k", "{ definitely not sessions").await.unwrap();
        let store = SessionStore::new(backend, "k");
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn missing_record_loads_as_empty() {
        let store = SessionStore::new(Arc::new(InMemoryKeyValueStore::new()), "k");
        assert!(store.load().await.is_empty());
    }

    #[test]
    fn corrupt_payload_is_classified() {
        assert!(matches!(parse_sessions("[1,2]"), Err(ChatError::PersistenceCorruption(_))));
    }
}
