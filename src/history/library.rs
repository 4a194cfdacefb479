use log::info;
use tokio::sync::RwLock;

use crate::error::ChatResult;
use crate::history::{ upsert_session, SessionStore };
use crate::models::chat::{ ChatSession, SessionSummary };

/// The in-memory session collection, most recent first, backed by a
/// [`SessionStore`]. Every change writes the whole collection back.
pub struct SessionLibrary {
    store: SessionStore,
    sessions: RwLock<Vec<ChatSession>>,
}

impl SessionLibrary {
    pub async fn open(store: SessionStore) -> Self {
        let sessions = store.load().await;
        Self {
            store,
            sessions: RwLock::new(sessions),
        }
    }

    pub async fn list(&self) -> Vec<SessionSummary> {
        self.sessions.read().await.iter().map(SessionSummary::from).collect()
    }

    pub async fn get(&self, id: &str) -> Option<ChatSession> {
        self.sessions
            .read().await
            .iter()
            .find(|s| s.id == id)
            .cloned()
    }

    pub async fn upsert(&self, session: ChatSession) -> ChatResult<()> {
        let mut sessions = self.sessions.write().await;
        info!("Saving session {} ('{}', {} messages)", session.id, session.title, session.messages.len());
        upsert_session(&mut sessions, session);
        self.store.save(&sessions).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::tests::session;
    use crate::history::{ InMemoryKeyValueStore, KeyValueStore };
    use std::sync::Arc;

    #[tokio::test]
    async fn upsert_writes_the_whole_collection() {
        let backend = Arc::new(InMemoryKeyValueStore::new());
        let library = SessionLibrary::open(SessionStore::new(backend.clone(), "k")).await;

        library.upsert(session("a", "First")).await.unwrap();
        library.upsert(session("b", "Second")).await.unwrap();
        library.upsert(session("a", "First again")).await.unwrap();

        let titles: Vec<_> = library.list().await.into_iter().map(|s| s.title).collect();
        assert_eq!(titles, ["Second", "First again"]);

        let reopened = SessionLibrary::open(SessionStore::new(backend.clone(), "k")).await;
        assert_eq!(reopened.get("a").await.unwrap().title, "First again");
        assert!(backend.get("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unknown_session_is_none() {
        let backend = Arc::new(InMemoryKeyValueStore::new());
        let library = SessionLibrary::open(SessionStore::new(backend, "k")).await;
        assert!(library.get("missing").await.is_none());
    }
}
