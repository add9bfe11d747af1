use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::resources::ObjectRef;

/// Conversation continuity across A2A requests, keyed by `contextId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub agent: ObjectRef,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: &str) -> anyhow::Result<Option<Session>>;
    async fn create(&self, id: &str, agent: &ObjectRef) -> anyhow::Result<Session>;
}

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, id: &str) -> anyhow::Result<Option<Session>> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn create(&self, id: &str, agent: &ObjectRef) -> anyhow::Result<Session> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(id.to_string())
            .or_insert_with(|| Session {
                id: id.to_string(),
                agent: agent.clone(),
                created_at: Utc::now(),
            })
            .clone();
        Ok(session)
    }
}

/// Look up the session for `context_id`, creating it when absent. Without a
/// context id a fresh one is generated.
pub async fn resolve_session(
    store: &dyn SessionStore,
    context_id: Option<&str>,
    agent: &ObjectRef,
) -> anyhow::Result<Session> {
    let id = match context_id.filter(|c| !c.is_empty()) {
        Some(id) => {
            if let Some(existing) = store.get(id).await? {
                return Ok(existing);
            }
            tracing::debug!("creating session {} for {}", id, agent);
            id.to_string()
        }
        None => uuid::Uuid::new_v4().to_string(),
    };
    store.create(&id, agent).await
}
