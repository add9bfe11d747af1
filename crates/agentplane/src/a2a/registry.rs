use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::executor::{AgentExecutor, EventStream};
use super::session::Session;
use super::types::AgentCard;
use crate::resources::ObjectRef;
use crate::translator::AgentConfig;

pub const A2A_PATH_PREFIX: &str = "/api/a2a/";

/// What the bridge calls to run a task for one agent.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, text: &str, session: &Session) -> anyhow::Result<String>;
    async fn handle_stream(&self, text: &str, session: &Session) -> anyhow::Result<EventStream>;
}

/// Binds a compiled agent config to the execution runtime.
pub struct ExecutorHandler {
    executor: Arc<dyn AgentExecutor>,
    config: AgentConfig,
}

impl ExecutorHandler {
    pub fn new(executor: Arc<dyn AgentExecutor>, config: AgentConfig) -> Self {
        Self { executor, config }
    }
}

#[async_trait]
impl TaskHandler for ExecutorHandler {
    async fn handle(&self, text: &str, session: &Session) -> anyhow::Result<String> {
        self.executor.invoke(&self.config, text, Some(session)).await
    }

    async fn handle_stream(&self, text: &str, session: &Session) -> anyhow::Result<EventStream> {
        self.executor
            .invoke_stream(&self.config, text, Some(session))
            .await
    }
}

#[derive(Clone)]
pub struct HandlerEntry {
    pub agent: ObjectRef,
    pub card: AgentCard,
    pub handler: Arc<dyn TaskHandler>,
}

/// Agent → handler table consulted by the HTTP surface.
#[derive(Default)]
pub struct HandlerRegistry {
    entries: RwLock<HashMap<ObjectRef, HandlerEntry>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_handler(
        &self,
        agent: ObjectRef,
        card: AgentCard,
        handler: Arc<dyn TaskHandler>,
    ) {
        tracing::debug!("registering a2a handler for {}", agent);
        let entry = HandlerEntry {
            agent: agent.clone(),
            card,
            handler,
        };
        self.entries.write().await.insert(agent, entry);
    }

    pub async fn remove_handler(&self, agent: &ObjectRef) -> bool {
        let removed = self.entries.write().await.remove(agent).is_some();
        if removed {
            tracing::debug!("removed a2a handler for {}", agent);
        }
        removed
    }

    pub async fn get(&self, agent: &ObjectRef) -> Option<HandlerEntry> {
        self.entries.read().await.get(agent).cloned()
    }

    /// Dispatch on `/api/a2a/{namespace}/{name}[/...]`; the HTTP surface
    /// resolves every agent request through here.
    pub async fn route(&self, path: &str) -> Option<HandlerEntry> {
        let agent = parse_agent_path(path)?;
        self.get(&agent).await
    }
}

fn parse_agent_path(path: &str) -> Option<ObjectRef> {
    let rest = path.strip_prefix(A2A_PATH_PREFIX)?;
    let mut segments = rest.split('/');
    let namespace = segments.next().filter(|s| !s.is_empty())?;
    let name = segments.next().filter(|s| !s.is_empty())?;
    Some(ObjectRef::new(namespace, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl TaskHandler for Echo {
        async fn handle(&self, text: &str, _session: &Session) -> anyhow::Result<String> {
            Ok(text.to_string())
        }

        async fn handle_stream(
            &self,
            _text: &str,
            _session: &Session,
        ) -> anyhow::Result<EventStream> {
            anyhow::bail!("not streaming")
        }
    }

    #[test]
    fn agent_paths_parse() {
        assert_eq!(
            parse_agent_path("/api/a2a/ns/a/"),
            Some(ObjectRef::new("ns", "a"))
        );
        assert_eq!(
            parse_agent_path("/api/a2a/ns/a/.well-known/agent.json"),
            Some(ObjectRef::new("ns", "a"))
        );
        assert_eq!(parse_agent_path("/api/a2a/ns"), None);
        assert_eq!(parse_agent_path("/health"), None);
    }

    #[tokio::test]
    async fn route_finds_registered_agents_only() {
        let registry = HandlerRegistry::new();
        let agent = ObjectRef::new("ns", "a");
        registry
            .set_handler(agent.clone(), AgentCard::default(), Arc::new(Echo))
            .await;
        assert!(registry.route("/api/a2a/ns/a").await.is_some());
        assert!(registry.route("/api/a2a/ns/b").await.is_none());

        assert!(registry.remove_handler(&agent).await);
        assert!(registry.route("/api/a2a/ns/a").await.is_none());
        assert!(!registry.remove_handler(&agent).await);
    }
}
