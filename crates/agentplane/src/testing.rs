//! Shared fixtures for unit tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use crate::a2a::executor::{EventStream, ExecutionEvent};
use crate::a2a::registry::TaskHandler;
use crate::a2a::session::Session;
use crate::reconciler::ToolDiscoverer;
use crate::resources::{
    Agent, AgentToolRef, AgentType, DeploymentOverrides, DiscoveredTool, Memory, MemorySpec,
    ModelConfig, ModelConfigSpec, Object, ObjectMeta, PineconeConfig, RemoteMcpServer,
    RemoteMcpServerSpec, Resource, Secret, Tool,
};
use crate::store::{MemoryStore, ResourceStore};
use crate::translator::{AgentConfig, RemoteEndpoint};

pub const TEST_MANAGER: &str = "test";

pub async fn store_with(objects: Vec<Object>) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for obj in objects {
        store
            .apply(obj, TEST_MANAGER, true)
            .await
            .expect("seed store");
    }
    store
}

pub async fn put<S: ResourceStore + ?Sized>(store: &S, resource: impl Resource) -> Object {
    store
        .apply(resource.into_object(), TEST_MANAGER, true)
        .await
        .expect("apply fixture")
}

pub fn model_config(ns: &str, name: &str, provider: &str) -> ModelConfig {
    ModelConfig {
        metadata: ObjectMeta::new(ns, name),
        spec: ModelConfigSpec {
            model: "gpt-4o".into(),
            provider: provider.into(),
            api_key_secret: Some("openai".into()),
            api_key_secret_key: Some("key".into()),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn secret(ns: &str, name: &str, data: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: ObjectMeta::new(ns, name),
        data: data
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

pub fn agent(ns: &str, name: &str, model_ref: &str) -> Agent {
    let mut a = Agent {
        metadata: ObjectMeta::new(ns, name),
        ..Default::default()
    };
    a.spec.description = format!("{name} agent");
    a.spec.system_message = format!("You are {name}.");
    a.spec.model_config = model_ref.into();
    a
}

pub fn add_agent_tool(agent: &mut Agent, reference: &str) {
    agent.spec.tools.push(Tool::Agent {
        agent: AgentToolRef {
            reference: reference.into(),
        },
    });
}

pub fn byo_agent(ns: &str, name: &str, image: &str) -> Agent {
    let mut a = Agent {
        metadata: ObjectMeta::new(ns, name),
        ..Default::default()
    };
    a.spec.agent_type = AgentType::Byo;
    a.spec.description = format!("{name} (byo)");
    a.spec.deployment = Some(DeploymentOverrides {
        image: Some(image.into()).filter(|i: &String| !i.is_empty()),
        ..Default::default()
    });
    a
}

pub fn memory(ns: &str, name: &str) -> Memory {
    Memory {
        metadata: ObjectMeta::new(ns, name),
        spec: MemorySpec {
            provider: "Pinecone".into(),
            api_key_secret_ref: "pinecone".into(),
            api_key_secret_key: "key".into(),
            pinecone: Some(PineconeConfig {
                index_host: "https://idx.pinecone.io".into(),
                top_k: Some(5),
                ..Default::default()
            }),
        },
        ..Default::default()
    }
}

pub fn remote_server(ns: &str, name: &str, url: &str) -> RemoteMcpServer {
    RemoteMcpServer {
        metadata: ObjectMeta::new(ns, name),
        spec: RemoteMcpServerSpec {
            description: format!("{name} tools"),
            url: url.into(),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn sample_agent_config(name: &str) -> AgentConfig {
    AgentConfig {
        name: name.into(),
        namespace: "ns".into(),
        description: format!("{name} agent"),
        instruction: format!("You are {name}."),
        ..Default::default()
    }
}

/// A task handler with canned behaviour.
pub struct ScriptedHandler {
    reply: String,
    events: Vec<Result<String, String>>,
    delay: Option<Duration>,
    endless: bool,
}

impl ScriptedHandler {
    fn base() -> Self {
        Self {
            reply: String::new(),
            events: Vec::new(),
            delay: None,
            endless: false,
        }
    }

    pub fn replying(text: &str) -> Self {
        Self {
            reply: text.into(),
            ..Self::base()
        }
    }

    /// `Ok(text)` becomes a TextMessage, `Err(msg)` a stream error.
    pub fn streaming(events: Vec<Result<&str, &str>>) -> Self {
        Self {
            events: events
                .into_iter()
                .map(|e| e.map(str::to_string).map_err(str::to_string))
                .collect(),
            ..Self::base()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::base()
        }
    }

    /// Emits one chunk then never finishes.
    pub fn endless() -> Self {
        Self {
            events: vec![Ok("tick".into())],
            endless: true,
            ..Self::base()
        }
    }
}

#[async_trait]
impl TaskHandler for ScriptedHandler {
    async fn handle(&self, _text: &str, _session: &Session) -> anyhow::Result<String> {
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        Ok(self.reply.clone())
    }

    async fn handle_stream(&self, _text: &str, _session: &Session) -> anyhow::Result<EventStream> {
        let items: Vec<anyhow::Result<ExecutionEvent>> = self
            .events
            .iter()
            .map(|e| match e {
                Ok(text) => Ok(ExecutionEvent::TextMessage {
                    source: "assistant".into(),
                    content: text.clone(),
                    usage: None,
                }),
                Err(msg) => Err(anyhow::anyhow!(msg.clone())),
            })
            .collect();
        let stream = futures::stream::iter(items);
        if self.endless {
            Ok(stream.chain(futures::stream::pending()).boxed())
        } else {
            Ok(stream.boxed())
        }
    }
}

/// Reports a fixed tool list for every endpoint.
#[derive(Default)]
pub struct StaticDiscoverer {
    pub tools: Vec<DiscoveredTool>,
}

#[async_trait]
impl ToolDiscoverer for StaticDiscoverer {
    async fn list_tools(&self, _endpoint: &RemoteEndpoint) -> anyhow::Result<Vec<DiscoveredTool>> {
        Ok(self.tools.clone())
    }
}
