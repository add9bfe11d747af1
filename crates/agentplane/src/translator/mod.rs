//! Agent translation: compile an `Agent` and everything it references into an
//! [`AgentConfig`], a manifest set, and a content hash.
//!
//! Nested agents are compiled recursively. The reference graph must be a DAG
//! no deeper than [`MAX_DEPTH`]; each level receives its own
//! [`TraversalState`] so sibling branches never observe each other's path.

pub mod manifest;
pub mod model;
pub mod tools;
pub mod types;

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::a2a::types::{AgentCapabilities, AgentCard};
use crate::error::TranslateError;
use crate::resources::{Agent, AgentType, EnvVar, Memory, ObjectRef, resolve};
use crate::store::{ResourceStore, require_typed};

pub use manifest::{CONFIG_HASH_ANNOTATION, CONFIG_HASH_LABEL, DeploymentInputs};
pub use types::{AgentConfig, AgentOutputs, NestedAgent, RemoteAgent, RemoteEndpoint};

use manifest::ManifestSet;
use types::MemoryConfig;

/// Maximum nested-agent depth below a root agent.
pub const MAX_DEPTH: usize = 10;

/// Immutable per-level view of the reference path from the root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraversalState {
    depth: usize,
    visited: BTreeSet<ObjectRef>,
}

impl TraversalState {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn has_visited(&self, reference: &ObjectRef) -> bool {
        self.visited.contains(reference)
    }

    /// Reject `callee` when it would close a loop or exceed the depth bound.
    pub fn check(&self, caller: &ObjectRef, callee: &ObjectRef) -> Result<(), TranslateError> {
        if caller == callee {
            return Err(TranslateError::SelfReference {
                agent: caller.clone(),
            });
        }
        if self.visited.contains(callee) {
            return Err(TranslateError::Cycle {
                caller: caller.clone(),
                callee: callee.clone(),
            });
        }
        if self.depth + 1 > MAX_DEPTH {
            return Err(TranslateError::DepthExceeded {
                caller: caller.clone(),
                callee: callee.clone(),
                max: MAX_DEPTH,
            });
        }
        Ok(())
    }

    /// State for the callee's level: one deeper, with `caller` on the path.
    pub fn descend(&self, caller: &ObjectRef) -> Self {
        let mut visited = self.visited.clone();
        visited.insert(caller.clone());
        Self {
            depth: self.depth + 1,
            visited,
        }
    }
}

/// Deployment-wide knobs for synthesized workloads.
#[derive(Debug, Clone)]
pub struct TranslatorOptions {
    /// Runtime image for declarative agents.
    pub image: String,
    pub image_pull_policy: String,
    /// Container and Service port.
    pub port: u16,
    /// Public base URL advertised in agent cards.
    pub a2a_base_url: String,
    /// Tracing env injected into every agent pod.
    pub ambient_env: Vec<EnvVar>,
}

impl Default for TranslatorOptions {
    fn default() -> Self {
        Self {
            image: format!(
                "ghcr.io/agentplane/agent-runtime:{}",
                env!("CARGO_PKG_VERSION")
            ),
            image_pull_policy: "IfNotPresent".to_string(),
            port: 8080,
            a2a_base_url: "http://127.0.0.1:8083".to_string(),
            ambient_env: Vec::new(),
        }
    }
}

pub struct Translator {
    store: Arc<dyn ResourceStore>,
    options: TranslatorOptions,
}

impl Translator {
    pub fn new(store: Arc<dyn ResourceStore>, options: TranslatorOptions) -> Self {
        Self { store, options }
    }

    pub fn options(&self) -> &TranslatorOptions {
        &self.options
    }

    /// Compile `agent` into its config, manifests and content hash.
    pub async fn translate(&self, agent: &Agent) -> Result<AgentOutputs, TranslateError> {
        let image = manifest::image_for(agent, &self.options).ok_or_else(|| {
            TranslateError::MissingImage {
                agent: agent.metadata.object_ref(),
            }
        })?;
        let mut inputs = DeploymentInputs::default();
        let config = self
            .compile(agent, TraversalState::root(), &mut inputs)
            .await?;
        let pod = manifest::pod_inputs(agent, &inputs, &self.options);
        let hash = manifest::content_hash(&config, &pod, agent, &inputs, &self.options)?;
        let config_json = serde_json::to_string_pretty(&config)?;
        let card_json = serde_json::to_string_pretty(&config.card)?;
        let manifests = manifest::build(
            ManifestSet {
                agent,
                config_json,
                card_json,
                pod,
                image,
                hash: &hash,
            },
            &self.options,
        );
        tracing::debug!(
            "translated agent {} (hash={}, nested={}, tools={})",
            agent.metadata.object_ref(),
            &hash[..12],
            config.agents.len(),
            config.remote_tools.len()
        );
        Ok(AgentOutputs {
            manifests,
            config,
            hash,
        })
    }

    fn card_for(&self, agent: &Agent) -> AgentCard {
        let meta = &agent.metadata;
        AgentCard {
            name: meta.name.clone(),
            description: agent.spec.description.clone(),
            url: format!(
                "{}/api/a2a/{}/{}/",
                self.options.a2a_base_url.trim_end_matches('/'),
                meta.namespace,
                meta.name
            ),
            version: env!("CARGO_PKG_VERSION").to_string(),
            capabilities: AgentCapabilities { streaming: true },
            default_input_modes: vec!["text".to_string()],
            default_output_modes: vec!["text".to_string()],
            skills: agent
                .spec
                .a2a_config
                .as_ref()
                .map(|c| c.skills.clone())
                .unwrap_or_default(),
        }
    }

    fn remote_pointer(&self, agent: &Agent) -> RemoteAgent {
        let meta = &agent.metadata;
        RemoteAgent {
            name: meta.name.clone(),
            url: format!(
                "http://{}.{}:{}",
                meta.name, meta.namespace, self.options.port
            ),
            description: agent.spec.description.clone(),
        }
    }

    async fn resolve_memory(
        &self,
        agent: &Agent,
        inputs: &mut DeploymentInputs,
    ) -> Result<Vec<MemoryConfig>, TranslateError> {
        let mut out = Vec::new();
        for reference in &agent.spec.memory {
            let r = resolve(reference, &agent.metadata.namespace)?;
            let memory: Memory = require_typed(&*self.store, &r).await?;
            let spec = &memory.spec;
            if !spec.provider.eq_ignore_ascii_case("pinecone") {
                return Err(TranslateError::UnknownProvider {
                    resource: r,
                    provider: spec.provider.clone(),
                });
            }
            let pinecone = spec.pinecone.as_ref().ok_or_else(|| {
                TranslateError::MissingProviderConfig {
                    resource: r.clone(),
                    provider: spec.provider.clone(),
                    field: "pinecone",
                }
            })?;
            let secret = resolve(&spec.api_key_secret_ref, &r.namespace)?;
            model::secret_value(&*self.store, &secret, &spec.api_key_secret_key, inputs).await?;
            let env_name = format!(
                "MEMORY_{}_API_KEY",
                r.name.to_ascii_uppercase().replace(['-', '.'], "_")
            );
            inputs.add_env(EnvVar::from_secret(
                env_name.clone(),
                secret.name.clone(),
                spec.api_key_secret_key.clone(),
            ));
            out.push(MemoryConfig {
                name: r.name.clone(),
                provider: "pinecone".to_string(),
                api_key_env: env_name,
                index_host: pinecone.index_host.clone(),
                top_k: pinecone.top_k,
                namespace: pinecone.namespace.clone(),
                record_fields: pinecone.record_fields.clone(),
                score_threshold: pinecone.score_threshold.clone(),
            });
        }
        Ok(out)
    }

    /// Compile one level. `state` describes the path that led here.
    fn compile<'a>(
        &'a self,
        agent: &'a Agent,
        state: TraversalState,
        inputs: &'a mut DeploymentInputs,
    ) -> BoxFuture<'a, Result<AgentConfig, TranslateError>> {
        Box::pin(async move {
            let caller = agent.metadata.object_ref();
            let mut config = AgentConfig {
                name: agent.metadata.name.clone(),
                namespace: agent.metadata.namespace.clone(),
                description: agent.spec.description.clone(),
                instruction: agent.spec.system_message.clone(),
                card: self.card_for(agent),
                ..Default::default()
            };
            if agent.spec.agent_type == AgentType::Byo {
                return Ok(config);
            }

            let model_ref = resolve(&agent.spec.model_config, &caller.namespace)?;
            config.model = Some(model::resolve_model(&*self.store, &model_ref, inputs).await?);

            let mut bindings = Vec::new();
            for tool in agent.mcp_server_tools() {
                let (server, endpoint) =
                    tools::resolve_endpoint(&*self.store, tool, &caller.namespace, inputs).await?;
                bindings.push((server, endpoint, tool.tool_names.clone()));
            }
            config.remote_tools = tools::group_bindings(bindings);

            for reference in agent.agent_tool_refs() {
                let callee_ref = resolve(reference, &caller.namespace)?;
                state.check(&caller, &callee_ref)?;
                let callee: Agent = require_typed(&*self.store, &callee_ref).await?;
                let nested = match callee.spec.agent_type {
                    AgentType::Byo => NestedAgent::Remote(self.remote_pointer(&callee)),
                    AgentType::Declarative => {
                        let compiled = self
                            .compile(&callee, state.descend(&caller), inputs)
                            .await?;
                        NestedAgent::Inline {
                            config: Box::new(compiled),
                        }
                    }
                };
                config.agents.push(nested);
            }

            config.memory = self.resolve_memory(agent, inputs).await?;
            Ok(config)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{Kind, Object, Resource};
    use crate::testing;

    async fn translator(objects: Vec<Object>) -> Translator {
        let store = testing::store_with(objects).await;
        Translator::new(store, TranslatorOptions::default())
    }

    fn base_objects() -> Vec<Object> {
        vec![
            testing::model_config("ns", "m", "OpenAI").into_object(),
            testing::secret("ns", "openai", &[("key", "sk-1")]).into_object(),
        ]
    }

    #[tokio::test]
    async fn plain_agent_yields_four_manifests() {
        let agent = testing::agent("ns", "a", "m");
        let mut objects = base_objects();
        objects.push(agent.clone().into_object());
        let t = translator(objects).await;
        let out = t.translate(&agent).await.unwrap();
        assert!(out.config.model.is_some());
        assert!(out.config.remote_tools.is_empty());
        assert!(out.config.agents.is_empty());
        assert_eq!(
            out.manifest_kinds(),
            vec![
                Kind::ServiceAccount,
                Kind::ConfigMap,
                Kind::Deployment,
                Kind::Service
            ]
        );
        for m in &out.manifests {
            assert!(m.metadata().is_owned_by("Agent", "a"));
        }
        let deployment = out.deployment().unwrap();
        let template = &deployment.spec.template;
        assert_eq!(template.labels.get(CONFIG_HASH_LABEL).unwrap(), &out.hash[..32]);
        assert_eq!(template.annotations.get(CONFIG_HASH_ANNOTATION).unwrap(), &out.hash);
        let container = &template.spec.containers[0];
        assert_eq!(container.resources.requests.get("memory").unwrap(), "384Mi");
        assert_eq!(container.readiness_probe.as_ref().unwrap().path, "/health");
        let names: Vec<&str> = container.env.iter().map(|e| e.name.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(names.contains(&"OPENAI_API_KEY"));
    }

    #[tokio::test]
    async fn hash_is_stable_and_tracks_secret_rotation() {
        let agent = testing::agent("ns", "a", "m");
        let mut objects = base_objects();
        objects.push(agent.clone().into_object());
        let store = testing::store_with(objects).await;
        let t = Translator::new(store.clone(), TranslatorOptions::default());
        let first = t.translate(&agent).await.unwrap().hash;
        let second = t.translate(&agent).await.unwrap().hash;
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);

        testing::put(&*store, testing::secret("ns", "openai", &[("key", "sk-2")])).await;
        let rotated = t.translate(&agent).await.unwrap().hash;
        assert_ne!(first, rotated);
    }

    #[tokio::test]
    async fn self_reference_is_rejected() {
        let mut a = testing::agent("ns", "a", "m");
        testing::add_agent_tool(&mut a, "a");
        let mut objects = base_objects();
        objects.push(a.clone().into_object());
        let err = translator(objects).await.translate(&a).await.unwrap_err();
        assert!(matches!(err, TranslateError::SelfReference { .. }));
    }

    #[tokio::test]
    async fn two_agent_cycle_names_both() {
        let mut a = testing::agent("ns", "a", "m");
        let mut b = testing::agent("ns", "b", "m");
        testing::add_agent_tool(&mut a, "ns/b");
        testing::add_agent_tool(&mut b, "a");
        let mut objects = base_objects();
        objects.push(a.clone().into_object());
        objects.push(b.into_object());
        let err = translator(objects).await.translate(&a).await.unwrap_err();
        match &err {
            TranslateError::Cycle { caller, callee } => {
                assert_eq!(caller, &ObjectRef::new("ns", "b"));
                assert_eq!(callee, &ObjectRef::new("ns", "a"));
            }
            other => panic!("unexpected {other:?}"),
        }
        let msg = err.to_string();
        assert!(msg.contains("ns/a") && msg.contains("ns/b"));
    }

    fn chain(len: usize) -> Vec<Agent> {
        let mut agents: Vec<Agent> = (0..=len)
            .map(|i| testing::agent("ns", &format!("a{i}"), "m"))
            .collect();
        for i in 0..len {
            let next = format!("a{}", i + 1);
            testing::add_agent_tool(&mut agents[i], &next);
        }
        agents
    }

    #[tokio::test]
    async fn ten_hops_is_allowed_eleven_is_not() {
        let ok = chain(MAX_DEPTH);
        let mut objects = base_objects();
        objects.extend(ok.iter().cloned().map(Agent::into_object));
        let out = translator(objects).await.translate(&ok[0]).await.unwrap();
        let depth = out.config.walk_nested().len();
        assert_eq!(depth, MAX_DEPTH);

        let too_deep = chain(MAX_DEPTH + 1);
        let mut objects = base_objects();
        objects.extend(too_deep.iter().cloned().map(Agent::into_object));
        let err = translator(objects)
            .await
            .translate(&too_deep[0])
            .await
            .unwrap_err();
        match err {
            TranslateError::DepthExceeded { callee, max, .. } => {
                assert_eq!(callee.name, "a11");
                assert_eq!(max, MAX_DEPTH);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn diamond_is_not_a_cycle() {
        let mut root = testing::agent("ns", "root", "m");
        let mut left = testing::agent("ns", "left", "m");
        let mut right = testing::agent("ns", "right", "m");
        let leaf = testing::agent("ns", "leaf", "m");
        testing::add_agent_tool(&mut root, "left");
        testing::add_agent_tool(&mut root, "right");
        testing::add_agent_tool(&mut left, "leaf");
        testing::add_agent_tool(&mut right, "leaf");
        let mut objects = base_objects();
        for a in [&root, &left, &right, &leaf] {
            objects.push(a.clone().into_object());
        }
        let out = translator(objects).await.translate(&root).await.unwrap();
        assert_eq!(out.config.agents.len(), 2);
        assert_eq!(out.config.walk_nested().len(), 4);
    }

    #[tokio::test]
    async fn byo_callee_becomes_remote_pointer() {
        let mut a = testing::agent("ns", "a", "m");
        testing::add_agent_tool(&mut a, "ext");
        let ext = testing::byo_agent("ns", "ext", "registry.local/ext:1");
        let mut objects = base_objects();
        objects.push(a.clone().into_object());
        objects.push(ext.into_object());
        let out = translator(objects).await.translate(&a).await.unwrap();
        assert_eq!(
            out.config.agents,
            vec![NestedAgent::Remote(RemoteAgent {
                name: "ext".into(),
                url: "http://ext.ns:8080".into(),
                description: "ext (byo)".into(),
            })]
        );
    }

    #[tokio::test]
    async fn byo_without_image_fails() {
        let mut ext = testing::byo_agent("ns", "ext", "");
        ext.spec.deployment = None;
        let err = translator(vec![ext.clone().into_object()])
            .await
            .translate(&ext)
            .await
            .unwrap_err();
        assert!(matches!(err, TranslateError::MissingImage { .. }));
    }

    #[tokio::test]
    async fn missing_nested_agent_is_not_found() {
        let mut a = testing::agent("ns", "a", "m");
        testing::add_agent_tool(&mut a, "ghost");
        let mut objects = base_objects();
        objects.push(a.clone().into_object());
        let err = translator(objects).await.translate(&a).await.unwrap_err();
        assert!(matches!(err, TranslateError::NotFound { kind: Kind::Agent, .. }));
    }

    #[tokio::test]
    async fn memory_adds_named_key_env() {
        let mut a = testing::agent("ns", "a", "m");
        a.spec.memory.push("team-notes".into());
        let mut objects = base_objects();
        objects.push(a.clone().into_object());
        objects.push(testing::memory("ns", "team-notes").into_object());
        objects.push(testing::secret("ns", "pinecone", &[("key", "pc")]).into_object());
        let out = translator(objects).await.translate(&a).await.unwrap();
        assert_eq!(out.config.memory[0].api_key_env, "MEMORY_TEAM_NOTES_API_KEY");
        let env = &out.deployment().unwrap().spec.template.spec.containers[0].env;
        assert!(env.iter().any(|e| e.name == "MEMORY_TEAM_NOTES_API_KEY"));
    }

    #[test]
    fn descend_does_not_leak_into_siblings() {
        let root = TraversalState::root();
        let caller = ObjectRef::new("ns", "root");
        let left = root.descend(&caller).descend(&ObjectRef::new("ns", "left"));
        let right = root.descend(&caller);
        assert!(left.has_visited(&ObjectRef::new("ns", "left")));
        assert!(!right.has_visited(&ObjectRef::new("ns", "left")));
        assert_eq!(root.depth(), 0);
        assert_eq!(left.depth(), 2);
    }
}
