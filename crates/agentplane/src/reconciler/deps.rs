//! Reverse-dependency lookup: which Agents must be re-translated when a
//! referenced object changes.
//!
//! Computed by scanning the current objects rather than keeping an index.

use std::collections::BTreeSet;

use crate::error::StoreError;
use crate::resources::{
    Agent, AgentType, HeaderValue, Kind, Memory, ModelConfig, ObjectRef, RemoteMcpServer,
    ToolServer, ValueSourceType, resolve,
};
use crate::store::{ResourceStore, list_typed};
use crate::translator::tools::ToolServerKind;

/// Every object a dependency scan can traverse.
#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    pub agents: Vec<Agent>,
    pub model_configs: Vec<ModelConfig>,
    pub memories: Vec<Memory>,
    pub tool_servers: Vec<ToolServer>,
    pub remote_servers: Vec<RemoteMcpServer>,
}

impl Snapshot {
    pub async fn load(store: &dyn ResourceStore) -> Result<Self, StoreError> {
        Ok(Self {
            agents: list_typed(store, None).await?,
            model_configs: list_typed(store, None).await?,
            memories: list_typed(store, None).await?,
            tool_servers: list_typed(store, None).await?,
            remote_servers: list_typed(store, None).await?,
        })
    }
}

fn resolves_to(reference: &str, namespace: &str, target: &ObjectRef) -> bool {
    resolve(reference, namespace).is_ok_and(|r| &r == target)
}

/// Whether `agent` names `target` (of `kind`) directly in its spec.
pub fn references(agent: &Agent, kind: Kind, target: &ObjectRef) -> bool {
    let ns = agent.metadata.namespace.as_str();
    let declarative = agent.spec.agent_type == AgentType::Declarative;
    match kind {
        Kind::Agent => declarative && agent.agent_tool_refs().any(|r| resolves_to(r, ns, target)),
        Kind::ModelConfig => declarative && resolves_to(&agent.spec.model_config, ns, target),
        Kind::Memory => declarative && agent.spec.memory.iter().any(|r| resolves_to(r, ns, target)),
        Kind::ToolServer | Kind::RemoteMcpServer | Kind::Service => {
            declarative
                && agent.mcp_server_tools().any(|t| {
                    ToolServerKind::parse(&t.kind, &t.name)
                        .is_ok_and(|k| k.resource_kind() == kind)
                        && resolves_to(&t.name, ns, target)
                })
        }
        _ => false,
    }
}

pub fn direct_dependents(agents: &[Agent], kind: Kind, target: &ObjectRef) -> BTreeSet<ObjectRef> {
    agents
        .iter()
        .filter(|a| references(a, kind, target))
        .map(|a| a.metadata.object_ref())
        .collect()
}

/// Close `seeds` over "is a nested tool of": a parent compiles its nested
/// agents inline, so it changes whenever they do.
pub fn with_parents(agents: &[Agent], seeds: BTreeSet<ObjectRef>) -> BTreeSet<ObjectRef> {
    let mut out = seeds;
    let mut frontier: Vec<ObjectRef> = out.iter().cloned().collect();
    while let Some(child) = frontier.pop() {
        for parent in direct_dependents(agents, Kind::Agent, &child) {
            if out.insert(parent.clone()) {
                frontier.push(parent);
            }
        }
    }
    out
}

fn headers_read(headers: &[HeaderValue], source: ValueSourceType, name: &str) -> bool {
    headers
        .iter()
        .filter_map(HeaderValue::source)
        .any(|v| v.source_type == source && v.name == name)
}

/// Intermediate objects that read `target` (a Secret or ConfigMap).
pub fn value_source_users(
    snapshot: &Snapshot,
    source: ValueSourceType,
    target: &ObjectRef,
) -> Vec<(Kind, ObjectRef)> {
    let mut users = Vec::new();
    let same_ns = |ns: &str| ns == target.namespace;
    for ts in &snapshot.tool_servers {
        if same_ns(&ts.metadata.namespace) && headers_read(ts.spec.headers(), source, &target.name)
        {
            users.push((Kind::ToolServer, ts.metadata.object_ref()));
        }
    }
    for rs in &snapshot.remote_servers {
        if same_ns(&rs.metadata.namespace)
            && headers_read(&rs.spec.headers_from, source, &target.name)
        {
            users.push((Kind::RemoteMcpServer, rs.metadata.object_ref()));
        }
    }
    if source == ValueSourceType::Secret {
        for mc in &snapshot.model_configs {
            let ns = mc.metadata.namespace.as_str();
            if mc
                .spec
                .api_key_secret
                .as_deref()
                .is_some_and(|s| !s.is_empty() && resolves_to(s, ns, target))
            {
                users.push((Kind::ModelConfig, mc.metadata.object_ref()));
            }
        }
        for m in &snapshot.memories {
            let ns = m.metadata.namespace.as_str();
            if resolves_to(&m.spec.api_key_secret_ref, ns, target) {
                users.push((Kind::Memory, m.metadata.object_ref()));
            }
        }
    }
    users
}

/// Every Agent whose translation reads `target`, including transitive
/// parents through nested agent tools.
pub fn dependents(snapshot: &Snapshot, kind: Kind, target: &ObjectRef) -> BTreeSet<ObjectRef> {
    let agents = &snapshot.agents;
    let direct = match kind {
        Kind::Secret | Kind::ConfigMap => {
            let source = if kind == Kind::Secret {
                ValueSourceType::Secret
            } else {
                ValueSourceType::ConfigMap
            };
            value_source_users(snapshot, source, target)
                .iter()
                .flat_map(|(k, r)| direct_dependents(agents, *k, r))
                .collect()
        }
        _ => direct_dependents(agents, kind, target),
    };
    with_parents(agents, direct)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{McpServerTool, Tool, ValueRef};
    use crate::testing;

    fn snapshot(agents: Vec<Agent>) -> Snapshot {
        Snapshot {
            agents,
            ..Default::default()
        }
    }

    #[test]
    fn model_config_dependents_are_exact() {
        let a = testing::agent("ns", "a", "m");
        let b = testing::agent("ns", "b", "ns/m");
        let c = testing::agent("ns", "c", "n");
        let other_ns = testing::agent("other", "d", "m");
        let snap = snapshot(vec![a, b, c, other_ns]);
        let deps = dependents(&snap, Kind::ModelConfig, &ObjectRef::new("ns", "m"));
        assert_eq!(
            deps.into_iter().collect::<Vec<_>>(),
            vec![ObjectRef::new("ns", "a"), ObjectRef::new("ns", "b")]
        );
    }

    #[test]
    fn parents_of_nested_agents_are_included() {
        let mut root = testing::agent("ns", "root", "n");
        let mut mid = testing::agent("ns", "mid", "n");
        let leaf = testing::agent("ns", "leaf", "m");
        testing::add_agent_tool(&mut root, "mid");
        testing::add_agent_tool(&mut mid, "ns/leaf");
        let snap = snapshot(vec![root, mid, leaf]);
        let deps = dependents(&snap, Kind::ModelConfig, &ObjectRef::new("ns", "m"));
        assert_eq!(deps.len(), 3);
    }

    #[test]
    fn byo_agents_read_nothing() {
        let mut byo = testing::byo_agent("ns", "ext", "img");
        byo.spec.model_config = "m".into();
        let snap = snapshot(vec![byo]);
        assert!(dependents(&snap, Kind::ModelConfig, &ObjectRef::new("ns", "m")).is_empty());
    }

    #[test]
    fn tool_kind_must_match() {
        let mut a = testing::agent("ns", "a", "m");
        a.spec.tools.push(Tool::McpServer {
            mcp_server: McpServerTool {
                name: "search".into(),
                kind: "ToolServer".into(),
                ..Default::default()
            },
        });
        let target = ObjectRef::new("ns", "search");
        assert!(references(&a, Kind::ToolServer, &target));
        assert!(!references(&a, Kind::RemoteMcpServer, &target));
    }

    #[test]
    fn secret_reaches_agents_through_intermediates() {
        let mut server = testing::remote_server("ns", "ts", "http://ts/mcp");
        server.spec.headers_from.push(HeaderValue {
            name: "Authorization".into(),
            value: None,
            value_from: Some(ValueRef {
                source_type: ValueSourceType::Secret,
                name: "token".into(),
                key: "t".into(),
            }),
        });
        let mut uses_server = testing::agent("ns", "a", "m");
        uses_server.spec.tools.push(Tool::McpServer {
            mcp_server: McpServerTool {
                name: "ts".into(),
                ..Default::default()
            },
        });
        let uses_model = testing::agent("ns", "b", "m");
        let snap = Snapshot {
            agents: vec![uses_server, uses_model],
            model_configs: vec![testing::model_config("ns", "m", "OpenAI")],
            remote_servers: vec![server],
            ..Default::default()
        };

        let via_header = dependents(&snap, Kind::Secret, &ObjectRef::new("ns", "token"));
        assert_eq!(
            via_header.into_iter().collect::<Vec<_>>(),
            vec![ObjectRef::new("ns", "a")]
        );
        let via_model = dependents(&snap, Kind::Secret, &ObjectRef::new("ns", "openai"));
        assert_eq!(via_model.len(), 2);
        assert!(dependents(&snap, Kind::Secret, &ObjectRef::new("ns", "unused")).is_empty());
    }
}
