//! The `Agent` resource: model, instruction, tools and nested agents.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::meta::ObjectMeta;
use super::status::Condition;
use super::workload::{EnvVar, Volume, VolumeMount};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: AgentSpec,
    #[serde(default)]
    pub status: AgentStatus,
}

/// How the agent's workload is produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentType {
    /// Compiled from the spec and run on the shared agent runtime image.
    #[default]
    Declarative,
    /// Operator-supplied image; referenced by other agents as a remote peer.
    #[serde(rename = "BYO")]
    Byo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpec {
    #[serde(default, rename = "type")]
    pub agent_type: AgentType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub system_message: String,
    /// Reference to a ModelConfig (`name` or `namespace/name`).
    #[serde(default)]
    pub model_config: String,
    #[serde(default)]
    pub tools: Vec<Tool>,
    /// References to Memory resources.
    #[serde(default)]
    pub memory: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a2a_config: Option<A2aConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentOverrides>,
}

/// One entry of an agent's tool list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Tool {
    McpServer {
        #[serde(rename = "mcpServer")]
        mcp_server: McpServerTool,
    },
    Agent {
        agent: AgentToolRef,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerTool {
    /// Reference to the tool server resource.
    pub name: String,
    /// `ToolServer`, `RemoteMCPServer` (when empty) or `Service`.
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub api_group: String,
    #[serde(default)]
    pub tool_names: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentToolRef {
    #[serde(rename = "ref")]
    pub reference: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct A2aConfig {
    #[serde(default)]
    pub skills: Vec<AgentSkill>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSkill {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub examples: Vec<String>,
}

/// Per-agent deployment knobs merged into the synthesized Deployment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
    #[serde(default)]
    pub volume_mounts: Vec<VolumeMount>,
    #[serde(default)]
    pub image_pull_secrets: Vec<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Required for BYO agents, optional override otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub cmd: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    #[serde(default)]
    pub observed_generation: i64,
    /// Hex-encoded content hash of the last applied translation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl Agent {
    /// Nested agent references in tool-list order.
    pub fn agent_tool_refs(&self) -> impl Iterator<Item = &str> {
        self.spec.tools.iter().filter_map(|t| match t {
            Tool::Agent { agent } => Some(agent.reference.as_str()),
            Tool::McpServer { .. } => None,
        })
    }

    /// MCP server tool entries in tool-list order.
    pub fn mcp_server_tools(&self) -> impl Iterator<Item = &McpServerTool> {
        self.spec.tools.iter().filter_map(|t| match t {
            Tool::McpServer { mcp_server } => Some(mcp_server),
            Tool::Agent { .. } => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tool_entries_from_yaml() {
        let yaml = r#"
metadata:
  name: planner
  namespace: team
spec:
  description: plans things
  systemMessage: You plan.
  modelConfig: default-model
  tools:
    - type: McpServer
      mcpServer:
        name: search
        kind: RemoteMCPServer
        toolNames: [web_search]
    - type: Agent
      agent:
        ref: team/researcher
"#;
        let agent: Agent = serde_yaml::from_str(yaml).expect("parse agent");
        assert_eq!(agent.spec.agent_type, AgentType::Declarative);
        assert_eq!(agent.spec.tools.len(), 2);
        let refs: Vec<&str> = agent.agent_tool_refs().collect();
        assert_eq!(refs, vec!["team/researcher"]);
        let servers: Vec<&McpServerTool> = agent.mcp_server_tools().collect();
        assert_eq!(servers[0].tool_names, vec!["web_search".to_string()]);
    }

    #[test]
    fn byo_type_is_recognized() {
        let yaml = r#"
metadata: { name: ext, namespace: team }
spec:
  type: BYO
  deployment:
    image: registry.local/ext:1
"#;
        let agent: Agent = serde_yaml::from_str(yaml).expect("parse agent");
        assert_eq!(agent.spec.agent_type, AgentType::Byo);
        assert_eq!(
            agent.spec.deployment.and_then(|d| d.image).as_deref(),
            Some("registry.local/ext:1")
        );
    }
}
