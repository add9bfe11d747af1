//! Compiled, runtime-facing agent configuration.
//!
//! `AgentConfig` is what the execution runtime reads from `config.json` and
//! what the content hash is computed over, so every collection here has a
//! deterministic order.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::a2a::types::AgentCard;
use crate::resources::{Deployment, Kind, McpProtocol, Object};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    pub name: String,
    pub namespace: String,
    pub description: String,
    pub instruction: String,
    /// Absent for BYO agents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelClientConfig>,
    #[serde(default)]
    pub remote_tools: Vec<RemoteToolBinding>,
    #[serde(default)]
    pub agents: Vec<NestedAgent>,
    #[serde(default)]
    pub memory: Vec<MemoryConfig>,
    pub card: AgentCard,
}

/// Supported model providers, by their resource spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelProvider {
    #[serde(rename = "OpenAI")]
    OpenAi,
    Anthropic,
    #[serde(rename = "AzureOpenAI")]
    AzureOpenAi,
    Gemini,
    #[serde(rename = "GeminiVertexAI")]
    GeminiVertexAi,
    #[serde(rename = "AnthropicVertexAI")]
    AnthropicVertexAi,
    Ollama,
}

impl ModelProvider {
    pub const ALL: [ModelProvider; 7] = [
        ModelProvider::OpenAi,
        ModelProvider::Anthropic,
        ModelProvider::AzureOpenAi,
        ModelProvider::Gemini,
        ModelProvider::GeminiVertexAi,
        ModelProvider::AnthropicVertexAi,
        ModelProvider::Ollama,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelProvider::OpenAi => "OpenAI",
            ModelProvider::Anthropic => "Anthropic",
            ModelProvider::AzureOpenAi => "AzureOpenAI",
            ModelProvider::Gemini => "Gemini",
            ModelProvider::GeminiVertexAi => "GeminiVertexAI",
            ModelProvider::AnthropicVertexAi => "AnthropicVertexAI",
            ModelProvider::Ollama => "Ollama",
        }
    }

    /// Env var carrying the API key, for providers authenticated by key.
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            ModelProvider::OpenAi => Some("OPENAI_API_KEY"),
            ModelProvider::Anthropic => Some("ANTHROPIC_API_KEY"),
            ModelProvider::AzureOpenAi => Some("AZURE_OPENAI_API_KEY"),
            ModelProvider::Gemini => Some("GOOGLE_API_KEY"),
            ModelProvider::GeminiVertexAi
            | ModelProvider::AnthropicVertexAi
            | ModelProvider::Ollama => None,
        }
    }

    pub fn is_vertex(&self) -> bool {
        matches!(
            self,
            ModelProvider::GeminiVertexAi | ModelProvider::AnthropicVertexAi
        )
    }
}

impl fmt::Display for ModelProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelProvider::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelClientConfig {
    pub provider: ModelProvider,
    pub model: String,
    /// Name of the env var the runtime reads the credential from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default)]
    pub default_headers: BTreeMap<String, String>,
    pub params: ProviderParams,
}

/// Provider-specific settings carried through to the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProviderParams {
    #[serde(rename_all = "camelCase")]
    OpenAi {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        organization: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        temperature: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_tokens: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        top_p: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seed: Option<i64>,
    },
    #[serde(rename_all = "camelCase")]
    Anthropic {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_tokens: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        temperature: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    AzureOpenAi {
        endpoint: String,
        api_version: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        deployment: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Gemini {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        temperature: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Vertex { project_id: String, location: String },
    #[serde(rename_all = "camelCase")]
    Ollama {
        host: String,
        #[serde(default)]
        options: BTreeMap<String, String>,
    },
}

/// A resolved remote MCP endpoint, whatever resource kind described it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEndpoint {
    pub url: String,
    #[serde(default)]
    pub protocol: McpProtocol,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sse_read_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminate_on_close: Option<bool>,
}

/// Tools the agent may call on one remote server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteToolBinding {
    /// `namespace/name` of the server resource.
    pub server: String,
    pub endpoint: RemoteEndpoint,
    /// Empty means every tool the server offers.
    #[serde(default)]
    pub tools: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NestedAgent {
    /// Compiled in place and run inside the caller's runtime.
    Inline { config: Box<AgentConfig> },
    /// A separately hosted agent reached over A2A.
    Remote(RemoteAgent),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteAgent {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryConfig {
    pub name: String,
    pub provider: String,
    pub api_key_env: String,
    pub index_host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub record_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_threshold: Option<String>,
}

/// Result of translating one Agent.
#[derive(Debug, Clone)]
pub struct AgentOutputs {
    /// ServiceAccount, ConfigMap, Deployment, Service, in apply order.
    pub manifests: Vec<Object>,
    pub config: AgentConfig,
    /// Hex-encoded SHA-256 content hash.
    pub hash: String,
}

impl AgentOutputs {
    pub fn deployment(&self) -> Option<&Deployment> {
        self.manifests.iter().find_map(|o| match o {
            Object::Deployment(d) => Some(d),
            _ => None,
        })
    }

    pub fn manifest_kinds(&self) -> Vec<Kind> {
        self.manifests.iter().map(Object::kind).collect()
    }
}

impl AgentConfig {
    /// Every nested agent, depth first, including inline descendants.
    pub fn walk_nested(&self) -> Vec<&NestedAgent> {
        let mut out = Vec::new();
        for nested in &self.agents {
            out.push(nested);
            if let NestedAgent::Inline { config } = nested {
                out.extend(config.walk_nested());
            }
        }
        out
    }
}
