//! Remote tool endpoints: `ToolServer` and `RemoteMCPServer`.
//!
//! Both describe an MCP server reachable over SSE or streamable HTTP. A plain
//! `Service` can stand in for either via annotations (see the translator).

use serde::{Deserialize, Serialize};

use super::meta::ObjectMeta;
use super::status::Condition;

/// Wire protocol spoken by a remote MCP server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum McpProtocol {
    #[serde(rename = "SSE")]
    Sse,
    #[default]
    #[serde(rename = "STREAMABLE_HTTP")]
    StreamableHttp,
}

/// A header whose value is inline or sourced from a Secret/ConfigMap key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderValue {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<ValueRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueSourceType {
    Secret,
    ConfigMap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueRef {
    #[serde(rename = "type")]
    pub source_type: ValueSourceType,
    pub name: String,
    pub key: String,
}

/// Tools reported by the remote endpoint during discovery.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolServerStatus {
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub discovered_tools: Vec<DiscoveredTool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolServer {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ToolServerSpec,
    #[serde(default)]
    pub status: ToolServerStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolServerSpec {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: ToolServerConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolServerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sse: Option<HttpEndpointConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streamable_http: Option<HttpEndpointConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpEndpointConfig {
    pub url: String,
    #[serde(default)]
    pub headers_from: Vec<HeaderValue>,
    /// Request timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// SSE read timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sse_read_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminate_on_close: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteMcpServer {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: RemoteMcpServerSpec,
    #[serde(default)]
    pub status: ToolServerStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteMcpServerSpec {
    #[serde(default)]
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub protocol: McpProtocol,
    #[serde(default)]
    pub headers_from: Vec<HeaderValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sse_read_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminate_on_close: Option<bool>,
}

impl HeaderValue {
    /// The Secret or ConfigMap this header reads from, if any.
    pub fn source(&self) -> Option<&ValueRef> {
        self.value_from.as_ref()
    }
}

impl ToolServerSpec {
    pub fn headers(&self) -> &[HeaderValue] {
        match (&self.config.streamable_http, &self.config.sse) {
            (Some(http), _) => &http.headers_from,
            (None, Some(sse)) => &sse.headers_from,
            (None, None) => &[],
        }
    }
}
