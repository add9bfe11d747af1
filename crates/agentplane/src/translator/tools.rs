//! Tool-server resolution: ToolServer, RemoteMCPServer and annotated Service
//! references all converge on one [`RemoteEndpoint`].

use std::collections::BTreeMap;

use super::manifest::DeploymentInputs;
use super::model::secret_value;
use super::types::{RemoteEndpoint, RemoteToolBinding};
use crate::error::TranslateError;
use crate::resources::{
    ConfigMap, HeaderValue, Kind, McpProtocol, McpServerTool, ObjectRef, RemoteMcpServer, Service,
    ToolServer, ValueSourceType, resolve,
};
use crate::store::{ResourceStore, get_typed, require_typed};

pub const SERVICE_PORT_ANNOTATION: &str = "agentplane.dev/mcp-service-port";
pub const SERVICE_PATH_ANNOTATION: &str = "agentplane.dev/mcp-service-path";
pub const SERVICE_PROTOCOL_ANNOTATION: &str = "agentplane.dev/mcp-service-protocol";
const DEFAULT_SERVICE_PATH: &str = "/mcp";
const MCP_APP_PROTOCOL: &str = "mcp";

/// Which resource kind a tool entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolServerKind {
    ToolServer,
    RemoteMcpServer,
    Service,
}

impl ToolServerKind {
    /// An empty kind means `RemoteMCPServer`.
    pub fn parse(kind: &str, reference: &str) -> Result<Self, TranslateError> {
        match kind {
            "" | "RemoteMCPServer" => Ok(ToolServerKind::RemoteMcpServer),
            "ToolServer" => Ok(ToolServerKind::ToolServer),
            "Service" => Ok(ToolServerKind::Service),
            other => Err(TranslateError::UnknownToolServerKind {
                kind: other.to_string(),
                reference: reference.to_string(),
            }),
        }
    }

    pub fn resource_kind(self) -> Kind {
        match self {
            ToolServerKind::ToolServer => Kind::ToolServer,
            ToolServerKind::RemoteMcpServer => Kind::RemoteMcpServer,
            ToolServerKind::Service => Kind::Service,
        }
    }
}

/// Endpoint of a stored tool server, headers resolved.
pub async fn server_endpoint(
    store: &dyn ResourceStore,
    kind: ToolServerKind,
    reference: &ObjectRef,
) -> Result<RemoteEndpoint, TranslateError> {
    let tool = McpServerTool {
        name: reference.to_string(),
        kind: kind.resource_kind().to_string(),
        ..Default::default()
    };
    let mut scratch = DeploymentInputs::default();
    let (_, endpoint) = resolve_endpoint(store, &tool, &reference.namespace, &mut scratch).await?;
    Ok(endpoint)
}

async fn resolve_headers(
    store: &dyn ResourceStore,
    namespace: &str,
    headers: &[HeaderValue],
    inputs: &mut DeploymentInputs,
) -> Result<BTreeMap<String, String>, TranslateError> {
    let mut out = BTreeMap::new();
    for header in headers {
        let value = match (header.source(), &header.value) {
            (Some(src), _) => {
                let target = ObjectRef::new(namespace, src.name.clone());
                match src.source_type {
                    ValueSourceType::Secret => {
                        secret_value(store, &target, &src.key, inputs).await?
                    }
                    ValueSourceType::ConfigMap => {
                        let unresolved = || TranslateError::UnresolvedConfigMap {
                            config_map: target.clone(),
                            key: src.key.clone(),
                        };
                        let cm: ConfigMap =
                            get_typed(store, &target).await?.ok_or_else(unresolved)?;
                        cm.data.get(&src.key).cloned().ok_or_else(unresolved)?
                    }
                }
            }
            (None, Some(v)) => v.clone(),
            (None, None) => String::new(),
        };
        out.insert(header.name.clone(), value);
    }
    Ok(out)
}

fn parse_protocol(value: Option<&String>) -> McpProtocol {
    match value.map(|v| v.to_ascii_lowercase()) {
        Some(v) if v == "sse" => McpProtocol::Sse,
        _ => McpProtocol::StreamableHttp,
    }
}

/// Pick the Service port that serves MCP.
///
/// Order: the port named by the port annotation, the port whose
/// `appProtocol` is `mcp`, the only port when exactly one exists.
pub fn service_endpoint(service: &Service) -> Result<RemoteEndpoint, TranslateError> {
    let meta = &service.metadata;
    let missing = || TranslateError::MissingServicePort {
        service: meta.object_ref(),
    };
    let ports = &service.spec.ports;
    let port = if let Some(wanted) = meta.annotations.get(SERVICE_PORT_ANNOTATION) {
        let wanted: u16 = wanted.trim().parse().map_err(|_| missing())?;
        ports
            .iter()
            .find(|p| p.port == wanted)
            .map(|p| p.port)
            .ok_or_else(missing)?
    } else if let Some(p) = ports
        .iter()
        .find(|p| p.app_protocol.as_deref() == Some(MCP_APP_PROTOCOL))
    {
        p.port
    } else if let [only] = ports.as_slice() {
        only.port
    } else {
        return Err(missing());
    };
    let path = meta
        .annotations
        .get(SERVICE_PATH_ANNOTATION)
        .cloned()
        .unwrap_or_else(|| DEFAULT_SERVICE_PATH.to_string());
    let path = if path.starts_with('/') {
        path
    } else {
        format!("/{path}")
    };
    Ok(RemoteEndpoint {
        url: format!("http://{}.{}:{}{}", meta.name, meta.namespace, port, path),
        protocol: parse_protocol(meta.annotations.get(SERVICE_PROTOCOL_ANNOTATION)),
        ..Default::default()
    })
}

/// Resolve one McpServer tool entry of an agent in `namespace`.
pub(crate) async fn resolve_endpoint(
    store: &dyn ResourceStore,
    tool: &McpServerTool,
    namespace: &str,
    inputs: &mut DeploymentInputs,
) -> Result<(ObjectRef, RemoteEndpoint), TranslateError> {
    let kind = ToolServerKind::parse(&tool.kind, &tool.name)?;
    let reference = resolve(&tool.name, namespace)?;
    let endpoint = match kind {
        ToolServerKind::RemoteMcpServer => {
            let server: RemoteMcpServer = require_typed(store, &reference).await?;
            let spec = &server.spec;
            RemoteEndpoint {
                url: spec.url.clone(),
                protocol: spec.protocol,
                headers: resolve_headers(store, &reference.namespace, &spec.headers_from, inputs)
                    .await?,
                timeout_secs: spec.timeout,
                sse_read_timeout_secs: spec.sse_read_timeout,
                terminate_on_close: spec.terminate_on_close,
            }
        }
        ToolServerKind::ToolServer => {
            let server: ToolServer = require_typed(store, &reference).await?;
            let (cfg, protocol) = match (
                &server.spec.config.streamable_http,
                &server.spec.config.sse,
            ) {
                (Some(http), _) => (http, McpProtocol::StreamableHttp),
                (None, Some(sse)) => (sse, McpProtocol::Sse),
                (None, None) => {
                    return Err(TranslateError::InvalidToolServer {
                        server: reference,
                        reason: "neither sse nor streamableHttp is configured",
                    });
                }
            };
            RemoteEndpoint {
                url: cfg.url.clone(),
                protocol,
                headers: resolve_headers(store, &reference.namespace, &cfg.headers_from, inputs)
                    .await?,
                timeout_secs: cfg.timeout,
                sse_read_timeout_secs: cfg.sse_read_timeout,
                terminate_on_close: cfg.terminate_on_close,
            }
        }
        ToolServerKind::Service => {
            let service: Service = require_typed(store, &reference).await?;
            service_endpoint(&service)?
        }
    };
    if endpoint.url.is_empty() {
        return Err(TranslateError::InvalidToolServer {
            server: reference,
            reason: "url is empty",
        });
    }
    Ok((reference, endpoint))
}

/// Collapse per-entry bindings to one per server, first-seen order, tool
/// names de-duplicated. An entry with no tool names selects every tool, and
/// that wins over any explicit list for the same server.
pub fn group_bindings(entries: Vec<(ObjectRef, RemoteEndpoint, Vec<String>)>) -> Vec<RemoteToolBinding> {
    let mut out: Vec<(RemoteToolBinding, bool)> = Vec::new();
    for (server, endpoint, tools) in entries {
        let key = server.to_string();
        match out.iter_mut().find(|(b, _)| b.server == key) {
            Some((binding, all)) => {
                if tools.is_empty() {
                    *all = true;
                }
                for t in tools {
                    if !binding.tools.contains(&t) {
                        binding.tools.push(t);
                    }
                }
            }
            None => {
                let all = tools.is_empty();
                let mut deduped: Vec<String> = Vec::new();
                for t in tools {
                    if !deduped.contains(&t) {
                        deduped.push(t);
                    }
                }
                out.push((
                    RemoteToolBinding {
                        server: key,
                        endpoint,
                        tools: deduped,
                    },
                    all,
                ));
            }
        }
    }
    out.into_iter()
        .map(|(mut b, all)| {
            if all {
                b.tools.clear();
            }
            b
        })
        .collect()
}
