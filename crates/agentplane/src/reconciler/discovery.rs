//! Remote MCP tool discovery.
//!
//! Each pass connects, initializes, pages through `tools/list` and shuts
//! down, every step bounded by a timeout. Legacy SSE servers go through the
//! MCP SDK client runtime. The SDK ships no streamable HTTP client, so that
//! transport posts SDK-typed JSON-RPC messages with reqwest.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use rust_mcp_sdk::mcp_client::{ClientHandlerCore, ClientRuntime, client_runtime_core};
use rust_mcp_sdk::schema::schema_utils::{
    ClientJsonrpcNotification, ClientJsonrpcRequest, NotificationFromServer, RequestFromClient,
    RequestFromServer, ResultFromClient, ResultFromServer, ServerMessage,
};
use rust_mcp_sdk::schema::{
    ClientCapabilities, Implementation, InitializeRequest, InitializeRequestParams,
    InitializedNotification, LATEST_PROTOCOL_VERSION, ListToolsRequest, ListToolsRequestParams,
    ListToolsResult, RequestId, RpcError, ServerResult,
};
use rust_mcp_sdk::{ClientSseTransport, ClientSseTransportOptions, McpClient};

use crate::resources::{DiscoveredTool, McpProtocol};
use crate::translator::RemoteEndpoint;

const SESSION_HEADER: &str = "mcp-session-id";
const MAX_PAGES: usize = 20;

#[async_trait]
pub trait ToolDiscoverer: Send + Sync {
    async fn list_tools(&self, endpoint: &RemoteEndpoint) -> anyhow::Result<Vec<DiscoveredTool>>;
}

pub struct McpToolDiscoverer {
    client: reqwest::Client,
    timeout: Duration,
}

impl McpToolDiscoverer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    async fn list_sse(&self, endpoint: &RemoteEndpoint) -> anyhow::Result<Vec<DiscoveredTool>> {
        let headers: HashMap<String, String> = endpoint
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let transport = ClientSseTransport::new(
            &endpoint.url,
            ClientSseTransportOptions {
                request_timeout: self.timeout,
                retry_delay: None,
                max_retries: Some(0),
                custom_headers: (!headers.is_empty()).then_some(headers),
            },
        )
        .map_err(|e| anyhow::anyhow!("transport error: {}", e))?;
        let client =
            client_runtime_core::create_client(initialize_params(), transport, DiscoveryHandler);

        let listed = async {
            tokio::time::timeout(self.timeout, client.clone().start())
                .await
                .map_err(|_| anyhow::anyhow!("initialize timeout"))
                .and_then(|r| r.map_err(|e| anyhow::anyhow!("start error: {}", e)))?;
            let mut pager = SdkPager {
                client: client.clone(),
                timeout: self.timeout,
            };
            collect_tools(&mut pager).await
        }
        .await;

        match tokio::time::timeout(self.timeout, client.shut_down()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!("shutdown of {} failed: {}", endpoint.url, e),
            Err(_) => tracing::debug!("shutdown of {} timed out", endpoint.url),
        }
        listed
    }

    async fn list_streamable(
        &self,
        endpoint: &RemoteEndpoint,
    ) -> anyhow::Result<Vec<DiscoveredTool>> {
        let mut session = StreamableSession {
            client: &self.client,
            url: &endpoint.url,
            headers: header_map(endpoint)?,
            session_id: None,
            timeout: self.timeout,
            next_id: 0,
        };
        session.initialize().await?;
        collect_tools(&mut session).await
    }
}

#[async_trait]
impl ToolDiscoverer for McpToolDiscoverer {
    async fn list_tools(&self, endpoint: &RemoteEndpoint) -> anyhow::Result<Vec<DiscoveredTool>> {
        let tools = match endpoint.protocol {
            McpProtocol::StreamableHttp => self.list_streamable(endpoint).await,
            McpProtocol::Sse => self.list_sse(endpoint).await,
        }
        .with_context(|| format!("discovering tools at {}", endpoint.url))?;
        tracing::debug!("discovered {} tools at {}", tools.len(), endpoint.url);
        Ok(tools)
    }
}

fn initialize_params() -> InitializeRequestParams {
    InitializeRequestParams {
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: "agentplane-discovery".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: None,
        },
        protocol_version: LATEST_PROTOCOL_VERSION.into(),
    }
}

fn header_map(endpoint: &RemoteEndpoint) -> anyhow::Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in &endpoint.headers {
        map.insert(
            HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("invalid header name '{name}'"))?,
            HeaderValue::from_str(value)
                .with_context(|| format!("invalid value for header '{name}'"))?,
        );
    }
    Ok(map)
}

/// An initialized session that lists tools one page at a time.
#[async_trait]
trait ToolPager: Send {
    async fn page(&mut self, cursor: Option<String>) -> anyhow::Result<ListToolsResult>;
}

async fn collect_tools<P: ToolPager>(pager: &mut P) -> anyhow::Result<Vec<DiscoveredTool>> {
    let mut out = Vec::new();
    let mut cursor = None;
    for _ in 0..MAX_PAGES {
        let listed = pager.page(cursor.take()).await?;
        out.extend(listed.tools.into_iter().map(|t| DiscoveredTool {
            name: t.name,
            description: t.description.unwrap_or_default(),
        }));
        match listed.next_cursor {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => break,
        }
    }
    Ok(out)
}

fn list_params(cursor: Option<String>) -> Option<ListToolsRequestParams> {
    cursor.map(|c| ListToolsRequestParams { cursor: Some(c) })
}

struct SdkPager {
    client: Arc<ClientRuntime>,
    timeout: Duration,
}

#[async_trait]
impl ToolPager for SdkPager {
    async fn page(&mut self, cursor: Option<String>) -> anyhow::Result<ListToolsResult> {
        tokio::time::timeout(self.timeout, self.client.list_tools(list_params(cursor)))
            .await
            .map_err(|_| anyhow::anyhow!("list_tools timeout"))
            .and_then(|r| r.map_err(|e| anyhow::anyhow!("list_tools error: {}", e)))
    }
}

/// Discovery never serves server-initiated requests.
#[derive(Clone)]
struct DiscoveryHandler;

#[async_trait]
impl ClientHandlerCore for DiscoveryHandler {
    async fn handle_request(
        &self,
        _request: RequestFromServer,
        _runtime: &dyn McpClient,
    ) -> std::result::Result<ResultFromClient, RpcError> {
        Err(RpcError::method_not_found())
    }

    async fn handle_notification(
        &self,
        _notification: NotificationFromServer,
        _runtime: &dyn McpClient,
    ) -> std::result::Result<(), RpcError> {
        Ok(())
    }

    async fn handle_error(
        &self,
        error: &RpcError,
        _runtime: &dyn McpClient,
    ) -> std::result::Result<(), RpcError> {
        tracing::debug!("tool server reported error: {}", error);
        Ok(())
    }
}

/// Streamable HTTP: every message is a POST; replies come back as a JSON
/// body or as an event stream carrying the response.
struct StreamableSession<'a> {
    client: &'a reqwest::Client,
    url: &'a str,
    headers: HeaderMap,
    session_id: Option<String>,
    timeout: Duration,
    next_id: i64,
}

impl StreamableSession<'_> {
    async fn post(&mut self, body: String) -> anyhow::Result<reqwest::Response> {
        let mut req = self
            .client
            .post(self.url)
            .headers(self.headers.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(id) = &self.session_id {
            req = req.header(SESSION_HEADER, id.as_str());
        }
        let resp = req.send().await?.error_for_status()?;
        if let Some(sid) = resp
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            self.session_id = Some(sid.to_string());
        }
        Ok(resp)
    }

    async fn request(&mut self, request: RequestFromClient) -> anyhow::Result<ResultFromServer> {
        self.next_id += 1;
        let id = RequestId::Integer(self.next_id);
        let message = ClientJsonrpcRequest::new(id.clone(), request);
        let method = message.method.clone();
        let body = serde_json::to_string(&message)?;
        let timeout = self.timeout;
        let exchange = async {
            let resp = self.post(body).await?;
            read_reply(resp, &id).await
        };
        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| anyhow::anyhow!("{} timeout", method))?
            .with_context(|| format!("{method} failed"))
    }

    async fn notify(&mut self, notification: ClientJsonrpcNotification) -> anyhow::Result<()> {
        let body = serde_json::to_string(&notification)?;
        tokio::time::timeout(self.timeout, self.post(body))
            .await
            .map_err(|_| anyhow::anyhow!("notification timeout"))??;
        Ok(())
    }

    async fn initialize(&mut self) -> anyhow::Result<()> {
        let result = self
            .request(InitializeRequest::new(initialize_params()).into())
            .await?;
        let ServerResult::InitializeResult(init) = ServerResult::try_from(result)? else {
            anyhow::bail!("unexpected reply to initialize");
        };
        tracing::trace!("connected to {} ({})", init.server_info.name, self.url);
        self.notify(InitializedNotification::new(None).into()).await
    }
}

#[async_trait]
impl ToolPager for StreamableSession<'_> {
    async fn page(&mut self, cursor: Option<String>) -> anyhow::Result<ListToolsResult> {
        let result = self
            .request(ListToolsRequest::new(list_params(cursor)).into())
            .await?;
        ListToolsResult::try_from(result).context("tools/list returned an unexpected result")
    }
}

/// The result answering `id`, from a JSON body or an event stream.
async fn read_reply(resp: reqwest::Response, id: &RequestId) -> anyhow::Result<ResultFromServer> {
    let is_stream = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/event-stream"));
    if !is_stream {
        let message: ServerMessage = resp.text().await?.parse()?;
        return answer_to(message, id)?.context("reply does not answer the request");
    }

    let mut body = resp.bytes_stream();
    let mut buf = String::new();
    while let Some(chunk) = body.next().await {
        buf.push_str(&String::from_utf8_lossy(&chunk?).replace("\r\n", "\n"));
        while let Some(end) = buf.find("\n\n") {
            let event: String = buf.drain(..end + 2).collect();
            let data: Vec<&str> = event
                .lines()
                .filter_map(|l| l.strip_prefix("data:"))
                .map(|d| d.strip_prefix(' ').unwrap_or(d))
                .collect();
            let Ok(message) = data.join("\n").parse::<ServerMessage>() else {
                continue;
            };
            if let Some(result) = answer_to(message, id)? {
                return Ok(result);
            }
        }
    }
    anyhow::bail!("event stream ended without a reply")
}

fn answer_to(message: ServerMessage, id: &RequestId) -> anyhow::Result<Option<ResultFromServer>> {
    match message {
        ServerMessage::Response(r) if r.id == *id => Ok(Some(r.result)),
        ServerMessage::Error(e) if e.id == *id => {
            anyhow::bail!("server returned error: {}", e.error)
        }
        _ => Ok(None),
    }
}
