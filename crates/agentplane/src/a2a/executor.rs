//! Execution runtime seam.
//!
//! The bridge never runs a model itself: an [`AgentExecutor`] takes the
//! compiled [`AgentConfig`] plus the task text and either returns the final
//! output or a stream of [`ExecutionEvent`]s.

use anyhow::Context as _;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::session::Session;
use crate::translator::AgentConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResult {
    pub call_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

/// Events emitted by the runtime while a task executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    TextMessage {
        source: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
    ModelStreamingChunk {
        source: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
    ToolCallRequest {
        source: String,
        calls: Vec<FunctionCall>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
    ToolCallExecution {
        source: String,
        results: Vec<FunctionResult>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
    MemoryQuery {
        source: String,
        results: Vec<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
    ToolCallSummary {
        source: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
    /// Anything the bridge does not recognise; kept so it can be reported.
    Unknown {
        event_type: String,
        #[serde(default)]
        source: String,
        #[serde(default)]
        payload: Value,
    },
}

impl ExecutionEvent {
    /// Decode a runtime event, mapping unrecognised or malformed ones to
    /// [`ExecutionEvent::Unknown`].
    pub fn from_value(value: Value) -> Self {
        let event_type = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        match serde_json::from_value::<ExecutionEvent>(value.clone()) {
            Ok(ev) => ev,
            Err(_) => ExecutionEvent::Unknown {
                event_type,
                source: value
                    .get("source")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
                payload: value,
            },
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            ExecutionEvent::TextMessage { .. } => "TextMessage",
            ExecutionEvent::ModelStreamingChunk { .. } => "ModelStreamingChunk",
            ExecutionEvent::ToolCallRequest { .. } => "ToolCallRequest",
            ExecutionEvent::ToolCallExecution { .. } => "ToolCallExecution",
            ExecutionEvent::MemoryQuery { .. } => "MemoryQuery",
            ExecutionEvent::ToolCallSummary { .. } => "ToolCallSummary",
            ExecutionEvent::Unknown { event_type, .. } => event_type,
        }
    }

    pub fn source(&self) -> &str {
        match self {
            ExecutionEvent::TextMessage { source, .. }
            | ExecutionEvent::ModelStreamingChunk { source, .. }
            | ExecutionEvent::ToolCallRequest { source, .. }
            | ExecutionEvent::ToolCallExecution { source, .. }
            | ExecutionEvent::MemoryQuery { source, .. }
            | ExecutionEvent::ToolCallSummary { source, .. }
            | ExecutionEvent::Unknown { source, .. } => source,
        }
    }

    pub fn usage(&self) -> Option<&Usage> {
        match self {
            ExecutionEvent::TextMessage { usage, .. }
            | ExecutionEvent::ModelStreamingChunk { usage, .. }
            | ExecutionEvent::ToolCallRequest { usage, .. }
            | ExecutionEvent::ToolCallExecution { usage, .. }
            | ExecutionEvent::MemoryQuery { usage, .. }
            | ExecutionEvent::ToolCallSummary { usage, .. } => usage.as_ref(),
            ExecutionEvent::Unknown { .. } => None,
        }
    }
}

pub type EventStream = BoxStream<'static, anyhow::Result<ExecutionEvent>>;

#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Run a task to completion and return the final text output.
    async fn invoke(
        &self,
        config: &AgentConfig,
        task: &str,
        session: Option<&Session>,
    ) -> anyhow::Result<String>;

    /// Run a task, yielding events as the runtime emits them.
    async fn invoke_stream(
        &self,
        config: &AgentConfig,
        task: &str,
        session: Option<&Session>,
    ) -> anyhow::Result<EventStream>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InvokeBody<'a> {
    config: &'a AgentConfig,
    task: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct InvokeReply {
    output: String,
}

/// Forwards tasks to an HTTP runtime: `POST /invoke` and
/// `POST /invoke/stream` (newline-delimited JSON events).
pub struct HttpExecutor {
    client: reqwest::Client,
    base_url: String,
}

impl HttpExecutor {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn post(&self, path: &str, body: &InvokeBody<'_>) -> anyhow::Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("runtime request to {url} failed"))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("runtime returned {status}: {text}");
        }
        Ok(resp)
    }
}

#[async_trait]
impl AgentExecutor for HttpExecutor {
    async fn invoke(
        &self,
        config: &AgentConfig,
        task: &str,
        session: Option<&Session>,
    ) -> anyhow::Result<String> {
        let body = InvokeBody {
            config,
            task,
            session_id: session.map(|s| s.id.as_str()),
        };
        let reply: InvokeReply = self
            .post("/invoke", &body)
            .await?
            .json()
            .await
            .context("runtime reply is not valid JSON")?;
        Ok(reply.output)
    }

    async fn invoke_stream(
        &self,
        config: &AgentConfig,
        task: &str,
        session: Option<&Session>,
    ) -> anyhow::Result<EventStream> {
        let body = InvokeBody {
            config,
            task,
            session_id: session.map(|s| s.id.as_str()),
        };
        let resp = self.post("/invoke/stream", &body).await?;
        Ok(ndjson_events(resp.bytes_stream()))
    }
}

/// Split a byte stream into newline-delimited JSON events.
pub fn ndjson_events<S, B, E>(bytes: S) -> EventStream
where
    S: futures::Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]>,
    E: Into<anyhow::Error>,
{
    fn decode(line: &[u8]) -> Option<anyhow::Result<ExecutionEvent>> {
        let text = String::from_utf8_lossy(line);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(
            serde_json::from_str::<Value>(trimmed)
                .map(ExecutionEvent::from_value)
                .context("runtime emitted a malformed event line"),
        )
    }

    let state = (Box::pin(bytes), Vec::<u8>::new(), false);
    futures::stream::unfold(state, |(mut bytes, mut buf, mut done)| async move {
        loop {
            if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buf.drain(..=pos).collect();
                match decode(&line) {
                    Some(ev) => return Some((ev, (bytes, buf, done))),
                    None => continue,
                }
            }
            if done {
                let rest = std::mem::take(&mut buf);
                return decode(&rest).map(|ev| (ev, (bytes, buf, done)));
            }
            match bytes.next().await {
                Some(Ok(chunk)) => buf.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    buf.clear();
                    return Some((Err(e.into()), (bytes, buf, true)));
                }
                None => done = true,
            }
        }
    })
    .boxed()
}
