//! Task lifecycle for `message/send` and `message/stream`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;

use super::executor::ExecutionEvent;
use super::registry::HandlerEntry;
use super::session::{Session, SessionStore, resolve_session};
use super::types::{A2aEvent, Message, MessageSendParams, Part, TaskState};
use crate::resources::ObjectRef;

pub const TIMEOUT_TEXT: &str = "request timed out";
pub const EMPTY_TEXT: &str = "message contains no text";

#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub id: String,
    pub context_id: String,
    pub agent: ObjectRef,
    pub state: TaskState,
}

/// In-flight tasks. Records live exactly as long as their [`TaskGuard`].
#[derive(Clone, Default)]
pub struct TaskManager {
    tasks: Arc<Mutex<HashMap<String, TaskRecord>>>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TaskRecord>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn begin(&self, agent: &ObjectRef, context_id: &str) -> TaskGuard {
        let id = uuid::Uuid::new_v4().to_string();
        self.lock().insert(
            id.clone(),
            TaskRecord {
                id: id.clone(),
                context_id: context_id.to_string(),
                agent: agent.clone(),
                state: TaskState::Submitted,
            },
        );
        TaskGuard {
            manager: self.clone(),
            id,
            context_id: context_id.to_string(),
        }
    }

    pub fn get(&self, id: &str) -> Option<TaskRecord> {
        self.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

pub struct TaskGuard {
    manager: TaskManager,
    id: String,
    context_id: String,
}

impl TaskGuard {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn transition(&self, next: TaskState) -> anyhow::Result<()> {
        let mut tasks = self.manager.lock();
        let record = tasks
            .get_mut(&self.id)
            .ok_or_else(|| anyhow::anyhow!("task {} is not registered", self.id))?;
        if !record.state.can_transition_to(next) {
            anyhow::bail!(
                "task {}: illegal transition {:?} -> {:?}",
                self.id,
                record.state,
                next
            );
        }
        record.state = next;
        Ok(())
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.manager.lock().remove(&self.id);
    }
}

fn transition(guard: &TaskGuard, next: TaskState) {
    if let Err(e) = guard.transition(next) {
        tracing::warn!("{e:#}");
    }
}

/// Handle `message/send`: always returns one terminal agent message.
pub async fn send_message(
    entry: &HandlerEntry,
    sessions: &dyn SessionStore,
    tasks: &TaskManager,
    params: MessageSendParams,
    timeout: Duration,
) -> Message {
    let requested_ctx = params.message.context_id.clone();
    let text = params.message.text_content();
    if text.trim().is_empty() {
        return Message::agent_error(EMPTY_TEXT, requested_ctx, None);
    }
    let session = match resolve_session(sessions, requested_ctx.as_deref(), &entry.agent).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("session lookup for {} failed: {e:#}", entry.agent);
            return Message::agent_error(format!("{e:#}"), requested_ctx, None);
        }
    };

    let guard = tasks.begin(&entry.agent, &session.id);
    let ctx = Some(guard.context_id().to_string());
    let task = Some(guard.id().to_string());
    match tokio::time::timeout(timeout, entry.handler.handle(&text, &session)).await {
        Ok(Ok(output)) => {
            transition(&guard, TaskState::Completed);
            Message::agent_text(output, ctx, task)
        }
        Ok(Err(e)) => {
            tracing::warn!("task {} for {} failed: {e:#}", guard.id(), entry.agent);
            transition(&guard, TaskState::Failed);
            Message::agent_error(format!("{e:#}"), ctx, task)
        }
        Err(_) => {
            tracing::warn!(
                "task {} for {} timed out after {:?}",
                guard.id(),
                entry.agent,
                timeout
            );
            transition(&guard, TaskState::Failed);
            Message::agent_error(TIMEOUT_TEXT, ctx, task)
        }
    }
}

enum Forwarded {
    Done,
    Failed(String),
    Closed,
}

/// Handle `message/stream`, pushing events into `tx`.
///
/// `working` is always the first event and a final `completed`/`failed`
/// status the last, unless the subscriber went away first.
pub async fn run_stream(
    entry: HandlerEntry,
    sessions: Arc<dyn SessionStore>,
    tasks: TaskManager,
    params: MessageSendParams,
    tx: mpsc::Sender<A2aEvent>,
) {
    let requested_ctx = params.message.context_id.clone();
    let session = resolve_session(&*sessions, requested_ctx.as_deref(), &entry.agent).await;
    let context_id = match &session {
        Ok(s) => s.id.clone(),
        Err(_) => requested_ctx
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
    };
    let guard = tasks.begin(&entry.agent, &context_id);
    transition(&guard, TaskState::Working);
    let working = A2aEvent::status(guard.id(), &context_id, TaskState::Working);
    if tx.send(working).await.is_err() {
        return;
    }

    let text = params.message.text_content();
    let outcome = match session {
        Err(e) => Forwarded::Failed(format!("{e:#}")),
        Ok(_) if text.trim().is_empty() => Forwarded::Failed(EMPTY_TEXT.to_string()),
        Ok(session) => forward(&entry, &session, &text, &tx, &context_id, guard.id()).await,
    };

    let terminal = match outcome {
        Forwarded::Closed => {
            tracing::debug!("subscriber for task {} went away", guard.id());
            return;
        }
        Forwarded::Done => TaskState::Completed,
        Forwarded::Failed(reason) => {
            tracing::warn!("task {} for {} failed: {}", guard.id(), entry.agent, reason);
            let msg = Message::agent_error(
                reason,
                Some(context_id.clone()),
                Some(guard.id().to_string()),
            );
            if tx.send(A2aEvent::Message(msg)).await.is_err() {
                return;
            }
            TaskState::Failed
        }
    };
    transition(&guard, terminal);
    let _ = tx
        .send(A2aEvent::status(guard.id(), &context_id, terminal))
        .await;
}

async fn forward(
    entry: &HandlerEntry,
    session: &Session,
    text: &str,
    tx: &mpsc::Sender<A2aEvent>,
    context_id: &str,
    task_id: &str,
) -> Forwarded {
    let started = tokio::select! {
        _ = tx.closed() => return Forwarded::Closed,
        r = entry.handler.handle_stream(text, session) => r,
    };
    let mut events = match started {
        Ok(s) => s,
        Err(e) => return Forwarded::Failed(format!("{e:#}")),
    };
    loop {
        let next = tokio::select! {
            _ = tx.closed() => return Forwarded::Closed,
            n = events.next() => n,
        };
        match next {
            None => return Forwarded::Done,
            Some(Err(e)) => return Forwarded::Failed(format!("{e:#}")),
            Some(Ok(ev)) => {
                let msg = event_to_message(&ev, context_id, task_id);
                if tx.send(A2aEvent::Message(msg)).await.is_err() {
                    return Forwarded::Closed;
                }
            }
        }
    }
}

/// Every execution event becomes exactly one agent-role message.
pub fn event_to_message(ev: &ExecutionEvent, context_id: &str, task_id: &str) -> Message {
    let parts = match ev {
        ExecutionEvent::TextMessage { content, .. }
        | ExecutionEvent::ModelStreamingChunk { content, .. }
        | ExecutionEvent::ToolCallSummary { content, .. } => vec![Part::Text {
            text: content.clone(),
        }],
        ExecutionEvent::ToolCallRequest { calls, .. } => calls
            .iter()
            .map(|c| Part::Data {
                data: json!({ "id": c.id, "name": c.name, "arguments": c.arguments }),
            })
            .collect(),
        ExecutionEvent::ToolCallExecution { results, .. } => results
            .iter()
            .map(|r| Part::Data {
                data: json!({
                    "callId": r.call_id,
                    "name": r.name,
                    "content": r.content,
                    "isError": r.is_error,
                }),
            })
            .collect(),
        ExecutionEvent::MemoryQuery { results, .. } => vec![Part::Data {
            data: json!({ "results": results }),
        }],
        ExecutionEvent::Unknown { event_type, .. } => vec![Part::Text {
            text: format!("unsupported event type: {event_type}"),
        }],
    };

    let mut metadata = Map::new();
    metadata.insert("eventType".into(), Value::String(ev.type_name().to_string()));
    metadata.insert("source".into(), Value::String(ev.source().to_string()));
    if let Some(usage) = ev.usage() {
        metadata.insert(
            "usage".into(),
            json!({
                "promptTokens": usage.prompt_tokens,
                "completionTokens": usage.completion_tokens,
            }),
        );
    }
    if matches!(ev, ExecutionEvent::ModelStreamingChunk { .. }) {
        metadata.insert("partial".into(), Value::Bool(true));
    }

    let mut msg = Message::agent(
        parts,
        Some(context_id.to_string()),
        Some(task_id.to_string()),
    );
    msg.metadata = metadata;
    msg
}
