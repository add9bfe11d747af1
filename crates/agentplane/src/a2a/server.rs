//! HTTP surface of the bridge: JSON-RPC over `POST`, SSE for streams.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::registry::{HandlerEntry, HandlerRegistry};
use super::session::SessionStore;
use super::task::{TaskManager, run_stream, send_message};
use super::types::{
    A2aEvent, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, JSONRPC_VERSION, JsonRpcRequest,
    JsonRpcResponse, METHOD_NOT_FOUND, METHOD_SEND, METHOD_STREAM, MessageSendParams, PARSE_ERROR,
};

#[derive(Clone)]
pub struct A2aState {
    pub registry: Arc<HandlerRegistry>,
    pub sessions: Arc<dyn SessionStore>,
    pub tasks: TaskManager,
    pub request_timeout: Duration,
    pub stream_buffer: usize,
}

pub fn router(state: A2aState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/a2a/:namespace/:name/.well-known/agent.json",
            get(agent_card),
        )
        .route("/api/a2a/:namespace/:name", post(rpc))
        .route("/api/a2a/:namespace/:name/", post(rpc))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

fn not_found(path: &str) -> Response {
    (StatusCode::NOT_FOUND, format!("no agent serves {path}")).into_response()
}

async fn agent_card(State(state): State<A2aState>, uri: Uri) -> Response {
    match state.registry.route(uri.path()).await {
        Some(entry) => Json(entry.card).into_response(),
        None => not_found(uri.path()),
    }
}

fn rpc_error(id: Value, code: i64, message: impl Into<String>) -> Response {
    Json(JsonRpcResponse::failure(id, code, message)).into_response()
}

fn rpc_result<T: Serialize>(id: Value, result: &T) -> Result<JsonRpcResponse, serde_json::Error> {
    Ok(JsonRpcResponse::success(id, serde_json::to_value(result)?))
}

async fn rpc(State(state): State<A2aState>, uri: Uri, body: String) -> Response {
    let Some(entry) = state.registry.route(uri.path()).await else {
        return not_found(uri.path());
    };

    let raw: Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => return rpc_error(Value::Null, PARSE_ERROR, format!("parse error: {e}")),
    };
    let id = raw.get("id").cloned().unwrap_or(Value::Null);
    let req: JsonRpcRequest = match serde_json::from_value(raw) {
        Ok(r) => r,
        Err(e) => return rpc_error(id, INVALID_REQUEST, format!("invalid request: {e}")),
    };
    if req.jsonrpc != JSONRPC_VERSION {
        return rpc_error(req.id, INVALID_REQUEST, "jsonrpc must be \"2.0\"");
    }
    if req.method != METHOD_SEND && req.method != METHOD_STREAM {
        return rpc_error(
            req.id,
            METHOD_NOT_FOUND,
            format!("method not found: {}", req.method),
        );
    }
    let params: MessageSendParams = match serde_json::from_value(req.params) {
        Ok(p) => p,
        Err(e) => return rpc_error(req.id, INVALID_PARAMS, format!("invalid params: {e}")),
    };
    tracing::debug!("a2a {} for {}", req.method, entry.agent);

    if req.method == METHOD_SEND {
        let reply = send_message(
            &entry,
            &*state.sessions,
            &state.tasks,
            params,
            state.request_timeout,
        )
        .await;
        match rpc_result(req.id.clone(), &A2aEvent::Message(reply)) {
            Ok(resp) => Json(resp).into_response(),
            Err(e) => rpc_error(req.id, INTERNAL_ERROR, e.to_string()),
        }
    } else {
        stream(state, entry, req.id, params).into_response()
    }
}

fn stream(
    state: A2aState,
    entry: HandlerEntry,
    id: Value,
    params: MessageSendParams,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel(state.stream_buffer.max(1));
    tokio::spawn(run_stream(
        entry,
        state.sessions.clone(),
        state.tasks.clone(),
        params,
        tx,
    ));

    let events = ReceiverStream::new(rx).map(move |ev| {
        let data = match rpc_result(id.clone(), &ev).and_then(|r| serde_json::to_string(&r)) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("failed to encode a2a event: {}", e);
                let fallback = JsonRpcResponse::failure(id.clone(), INTERNAL_ERROR, e.to_string());
                serde_json::to_string(&fallback).unwrap_or_default()
            }
        };
        Ok(Event::default().data(data))
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::a2a::session::MemorySessionStore;
    use crate::a2a::types::AgentCard;
    use crate::resources::ObjectRef;
    use crate::testing::ScriptedHandler;
    use serde_json::json;

    async fn spawn_server(handler: ScriptedHandler) -> String {
        let registry = Arc::new(HandlerRegistry::new());
        registry
            .set_handler(
                ObjectRef::new("ns", "echo"),
                AgentCard {
                    name: "echo".into(),
                    url: "http://127.0.0.1/api/a2a/ns/echo/".into(),
                    ..Default::default()
                },
                Arc::new(handler),
            )
            .await;
        let state = A2aState {
            registry,
            sessions: Arc::new(MemorySessionStore::new()),
            tasks: TaskManager::new(),
            request_timeout: Duration::from_secs(5),
            stream_buffer: 8,
        };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn send_body(method: &str, text: &str) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": method,
            "params": {"message": {"role": "user", "parts": [{"kind": "text", "text": text}]}}
        })
    }

    async fn post_json(base: &str, path: &str, body: &Value) -> (StatusCode, Value) {
        let resp = reqwest::Client::new()
            .post(format!("{base}{path}"))
            .json(body)
            .send()
            .await
            .unwrap();
        let status = resp.status();
        let text = resp.text().await.unwrap();
        (status, serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    #[tokio::test]
    async fn health_and_card() {
        let base = spawn_server(ScriptedHandler::replying("x")).await;
        let health = reqwest::get(format!("{base}/health")).await.unwrap();
        assert_eq!(health.text().await.unwrap(), "ok");

        let card: Value = reqwest::get(format!("{base}/api/a2a/ns/echo/.well-known/agent.json"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(card["name"], "echo");

        let missing = reqwest::get(format!("{base}/api/a2a/ns/nope/.well-known/agent.json"))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn send_returns_terminal_message() {
        let base = spawn_server(ScriptedHandler::replying("pong")).await;
        let (status, body) = post_json(&base, "/api/a2a/ns/echo/", &send_body("message/send", "ping")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], 7);
        assert_eq!(body["result"]["kind"], "message");
        assert_eq!(body["result"]["role"], "agent");
        assert_eq!(body["result"]["parts"][0]["text"], "pong");
    }

    #[tokio::test]
    async fn protocol_errors_use_jsonrpc_codes() {
        let base = spawn_server(ScriptedHandler::replying("pong")).await;

        let (_, body) = post_json(&base, "/api/a2a/ns/echo", &send_body("tasks/cancel", "x")).await;
        assert_eq!(body["error"]["code"], METHOD_NOT_FOUND);

        let bad_params = json!({"jsonrpc": "2.0", "id": 1, "method": "message/send", "params": {"message": 3}});
        let (_, body) = post_json(&base, "/api/a2a/ns/echo", &bad_params).await;
        assert_eq!(body["error"]["code"], INVALID_PARAMS);

        let resp = reqwest::Client::new()
            .post(format!("{base}/api/a2a/ns/echo"))
            .body("{not json")
            .send()
            .await
            .unwrap();
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], PARSE_ERROR);

        let (status, _) = post_json(&base, "/api/a2a/ns/ghost", &send_body("message/send", "x")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stream_is_server_sent_events() {
        let base = spawn_server(ScriptedHandler::streaming(vec![Ok("a"), Ok("b")])).await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/api/a2a/ns/echo/"))
            .json(&send_body("message/stream", "go"))
            .send()
            .await
            .unwrap();
        assert!(
            resp.headers()["content-type"]
                .to_str()
                .unwrap()
                .starts_with("text/event-stream")
        );
        let text = resp.text().await.unwrap();
        let frames: Vec<Value> = text
            .lines()
            .filter_map(|l| l.strip_prefix("data:"))
            .map(|d| serde_json::from_str(d.trim()).unwrap())
            .collect();
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0]["result"]["kind"], "status-update");
        assert_eq!(frames[0]["result"]["status"]["state"], "working");
        assert_eq!(frames[1]["result"]["parts"][0]["text"], "a");
        assert_eq!(frames[3]["result"]["status"]["state"], "completed");
        assert_eq!(frames[3]["result"]["final"], true);
    }
}
