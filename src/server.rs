//! HTTP and WebSocket front end over the chat dispatcher
//!
//! | Route | Behaviour |
//! |---|---|
//! | `GET /` | service info |
//! | `GET /health` | 200 when the configured backend can answer, 503 otherwise |
//! | `POST /chat` | `{"messages": [...], "model"?}` → `{"reply": "..."}` |
//! | `GET /ws` | chat socket; history is kept per connection |

use crate::chat::{Conversation, ConversationMessage, Dispatcher};
use crate::error::Result;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Shared by every request
pub struct ServerState {
    pub dispatcher: Arc<Dispatcher>,
    /// Model used when a request names none
    pub model: String,
    pub use_local: bool,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    messages: Option<Vec<ConversationMessage>>,
    #[serde(default)]
    model: Option<String>,
}

/// Routes without middleware, for embedding and tests
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/chat", post(chat))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

/// Bind `addr` and serve until the process is stopped
pub async fn serve(addr: &str, state: Arc<ServerState>) -> Result<()> {
    let app = router(state).layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}

async fn root(State(state): State<Arc<ServerState>>) -> Json<serde_json::Value> {
    Json(json!({
        "service": "Bielik Server",
        "version": env!("CARGO_PKG_VERSION"),
        "model": state.model,
        "status": "running"
    }))
}

async fn health(State(state): State<Arc<ServerState>>) -> Response {
    if state.use_local && !state.dispatcher.local_available() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "error": crate::error::LoadError::NotInstalled.to_string()
            })),
        )
            .into_response();
    }

    Json(json!({
        "status": "healthy",
        "model": state.model,
        "backend": if state.use_local { "local" } else { "remote" },
        "cached_runners": state.dispatcher.cached_runners()
    }))
    .into_response()
}

async fn chat(State(state): State<Arc<ServerState>>, Json(request): Json<ChatRequest>) -> Response {
    let Some(messages) = request.messages.filter(|m| !m.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "messages required"})),
        )
            .into_response();
    };
    let model = request.model.as_deref().unwrap_or(&state.model);

    match state.dispatcher.send_chat(&messages, model, state.use_local).await {
        Ok(reply) => Json(json!({"reply": reply})).into_response(),
        Err(e) => {
            tracing::error!("Chat request failed: {e}");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({"error": e.to_string(), "kind": format!("{:?}", e.kind)})),
            )
                .into_response()
        }
    }
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<ServerState>>) -> Response {
    ws.on_upgrade(move |socket| ws_session(socket, state))
}

async fn ws_session(mut socket: WebSocket, state: Arc<ServerState>) {
    let mut conversation = Conversation::default();

    while let Some(frame) = socket.recv().await {
        let raw = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!("WebSocket error: {e}");
                break;
            }
        };

        let user = ws_user_text(&raw);
        let messages = conversation.with_pending(&user);
        let reply = match state
            .dispatcher
            .send_chat(&messages, &state.model, state.use_local)
            .await
        {
            Ok(reply) => {
                conversation.push_turn(user, reply.clone());
                reply
            }
            Err(e) => e.to_string(),
        };

        if socket.send(Message::Text(reply)).await.is_err() {
            break;
        }
    }
    tracing::info!("WebSocket client disconnected");
}

/// User text from a socket frame: `{"content": ...}`, any other JSON value, or the raw text
#[must_use]
pub fn ws_user_text(raw: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) if map.contains_key("content") => match &map["content"] {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        },
        Ok(serde_json::Value::String(s)) => s,
        Ok(other) => other.to_string(),
        Err(_) => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::ChatBackend;
    use crate::error::{ChatError, ChatResult, LoadError};
    use crate::models::hub::FetchRequest;
    use crate::models::{ModelHub, ModelRegistry};
    use crate::runner::{InferenceModel, ModelLoader, RunnerParams};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct NoHub;

    #[async_trait]
    impl ModelHub for NoHub {
        async fn list_files(&self, _repo_id: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn fetch(&self, _request: FetchRequest<'_>) -> Result<PathBuf> {
            Err(crate::BielikError::Hub("offline".to_string()))
        }
    }

    /// Replies with a fixed text and records what it was sent
    #[derive(Default)]
    struct Fixed {
        seen: Mutex<Vec<(usize, String)>>,
    }

    #[async_trait]
    impl ChatBackend for Fixed {
        async fn chat(&self, messages: &[ConversationMessage], model: &str) -> ChatResult {
            self.seen.lock().unwrap().push((messages.len(), model.to_string()));
            Ok("Witaj!".to_string())
        }

        fn backend_name(&self) -> &'static str {
            "fixed"
        }
    }

    struct Failing;

    #[async_trait]
    impl ChatBackend for Failing {
        async fn chat(&self, _messages: &[ConversationMessage], _model: &str) -> ChatResult {
            Err(ChatError::rest("connection refused"))
        }

        fn backend_name(&self) -> &'static str {
            "failing"
        }
    }

    struct Unavailable;

    impl ModelLoader for Unavailable {
        fn is_available(&self) -> bool {
            false
        }

        fn load(
            &self,
            _path: &Path,
            _params: &RunnerParams,
        ) -> std::result::Result<Arc<dyn InferenceModel>, LoadError> {
            Err(LoadError::NotInstalled)
        }
    }

    fn state(dir: &TempDir, backend: Arc<dyn ChatBackend>, use_local: bool) -> Arc<ServerState> {
        let registry = ModelRegistry::open(dir.path(), Arc::new(NoHub)).unwrap();
        let dispatcher = Dispatcher::new(Arc::new(tokio::sync::Mutex::new(registry)), backend)
            .with_loader(Arc::new(Unavailable), RunnerParams::default());
        Arc::new(ServerState {
            dispatcher: Arc::new(dispatcher),
            model: "test-model".to_string(),
            use_local,
        })
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(path: &str, body: &serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_root_reports_service() {
        let dir = TempDir::new().unwrap();
        let app = router(state(&dir, Arc::new(Fixed::default()), false));

        let (status, body) = send(app, get_req("/")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "Bielik Server");
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["status"], "running");
    }

    #[tokio::test]
    async fn test_health_remote_is_healthy() {
        let dir = TempDir::new().unwrap();
        let app = router(state(&dir, Arc::new(Fixed::default()), false));

        let (status, body) = send(app, get_req("/health")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["backend"], "remote");
    }

    #[tokio::test]
    async fn test_health_without_local_runtime_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let app = router(state(&dir, Arc::new(Fixed::default()), true));

        let (status, body) = send(app, get_req("/health")).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unhealthy");
        assert!(body["error"].as_str().unwrap().contains("not installed"));
    }

    #[tokio::test]
    async fn test_chat_returns_reply() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(Fixed::default());
        let app = router(state(&dir, backend.clone(), false));

        let request = post_json(
            "/chat",
            &json!({"messages": [{"role": "user", "content": "Cześć"}], "model": "inny-model"}),
        );
        let (status, body) = send(app, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reply"], "Witaj!");
        assert_eq!(*backend.seen.lock().unwrap(), vec![(1, "inny-model".to_string())]);
    }

    #[tokio::test]
    async fn test_chat_without_messages_is_bad_request() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(Fixed::default());

        for payload in [json!({}), json!({"messages": []}), json!({"messages": null})] {
            let app = router(state(&dir, backend.clone(), false));
            let (status, body) = send(app, post_json("/chat", &payload)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["error"], "messages required");
        }
        assert!(backend.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chat_failure_is_bad_gateway() {
        let dir = TempDir::new().unwrap();
        let app = router(state(&dir, Arc::new(Failing), false));

        let request = post_json("/chat", &json!({"messages": [{"role": "user", "content": "hej"}]}));
        let (status, body) = send(app, request).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].as_str().unwrap().starts_with("[ERROR] all backends failed"));
        assert_eq!(body["kind"], "Generic");
    }

    #[test]
    fn test_ws_user_text() {
        assert_eq!(ws_user_text(r#"{"content": "Dzień dobry"}"#), "Dzień dobry");
        assert_eq!(ws_user_text(r#"{"content": 42}"#), "42");
        assert_eq!(ws_user_text(r#""cytat""#), "cytat");
        assert_eq!(ws_user_text(r#"{"text": "x"}"#), r#"{"text":"x"}"#);
        assert_eq!(ws_user_text("zwykły tekst"), "zwykły tekst");
        assert_eq!(ws_user_text("7"), "7");
    }
}
