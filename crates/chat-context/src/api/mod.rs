//! API module - thin HTTP delivery surface over the turn orchestrator

pub mod chat_api;
pub mod history_api;

pub use chat_api::{accept_recommendation, post_chat, post_chat_stream, AcceptRequest, ChatRequest, ChatResponse};
pub use history_api::{get_history, healthz};

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{error, warn};

use crate::error::TurnError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_NAME_HEADER: &str = "x-user-name";
pub const CHAT_STYLE_HEADER: &str = "x-chat-style";

/// Caller identity taken from request headers; authentication happens upstream.
#[derive(Debug, Clone)]
pub struct UserIdentity {
    pub user_id: i64,
    pub display_name: Option<String>,
    pub chat_style: Option<String>,
}

fn header_str(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl<S> FromRequestParts<S> for UserIdentity
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = header_str(parts, USER_ID_HEADER)
            .ok_or_else(|| (StatusCode::UNAUTHORIZED, "Missing x-user-id header").into_response())?;
        let user_id = raw
            .parse::<i64>()
            .map_err(|_| (StatusCode::BAD_REQUEST, format!("Invalid user id: {}", raw)).into_response())?;
        Ok(Self {
            user_id,
            display_name: header_str(parts, USER_NAME_HEADER),
            chat_style: header_str(parts, CHAT_STYLE_HEADER),
        })
    }
}

pub(crate) fn turn_error_response(route: &str, err: TurnError) -> Response {
    let status = match &err {
        TurnError::Validation(_) => StatusCode::BAD_REQUEST,
        TurnError::NoConversation(_) => StatusCode::NOT_FOUND,
        TurnError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(route, error = %err, "Request failed");
    } else {
        warn!(route, error = %err, "Request rejected");
    }
    crate::metrics::inc_request(route, status.as_str());
    (status, err.to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context_engine::summarization_engine::tests::RecordingSummarizer;
    use crate::context_engine::{SummarizationConfig, SummarizationEngine, SummaryProfile};
    use crate::config::Config;
    use crate::memory_db::{HistoryStore, InMemoryHistoryStore};
    use crate::shared_state::UnifiedAppState;
    use crate::turn::orchestrator::tests::ScriptedGenerator;
    use crate::turn::{ChunkerConfig, GeneratorReply, ResponseChunker, TurnConfig, TurnOrchestrator};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    pub(crate) fn test_state(reply: GeneratorReply) -> UnifiedAppState {
        let store: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
        let engine = SummarizationEngine::new(
            store.clone(),
            Arc::new(RecordingSummarizer::ok("summary")),
            SummaryProfile::default(),
            SummarizationConfig::default(),
        );
        let chunker = ResponseChunker::new(ChunkerConfig {
            base_delay: Duration::ZERO,
            chars_per_second: 0.0,
            ..ChunkerConfig::default()
        });
        let orchestrator = TurnOrchestrator::new(
            store,
            Arc::new(engine),
            Arc::new(ScriptedGenerator::reply(reply)),
            chunker,
            TurnConfig { hybrid_delay: Duration::ZERO, ..TurnConfig::default() },
        );
        UnifiedAppState::new(Arc::new(orchestrator), Config::from_lookup(|_| None).unwrap())
    }

    fn json_request(method: &str, uri: &str, user: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(user) = user {
            builder = builder.header(USER_ID_HEADER, user).header(USER_NAME_HEADER, "Ada");
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_chat_returns_events() {
        let app = crate::thread_server::build_router(test_state(GeneratorReply::chat("Try beans.")));
        let response = app
            .oneshot(json_request("POST", "/chat", Some("5"), json!({"message": "Hungry"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let events = body["events"].as_array().unwrap();
        assert_eq!(events[0]["event"], "message_saved");
        assert_eq!(events[1]["event"], "chat");
        assert_eq!(events[1]["content"], "Try beans.");
    }

    #[tokio::test]
    async fn test_missing_identity_is_unauthorized() {
        let app = crate::thread_server::build_router(test_state(GeneratorReply::chat("x")));
        let response = app
            .oneshot(json_request("POST", "/chat", None, json!({"message": "Hungry"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let app = crate::thread_server::build_router(test_state(GeneratorReply::chat("x")));
        let response = app
            .oneshot(json_request("POST", "/chat", Some("abc"), json!({"message": "Hungry"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_validation_error_is_bad_request() {
        let app = crate::thread_server::build_router(test_state(GeneratorReply::chat("x")));
        let response = app
            .oneshot(json_request("POST", "/chat", Some("5"), json!({"message": "  "})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_accept_without_conversation_is_not_found() {
        let app = crate::thread_server::build_router(test_state(GeneratorReply::chat("x")));
        let response = app
            .oneshot(json_request(
                "POST",
                "/chat/recommendations/accept",
                Some("5"),
                json!({"title": "Suya", "content": "Spicy grilled beef."}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_accept_then_history() {
        let state = test_state(GeneratorReply::chat("Hello!"));
        let app = crate::thread_server::build_router(state);

        let response = app
            .clone()
            .oneshot(json_request("POST", "/chat", Some("5"), json!({"message": "Hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/chat/recommendations/accept",
                Some("5"),
                json!({"title": "Suya", "content": "Spicy grilled beef."}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["text"], "Suya: Spicy grilled beef.");

        let request = Request::builder()
            .uri("/chat/history")
            .header(USER_ID_HEADER, "5")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body["event"], "chat_history");
        assert_eq!(body["messages"].as_array().unwrap().len(), 3);
        assert_eq!(body["has_summary"], false);
    }

    #[tokio::test]
    async fn test_stream_endpoint_emits_sse() {
        let app = crate::thread_server::build_router(test_state(GeneratorReply::chat("Streamed reply.")));
        let response = app
            .oneshot(json_request("POST", "/chat/stream", Some("5"), json!({"message": "Hi", "stream": true})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()["content-type"].to_str().unwrap().starts_with("text/event-stream"));

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("event: message_saved"));
        assert!(text.contains("event: chat"));
        assert!(text.contains("Streamed reply."));
    }

    #[tokio::test]
    async fn test_stream_endpoint_chunks_without_stream_flag() {
        let sentence = format!("{}. ", "c".repeat(98));
        let reply = sentence.repeat(3);
        let app = crate::thread_server::build_router(test_state(GeneratorReply::chat(&reply)));
        let response = app
            .oneshot(json_request("POST", "/chat/stream", Some("5"), json!({"message": "Hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert_eq!(text.matches("event: chunk").count(), 3);
        assert!(!text.contains("event: chat\n"));
    }

    #[tokio::test]
    async fn test_healthz() {
        let app = crate::thread_server::build_router(test_state(GeneratorReply::chat("x")));
        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }
}
