//! Chat turn endpoints: request/response, SSE and recommendation acceptance.

use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::api::{turn_error_response, UserIdentity};
use crate::memory_db::Attachment;
use crate::shared_state::UnifiedAppState;
use crate::turn::{ChannelSink, CollectingSink, DeliveryEvent, InboundTurn, UserProfile};

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Chunk long replies. Always on for `/chat/stream`.
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub events: Vec<DeliveryEvent>,
}

#[derive(Debug, Deserialize)]
pub struct AcceptRequest {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct AcceptResponse {
    pub message_id: i64,
    pub text: String,
}

fn inbound(identity: UserIdentity, stream: bool, req: ChatRequest) -> InboundTurn {
    InboundTurn {
        user: UserProfile {
            id: identity.user_id,
            display_name: identity.display_name,
            chat_style: identity.chat_style,
        },
        text: req.message,
        attachments: req.attachments,
        stream,
    }
}

/// POST /chat - runs one turn and returns every delivered event
pub async fn post_chat(
    State(state): State<UnifiedAppState>,
    identity: UserIdentity,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, Response> {
    let request_num = state.counters.inc_total_requests();
    debug!(request_num, user_id = identity.user_id, "Chat request");

    let stream_requested = req.stream;
    let sink = CollectingSink::new();
    match state.orchestrator.handle_turn(inbound(identity, stream_requested, req), &sink).await {
        Ok(_) => {
            state.counters.inc_turns_completed();
            crate::metrics::inc_request("/chat", "200");
            Ok(Json(ChatResponse { events: sink.into_events() }))
        }
        Err(e) => {
            state.counters.inc_turns_rejected();
            Err(turn_error_response("/chat", e))
        }
    }
}

/// POST /chat/stream - same turn, delivered as server-sent events
pub async fn post_chat_stream(
    State(state): State<UnifiedAppState>,
    identity: UserIdentity,
    Json(req): Json<ChatRequest>,
) -> Response {
    state.counters.inc_total_requests();
    // Reject before the stream opens so clients get a proper status code
    if let Err(e) = state.orchestrator.validate(&req.message, req.attachments.len()) {
        state.counters.inc_turns_rejected();
        return turn_error_response("/chat/stream", e.into());
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<DeliveryEvent>();
    let orchestrator = state.orchestrator.clone();
    let counters = state.counters.clone();
    let turn = inbound(identity, true, req);

    tokio::spawn(async move {
        let sink = ChannelSink::new(tx.clone());
        match orchestrator.handle_turn(turn, &sink).await {
            Ok(outcome) => {
                counters.inc_turns_completed();
                debug!(conversation_id = outcome.conversation_id, "Streamed turn finished");
            }
            Err(e) => {
                counters.inc_turns_rejected();
                let _ = tx.send(DeliveryEvent::Error { message: e.to_string() });
            }
        }
    });

    crate::metrics::inc_request("/chat/stream", "200");
    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let name = event.name();
            let sse = match Event::default().event(name).json_data(&event) {
                Ok(sse) => sse,
                Err(e) => Event::default().event("error").data(e.to_string()),
            };
            yield Ok::<_, Infallible>(sse);
        }
    };

    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("keep-alive"))
        .into_response()
}

/// POST /chat/recommendations/accept - stores an accepted recommendation
pub async fn accept_recommendation(
    State(state): State<UnifiedAppState>,
    identity: UserIdentity,
    Json(req): Json<AcceptRequest>,
) -> Result<Json<AcceptResponse>, Response> {
    state.counters.inc_total_requests();
    let stored = state
        .orchestrator
        .accept_recommendation(identity.user_id, &req.title, &req.content)
        .map_err(|e| turn_error_response("/chat/recommendations/accept", e))?;

    info!(user_id = identity.user_id, message_id = stored.id, "Recommendation stored");
    crate::metrics::inc_request("/chat/recommendations/accept", "200");
    Ok(Json(AcceptResponse { message_id: stored.id, text: stored.text }))
}
