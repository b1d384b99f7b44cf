use axum::{extract::State, response::Response, Json};
use serde_json::{json, Value};
use tracing::debug;

use crate::api::{turn_error_response, UserIdentity};
use crate::shared_state::UnifiedAppState;
use crate::turn::DeliveryEvent;

/// GET /chat/history - the latest conversation as a chat_history event
pub async fn get_history(
    State(state): State<UnifiedAppState>,
    identity: UserIdentity,
) -> Result<Json<DeliveryEvent>, Response> {
    state.counters.inc_total_requests();
    let history = state
        .orchestrator
        .history(identity.user_id)
        .map_err(|e| turn_error_response("/chat/history", e))?;

    debug!(
        user_id = identity.user_id,
        messages = history.messages.len(),
        summarized = history.summarized_count,
        "History loaded"
    );
    crate::metrics::inc_request("/chat/history", "200");
    Ok(Json(history.into_event()))
}

/// GET /healthz
pub async fn healthz(State(state): State<UnifiedAppState>) -> Json<Value> {
    let (total_requests, turns_completed, turns_rejected) = state.counters.snapshot();
    Json(json!({
        "status": "ok",
        "summary_mode": format!("{:?}", state.config.summary_mode).to_lowercase(),
        "total_requests": total_requests,
        "turns_completed": turns_completed,
        "turns_rejected": turns_rejected,
    }))
}
