//! COAR Notify inbox

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::AppState;
use zenodo_common::{
    errors::Result,
    peer_review::{self, InboxOutcome},
};

pub async fn receive(State(state): State<AppState>, Json(payload): Json<Value>) -> Result<(StatusCode, Json<Value>)> {
    let body = match peer_review::receive(&state.services, &payload).await? {
        InboxOutcome::Stored(review) => json!({
            "id": review.id,
            "notification_id": review.notification_id,
            "record_id": review.record_id,
            "status": review.review_status(),
        }),
        InboxOutcome::Ignored => json!({"status": "ignored"}),
    };
    Ok((StatusCode::ACCEPTED, Json(body)))
}
