//! Trigger intake endpoint

use axum::{Json, Router, extract::State, routing::post};

use super::ApiState;
use crate::error::AppError;
use crate::triggers::{DispatchOutcome, TriggerEvent};

/// POST /events - Deliver one database trigger event
pub async fn post_event(
    State(state): State<ApiState>,
    Json(event): Json<TriggerEvent>,
) -> Result<Json<DispatchOutcome>, AppError> {
    Ok(Json(state.dispatcher.dispatch(event).await?))
}

pub fn router() -> Router<ApiState> {
    Router::new().route("/events", post(post_event))
}
