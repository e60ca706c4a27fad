//! Trust API Endpoints

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use serde::Deserialize;

use super::ApiState;
use super::middleware::CallerId;
use crate::error::AppError;
use crate::trust::{DeltaResult, TrustHistoryView, TrustPolicy, TrustScoreRecord};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustTrustRequest {
    pub user_id: String,
    pub delta: i64,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<usize>,
}

/// POST /trust/adjust - Administrative score adjustment
pub async fn adjust_trust(
    State(state): State<ApiState>,
    CallerId(caller): CallerId,
    Json(payload): Json<AdjustTrustRequest>,
) -> Result<Json<DeltaResult>, AppError> {
    let result = state
        .trust
        .admin_adjust(&caller, &payload.user_id, payload.delta, &payload.reason)
        .await?;
    Ok(Json(result))
}

/// GET /trust/config - Current score bounds and deltas
pub async fn get_config(State(state): State<ApiState>) -> Json<TrustPolicy> {
    Json(state.trust.engine().policy().clone())
}

/// GET /trust/{user_id} - Current score and level
pub async fn get_trust(
    State(state): State<ApiState>,
    CallerId(_caller): CallerId,
    Path(user_id): Path<String>,
) -> Result<Json<TrustScoreRecord>, AppError> {
    Ok(Json(state.trust.record(&user_id).await?))
}

/// GET /trust/{user_id}/history - Newest-first score history
pub async fn get_history(
    State(state): State<ApiState>,
    CallerId(caller): CallerId,
    Path(user_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<TrustHistoryView>, AppError> {
    Ok(Json(state.trust.history(&caller, &user_id, params.limit).await?))
}

pub fn router() -> Router<ApiState> {
    Router::new()
        .route("/trust/adjust", post(adjust_trust))
        .route("/trust/config", get(get_config))
        .route("/trust/{user_id}", get(get_trust))
        .route("/trust/{user_id}/history", get(get_history))
}
