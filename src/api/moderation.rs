//! Moderation API Endpoints
//!
//! Admin-only views of the report queue and resolution of single reports.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::ApiState;
use super::middleware::CallerId;
use crate::error::AppError;
use crate::moderation::{ModerationAction, ModerationRecord, ReportRecord, ResolutionOutcome};

#[derive(Debug, Deserialize)]
pub struct PendingParams {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct PendingResponse {
    pub total: usize,
    pub reports: Vec<ReportRecord>,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub action: ModerationAction,
    pub reason: Option<String>,
}

/// GET /moderation/pending - Pending reports, most urgent first
pub async fn get_pending(
    State(state): State<ApiState>,
    CallerId(caller): CallerId,
    Query(params): Query<PendingParams>,
) -> Result<Json<PendingResponse>, AppError> {
    let reports = state
        .moderation
        .pending(&caller, params.limit, params.offset)
        .await?;
    Ok(Json(PendingResponse {
        total: reports.len(),
        reports,
    }))
}

/// GET /moderation/content/{content_id} - Moderation record with audit log
pub async fn get_record(
    State(state): State<ApiState>,
    CallerId(caller): CallerId,
    Path(content_id): Path<String>,
) -> Result<Json<ModerationRecord>, AppError> {
    state.trust.require_admin(&caller).await?;
    Ok(Json(state.moderation.record(&content_id).await?))
}

/// POST /moderation/reports/{report_id}/resolve - Approve, reject or delete
pub async fn resolve_report(
    State(state): State<ApiState>,
    CallerId(caller): CallerId,
    Path(report_id): Path<String>,
    Json(payload): Json<ResolveRequest>,
) -> Result<Json<ResolutionOutcome>, AppError> {
    let outcome = state
        .moderation
        .resolve(&caller, &report_id, payload.action, payload.reason.as_deref())
        .await?;
    Ok(Json(outcome))
}

pub fn router() -> Router<ApiState> {
    Router::new()
        .route("/moderation/pending", get(get_pending))
        .route("/moderation/content/{content_id}", get(get_record))
        .route("/moderation/reports/{report_id}/resolve", post(resolve_report))
}
