//! HTTP API for the functions service
//!
//! Provides REST endpoints for:
//! - Trigger intake (`/events`)
//! - Trust score administration and history
//! - The moderation queue
//! - Security middleware (auth, caller identity, headers)

pub mod events;
pub mod middleware;
pub mod moderation;
pub mod trust;

pub use middleware::{
    CALLER_HEADER, CallerId, SecurityMiddlewareConfig, SecurityState, auth_middleware,
    logging_middleware, security_headers_middleware,
};

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::StatusCode,
    middleware::{from_fn, from_fn_with_state},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::moderation::{ModerationService, ReportEscalation};
use crate::notify::{NotificationService, Notifier};
use crate::store::DocumentStore;
use crate::triggers::EventDispatcher;
use crate::trust::{TrustScoreEngine, TrustScoreManager};

/// Shared state for all API routes
#[derive(Clone)]
pub struct ApiState {
    pub trust: Arc<TrustScoreManager>,
    pub moderation: Arc<ModerationService>,
    pub dispatcher: Arc<EventDispatcher>,
}

impl ApiState {
    /// Wire the trust, notification and moderation services over one store.
    pub fn build(store: Arc<dyn DocumentStore>, notifier: Arc<dyn Notifier>, config: &AppConfig) -> Self {
        let retry = config.transactions.clone();
        let trust = Arc::new(TrustScoreManager::new(
            store.clone(),
            TrustScoreEngine::new(config.trust.clone()),
            retry.clone(),
        ));
        let notifications = Arc::new(NotificationService::new(store.clone(), notifier, retry.clone()));
        let moderation = Arc::new(ModerationService::new(
            store,
            trust.clone(),
            notifications,
            ReportEscalation::new(config.moderation.report_threshold),
            retry,
        ));
        let dispatcher = Arc::new(EventDispatcher::new(trust.clone(), moderation.clone()));

        Self {
            trust,
            moderation,
            dispatcher,
        }
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "Request failed with internal error");
        }
        let body = Json(json!({
            "error": self.code(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Build the full router with auth, logging and security layers applied
pub fn create_router(state: ApiState, security: SecurityState, max_request_size: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(events::router())
        .merge(trust::router())
        .merge(moderation::router())
        .with_state(state)
        .layer(from_fn_with_state(security.clone(), auth_middleware))
        .layer(from_fn_with_state(security, logging_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(DefaultBodyLimit::max(max_request_size))
        .layer(TraceLayer::new_for_http())
}
