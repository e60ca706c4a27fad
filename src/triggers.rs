//! Trigger entry points
//!
//! Database-write triggers arrive as [`TriggerEvent`]s and are routed to the
//! trust and moderation services. Every trust delta derived from a trigger is
//! keyed by the source document, so a redelivered event is a no-op.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use crate::error::{AppResult, require_id};
use crate::moderation::{ModerationService, ReportEvent, ReportOutcome};
use crate::store::Document;
use crate::trust::{DeltaResult, TrustAction, TrustDeltaRequest, TrustScoreManager};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerEvent {
    #[serde(rename_all = "camelCase")]
    SubjectCreated { user_id: String },

    #[serde(rename_all = "camelCase")]
    ReportSubmitted {
        #[serde(default)]
        report_id: Option<String>,
        #[serde(flatten)]
        report: ReportEvent,
    },

    TrustDeltaRequested(TrustDeltaRequest),

    #[serde(rename_all = "camelCase")]
    PostCreated { author_id: String, post_id: String },

    #[serde(rename_all = "camelCase")]
    CommentCreated { author_id: String, comment_id: String },

    #[serde(rename_all = "camelCase")]
    PostRemoved { author_id: String, post_id: String },

    #[serde(rename_all = "camelCase")]
    UserBlocked { blocker_id: String, blocked_user_id: String },

    #[serde(rename_all = "camelCase")]
    ReportResolved { report_id: String },

    #[serde(rename_all = "camelCase")]
    PositiveEngagement { user_id: String, source_id: String },
}

impl TriggerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TriggerEvent::SubjectCreated { .. } => "subject_created",
            TriggerEvent::ReportSubmitted { .. } => "report_submitted",
            TriggerEvent::TrustDeltaRequested(_) => "trust_delta_requested",
            TriggerEvent::PostCreated { .. } => "post_created",
            TriggerEvent::CommentCreated { .. } => "comment_created",
            TriggerEvent::PostRemoved { .. } => "post_removed",
            TriggerEvent::UserBlocked { .. } => "user_blocked",
            TriggerEvent::ReportResolved { .. } => "report_resolved",
            TriggerEvent::PositiveEngagement { .. } => "positive_engagement",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DispatchOutcome {
    SubjectInitialized { created: bool },
    Report(ReportOutcome),
    /// `applied: None` means the event had already been applied
    Trust { applied: Option<DeltaResult> },
    ResolutionReplayed { replayed: bool },
}

pub struct EventDispatcher {
    trust: Arc<TrustScoreManager>,
    moderation: Arc<ModerationService>,
}

fn source(field: &str, id: &str) -> Document {
    let mut metadata = Document::new();
    metadata.insert(field.to_string(), json!(id));
    metadata
}

impl EventDispatcher {
    pub fn new(trust: Arc<TrustScoreManager>, moderation: Arc<ModerationService>) -> Self {
        Self { trust, moderation }
    }

    async fn keyed_action(
        &self,
        user_id: &str,
        action: TrustAction,
        source_field: &str,
        source_id: &str,
    ) -> AppResult<DispatchOutcome> {
        require_id(source_field, source_id)?;
        let key = format!("{}:{}", action.reason_code(), source_id);
        let applied = self
            .trust
            .apply_action(user_id, action, source(source_field, source_id), Some(key))
            .await?;
        Ok(DispatchOutcome::Trust { applied })
    }

    pub async fn dispatch(&self, event: TriggerEvent) -> AppResult<DispatchOutcome> {
        debug!(trigger = event.name(), "Dispatching trigger");

        match event {
            TriggerEvent::SubjectCreated { user_id } => {
                let created = self.trust.initialize_subject(&user_id).await?;
                Ok(DispatchOutcome::SubjectInitialized { created })
            }
            TriggerEvent::ReportSubmitted { report_id, report } => {
                let outcome = self.moderation.report(report_id.as_deref(), report).await?;
                Ok(DispatchOutcome::Report(outcome))
            }
            TriggerEvent::TrustDeltaRequested(request) => {
                let applied = self.trust.apply(request).await?;
                Ok(DispatchOutcome::Trust { applied })
            }
            TriggerEvent::PostCreated { author_id, post_id } => {
                self.keyed_action(&author_id, TrustAction::PostCreated, "postId", &post_id)
                    .await
            }
            TriggerEvent::CommentCreated {
                author_id,
                comment_id,
            } => {
                self.keyed_action(&author_id, TrustAction::CommentCreated, "commentId", &comment_id)
                    .await
            }
            TriggerEvent::PostRemoved { author_id, post_id } => {
                self.keyed_action(&author_id, TrustAction::PostRemoved, "postId", &post_id)
                    .await
            }
            TriggerEvent::UserBlocked {
                blocker_id,
                blocked_user_id,
            } => {
                require_id("blockerId", &blocker_id)?;
                // One penalty per blocker/blocked pair.
                let pair = format!("{}:{}", blocker_id, blocked_user_id);
                self.keyed_action(&blocked_user_id, TrustAction::BlockedByUser, "blockerId", &pair)
                    .await
            }
            TriggerEvent::ReportResolved { report_id } => {
                let replayed = self.moderation.replay_resolution(&report_id).await?;
                Ok(DispatchOutcome::ResolutionReplayed { replayed })
            }
            TriggerEvent::PositiveEngagement { user_id, source_id } => {
                self.keyed_action(&user_id, TrustAction::PositiveEngagement, "sourceId", &source_id)
                    .await
            }
        }
    }
}
