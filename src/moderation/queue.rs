//! Moderation Service - Report Intake and Resolution
//!
//! Each report runs the escalation engine inside a transaction over the
//! moderation record and the report document. Trust effects are applied after
//! the commit, each under an idempotency key derived from the content or the
//! report, so a replayed event converges to the same final state.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::escalation::ReportEscalation;
use super::record::{
    AuditAction, MODERATION, ModerationAction, ModerationRecord, ModerationStatus, REPORTS,
    ReportEvent, ReportRecord, ReportStatus, Resolution,
};
use crate::error::{AppError, AppResult, require_id};
use crate::notify::{Notification, NotificationService};
use crate::store::{
    DocKey, Document, DocumentStore, Direction, Filter, Query, RetryPolicy, from_document,
    run_transaction,
};
use crate::trust::{TrustAction, TrustScoreManager};

const DEFAULT_PENDING_LIMIT: usize = 20;
const MAX_PENDING_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportOutcome {
    pub report_id: String,
    pub content_id: String,
    pub report_count: u64,
    pub status: ModerationStatus,
    pub hidden_now: bool,
    /// The report id had already been processed
    pub duplicate: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionOutcome {
    pub report_id: String,
    pub content_id: String,
    pub action: ModerationAction,
    pub status: ModerationStatus,
    pub already_resolved: bool,
}

pub struct ModerationService {
    store: Arc<dyn DocumentStore>,
    trust: Arc<TrustScoreManager>,
    notifications: Arc<NotificationService>,
    escalation: ReportEscalation,
    retry: RetryPolicy,
}

fn report_metadata(report_id: &str, content_id: &str) -> Document {
    let mut metadata = Document::new();
    metadata.insert("reportId".into(), json!(report_id));
    metadata.insert("contentId".into(), json!(content_id));
    metadata
}

impl ModerationService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        trust: Arc<TrustScoreManager>,
        notifications: Arc<NotificationService>,
        escalation: ReportEscalation,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            trust,
            notifications,
            escalation,
            retry,
        }
    }

    pub fn escalation(&self) -> &ReportEscalation {
        &self.escalation
    }

    /// Record one report. With `report_id` set, replays of the same report are
    /// detected and only re-apply the idempotent author penalty.
    pub async fn report(&self, report_id: Option<&str>, event: ReportEvent) -> AppResult<ReportOutcome> {
        require_id("contentId", &event.content_id)?;
        require_id("authorId", &event.author_id)?;
        require_id("reporterId", &event.reporter_id)?;
        if let Some(id) = report_id {
            require_id("reportId", id)?;
        }

        let report_id = report_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let moderation_key = DocKey::new(MODERATION, &event.content_id);
        let report_key = DocKey::new(REPORTS, &report_id);
        let keys = [moderation_key.clone(), report_key.clone()];
        let now = Utc::now();

        let outcome = run_transaction(self.store.as_ref(), &self.retry, &keys, |reads, writes| {
            let existing = reads.get_as::<ModerationRecord>(&moderation_key)?;

            if reads.exists(&report_key) {
                let (report_count, status) = existing
                    .map(|r| (r.report_count, r.status))
                    .unwrap_or((0, ModerationStatus::Active));
                return Ok(ReportOutcome {
                    report_id: report_id.clone(),
                    content_id: event.content_id.clone(),
                    report_count,
                    status,
                    hidden_now: false,
                    duplicate: true,
                });
            }

            let escalated = self.escalation.apply(existing, &event, now);
            writes.set_record(moderation_key.clone(), &escalated.record)?;
            writes.set_record(report_key.clone(), &ReportRecord::pending(&report_id, &event, now))?;

            Ok(ReportOutcome {
                report_id: report_id.clone(),
                content_id: event.content_id.clone(),
                report_count: escalated.record.report_count,
                status: escalated.record.status,
                hidden_now: escalated.hidden_now,
                duplicate: false,
            })
        })
        .await?;

        if outcome.duplicate {
            debug!(report_id = %outcome.report_id, "Report already processed");
        } else {
            info!(
                content_id = %event.content_id,
                report_id = %outcome.report_id,
                report_count = outcome.report_count,
                reason = %event.reason,
                "Report recorded"
            );
        }

        if outcome.hidden_now || (outcome.duplicate && outcome.status == ModerationStatus::Hidden) {
            self.penalize_hidden_author(&event).await?;
        }

        if outcome.hidden_now {
            warn!(
                content_id = %event.content_id,
                report_count = outcome.report_count,
                "Content auto-hidden after reaching report threshold"
            );
            let notification = Notification::new(
                "content_hidden",
                "Your content was hidden",
                "Your content received multiple reports and is hidden pending review.",
            )
            .with_data("contentId", event.content_id.clone());
            self.notifications
                .notify_best_effort(&event.author_id, &notification)
                .await;
        }

        Ok(outcome)
    }

    async fn penalize_hidden_author(&self, event: &ReportEvent) -> AppResult<()> {
        let mut metadata = Document::new();
        metadata.insert("contentId".into(), json!(event.content_id));
        let key = format!("{}:{}", TrustAction::PostAutoHidden.reason_code(), event.content_id);
        self.apply_trust(&event.author_id, TrustAction::PostAutoHidden, metadata, key)
            .await
    }

    /// Deltas for a user whose document no longer exists are skipped.
    async fn apply_trust(
        &self,
        user_id: &str,
        action: TrustAction,
        metadata: Document,
        key: String,
    ) -> AppResult<()> {
        match self.trust.apply_action(user_id, action, metadata, Some(key)).await {
            Ok(_) => Ok(()),
            Err(AppError::NotFound(what)) => {
                warn!(user_id = %user_id, action = ?action, missing = %what, "Skipping trust delta");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn apply_resolution_deltas(&self, report: &ReportRecord, resolution: Resolution) -> AppResult<()> {
        let metadata = report_metadata(&report.report_id, &report.content_id);
        let keyed = |action: TrustAction| format!("{}:{}", action.reason_code(), report.report_id);

        match resolution {
            Resolution::PostRemoved => {
                self.apply_trust(
                    &report.reporter_id,
                    TrustAction::ReportUpheldReporter,
                    metadata.clone(),
                    keyed(TrustAction::ReportUpheldReporter),
                )
                .await?;
                self.apply_trust(
                    &report.author_id,
                    TrustAction::ReportUpheldAuthor,
                    metadata,
                    keyed(TrustAction::ReportUpheldAuthor),
                )
                .await
            }
            Resolution::Dismissed => {
                self.apply_trust(
                    &report.reporter_id,
                    TrustAction::ReportDismissedReporter,
                    metadata,
                    keyed(TrustAction::ReportDismissedReporter),
                )
                .await
            }
        }
    }

    /// Administrative decision on a report.
    pub async fn resolve(
        &self,
        caller_id: &str,
        report_id: &str,
        action: ModerationAction,
        reason: Option<&str>,
    ) -> AppResult<ResolutionOutcome> {
        self.trust.require_admin(caller_id).await?;
        require_id("reportId", report_id)?;

        let report_key = DocKey::new(REPORTS, report_id);
        let initial: ReportRecord = match self.store.get(REPORTS, report_id).await? {
            Some(doc) => from_document(doc)?,
            None => return Err(AppError::not_found(format!("report {}", report_id))),
        };

        let moderation_key = DocKey::new(MODERATION, &initial.content_id);
        let content_key = DocKey::new(initial.content_type.collection(), &initial.content_id);
        let keys = [report_key.clone(), moderation_key.clone(), content_key.clone()];
        let reason = reason.map(str::trim).filter(|r| !r.is_empty());
        let now = Utc::now();

        let (outcome, report) = run_transaction(self.store.as_ref(), &self.retry, &keys, |reads, writes| {
            let Some(mut report) = reads.get_as::<ReportRecord>(&report_key)? else {
                return Err(AppError::not_found(format!("report {}", report_id)));
            };
            let mut record = reads.get_as::<ModerationRecord>(&moderation_key)?.unwrap_or_else(|| {
                ModerationRecord::new(&report.content_id, report.content_type, &report.author_id, now)
            });

            if report.status == ReportStatus::Resolved {
                if report.action != Some(action) {
                    return Err(AppError::invalid(format!(
                        "report {} already resolved with a different action",
                        report_id
                    )));
                }
                let outcome = ResolutionOutcome {
                    report_id: report_id.to_string(),
                    content_id: report.content_id.clone(),
                    action,
                    status: record.status,
                    already_resolved: true,
                };
                return Ok((outcome, report));
            }

            match action {
                ModerationAction::Approve => {
                    let reason = reason.unwrap_or("Flagged for content policy violation");
                    record.status = ModerationStatus::Removed;
                    record.audit(AuditAction::PostRemoved, Some(caller_id), reason, now);
                    if reads.exists(&content_key) {
                        let mut fields = Document::new();
                        fields.insert("deleted".into(), json!(true));
                        fields.insert("deletedReason".into(), json!(reason));
                        fields.insert("deletedAt".into(), json!(now.timestamp_millis()));
                        fields.insert("flaggedAsInappropriate".into(), json!(true));
                        writes.update(content_key.clone(), fields);
                    }
                }
                ModerationAction::Reject => {
                    if record.status != ModerationStatus::Removed {
                        record.status = ModerationStatus::Resolved;
                    }
                    record.audit(
                        AuditAction::ReportDismissed,
                        Some(caller_id),
                        reason.unwrap_or("Report dismissed"),
                        now,
                    );
                }
                ModerationAction::Delete => {
                    record.status = ModerationStatus::Removed;
                    record.audit(
                        AuditAction::ContentDeleted,
                        Some(caller_id),
                        reason.unwrap_or("Content deleted by moderator"),
                        now,
                    );
                    if reads.exists(&content_key) {
                        writes.delete(content_key.clone());
                    }
                }
            }

            report.status = ReportStatus::Resolved;
            report.resolution = Some(action.resolution());
            report.action = Some(action);
            report.resolved_by = Some(caller_id.to_string());
            report.resolved_at = Some(now);
            report.deleted = action == ModerationAction::Delete;

            writes.set_record(moderation_key.clone(), &record)?;
            writes.set_record(report_key.clone(), &report)?;

            let outcome = ResolutionOutcome {
                report_id: report_id.to_string(),
                content_id: report.content_id.clone(),
                action,
                status: record.status,
                already_resolved: false,
            };
            Ok((outcome, report))
        })
        .await?;

        if !outcome.already_resolved {
            info!(
                caller_id = %caller_id,
                report_id = %report_id,
                content_id = %outcome.content_id,
                action = ?action,
                "Report resolved"
            );
        }

        self.apply_resolution_deltas(&report, action.resolution()).await?;

        if !outcome.already_resolved && action != ModerationAction::Reject {
            let notification = Notification::new(
                "content_removed",
                "Your content was removed",
                "A moderator removed your content for violating community guidelines.",
            )
            .with_data("contentId", outcome.content_id.clone());
            self.notifications
                .notify_best_effort(&report.author_id, &notification)
                .await;
        }

        Ok(outcome)
    }

    /// Re-apply the trust effects of an already resolved report.
    pub async fn replay_resolution(&self, report_id: &str) -> AppResult<bool> {
        require_id("reportId", report_id)?;
        let report: ReportRecord = match self.store.get(REPORTS, report_id).await? {
            Some(doc) => from_document(doc)?,
            None => return Err(AppError::not_found(format!("report {}", report_id))),
        };

        match (report.status, report.resolution) {
            (ReportStatus::Resolved, Some(resolution)) => {
                self.apply_resolution_deltas(&report, resolution).await?;
                Ok(true)
            }
            _ => {
                debug!(report_id = %report_id, "Report not resolved, nothing to replay");
                Ok(false)
            }
        }
    }

    /// Pending reports, most urgent first, then oldest first.
    pub async fn pending(
        &self,
        caller_id: &str,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> AppResult<Vec<ReportRecord>> {
        self.trust.require_admin(caller_id).await?;

        let query = Query::collection(REPORTS)
            .filter(Filter::eq("status", "pending"))
            .order_by("priority", Direction::Desc)
            .order_by("createdAt", Direction::Asc)
            .limit(limit.unwrap_or(DEFAULT_PENDING_LIMIT).clamp(1, MAX_PENDING_LIMIT))
            .offset(offset.unwrap_or(0));

        let mut reports = Vec::new();
        for doc in self.store.query(&query).await? {
            reports.push(from_document(doc.data)?);
        }
        Ok(reports)
    }

    pub async fn record(&self, content_id: &str) -> AppResult<ModerationRecord> {
        require_id("contentId", content_id)?;
        match self.store.get(MODERATION, content_id).await? {
            Some(doc) => Ok(from_document(doc)?),
            None => Err(AppError::not_found(format!("moderation record {}", content_id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::record::ContentType;
    use crate::notify::LogNotifier;
    use crate::store::MemoryStore;
    use crate::trust::{TrustScoreEngine, USERS};
    use serde_json::Value;

    struct Fixture {
        store: Arc<MemoryStore>,
        trust: Arc<TrustScoreManager>,
        service: Arc<ModerationService>,
    }

    fn fixture(threshold: u64) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let retry = RetryPolicy {
            max_attempts: 100,
            backoff_ms: 1,
        };
        let trust = Arc::new(TrustScoreManager::new(
            store.clone(),
            TrustScoreEngine::default(),
            retry.clone(),
        ));
        let notifications = Arc::new(NotificationService::new(
            store.clone(),
            Arc::new(LogNotifier),
            retry.clone(),
        ));
        let service = Arc::new(ModerationService::new(
            store.clone(),
            trust.clone(),
            notifications,
            ReportEscalation::new(threshold),
            retry,
        ));
        Fixture {
            store,
            trust,
            service,
        }
    }

    async fn seed(store: &MemoryStore, collection: &str, id: &str, value: Value) {
        store
            .set(collection, id, value.as_object().cloned().unwrap())
            .await
            .unwrap();
    }

    async fn seed_people(store: &MemoryStore) {
        seed(store, USERS, "admin", json!({"isAdmin": true, "trustScore": 90})).await;
        seed(store, USERS, "author", json!({"trustScore": 50})).await;
        for r in ["r1", "r2", "r3"] {
            seed(store, USERS, r, json!({"trustScore": 50})).await;
        }
    }

    fn event(reporter: &str, reason: &str) -> ReportEvent {
        ReportEvent {
            content_id: "p1".to_string(),
            content_type: ContentType::Post,
            author_id: "author".to_string(),
            reporter_id: reporter.to_string(),
            reason: reason.to_string(),
        }
    }

    #[tokio::test]
    async fn test_threshold_hides_and_penalizes_author_once() {
        let f = fixture(3);
        seed_people(&f.store).await;

        for (i, r) in ["r1", "r2", "r3", "r1"].iter().enumerate() {
            let outcome = f
                .service
                .report(Some(&format!("rep{}", i)), event(r, "spam"))
                .await
                .unwrap();
            assert_eq!(outcome.hidden_now, i == 2);
        }

        let record = f.service.record("p1").await.unwrap();
        assert_eq!(record.report_count, 4);
        assert_eq!(record.status, ModerationStatus::Hidden);
        assert_eq!(record.audit_log.count(AuditAction::PostHidden), 1);
        assert_eq!(record.audit_log.count(AuditAction::PostReported), 4);

        assert_eq!(f.trust.record("author").await.unwrap().score, 45);
    }

    #[tokio::test]
    async fn test_replayed_report_id_is_duplicate() {
        let f = fixture(1);
        seed_people(&f.store).await;

        let first = f.service.report(Some("rep1"), event("r1", "spam")).await.unwrap();
        assert!(first.hidden_now);
        let replay = f.service.report(Some("rep1"), event("r1", "spam")).await.unwrap();
        assert!(replay.duplicate);
        assert_eq!(replay.report_count, 1);

        assert_eq!(f.service.record("p1").await.unwrap().report_count, 1);
        assert_eq!(f.trust.record("author").await.unwrap().score, 45);
    }

    #[tokio::test]
    async fn test_report_requires_ids() {
        let f = fixture(3);
        let mut bad = event("r1", "spam");
        bad.content_id = String::new();
        let err = f.service.report(None, bad).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
        assert_eq!(f.store.count(MODERATION).await, 0);
    }

    #[tokio::test]
    async fn test_pending_orders_by_priority_then_age_and_requires_admin() {
        let f = fixture(10);
        seed_people(&f.store).await;

        f.service.report(Some("a"), event("r1", "spam")).await.unwrap();
        f.service.report(Some("b"), event("r2", "violence")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        f.service.report(Some("c"), event("r3", "spam")).await.unwrap();

        let pending = f.service.pending("admin", None, None).await.unwrap();
        let ids: Vec<_> = pending.iter().map(|r| r.report_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);

        let page = f.service.pending("admin", Some(1), Some(1)).await.unwrap();
        assert_eq!(page[0].report_id, "a");

        let err = f.service.pending("r1", None, None).await.unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_approve_removes_content_and_applies_deltas_once() {
        let f = fixture(3);
        seed_people(&f.store).await;
        seed(&f.store, "posts", "p1", json!({"text": "buy now"})).await;

        f.service.report(Some("rep1"), event("r1", "spam")).await.unwrap();
        let outcome = f
            .service
            .resolve("admin", "rep1", ModerationAction::Approve, None)
            .await
            .unwrap();
        assert_eq!(outcome.status, ModerationStatus::Removed);

        let post = f.store.get("posts", "p1").await.unwrap().unwrap();
        assert_eq!(post["deleted"], json!(true));
        assert_eq!(post["flaggedAsInappropriate"], json!(true));

        let replay = f
            .service
            .resolve("admin", "rep1", ModerationAction::Approve, None)
            .await
            .unwrap();
        assert!(replay.already_resolved);

        assert_eq!(f.trust.record("r1").await.unwrap().score, 53);
        assert_eq!(f.trust.record("author").await.unwrap().score, 42);

        let record = f.service.record("p1").await.unwrap();
        assert_eq!(record.audit_log.count(AuditAction::PostRemoved), 1);

        let err = f
            .service
            .resolve("admin", "rep1", ModerationAction::Reject, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_reject_dismisses_and_penalizes_reporter() {
        let f = fixture(3);
        seed_people(&f.store).await;

        f.service.report(Some("rep1"), event("r1", "other")).await.unwrap();
        let outcome = f
            .service
            .resolve("admin", "rep1", ModerationAction::Reject, Some("not a violation"))
            .await
            .unwrap();
        assert_eq!(outcome.status, ModerationStatus::Resolved);

        let report: ReportRecord = from_document(f.store.get(REPORTS, "rep1").await.unwrap().unwrap()).unwrap();
        assert_eq!(report.status, ReportStatus::Resolved);
        assert_eq!(report.resolution, Some(Resolution::Dismissed));
        assert_eq!(report.resolved_by.as_deref(), Some("admin"));

        assert_eq!(f.trust.record("r1").await.unwrap().score, 48);
        assert_eq!(f.trust.record("author").await.unwrap().score, 50);

        assert!(f.service.replay_resolution("rep1").await.unwrap());
        assert_eq!(f.trust.record("r1").await.unwrap().score, 48);
    }

    #[tokio::test]
    async fn test_delete_removes_content_and_tombstones_report() {
        let f = fixture(3);
        seed_people(&f.store).await;
        seed(&f.store, "posts", "p1", json!({"text": "x"})).await;

        f.service.report(Some("rep1"), event("r1", "harassment")).await.unwrap();
        f.service
            .resolve("admin", "rep1", ModerationAction::Delete, None)
            .await
            .unwrap();

        assert!(f.store.get("posts", "p1").await.unwrap().is_none());
        let report: ReportRecord = from_document(f.store.get(REPORTS, "rep1").await.unwrap().unwrap()).unwrap();
        assert!(report.deleted);
        assert_eq!(report.status, ReportStatus::Resolved);
        assert_eq!(report.action, Some(ModerationAction::Delete));

        let record = f.service.record("p1").await.unwrap();
        assert_eq!(record.status, ModerationStatus::Removed);
        assert_eq!(record.audit_log.count(AuditAction::ContentDeleted), 1);
        assert_eq!(f.trust.record("r1").await.unwrap().score, 53);
        assert_eq!(f.trust.record("author").await.unwrap().score, 42);
    }

    #[tokio::test]
    async fn test_redelivered_report_after_delete_is_duplicate() {
        let f = fixture(3);
        seed_people(&f.store).await;
        seed(&f.store, "posts", "p1", json!({"text": "x"})).await;

        f.service.report(Some("rep1"), event("r1", "spam")).await.unwrap();
        f.service
            .resolve("admin", "rep1", ModerationAction::Delete, None)
            .await
            .unwrap();

        let again = f.service.report(Some("rep1"), event("r1", "spam")).await.unwrap();
        assert!(again.duplicate);
        assert_eq!(again.report_count, 1);

        let record = f.service.record("p1").await.unwrap();
        assert_eq!(record.report_count, 1);
        assert_eq!(record.audit_log.count(AuditAction::PostReported), 1);
        assert!(f.service.pending("admin", None, None).await.unwrap().is_empty());

        assert!(f.service.replay_resolution("rep1").await.unwrap());
        let repeat = f
            .service
            .resolve("admin", "rep1", ModerationAction::Delete, None)
            .await
            .unwrap();
        assert!(repeat.already_resolved);
        assert_eq!(f.trust.record("r1").await.unwrap().score, 53);
        assert_eq!(f.trust.record("author").await.unwrap().score, 42);
    }

    #[tokio::test]
    async fn test_resolve_requires_admin() {
        let f = fixture(3);
        seed_people(&f.store).await;
        f.service.report(Some("rep1"), event("r1", "spam")).await.unwrap();

        let err = f
            .service
            .resolve("r2", "rep1", ModerationAction::Approve, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reports_hide_at_most_once() {
        let f = fixture(3);
        seed_people(&f.store).await;

        let mut handles = Vec::new();
        for i in 0..12 {
            let service = f.service.clone();
            handles.push(tokio::spawn(async move {
                service
                    .report(Some(&format!("rep{}", i)), event("r1", "spam"))
                    .await
            }));
        }
        let mut hidden = 0;
        for h in handles {
            if h.await.unwrap().unwrap().hidden_now {
                hidden += 1;
            }
        }
        assert_eq!(hidden, 1);

        let record = f.service.record("p1").await.unwrap();
        assert_eq!(record.report_count, 12);
        assert_eq!(record.audit_log.count(AuditAction::PostHidden), 1);
        assert_eq!(record.audit_log.count(AuditAction::PostReported), 12);
        assert_eq!(f.trust.record("author").await.unwrap().score, 45);
    }
}
