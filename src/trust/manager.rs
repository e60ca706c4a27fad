//! Trust Score Manager - Transactional Orchestrator
//!
//! Persists engine results onto the subject document and appends the history
//! entry in the same transaction, so concurrent deltas on one subject
//! serialize and sum exactly.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::policy::{ADMIN_ADJUSTMENT_LIMIT, TrustAction};
use super::score::{DeltaResult, TrustHistoryEntry, TrustLevel, TrustScoreEngine, TrustScoreRecord};
use crate::error::{AppError, AppResult, require_id};
use crate::store::{
    DocKey, Document, DocumentStore, Direction, Query, RetryPolicy, from_document, run_transaction,
};

pub const USERS: &str = "users";

const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 500;

/// History document id of the creation entry; makes initialization replay-safe.
const ACCOUNT_CREATED: &str = "account_created";

pub fn history_collection(user_id: &str) -> String {
    format!("{}/{}/trustHistory", USERS, user_id)
}

/// A signed delta requested by a trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustDeltaRequest {
    pub user_id: String,
    pub delta: i64,
    pub reason: String,
    #[serde(default)]
    pub metadata: Document,
    /// Replaying a request with an already-applied key is a no-op
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl TrustDeltaRequest {
    pub fn new(user_id: &str, delta: i64, reason: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            delta,
            reason: reason.to_string(),
            metadata: Document::new(),
            idempotency_key: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Document) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Current score plus the newest history entries of one subject
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustHistoryView {
    pub user_id: String,
    pub score: i64,
    pub level: TrustLevel,
    pub entries: Vec<TrustHistoryEntry>,
}

pub struct TrustScoreManager {
    store: Arc<dyn DocumentStore>,
    engine: TrustScoreEngine,
    retry: RetryPolicy,
}

impl TrustScoreManager {
    pub fn new(store: Arc<dyn DocumentStore>, engine: TrustScoreEngine, retry: RetryPolicy) -> Self {
        Self {
            store,
            engine,
            retry,
        }
    }

    pub fn engine(&self) -> &TrustScoreEngine {
        &self.engine
    }

    fn current_score(&self, user: &Document) -> i64 {
        user.get("trustScore")
            .and_then(Value::as_i64)
            .unwrap_or_else(|| self.engine.initial_score())
    }

    fn score_fields(result: &DeltaResult, history_count: u64) -> Document {
        let mut fields = Document::new();
        fields.insert("trustScore".into(), json!(result.new_score));
        fields.insert("trustLevel".into(), json!(result.new_level));
        fields.insert("trustHistoryCount".into(), json!(history_count));
        fields.insert("trustUpdatedAt".into(), json!(Utc::now().timestamp_millis()));
        fields
    }

    /// `PermissionDenied` unless `users/{caller_id}.isAdmin == true`.
    pub async fn require_admin(&self, caller_id: &str) -> AppResult<()> {
        require_id("callerId", caller_id)?;
        let is_admin = self
            .store
            .get(USERS, caller_id)
            .await?
            .and_then(|u| u.get("isAdmin").and_then(Value::as_bool))
            .unwrap_or(false);

        if !is_admin {
            warn!(caller_id = %caller_id, "Administrative call rejected");
            return Err(AppError::denied("administrator privileges required"));
        }
        Ok(())
    }

    /// Give a new subject its initial score. Returns `false` when the subject
    /// already carries a score.
    pub async fn initialize_subject(&self, user_id: &str) -> AppResult<bool> {
        require_id("userId", user_id)?;

        let user_key = DocKey::new(USERS, user_id);
        let history_key = DocKey::new(history_collection(user_id), ACCOUNT_CREATED);
        let keys = [user_key.clone(), history_key.clone()];

        let created = run_transaction(self.store.as_ref(), &self.retry, &keys, |reads, writes| {
            let user = reads.get(&user_key);
            if user.is_some_and(|u| u.contains_key("trustScore")) || reads.exists(&history_key) {
                return Ok(false);
            }

            let count = user
                .and_then(|u| u.get("trustHistoryCount"))
                .and_then(Value::as_u64)
                .unwrap_or(0);

            let result = self.engine.apply_delta(0, self.engine.initial_score());
            let entry = TrustHistoryEntry::from_result(
                count + 1,
                &result,
                ACCOUNT_CREATED,
                Document::new(),
                Utc::now(),
            );

            let fields = Self::score_fields(&result, count + 1);
            match user {
                Some(existing) => {
                    let mut data = existing.clone();
                    data.extend(fields);
                    writes.set(user_key.clone(), data);
                }
                None => writes.set(user_key.clone(), fields),
            }
            writes.set_record(history_key.clone(), &entry)?;
            Ok(true)
        })
        .await?;

        if created {
            info!(user_id = %user_id, score = self.engine.initial_score(), "Initialized trust score");
        }
        Ok(created)
    }

    /// Apply a signed delta. `None` means the idempotency key was already applied.
    pub async fn apply(&self, request: TrustDeltaRequest) -> AppResult<Option<DeltaResult>> {
        require_id("userId", &request.user_id)?;
        if request.reason.trim().is_empty() {
            return Err(AppError::invalid("reason is required"));
        }
        if let Some(ref key) = request.idempotency_key {
            require_id("idempotencyKey", key)?;
        }

        let user_key = DocKey::new(USERS, &request.user_id);
        let entry_id = request
            .idempotency_key
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let history_key = DocKey::new(history_collection(&request.user_id), entry_id);
        let keys = [user_key.clone(), history_key.clone()];

        let outcome = run_transaction(self.store.as_ref(), &self.retry, &keys, |reads, writes| {
            if reads.exists(&history_key) {
                return Ok(None);
            }
            let Some(user) = reads.get(&user_key) else {
                return Err(AppError::not_found(format!("user {}", request.user_id)));
            };

            let count = user
                .get("trustHistoryCount")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            let result = self.engine.apply_delta(self.current_score(user), request.delta);
            let entry = TrustHistoryEntry::from_result(
                count + 1,
                &result,
                &request.reason,
                request.metadata.clone(),
                Utc::now(),
            );

            writes.update(user_key.clone(), Self::score_fields(&result, count + 1));
            writes.set_record(history_key.clone(), &entry)?;
            Ok(Some(result))
        })
        .await?;

        match outcome {
            Some(ref result) => {
                info!(
                    user_id = %request.user_id,
                    delta = request.delta,
                    previous = result.previous_score,
                    new = result.new_score,
                    level = %result.new_level,
                    reason = %request.reason,
                    "Applied trust delta"
                );
                if result.previous_level != result.new_level {
                    info!(
                        user_id = %request.user_id,
                        from = %result.previous_level,
                        to = %result.new_level,
                        "Trust level changed"
                    );
                }
            }
            None => debug!(
                user_id = %request.user_id,
                key = ?request.idempotency_key,
                "Trust delta already applied"
            ),
        }

        Ok(outcome)
    }

    /// Apply the policy delta for `action`.
    pub async fn apply_action(
        &self,
        user_id: &str,
        action: TrustAction,
        metadata: Document,
        idempotency_key: Option<String>,
    ) -> AppResult<Option<DeltaResult>> {
        let mut request = TrustDeltaRequest::new(
            user_id,
            self.engine.policy().delta_for(action),
            action.reason_code(),
        )
        .with_metadata(metadata);
        request.idempotency_key = idempotency_key;
        self.apply(request).await
    }

    pub async fn admin_adjust(
        &self,
        caller_id: &str,
        user_id: &str,
        delta: i64,
        reason: &str,
    ) -> AppResult<DeltaResult> {
        self.require_admin(caller_id).await?;
        require_id("userId", user_id)?;

        let max = self.engine.policy().admin_max_adjustment.min(ADMIN_ADJUSTMENT_LIMIT);
        if !(-max..=max).contains(&delta) {
            return Err(AppError::invalid(format!(
                "delta must be between -{} and {}",
                max, max
            )));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::invalid("reason is required"));
        }

        let mut metadata = Document::new();
        metadata.insert("adjustedBy".into(), json!(caller_id));
        metadata.insert("adminReason".into(), json!(reason));

        let request = TrustDeltaRequest::new(user_id, delta, &format!("admin_adjustment: {}", reason))
            .with_metadata(metadata);
        let result = self
            .apply(request)
            .await?
            .ok_or_else(|| AppError::Internal("admin adjustment was not applied".into()))?;

        info!(
            caller_id = %caller_id,
            user_id = %user_id,
            delta = delta,
            "Admin trust adjustment"
        );
        Ok(result)
    }

    pub async fn record(&self, user_id: &str) -> AppResult<TrustScoreRecord> {
        require_id("userId", user_id)?;
        let user = self
            .store
            .get(USERS, user_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("user {}", user_id)))?;

        let score = self.current_score(&user);
        Ok(TrustScoreRecord {
            user_id: user_id.to_string(),
            score,
            level: self.engine.classify_level(score),
            history_len: user
                .get("trustHistoryCount")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        })
    }

    /// Newest-first history. Callers may read their own; admins may read anyone's.
    pub async fn history(
        &self,
        caller_id: &str,
        user_id: &str,
        limit: Option<usize>,
    ) -> AppResult<TrustHistoryView> {
        require_id("userId", user_id)?;
        if caller_id != user_id {
            self.require_admin(caller_id).await?;
        }

        let record = self.record(user_id).await?;
        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);

        let query = Query::collection(history_collection(user_id))
            .order_by("sequence", Direction::Desc)
            .limit(limit);

        let mut entries = Vec::new();
        for doc in self.store.query(&query).await? {
            entries.push(from_document::<TrustHistoryEntry>(doc.data)?);
        }

        Ok(TrustHistoryView {
            user_id: user_id.to_string(),
            score: record.score,
            level: record.level,
            entries,
        })
    }
}
