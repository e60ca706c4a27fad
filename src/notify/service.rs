//! Notification fan-out for a single user.

use chrono::Utc;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Notification, Notifier};
use crate::error::{AppError, AppResult, require_id};
use crate::store::{DocKey, Document, DocumentStore, RetryPolicy, run_transaction};
use crate::trust::USERS;

pub const NOTIFICATIONS: &str = "notifications";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyReport {
    pub notification_id: String,
    pub sent: usize,
    pub failed: usize,
    pub pruned: Vec<String>,
}

pub struct NotificationService {
    store: Arc<dyn DocumentStore>,
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
}

fn push_tokens(user: &Document) -> Vec<String> {
    let mut seen = HashSet::new();
    user.get("fcmTokens")
        .and_then(Value::as_array)
        .map(|tokens| {
            tokens
                .iter()
                .filter_map(Value::as_str)
                .filter(|t| !t.is_empty() && seen.insert(t.to_string()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

impl NotificationService {
    pub fn new(store: Arc<dyn DocumentStore>, notifier: Arc<dyn Notifier>, retry: RetryPolicy) -> Self {
        Self {
            store,
            notifier,
            retry,
        }
    }

    /// Persist the in-app notification, push it to every registered token and
    /// drop tokens that failed permanently.
    pub async fn notify_user(&self, user_id: &str, notification: &Notification) -> AppResult<NotifyReport> {
        require_id("userId", user_id)?;

        let user = self
            .store
            .get(USERS, user_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("user {}", user_id)))?;

        let notification_id = Uuid::new_v4().to_string();
        let mut record = Document::new();
        record.insert("userId".into(), json!(user_id));
        record.insert("type".into(), json!(notification.kind));
        record.insert("title".into(), json!(notification.title));
        record.insert("body".into(), json!(notification.body));
        record.insert("data".into(), Value::Object(notification.data.clone()));
        record.insert("createdAt".into(), json!(Utc::now().timestamp_millis()));
        record.insert("read".into(), json!(false));
        self.store.set(NOTIFICATIONS, &notification_id, record).await?;

        debug!(user_id = %user_id, kind = %notification.kind, "Created notification");

        let tokens = push_tokens(&user);
        if tokens.is_empty() {
            debug!(user_id = %user_id, "No push tokens registered");
            return Ok(NotifyReport {
                notification_id,
                ..NotifyReport::default()
            });
        }

        let deliveries = self.notifier.send(&tokens, notification).await;
        let sent = deliveries.iter().filter(|d| d.success).count();
        let dead: Vec<String> = deliveries
            .iter()
            .filter(|d| d.error_kind.is_some_and(|k| k.is_permanent()))
            .map(|d| d.token.clone())
            .collect();

        if !dead.is_empty() {
            self.prune_tokens(user_id, &dead).await?;
        }

        info!(
            user_id = %user_id,
            kind = %notification.kind,
            sent = sent,
            failed = deliveries.len() - sent,
            pruned = dead.len(),
            "Push notification sent"
        );

        Ok(NotifyReport {
            notification_id,
            sent,
            failed: deliveries.len() - sent,
            pruned: dead,
        })
    }

    /// Delivery failures are logged and swallowed.
    pub async fn notify_best_effort(&self, user_id: &str, notification: &Notification) {
        if let Err(e) = self.notify_user(user_id, notification).await {
            warn!(user_id = %user_id, kind = %notification.kind, error = %e, "Notification failed");
        }
    }

    async fn prune_tokens(&self, user_id: &str, dead: &[String]) -> AppResult<()> {
        let key = DocKey::new(USERS, user_id);
        run_transaction(self.store.as_ref(), &self.retry, &[key.clone()], |reads, writes| {
            let Some(user) = reads.get(&key) else {
                return Ok(());
            };
            let remaining: Vec<String> = push_tokens(user)
                .into_iter()
                .filter(|t| !dead.contains(t))
                .collect();

            let mut fields = Document::new();
            fields.insert("fcmTokens".into(), json!(remaining));
            writes.update(key.clone(), fields);
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{DeliveryErrorKind, TokenDelivery};
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    /// Fails `bad-*` tokens permanently and `flaky-*` tokens transiently.
    struct ScriptedNotifier;

    #[async_trait]
    impl Notifier for ScriptedNotifier {
        async fn send(&self, tokens: &[String], _n: &Notification) -> Vec<TokenDelivery> {
            tokens
                .iter()
                .map(|t| {
                    if t.starts_with("bad") {
                        TokenDelivery::failed(t, DeliveryErrorKind::Unregistered)
                    } else if t.starts_with("flaky") {
                        TokenDelivery::failed(t, DeliveryErrorKind::Transient)
                    } else {
                        TokenDelivery::delivered(t)
                    }
                })
                .collect()
        }
    }

    fn service(store: Arc<MemoryStore>) -> NotificationService {
        NotificationService::new(store, Arc::new(ScriptedNotifier), RetryPolicy::default())
    }

    #[tokio::test]
    async fn test_prunes_permanent_failures_only() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(
                USERS,
                "u1",
                json!({"fcmTokens": ["good-1", "bad-1", "flaky-1", "good-1"]})
                    .as_object()
                    .cloned()
                    .unwrap(),
            )
            .await
            .unwrap();

        let report = service(store.clone())
            .notify_user("u1", &Notification::new("post_hidden", "Hidden", "Your post was hidden"))
            .await
            .unwrap();

        assert_eq!(report.sent, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(report.pruned, vec!["bad-1".to_string()]);

        let user = store.get(USERS, "u1").await.unwrap().unwrap();
        assert_eq!(user["fcmTokens"], json!(["good-1", "flaky-1"]));
        assert_eq!(store.count(NOTIFICATIONS).await, 1);
    }

    #[tokio::test]
    async fn test_user_without_tokens_still_gets_record() {
        let store = Arc::new(MemoryStore::new());
        store.set(USERS, "u1", Document::new()).await.unwrap();

        let report = service(store.clone())
            .notify_user("u1", &Notification::new("test", "t", "b"))
            .await
            .unwrap();
        assert_eq!(report.sent, 0);

        let record = store
            .get(NOTIFICATIONS, &report.notification_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record["read"], json!(false));
        assert_eq!(record["type"], json!("test"));
    }

    #[tokio::test]
    async fn test_missing_user_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let err = service(store)
            .notify_user("ghost", &Notification::new("test", "t", "b"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
