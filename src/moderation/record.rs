//! Moderation records, reports and the audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MODERATION: &str = "moderation";
pub const REPORTS: &str = "reports";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Post,
    Comment,
}

impl ContentType {
    /// Collection holding the reported content itself
    pub fn collection(&self) -> &'static str {
        match self {
            ContentType::Post => "posts",
            ContentType::Comment => "comments",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationStatus {
    Active,
    Hidden,
    Resolved,
    Removed,
}

impl ModerationStatus {
    /// Removed content stays removed; everything else may still be auto-hidden.
    pub fn can_auto_hide(&self) -> bool {
        matches!(self, ModerationStatus::Active | ModerationStatus::Resolved)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    PostReported,
    PostHidden,
    PostRemoved,
    ReportDismissed,
    ContentDeleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub action: AuditAction,
    /// `None` for automatic transitions
    pub performed_by: Option<String>,
    pub reason: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

/// Append-only audit trail. Entries are never edited or removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditLog(Vec<AuditEntry>);

impl AuditLog {
    pub fn append(&mut self, entry: AuditEntry) {
        self.0.push(entry);
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn count(&self, action: AuditAction) -> usize {
        self.0.iter().filter(|e| e.action == action).count()
    }
}

/// Incoming report against a piece of content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportEvent {
    pub content_id: String,
    pub content_type: ContentType,
    pub author_id: String,
    pub reporter_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationRecord {
    pub content_id: String,
    pub content_type: ContentType,
    pub author_id: String,
    pub report_count: u64,
    pub status: ModerationStatus,
    /// Set once, on the first transition to hidden
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub hidden_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub audit_log: AuditLog,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl ModerationRecord {
    pub fn new(content_id: &str, content_type: ContentType, author_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            content_id: content_id.to_string(),
            content_type,
            author_id: author_id.to_string(),
            report_count: 0,
            status: ModerationStatus::Active,
            hidden_at: None,
            audit_log: AuditLog::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn audit(&mut self, action: AuditAction, performed_by: Option<&str>, reason: &str, now: DateTime<Utc>) {
        self.audit_log.append(AuditEntry {
            action,
            performed_by: performed_by.map(str::to_string),
            reason: reason.to_string(),
            timestamp: now,
        });
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Pending,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    PostRemoved,
    Dismissed,
}

/// Administrative decision on a pending report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationAction {
    Approve,
    Reject,
    Delete,
}

impl ModerationAction {
    pub fn resolution(&self) -> Resolution {
        match self {
            ModerationAction::Approve | ModerationAction::Delete => Resolution::PostRemoved,
            ModerationAction::Reject => Resolution::Dismissed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRecord {
    pub report_id: String,
    pub content_id: String,
    pub content_type: ContentType,
    pub author_id: String,
    pub reporter_id: String,
    pub reason: String,
    pub priority: u8,
    pub status: ReportStatus,
    #[serde(default)]
    pub resolution: Option<Resolution>,
    #[serde(default)]
    pub action: Option<ModerationAction>,
    #[serde(default)]
    pub resolved_by: Option<String>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Tombstone left by the delete action; the report id stays claimed
    #[serde(default)]
    pub deleted: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl ReportRecord {
    pub fn pending(report_id: &str, event: &ReportEvent, now: DateTime<Utc>) -> Self {
        Self {
            report_id: report_id.to_string(),
            content_id: event.content_id.clone(),
            content_type: event.content_type,
            author_id: event.author_id.clone(),
            reporter_id: event.reporter_id.clone(),
            reason: event.reason.clone(),
            priority: priority_for(&event.reason),
            status: ReportStatus::Pending,
            resolution: None,
            action: None,
            resolved_by: None,
            resolved_at: None,
            deleted: false,
            created_at: now,
        }
    }
}

/// Queue priority of a report reason, 5 being the most urgent.
pub fn priority_for(reason: &str) -> u8 {
    match reason {
        "violence" => 5,
        "harassment" => 4,
        "inappropriate_content" => 3,
        "spam" => 2,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_priority_for_reason() {
        assert_eq!(priority_for("violence"), 5);
        assert_eq!(priority_for("harassment"), 4);
        assert_eq!(priority_for("inappropriate_content"), 3);
        assert_eq!(priority_for("spam"), 2);
        assert_eq!(priority_for("other"), 1);
        assert_eq!(priority_for("something new"), 1);
    }

    #[test]
    fn test_record_document_shape() {
        let now = Utc::now();
        let mut record = ModerationRecord::new("p1", ContentType::Post, "author", now);
        record.audit(AuditAction::PostReported, Some("r1"), "spam", now);

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["contentType"], json!("post"));
        assert_eq!(value["status"], json!("active"));
        assert_eq!(value["hiddenAt"], json!(null));
        assert_eq!(value["auditLog"][0]["action"], json!("post_reported"));
        assert_eq!(value["auditLog"][0]["performedBy"], json!("r1"));

        let back: ModerationRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back.audit_log.count(AuditAction::PostReported), 1);
    }
}
