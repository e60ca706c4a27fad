//! Report Escalation
//!
//! Counts reports per content and hides the content the moment the count
//! first reaches the threshold.

use chrono::{DateTime, Utc};

use super::record::{AuditAction, ModerationRecord, ModerationStatus, ReportEvent};

pub const DEFAULT_REPORT_THRESHOLD: u64 = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct EscalationOutcome {
    pub record: ModerationRecord,
    /// True only for the report that crossed the threshold
    pub hidden_now: bool,
    pub created: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ReportEscalation {
    threshold: u64,
}

impl Default for ReportEscalation {
    fn default() -> Self {
        Self::new(DEFAULT_REPORT_THRESHOLD)
    }
}

impl ReportEscalation {
    /// A threshold of 0 behaves like 1.
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold: threshold.max(1),
        }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Fold one report into the record. Must run inside the per-content
    /// transaction so the threshold crossing is observed exactly once.
    pub fn apply(
        &self,
        existing: Option<ModerationRecord>,
        event: &ReportEvent,
        now: DateTime<Utc>,
    ) -> EscalationOutcome {
        let created = existing.is_none();
        let mut record = existing.unwrap_or_else(|| {
            ModerationRecord::new(&event.content_id, event.content_type, &event.author_id, now)
        });

        let before = record.report_count;
        record.report_count = before.saturating_add(1);
        record.audit(AuditAction::PostReported, Some(&event.reporter_id), &event.reason, now);

        let crossed = before < self.threshold && record.report_count >= self.threshold;
        let hidden_now = crossed && record.status.can_auto_hide();
        if hidden_now {
            record.status = ModerationStatus::Hidden;
            if record.hidden_at.is_none() {
                record.hidden_at = Some(now);
            }
            record.audit(AuditAction::PostHidden, None, &event.reason, now);
        }

        EscalationOutcome {
            record,
            hidden_now,
            created,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::record::ContentType;

    fn report(reporter: &str) -> ReportEvent {
        ReportEvent {
            content_id: "p1".to_string(),
            content_type: ContentType::Post,
            author_id: "author".to_string(),
            reporter_id: reporter.to_string(),
            reason: "spam".to_string(),
        }
    }

    #[test]
    fn test_three_reports_hide_once() {
        let engine = ReportEscalation::new(3);
        let now = Utc::now();

        let first = engine.apply(None, &report("r1"), now);
        assert!(first.created);
        assert!(!first.hidden_now);
        assert_eq!(first.record.status, ModerationStatus::Active);

        let second = engine.apply(Some(first.record), &report("r2"), now);
        assert!(!second.hidden_now);

        let third = engine.apply(Some(second.record), &report("r3"), now);
        assert!(third.hidden_now);
        let record = third.record;
        assert_eq!(record.report_count, 3);
        assert_eq!(record.status, ModerationStatus::Hidden);
        assert_eq!(record.hidden_at, Some(now));
        assert_eq!(record.audit_log.count(AuditAction::PostHidden), 1);
        assert_eq!(record.audit_log.count(AuditAction::PostReported), 3);
        // Reported entry precedes the hide it triggered.
        let actions: Vec<_> = record.audit_log.entries().iter().map(|e| e.action).collect();
        assert_eq!(actions[2..], [AuditAction::PostReported, AuditAction::PostHidden]);
        assert_eq!(record.audit_log.entries()[3].performed_by, None);
    }

    #[test]
    fn test_no_second_hide_after_more_reports() {
        let engine = ReportEscalation::new(3);
        let now = Utc::now();
        let mut record = None;
        for i in 0..6 {
            let outcome = engine.apply(record.take(), &report(&format!("r{}", i)), now);
            assert_eq!(outcome.hidden_now, i == 2);
            record = Some(outcome.record);
        }
        let record = record.unwrap();
        assert_eq!(record.report_count, 6);
        assert_eq!(record.audit_log.count(AuditAction::PostHidden), 1);
    }

    #[test]
    fn test_threshold_one_hides_on_first_report() {
        let outcome = ReportEscalation::new(1).apply(None, &report("r1"), Utc::now());
        assert!(outcome.created);
        assert!(outcome.hidden_now);
        assert_eq!(outcome.record.report_count, 1);
        assert_eq!(outcome.record.status, ModerationStatus::Hidden);
    }

    #[test]
    fn test_same_reporter_counts_every_time() {
        let engine = ReportEscalation::new(3);
        let now = Utc::now();
        let mut record = None;
        for _ in 0..3 {
            record = Some(engine.apply(record.take(), &report("r1"), now).record);
        }
        assert_eq!(record.unwrap().status, ModerationStatus::Hidden);
    }

    #[test]
    fn test_removed_content_is_not_rehidden() {
        let engine = ReportEscalation::new(2);
        let now = Utc::now();
        let mut record = engine.apply(None, &report("r1"), now).record;
        record.status = ModerationStatus::Removed;

        let outcome = engine.apply(Some(record), &report("r2"), now);
        assert!(!outcome.hidden_now);
        assert_eq!(outcome.record.status, ModerationStatus::Removed);
        assert_eq!(outcome.record.hidden_at, None);
    }
}
