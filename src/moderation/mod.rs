//! Content Moderation
//!
//! Reports accumulate on a per-content [`ModerationRecord`]. When the count
//! first reaches the threshold the content is hidden automatically; moderators
//! then resolve the pending reports from the queue.
//!
//! ## Flow
//!
//! ```text
//! report ──► ReportEscalation ──► moderation/{contentId} + reports/{reportId}
//!                 │ hidden_now
//!                 ▼
//!         author trust penalty + notification
//!
//! resolve(approve | reject | delete) ──► record status, audit entry, trust deltas
//! ```
//!
//! ## Statuses
//!
//! - `active` until the threshold is crossed
//! - `hidden` once, at the crossing report; `hiddenAt` is never overwritten
//! - `resolved` after a dismissal, `removed` after approval or deletion

mod escalation;
mod queue;
mod record;

pub use escalation::{DEFAULT_REPORT_THRESHOLD, EscalationOutcome, ReportEscalation};
pub use queue::{ModerationService, ReportOutcome, ResolutionOutcome};
pub use record::{
    AuditAction, AuditEntry, AuditLog, ContentType, MODERATION, ModerationAction, ModerationRecord,
    ModerationStatus, REPORTS, ReportEvent, ReportRecord, ReportStatus, Resolution, priority_for,
};
