//! Hearth Functions
//!
//! Event-driven backend automation for a social app: trust scores, report
//! escalation and the moderation queue, and user notifications.
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── lib.rs         - Crate root with re-exports
//! ├── main.rs        - Server entrypoint
//! ├── config.rs      - Configuration management
//! ├── error.rs       - Shared error types
//! ├── triggers.rs    - Trigger events and dispatch
//! ├── store/         - Document store abstraction
//! │   ├── transaction.rs - Optimistic transactions with retry
//! │   ├── memory.rs      - In-memory store
//! │   └── postgres.rs    - PostgreSQL JSONB store
//! ├── trust/         - Trust score system
//! │   ├── score.rs   - Levels, engine, history entries
//! │   ├── policy.rs  - Bounds and per-action deltas
//! │   └── manager.rs - Transactional orchestrator
//! ├── moderation/    - Report escalation and moderation queue
//! │   ├── record.rs     - Records, reports, audit log
//! │   ├── escalation.rs - Threshold state machine
//! │   └── queue.rs      - Report intake and resolution
//! ├── notify/        - Notifications
//! │   ├── gateway.rs - HTTP push gateway
//! │   └── service.rs - Persist, send, prune tokens
//! └── api/           - HTTP API endpoints
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod moderation;
pub mod notify;
pub mod store;
pub mod triggers;
pub mod trust;

pub use config::AppConfig;
pub use error::{AppError, AppResult, StoreError};

pub use store::{DocKey, Document, DocumentStore, MemoryStore, PostgresStore, RetryPolicy};

pub use trust::{
    DeltaResult, TrustAction, TrustDeltaRequest, TrustHistoryEntry, TrustLevel, TrustPolicy,
    TrustScoreEngine, TrustScoreManager, TrustScoreRecord,
};

pub use moderation::{
    AuditAction, ModerationAction, ModerationRecord, ModerationService, ModerationStatus,
    ReportEscalation, ReportEvent, ReportRecord,
};

pub use notify::{
    DeliveryErrorKind, LogNotifier, Notification, NotificationService, Notifier,
    PushGatewayNotifier, TokenDelivery,
};

pub use triggers::{DispatchOutcome, EventDispatcher, TriggerEvent};
