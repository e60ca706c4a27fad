//! Trust Score System
//!
//! Each user carries a bounded trust score that community actions move up or
//! down. The level is a pure function of the score.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌───────────────────┐     ┌─────────────────┐
//! │ TrustPolicy     │────►│ TrustScoreEngine  │◄────│ TrustScoreManager│
//! │ (bounds/deltas) │     │ (pure arithmetic) │     │ (transactions)  │
//! └─────────────────┘     └───────────────────┘     └─────────────────┘
//!                                                            │
//!                                                            ▼
//!                                                  users/{id} + trustHistory
//! ```
//!
//! ## Score Model
//!
//! - New subjects start at 50 (member)
//! - Scores are clamped to [0, 100]; history records the requested delta
//! - Tiers: newcomer ≤ 40 < member ≤ 65 < trusted ≤ 85 < veteran

mod manager;
mod policy;
mod score;

pub use manager::{TrustDeltaRequest, TrustHistoryView, TrustScoreManager, USERS, history_collection};
pub use policy::{ADMIN_ADJUSTMENT_LIMIT, TrustAction, TrustDeltas, TrustPolicy};
pub use score::{DeltaResult, TrustHistoryEntry, TrustLevel, TrustScoreEngine, TrustScoreRecord};
