//! Trust Score Types and the Score Engine
//!
//! Score ranges over `[min_score, max_score]` (0–100 by default). The level is
//! always derived from the score, never stored on its own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::policy::TrustPolicy;

/// Coarse classification derived from a trust score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    Newcomer,
    Member,
    Trusted,
    Veteran,
}

impl TrustLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustLevel::Newcomer => "newcomer",
            TrustLevel::Member => "member",
            TrustLevel::Trusted => "trusted",
            TrustLevel::Veteran => "veteran",
        }
    }
}

impl std::fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of applying a signed delta to a score.
///
/// `applied_delta` is the requested delta, not the effective change: when a
/// clamp boundary is crossed `new_score - previous_score != applied_delta`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaResult {
    pub previous_score: i64,
    pub previous_level: TrustLevel,
    pub new_score: i64,
    pub new_level: TrustLevel,
    pub applied_delta: i64,
}

/// Pure score arithmetic over an immutable [`TrustPolicy`]
#[derive(Debug, Clone, Default)]
pub struct TrustScoreEngine {
    policy: TrustPolicy,
}

impl TrustScoreEngine {
    pub fn new(policy: TrustPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &TrustPolicy {
        &self.policy
    }

    /// Total over all integers; out-of-range scores classify by the same comparisons.
    pub fn classify_level(&self, score: i64) -> TrustLevel {
        if score <= self.policy.newcomer_max {
            TrustLevel::Newcomer
        } else if score <= self.policy.member_max {
            TrustLevel::Member
        } else if score <= self.policy.trusted_max {
            TrustLevel::Trusted
        } else {
            TrustLevel::Veteran
        }
    }

    pub fn clamp(&self, score: i64) -> i64 {
        score.clamp(self.policy.min_score, self.policy.max_score)
    }

    pub fn apply_delta(&self, current_score: i64, delta: i64) -> DeltaResult {
        let new_score = self.clamp(current_score.saturating_add(delta));
        DeltaResult {
            previous_score: current_score,
            previous_level: self.classify_level(current_score),
            new_score,
            new_level: self.classify_level(new_score),
            applied_delta: delta,
        }
    }

    pub fn initial_score(&self) -> i64 {
        self.policy.initial_score
    }
}

/// One entry of a subject's append-only trust history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustHistoryEntry {
    /// Position in the subject's history, starting at 1
    pub sequence: u64,
    pub previous_score: i64,
    pub new_score: i64,
    pub delta: i64,
    pub previous_level: TrustLevel,
    pub new_level: TrustLevel,
    pub reason: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl TrustHistoryEntry {
    pub fn from_result(
        sequence: u64,
        result: &DeltaResult,
        reason: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            sequence,
            previous_score: result.previous_score,
            new_score: result.new_score,
            delta: result.applied_delta,
            previous_level: result.previous_level,
            new_level: result.new_level,
            reason: reason.to_string(),
            metadata,
            timestamp,
        }
    }
}

/// Current trust state of a subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustScoreRecord {
    pub user_id: String,
    pub score: i64,
    pub level: TrustLevel,
    pub history_len: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> TrustScoreEngine {
        TrustScoreEngine::default()
    }

    #[test]
    fn test_level_boundaries() {
        let e = engine();
        assert_eq!(e.classify_level(40), TrustLevel::Newcomer);
        assert_eq!(e.classify_level(41), TrustLevel::Member);
        assert_eq!(e.classify_level(65), TrustLevel::Member);
        assert_eq!(e.classify_level(66), TrustLevel::Trusted);
        assert_eq!(e.classify_level(85), TrustLevel::Trusted);
        assert_eq!(e.classify_level(86), TrustLevel::Veteran);
    }

    #[test]
    fn test_out_of_range_scores_classify() {
        let e = engine();
        assert_eq!(e.classify_level(-5), TrustLevel::Newcomer);
        assert_eq!(e.classify_level(150), TrustLevel::Veteran);
        assert_eq!(e.classify_level(i64::MIN), TrustLevel::Newcomer);
    }

    #[test]
    fn test_clamp_range_over_grid() {
        let e = engine();
        for s in 0..=100 {
            for d in (-1000..=1000).step_by(7) {
                let clamped = e.clamp(s + d);
                assert!((0..=100).contains(&clamped));
                let expected = match clamped {
                    ..=40 => TrustLevel::Newcomer,
                    41..=65 => TrustLevel::Member,
                    66..=85 => TrustLevel::Trusted,
                    _ => TrustLevel::Veteran,
                };
                assert_eq!(e.classify_level(clamped), expected);
            }
        }
    }

    #[test]
    fn test_apply_delta_within_tier() {
        let r = engine().apply_delta(48, 2);
        assert_eq!(r.previous_score, 48);
        assert_eq!(r.previous_level, TrustLevel::Member);
        assert_eq!(r.new_score, 50);
        assert_eq!(r.new_level, TrustLevel::Member);
        assert_eq!(r.applied_delta, 2);
    }

    #[test]
    fn test_apply_delta_drops_tier() {
        let r = engine().apply_delta(42, -5);
        assert_eq!(r.previous_level, TrustLevel::Member);
        assert_eq!(r.new_score, 37);
        assert_eq!(r.new_level, TrustLevel::Newcomer);
    }

    #[test]
    fn test_apply_delta_clamps_and_keeps_requested_delta() {
        let ceiling = engine().apply_delta(98, 10);
        assert_eq!(ceiling.new_score, 100);
        assert_eq!(ceiling.new_level, TrustLevel::Veteran);
        assert_eq!(ceiling.applied_delta, 10);

        let floor = engine().apply_delta(2, -10);
        assert_eq!(floor.new_score, 0);
        assert_eq!(floor.new_level, TrustLevel::Newcomer);
        assert_eq!(floor.applied_delta, -10);
    }

    #[test]
    fn test_apply_delta_does_not_overflow() {
        let r = engine().apply_delta(i64::MAX, i64::MAX);
        assert_eq!(r.new_score, 100);
    }

    #[test]
    fn test_classify_is_pure() {
        let e = engine();
        for s in [-3, 0, 41, 77, 99] {
            assert_eq!(e.classify_level(s), e.classify_level(s));
        }
    }

    #[test]
    fn test_level_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&TrustLevel::Veteran).unwrap(), "\"veteran\"");
    }
}
