//! Trust Score Policy
//!
//! Score bounds, level boundaries and the delta applied for each community
//! action. Loaded once at startup and shared read-only by the engine.

use serde::{Deserialize, Serialize};

/// Hard ceiling on `admin_max_adjustment`
pub const ADMIN_ADJUSTMENT_LIMIT: i64 = 100;

/// Actions that move a user's trust score by a policy-defined amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustAction {
    /// Author published a post
    PostCreated,

    /// Author's post crossed the report threshold and was hidden
    PostAutoHidden,

    /// Author's post was removed by a moderator
    PostRemoved,

    /// Author published a comment
    CommentCreated,

    /// Reporter filed a report that a moderator upheld
    ReportUpheldReporter,

    /// Author of content whose report was upheld
    ReportUpheldAuthor,

    /// Reporter filed a report that a moderator dismissed
    ReportDismissedReporter,

    /// Likes and helpful reactions received
    PositiveEngagement,

    /// Another user blocked this user
    BlockedByUser,
}

impl TrustAction {
    /// Reason code recorded in the trust history
    pub fn reason_code(&self) -> &'static str {
        match self {
            TrustAction::PostCreated => "post_created",
            TrustAction::PostAutoHidden => "post_auto_hidden",
            TrustAction::PostRemoved => "post_removed",
            TrustAction::CommentCreated => "comment_created",
            TrustAction::ReportUpheldReporter => "report_upheld_reporter",
            TrustAction::ReportUpheldAuthor => "report_upheld_author",
            TrustAction::ReportDismissedReporter => "report_dismissed",
            TrustAction::PositiveEngagement => "positive_engagement",
            TrustAction::BlockedByUser => "blocked_by_user",
        }
    }
}

/// Signed score change per [`TrustAction`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustDeltas {
    pub post_created: i64,
    pub post_auto_hidden: i64,
    pub post_removed: i64,
    pub comment_created: i64,
    pub report_upheld_reporter: i64,
    pub report_upheld_author: i64,
    pub report_dismissed_reporter: i64,
    pub positive_engagement: i64,
    pub blocked_by_user: i64,
}

impl Default for TrustDeltas {
    fn default() -> Self {
        Self {
            post_created: 2,
            post_auto_hidden: -5,
            post_removed: -10,
            comment_created: 1,
            report_upheld_reporter: 3,
            report_upheld_author: -8,
            report_dismissed_reporter: -2,
            positive_engagement: 1,
            blocked_by_user: -1,
        }
    }
}

/// Immutable trust configuration passed to the engine at construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustPolicy {
    pub min_score: i64,
    pub max_score: i64,

    /// Score assigned when a subject is created
    pub initial_score: i64,

    /// Inclusive upper bound of each tier; anything above `trusted_max` is veteran
    pub newcomer_max: i64,
    pub member_max: i64,
    pub trusted_max: i64,

    pub deltas: TrustDeltas,

    /// Largest absolute delta an administrator may apply in one adjustment
    pub admin_max_adjustment: i64,
}

impl Default for TrustPolicy {
    fn default() -> Self {
        Self {
            min_score: 0,
            max_score: 100,
            initial_score: 50,
            newcomer_max: 40,
            member_max: 65,
            trusted_max: 85,
            deltas: TrustDeltas::default(),
            admin_max_adjustment: 100,
        }
    }
}

impl TrustPolicy {
    pub fn delta_for(&self, action: TrustAction) -> i64 {
        let d = &self.deltas;
        match action {
            TrustAction::PostCreated => d.post_created,
            TrustAction::PostAutoHidden => d.post_auto_hidden,
            TrustAction::PostRemoved => d.post_removed,
            TrustAction::CommentCreated => d.comment_created,
            TrustAction::ReportUpheldReporter => d.report_upheld_reporter,
            TrustAction::ReportUpheldAuthor => d.report_upheld_author,
            TrustAction::ReportDismissedReporter => d.report_dismissed_reporter,
            TrustAction::PositiveEngagement => d.positive_engagement,
            TrustAction::BlockedByUser => d.blocked_by_user,
        }
    }

    /// Bounds must nest: min <= newcomer < member < trusted < max.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_score > self.newcomer_max
            || self.newcomer_max >= self.member_max
            || self.member_max >= self.trusted_max
            || self.trusted_max >= self.max_score
        {
            return Err(format!(
                "trust level bounds must satisfy min <= newcomer < member < trusted < max \
                 (got {} / {} / {} / {} / {})",
                self.min_score, self.newcomer_max, self.member_max, self.trusted_max, self.max_score
            ));
        }

        if self.initial_score < self.min_score || self.initial_score > self.max_score {
            return Err(format!(
                "initial trust score {} outside [{}, {}]",
                self.initial_score, self.min_score, self.max_score
            ));
        }

        if self.admin_max_adjustment <= 0 || self.admin_max_adjustment > ADMIN_ADJUSTMENT_LIMIT {
            return Err(format!(
                "admin_max_adjustment {} outside [1, {}]",
                self.admin_max_adjustment, ADMIN_ADJUSTMENT_LIMIT
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_deltas() {
        let policy = TrustPolicy::default();
        assert_eq!(policy.delta_for(TrustAction::PostCreated), 2);
        assert_eq!(policy.delta_for(TrustAction::PostAutoHidden), -5);
        assert_eq!(policy.delta_for(TrustAction::PostRemoved), -10);
        assert_eq!(policy.delta_for(TrustAction::CommentCreated), 1);
        assert_eq!(policy.delta_for(TrustAction::ReportUpheldReporter), 3);
        assert_eq!(policy.delta_for(TrustAction::ReportUpheldAuthor), -8);
        assert_eq!(policy.delta_for(TrustAction::ReportDismissedReporter), -2);
        assert_eq!(policy.delta_for(TrustAction::BlockedByUser), -1);
    }

    #[test]
    fn test_default_policy_is_valid() {
        assert!(TrustPolicy::default().validate().is_ok());
    }

    #[test]
    fn test_overlapping_bounds_rejected() {
        let policy = TrustPolicy {
            member_max: 40,
            ..TrustPolicy::default()
        };
        assert!(policy.validate().is_err());

        let policy = TrustPolicy {
            initial_score: 120,
            ..TrustPolicy::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_admin_adjustment_capped_at_limit() {
        let at_limit = TrustPolicy {
            admin_max_adjustment: ADMIN_ADJUSTMENT_LIMIT,
            ..TrustPolicy::default()
        };
        assert!(at_limit.validate().is_ok());

        for bad in [0, -5, ADMIN_ADJUSTMENT_LIMIT + 1, 1000] {
            let policy = TrustPolicy {
                admin_max_adjustment: bad,
                ..TrustPolicy::default()
            };
            assert!(policy.validate().is_err(), "accepted {}", bad);
        }
    }
}
