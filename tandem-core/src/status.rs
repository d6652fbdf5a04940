//! Per-kind message lifecycles.
//!
//! Every message kind carries a small status enum. Transitions only move
//! forward; `archived` is the sink state shared by all kinds except
//! heartbeats, which are write-once.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// A finite, forward-only status machine for one message kind.
pub trait Lifecycle:
    Copy + Eq + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Status assigned at send time.
    const INITIAL: Self;

    /// Every status of this lifecycle, in declaration order.
    const ALL: &'static [Self];

    /// Wire name of the status.
    fn as_str(&self) -> &'static str;

    /// Whether `next` is a legal successor of `self`.
    fn can_transition_to(&self, next: Self) -> bool;

    /// Parse a wire name back into a status.
    fn parse(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.as_str() == value)
    }

    /// No transitions leave this status.
    fn is_terminal(&self) -> bool {
        !Self::ALL.iter().any(|next| self.can_transition_to(*next))
    }

    /// The status can still move to `archived` (or an equivalent sink).
    fn is_archivable(&self) -> bool {
        Self::ALL
            .iter()
            .any(|next| next.as_str() == "archived" && self.can_transition_to(*next))
    }
}

macro_rules! lifecycle_names {
    ($ty:ident { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            const NAMES: &'static [($ty, &'static str)] = &[$(($ty::$variant, $name)),+];
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

fn name_of<T: PartialEq + Copy>(names: &[(T, &'static str)], value: T) -> &'static str {
    names
        .iter()
        .find(|(v, _)| *v == value)
        .map(|(_, n)| *n)
        .unwrap_or("unknown")
}

// ============================================================================
// TASK
// ============================================================================

/// Status of a task message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Sent, not yet picked up
    Pending,
    /// Being worked on
    InProgress,
    /// Finished successfully
    Completed,
    /// Finished unsuccessfully
    Failed,
    /// Abandoned before completion
    Cancelled,
    /// Retired from active views
    Archived,
}

lifecycle_names!(TaskStatus {
    Pending => "pending",
    InProgress => "in_progress",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
    Archived => "archived",
});

impl Lifecycle for TaskStatus {
    const INITIAL: Self = TaskStatus::Pending;
    const ALL: &'static [Self] = &[
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
        TaskStatus::Archived,
    ];

    fn as_str(&self) -> &'static str {
        name_of(Self::NAMES, *self)
    }

    fn can_transition_to(&self, next: Self) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Cancelled)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Cancelled)
                | (Completed, Archived)
                | (Failed, Archived)
                | (Cancelled, Archived)
        )
    }
}

impl TaskStatus {
    /// Pending or in progress.
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::InProgress)
    }
}

// ============================================================================
// CODE
// ============================================================================

/// Status of a code submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeStatus {
    Pending,
    Reviewing,
    Approved,
    Rejected,
    Merged,
    Archived,
}

lifecycle_names!(CodeStatus {
    Pending => "pending",
    Reviewing => "reviewing",
    Approved => "approved",
    Rejected => "rejected",
    Merged => "merged",
    Archived => "archived",
});

impl Lifecycle for CodeStatus {
    const INITIAL: Self = CodeStatus::Pending;
    const ALL: &'static [Self] = &[
        CodeStatus::Pending,
        CodeStatus::Reviewing,
        CodeStatus::Approved,
        CodeStatus::Rejected,
        CodeStatus::Merged,
        CodeStatus::Archived,
    ];

    fn as_str(&self) -> &'static str {
        name_of(Self::NAMES, *self)
    }

    fn can_transition_to(&self, next: Self) -> bool {
        use CodeStatus::*;
        matches!(
            (self, next),
            (Pending, Reviewing)
                | (Pending, Approved)
                | (Pending, Rejected)
                | (Reviewing, Approved)
                | (Reviewing, Rejected)
                | (Approved, Merged)
                | (Approved, Archived)
                | (Rejected, Archived)
                | (Merged, Archived)
        )
    }
}

impl CodeStatus {
    /// Pending or under review.
    pub fn is_active(&self) -> bool {
        matches!(self, CodeStatus::Pending | CodeStatus::Reviewing)
    }
}

// ============================================================================
// REVIEW
// ============================================================================

/// Status of a review message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    InReview,
    Approved,
    Rejected,
    NeedsChanges,
    /// Approved changes have been applied
    Applied,
    Archived,
}

lifecycle_names!(ReviewStatus {
    Pending => "pending",
    InReview => "in_review",
    Approved => "approved",
    Rejected => "rejected",
    NeedsChanges => "needs_changes",
    Applied => "applied",
    Archived => "archived",
});

impl Lifecycle for ReviewStatus {
    const INITIAL: Self = ReviewStatus::Pending;
    const ALL: &'static [Self] = &[
        ReviewStatus::Pending,
        ReviewStatus::InReview,
        ReviewStatus::Approved,
        ReviewStatus::Rejected,
        ReviewStatus::NeedsChanges,
        ReviewStatus::Applied,
        ReviewStatus::Archived,
    ];

    fn as_str(&self) -> &'static str {
        name_of(Self::NAMES, *self)
    }

    fn can_transition_to(&self, next: Self) -> bool {
        use ReviewStatus::*;
        matches!(
            (self, next),
            (Pending, InReview)
                | (Pending, Approved)
                | (Pending, Rejected)
                | (InReview, Approved)
                | (InReview, Rejected)
                | (InReview, NeedsChanges)
                // a review sent back for changes is re-reviewed
                | (NeedsChanges, InReview)
                | (NeedsChanges, Approved)
                | (NeedsChanges, Rejected)
                | (Approved, Applied)
                | (Approved, Archived)
                | (Rejected, Archived)
                | (Applied, Archived)
        )
    }
}

impl ReviewStatus {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ReviewStatus::Pending | ReviewStatus::InReview | ReviewStatus::NeedsChanges
        )
    }
}

// ============================================================================
// SCORE
// ============================================================================

/// Status of a score message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreStatus {
    Pending,
    Requested,
    Awarded,
    Rejected,
    Archived,
}

lifecycle_names!(ScoreStatus {
    Pending => "pending",
    Requested => "requested",
    Awarded => "awarded",
    Rejected => "rejected",
    Archived => "archived",
});

impl Lifecycle for ScoreStatus {
    const INITIAL: Self = ScoreStatus::Pending;
    const ALL: &'static [Self] = &[
        ScoreStatus::Pending,
        ScoreStatus::Requested,
        ScoreStatus::Awarded,
        ScoreStatus::Rejected,
        ScoreStatus::Archived,
    ];

    fn as_str(&self) -> &'static str {
        name_of(Self::NAMES, *self)
    }

    fn can_transition_to(&self, next: Self) -> bool {
        use ScoreStatus::*;
        matches!(
            (self, next),
            (Pending, Requested)
                | (Requested, Awarded)
                | (Requested, Rejected)
                | (Awarded, Archived)
                | (Rejected, Archived)
        )
    }
}

impl ScoreStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, ScoreStatus::Pending | ScoreStatus::Requested)
    }
}

// ============================================================================
// FEEDBACK
// ============================================================================

/// Status of a feedback message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackStatus {
    Pending,
    Read,
    Acknowledged,
    Actioned,
    Archived,
}

lifecycle_names!(FeedbackStatus {
    Pending => "pending",
    Read => "read",
    Acknowledged => "acknowledged",
    Actioned => "actioned",
    Archived => "archived",
});

impl Lifecycle for FeedbackStatus {
    const INITIAL: Self = FeedbackStatus::Pending;
    const ALL: &'static [Self] = &[
        FeedbackStatus::Pending,
        FeedbackStatus::Read,
        FeedbackStatus::Acknowledged,
        FeedbackStatus::Actioned,
        FeedbackStatus::Archived,
    ];

    fn as_str(&self) -> &'static str {
        name_of(Self::NAMES, *self)
    }

    fn can_transition_to(&self, next: Self) -> bool {
        use FeedbackStatus::*;
        matches!(
            (self, next),
            (Pending, Read)
                | (Pending, Acknowledged)
                | (Read, Acknowledged)
                | (Read, Actioned)
                | (Acknowledged, Actioned)
                | (Acknowledged, Archived)
                | (Actioned, Archived)
        )
    }
}

impl FeedbackStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, FeedbackStatus::Pending | FeedbackStatus::Read)
    }
}

// ============================================================================
// HEARTBEAT
// ============================================================================

/// Heartbeats have no lifecycle; every stored heartbeat is `Posted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatStatus {
    Posted,
}

lifecycle_names!(HeartbeatStatus {
    Posted => "posted",
});

impl Lifecycle for HeartbeatStatus {
    const INITIAL: Self = HeartbeatStatus::Posted;
    const ALL: &'static [Self] = &[HeartbeatStatus::Posted];

    fn as_str(&self) -> &'static str {
        name_of(Self::NAMES, *self)
    }

    fn can_transition_to(&self, _next: Self) -> bool {
        false
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_statuses() {
        assert_eq!(TaskStatus::INITIAL, TaskStatus::Pending);
        assert_eq!(CodeStatus::INITIAL, CodeStatus::Pending);
        assert_eq!(ReviewStatus::INITIAL, ReviewStatus::Pending);
        assert_eq!(ScoreStatus::INITIAL, ScoreStatus::Pending);
        assert_eq!(FeedbackStatus::INITIAL, FeedbackStatus::Pending);
        assert_eq!(HeartbeatStatus::INITIAL, HeartbeatStatus::Posted);
    }

    #[test]
    fn test_wire_names_match_serde() {
        for status in TaskStatus::ALL {
            let json = serde_json::to_string(status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        for status in ReviewStatus::ALL {
            let json = serde_json::to_string(status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
    }

    #[test]
    fn test_parse() {
        assert_eq!(TaskStatus::parse("in_progress"), Some(TaskStatus::InProgress));
        assert_eq!(ReviewStatus::parse("needs_changes"), Some(ReviewStatus::NeedsChanges));
        assert_eq!(CodeStatus::parse("shipped"), None);
        assert_eq!(HeartbeatStatus::parse("posted"), Some(HeartbeatStatus::Posted));
    }

    #[test]
    fn test_task_transitions() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::InProgress));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Archived.is_terminal());
        assert!(TaskStatus::Failed.is_archivable());
        assert!(!TaskStatus::Pending.is_archivable());
        assert!(TaskStatus::InProgress.is_active());
    }

    #[test]
    fn test_review_rereview_edge() {
        assert!(ReviewStatus::InReview.can_transition_to(ReviewStatus::NeedsChanges));
        assert!(ReviewStatus::NeedsChanges.can_transition_to(ReviewStatus::InReview));
        assert!(!ReviewStatus::Applied.can_transition_to(ReviewStatus::Approved));
    }

    #[test]
    fn test_heartbeat_is_terminal() {
        assert!(HeartbeatStatus::Posted.is_terminal());
        assert!(!HeartbeatStatus::Posted.is_archivable());
    }

    #[test]
    fn test_self_transitions_rejected() {
        for s in ScoreStatus::ALL {
            assert!(!s.can_transition_to(*s));
        }
        for s in FeedbackStatus::ALL {
            assert!(!s.can_transition_to(*s));
        }
    }
}

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
