//! Score ledger records.

use crate::{LedgerError, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Current balance of one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub ai_name: String,
    /// May go negative.
    pub score: i64,
    pub updated_at: Timestamp,
}

impl ScoreRecord {
    /// Balance after applying `change`, or an error if it leaves `i64`.
    pub fn checked_balance(&self, change: i64) -> Result<i64, LedgerError> {
        self.score
            .checked_add(change)
            .ok_or_else(|| LedgerError::ScoreOverflow {
                ai_name: self.ai_name.clone(),
                score: self.score,
                change,
            })
    }
}

/// Resolution state of a score request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreRequestStatus {
    Pending,
    Awarded,
    Rejected,
}

impl ScoreRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreRequestStatus::Pending => "pending",
            ScoreRequestStatus::Awarded => "awarded",
            ScoreRequestStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ScoreRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request for `target_ai` to attest to `requester`'s work on a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreRequest {
    pub id: i64,
    pub task_id: String,
    pub requester: String,
    pub target_ai: String,
    pub requested_score: i64,
    pub quality_justification: String,
    pub status: ScoreRequestStatus,
    pub created_at: Timestamp,
    pub reviewed_at: Option<Timestamp>,
}

impl ScoreRequest {
    pub fn is_pending(&self) -> bool {
        self.status == ScoreRequestStatus::Pending
    }
}

/// Fields supplied when opening a score request; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewScoreRequest {
    pub task_id: String,
    pub requester: String,
    pub target_ai: String,
    pub requested_score: i64,
    pub quality_justification: String,
    pub created_at: Timestamp,
}

/// Append-only audit row written for every resolved request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreHistoryEntry {
    pub ai_name: String,
    /// Signed change; 0 for rejections.
    pub change: i64,
    pub reason: String,
    pub requester: String,
    pub awarder: String,
    pub task_id: String,
    pub created_at: Timestamp,
}

/// Everything a store applies in one transaction when a request is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreResolution {
    pub request_id: i64,
    pub status: ScoreRequestStatus,
    pub reviewed_at: Timestamp,
    /// Added to `history.ai_name`'s balance; zero leaves the balance untouched.
    pub score_delta: i64,
    pub history: ScoreHistoryEntry,
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(score: i64) -> ScoreRecord {
        ScoreRecord {
            ai_name: "coder".to_string(),
            score,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_checked_balance() {
        assert_eq!(record(5).checked_balance(-8), Ok(-3));
        assert_eq!(
            record(i64::MAX).checked_balance(1),
            Err(LedgerError::ScoreOverflow {
                ai_name: "coder".to_string(),
                score: i64::MAX,
                change: 1,
            })
        );
        assert!(record(i64::MIN).checked_balance(-1).is_err());
    }
}
