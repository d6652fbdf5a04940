//! tandem Core - Message and Ledger Types
//!
//! Data types shared by every tandem crate: the generic message envelope and
//! its six payload kinds, per-kind status lifecycles, score ledger records,
//! configuration and the error taxonomy. No I/O lives here.

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod config;
pub mod constants;
pub mod error;
pub mod message;
pub mod payload;
pub mod score;
pub mod status;

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Message identifier using UUIDv7, so ids sort by creation time.
pub type MessageId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Generate a new UUIDv7 MessageId.
pub fn new_message_id() -> MessageId {
    Uuid::now_v7()
}

pub use config::{DaemonConfig, LedgerConfig};
pub use error::{
    ConfigError, DaemonError, LedgerError, StorageError, TandemError, TandemResult,
    ValidationError,
};
pub use message::{Message, MessageKind, MessagePayload, MessagePriority, MessageRecord};
pub use payload::{
    AgentRole, CodePayload, CommentType, FeedbackPayload, FeedbackType, HeartbeatPayload,
    ReviewComment, ReviewPayload, ScorePayload, TaskPayload, TaskType,
};
pub use score::{
    NewScoreRequest, ScoreHistoryEntry, ScoreRecord, ScoreRequest, ScoreRequestStatus,
    ScoreResolution,
};
pub use status::{
    CodeStatus, FeedbackStatus, HeartbeatStatus, Lifecycle, ReviewStatus, ScoreStatus, TaskStatus,
};

/// Typed message aliases.
pub type TaskMessage = Message<TaskPayload>;
pub type CodeMessage = Message<CodePayload>;
pub type ReviewMessage = Message<ReviewPayload>;
pub type ScoreMessage = Message<ScorePayload>;
pub type FeedbackMessage = Message<FeedbackPayload>;
pub type HeartbeatMessage = Message<HeartbeatPayload>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_ids_are_v7() {
        let a = new_message_id();
        let b = new_message_id();
        assert_ne!(a, b);
        assert_eq!(a.get_version_num(), 7);
    }
}
