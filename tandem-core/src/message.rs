//! Generic message envelope and its kind-erased storage form.

use crate::error::{StorageError, TandemError, TandemResult, ValidationError};
use crate::status::Lifecycle;
use crate::{new_message_id, MessageId, Timestamp};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// KIND AND PRIORITY
// ============================================================================

/// Discriminator for the six message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Work assignment
    Task,
    /// Code submission for review
    Code,
    /// Review verdict on a task
    Review,
    /// Score request or award notice
    Score,
    /// Free-form feedback
    Feedback,
    /// Liveness signal
    Heartbeat,
}

impl MessageKind {
    /// Order in which a poll tick drains kinds.
    pub const POLL_ORDER: [MessageKind; 6] = [
        MessageKind::Task,
        MessageKind::Review,
        MessageKind::Code,
        MessageKind::Score,
        MessageKind::Feedback,
        MessageKind::Heartbeat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Task => "task",
            MessageKind::Code => "code",
            MessageKind::Review => "review",
            MessageKind::Score => "score",
            MessageKind::Feedback => "feedback",
            MessageKind::Heartbeat => "heartbeat",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "task" => Ok(MessageKind::Task),
            "code" => Ok(MessageKind::Code),
            "review" => Ok(MessageKind::Review),
            "score" => Ok(MessageKind::Score),
            "feedback" => Ok(MessageKind::Feedback),
            "heartbeat" => Ok(MessageKind::Heartbeat),
            other => Err(ValidationError::InvalidValue {
                field: "type".to_string(),
                reason: format!("unknown message kind '{}'", other),
            }),
        }
    }
}

/// Advisory delivery priority. Ordered `Low < Normal < High < Urgent`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

// ============================================================================
// PAYLOAD TRAIT AND ENVELOPE
// ============================================================================

/// Kind-specific body of a message.
pub trait MessagePayload:
    Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Kind tag stored alongside the payload.
    const KIND: MessageKind;

    /// Lifecycle of messages carrying this payload.
    type Status: Lifecycle;

    /// Check caller-supplied fields before the message is stored.
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// A typed message: common envelope plus a kind-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Message<P: MessagePayload> {
    pub id: MessageId,
    pub from_agent: String,
    pub to_agent: String,
    pub priority: MessagePriority,
    pub status: P::Status,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub payload: P,
}

impl<P: MessagePayload> Message<P> {
    /// Build a fresh message in its initial status with a new id.
    pub fn new(from_agent: impl Into<String>, to_agent: impl Into<String>, payload: P) -> Self {
        let now = Utc::now();
        Self {
            id: new_message_id(),
            from_agent: from_agent.into(),
            to_agent: to_agent.into(),
            priority: MessagePriority::default(),
            status: P::Status::INITIAL,
            created_at: now,
            updated_at: now,
            payload,
        }
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn kind(&self) -> MessageKind {
        P::KIND
    }

    /// Erase the payload type for storage.
    pub fn to_record(&self) -> TandemResult<MessageRecord> {
        let payload = serde_json::to_value(&self.payload).map_err(|e| {
            TandemError::Storage(StorageError::Serialization {
                what: format!("{} payload", P::KIND),
                reason: e.to_string(),
            })
        })?;
        Ok(MessageRecord {
            id: self.id,
            kind: P::KIND,
            from_agent: self.from_agent.clone(),
            to_agent: self.to_agent.clone(),
            priority: self.priority,
            status: self.status.as_str().to_string(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            payload,
        })
    }

    /// Rebuild a typed message from a stored record of the same kind.
    pub fn from_record(record: MessageRecord) -> TandemResult<Self> {
        if record.kind != P::KIND {
            return Err(StorageError::Serialization {
                what: format!("{} message {}", P::KIND, record.id),
                reason: format!("record holds a {} message", record.kind),
            }
            .into());
        }
        let status = P::Status::parse(&record.status).ok_or_else(|| StorageError::Serialization {
            what: format!("{} message {}", P::KIND, record.id),
            reason: format!("unknown status '{}'", record.status),
        })?;
        let payload: P =
            serde_json::from_value(record.payload).map_err(|e| StorageError::Serialization {
                what: format!("{} payload {}", P::KIND, record.id),
                reason: e.to_string(),
            })?;
        Ok(Self {
            id: record.id,
            from_agent: record.from_agent,
            to_agent: record.to_agent,
            priority: record.priority,
            status,
            created_at: record.created_at,
            updated_at: record.updated_at,
            payload,
        })
    }
}

/// Kind-erased row as held by a message repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub kind: MessageKind,
    pub from_agent: String,
    pub to_agent: String,
    pub priority: MessagePriority,
    pub status: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub payload: serde_json::Value,
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{FeedbackPayload, FeedbackType, TaskPayload, TaskType};
    use crate::status::{FeedbackStatus, TaskStatus};

    fn task() -> TaskPayload {
        TaskPayload::new("t1", "impl foo", TaskType::Coding)
    }

    #[test]
    fn test_new_message_is_initial() {
        let msg = Message::new("coder", "overseer", task());
        assert_eq!(msg.status, TaskStatus::Pending);
        assert_eq!(msg.kind(), MessageKind::Task);
        assert_eq!(msg.priority, MessagePriority::Normal);
        assert_eq!(msg.created_at, msg.updated_at);
    }

    #[test]
    fn test_record_conversion_preserves_fields() -> TandemResult<()> {
        let msg = Message::new("coder", "overseer", task()).with_priority(MessagePriority::Urgent);
        let record = msg.to_record()?;
        assert_eq!(record.kind, MessageKind::Task);
        assert_eq!(record.status, "pending");
        assert_eq!(record.payload["task_id"], "t1");

        let back = Message::<TaskPayload>::from_record(record)?;
        assert_eq!(back, msg);
        Ok(())
    }

    #[test]
    fn test_from_record_rejects_other_kind() -> TandemResult<()> {
        let record = Message::new("coder", "overseer", task()).to_record()?;
        let err = Message::<FeedbackPayload>::from_record(record).unwrap_err();
        assert!(matches!(err, TandemError::Storage(StorageError::Serialization { .. })));
        Ok(())
    }

    #[test]
    fn test_from_record_rejects_unknown_status() -> TandemResult<()> {
        let payload = FeedbackPayload::new(FeedbackType::Bug, "crash", "it crashed");
        let mut record = Message::new("overseer", "coder", payload).to_record()?;
        record.status = "lost".to_string();
        assert!(Message::<FeedbackPayload>::from_record(record).is_err());
        Ok(())
    }

    #[test]
    fn test_status_survives_record() -> TandemResult<()> {
        let mut msg = Message::new(
            "overseer",
            "coder",
            FeedbackPayload::new(FeedbackType::Praise, "nice", "good work"),
        );
        msg.status = FeedbackStatus::Acknowledged;
        let back = Message::<FeedbackPayload>::from_record(msg.to_record()?)?;
        assert_eq!(back.status, FeedbackStatus::Acknowledged);
        Ok(())
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("Task".parse::<MessageKind>(), Ok(MessageKind::Task));
        assert_eq!("heartbeat".parse::<MessageKind>(), Ok(MessageKind::Heartbeat));
        assert!("memo".parse::<MessageKind>().is_err());
    }

    #[test]
    fn test_priority_order() {
        assert!(MessagePriority::Low < MessagePriority::Normal);
        assert!(MessagePriority::High < MessagePriority::Urgent);
    }

    #[test]
    fn test_poll_order() {
        assert_eq!(
            MessageKind::POLL_ORDER,
            [
                MessageKind::Task,
                MessageKind::Review,
                MessageKind::Code,
                MessageKind::Score,
                MessageKind::Feedback,
                MessageKind::Heartbeat,
            ]
        );
    }
}
