//! Kind-specific message payloads.

use crate::constants::{MAX_TASK_PRIORITY, MIN_TASK_PRIORITY};
use crate::error::ValidationError;
use crate::message::{MessageKind, MessagePayload};
use crate::status::{
    CodeStatus, FeedbackStatus, HeartbeatStatus, ReviewStatus, ScoreStatus, TaskStatus,
};
use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

fn require_non_empty(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: field.to_string(),
        });
    }
    Ok(())
}

// ============================================================================
// SUPPORTING ENUMS
// ============================================================================

/// Role an agent plays in the collaboration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Writes code for assigned tasks
    #[default]
    Coder,
    /// Assigns tasks and reviews submissions
    Overseer,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Coder => "coder",
            AgentRole::Overseer => "overseer",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgentRole {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "coder" => Ok(AgentRole::Coder),
            "overseer" => Ok(AgentRole::Overseer),
            other => Err(ValidationError::InvalidValue {
                field: "role".to_string(),
                reason: format!("unknown role '{}'", other),
            }),
        }
    }
}

/// Category of work a task asks for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[default]
    Coding,
    Review,
    Testing,
    Documentation,
}

impl std::str::FromStr for TaskType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "coding" => Ok(TaskType::Coding),
            "review" => Ok(TaskType::Review),
            "testing" => Ok(TaskType::Testing),
            "documentation" => Ok(TaskType::Documentation),
            other => Err(ValidationError::InvalidValue {
                field: "task_type".to_string(),
                reason: format!("unknown task type '{}'", other),
            }),
        }
    }
}

/// Category of a feedback message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackType {
    Bug,
    Suggestion,
    Question,
    Praise,
    Complaint,
    #[default]
    General,
}

impl std::str::FromStr for FeedbackType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bug" => Ok(FeedbackType::Bug),
            "suggestion" => Ok(FeedbackType::Suggestion),
            "question" => Ok(FeedbackType::Question),
            "praise" => Ok(FeedbackType::Praise),
            "complaint" => Ok(FeedbackType::Complaint),
            "general" => Ok(FeedbackType::General),
            other => Err(ValidationError::InvalidValue {
                field: "feedback_type".to_string(),
                reason: format!("unknown feedback type '{}'", other),
            }),
        }
    }
}

/// Severity of a review comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentType {
    Error,
    Warning,
    Suggestion,
    Info,
}

/// A line-anchored review comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewComment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub line: i64,
    #[serde(rename = "type")]
    pub comment_type: CommentType,
    pub message: String,
}

impl ReviewComment {
    pub fn new(line: i64, comment_type: CommentType, message: impl Into<String>) -> Self {
        Self {
            file: None,
            line,
            comment_type,
            message: message.into(),
        }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }
}

// ============================================================================
// TASK
// ============================================================================

/// Work assigned from one agent to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub task_id: String,
    pub description: String,
    pub task_type: TaskType,
    /// 1 (lowest) to 10, independent of message priority.
    pub priority: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<Timestamp>,
}

impl TaskPayload {
    pub fn new(
        task_id: impl Into<String>,
        description: impl Into<String>,
        task_type: TaskType,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            description: description.into(),
            task_type,
            priority: MIN_TASK_PRIORITY,
            files: None,
            deadline: None,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files = Some(files);
        self
    }

    pub fn with_deadline(mut self, deadline: Timestamp) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

impl MessagePayload for TaskPayload {
    const KIND: MessageKind = MessageKind::Task;
    type Status = TaskStatus;

    fn validate(&self) -> Result<(), ValidationError> {
        require_non_empty("task_id", &self.task_id)?;
        if !(MIN_TASK_PRIORITY..=MAX_TASK_PRIORITY).contains(&self.priority) {
            return Err(ValidationError::InvalidValue {
                field: "priority".to_string(),
                reason: format!(
                    "task priority {} outside {}..={}",
                    self.priority, MIN_TASK_PRIORITY, MAX_TASK_PRIORITY
                ),
            });
        }
        Ok(())
    }
}

// ============================================================================
// CODE
// ============================================================================

/// A code submission awaiting review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodePayload {
    pub code_id: String,
    pub title: String,
    pub description: String,
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
}

impl CodePayload {
    pub fn new(
        code_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        files: Vec<String>,
    ) -> Self {
        Self {
            code_id: code_id.into(),
            title: title.into(),
            description: description.into(),
            files,
            branch: None,
            commit_sha: None,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_commit_sha(mut self, sha: impl Into<String>) -> Self {
        self.commit_sha = Some(sha.into());
        self
    }
}

impl MessagePayload for CodePayload {
    const KIND: MessageKind = MessageKind::Code;
    type Status = CodeStatus;

    fn validate(&self) -> Result<(), ValidationError> {
        require_non_empty("code_id", &self.code_id)?;
        if self.files.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "files".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// REVIEW
// ============================================================================

/// Review verdict for a task. Keyed by the task it reviews.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewPayload {
    pub task_id: String,
    pub approved: bool,
    pub reviewer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<Vec<ReviewComment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_reviewed: Option<Vec<String>>,
}

impl ReviewPayload {
    pub fn new(task_id: impl Into<String>, approved: bool, reviewer: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            approved,
            reviewer: reviewer.into(),
            comments: None,
            feedback: None,
            files_reviewed: None,
        }
    }

    pub fn with_comments(mut self, comments: Vec<ReviewComment>) -> Self {
        self.comments = Some(comments);
        self
    }

    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.feedback = Some(feedback.into());
        self
    }

    pub fn with_files_reviewed(mut self, files: Vec<String>) -> Self {
        self.files_reviewed = Some(files);
        self
    }
}

impl MessagePayload for ReviewPayload {
    const KIND: MessageKind = MessageKind::Review;
    type Status = ReviewStatus;

    fn validate(&self) -> Result<(), ValidationError> {
        require_non_empty("task_id", &self.task_id)?;
        for comment in self.comments.iter().flatten() {
            if comment.line < 0 {
                return Err(ValidationError::InvalidValue {
                    field: "comments.line".to_string(),
                    reason: format!("line {} is negative", comment.line),
                });
            }
            require_non_empty("comments.message", &comment.message)?;
        }
        Ok(())
    }
}

// ============================================================================
// SCORE
// ============================================================================

/// Score request or award notice exchanged between agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScorePayload {
    pub task_id: String,
    pub requested_score: i64,
    pub quality_justification: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub awarded_score: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub award_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_reason: Option<String>,
}

impl ScorePayload {
    pub fn new(
        task_id: impl Into<String>,
        requested_score: i64,
        quality_justification: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            requested_score,
            quality_justification: quality_justification.into(),
            awarded_score: None,
            award_reason: None,
            reject_reason: None,
        }
    }

    pub fn awarded(mut self, score: i64, reason: impl Into<String>) -> Self {
        self.awarded_score = Some(score);
        self.award_reason = Some(reason.into());
        self
    }

    pub fn rejected(mut self, reason: impl Into<String>) -> Self {
        self.reject_reason = Some(reason.into());
        self
    }
}

impl MessagePayload for ScorePayload {
    const KIND: MessageKind = MessageKind::Score;
    type Status = ScoreStatus;

    fn validate(&self) -> Result<(), ValidationError> {
        require_non_empty("task_id", &self.task_id)
    }
}

// ============================================================================
// FEEDBACK
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackPayload {
    pub feedback_type: FeedbackType,
    pub subject: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

impl FeedbackPayload {
    pub fn new(
        feedback_type: FeedbackType,
        subject: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            feedback_type,
            subject: subject.into(),
            content: content.into(),
            related_task_id: None,
            response: None,
        }
    }

    pub fn with_related_task(mut self, task_id: impl Into<String>) -> Self {
        self.related_task_id = Some(task_id.into());
        self
    }
}

impl MessagePayload for FeedbackPayload {
    const KIND: MessageKind = MessageKind::Feedback;
    type Status = FeedbackStatus;
}

// ============================================================================
// HEARTBEAT
// ============================================================================

/// Liveness broadcast. Write-once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub ai_role: String,
    /// Free-text liveness label, e.g. "working".
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

impl HeartbeatPayload {
    pub fn new(ai_role: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            ai_role: ai_role.into(),
            status: status.into(),
            current_task: None,
            metadata: None,
        }
    }

    pub fn with_current_task(mut self, task: Option<String>) -> Self {
        self.current_task = task;
        self
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

impl MessagePayload for HeartbeatPayload {
    const KIND: MessageKind = MessageKind::Heartbeat;
    type Status = HeartbeatStatus;

    fn validate(&self) -> Result<(), ValidationError> {
        require_non_empty("ai_role", &self.ai_role)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_validation() {
        assert!(TaskPayload::new("t1", "impl foo", TaskType::Coding)
            .validate()
            .is_ok());
        assert!(matches!(
            TaskPayload::new("", "impl foo", TaskType::Coding).validate(),
            Err(ValidationError::RequiredFieldMissing { .. })
        ));
        assert!(matches!(
            TaskPayload::new("t1", "x", TaskType::Testing)
                .with_priority(11)
                .validate(),
            Err(ValidationError::InvalidValue { .. })
        ));
        assert!(TaskPayload::new("t1", "x", TaskType::Testing)
            .with_priority(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_code_requires_files() {
        let code = CodePayload::new("c1", "Add foo", "adds foo", vec![]);
        assert!(matches!(
            code.validate(),
            Err(ValidationError::RequiredFieldMissing { field }) if field == "files"
        ));
        let code = CodePayload::new("c1", "Add foo", "adds foo", vec!["src/foo.rs".into()]);
        assert!(code.validate().is_ok());
    }

    #[test]
    fn test_review_comment_line() {
        let review = ReviewPayload::new("t1", false, "overseer")
            .with_comments(vec![ReviewComment::new(-1, CommentType::Error, "bad")]);
        assert!(review.validate().is_err());

        let review = ReviewPayload::new("t1", true, "overseer").with_comments(vec![
            ReviewComment::new(0, CommentType::Info, "fine").with_file("src/lib.rs"),
        ]);
        assert!(review.validate().is_ok());
    }

    #[test]
    fn test_comment_type_serializes_as_type() {
        let comment = ReviewComment::new(3, CommentType::Warning, "unused");
        let json = serde_json::to_value(&comment).unwrap();
        assert_eq!(json["type"], "warning");
        assert!(json.get("file").is_none());
    }

    #[test]
    fn test_heartbeat_requires_role() {
        assert!(HeartbeatPayload::new("", "working").validate().is_err());
        assert!(HeartbeatPayload::new("coder", "working").validate().is_ok());
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!("Overseer".parse::<AgentRole>(), Ok(AgentRole::Overseer));
        assert_eq!("documentation".parse::<TaskType>(), Ok(TaskType::Documentation));
        assert_eq!("complaint".parse::<FeedbackType>(), Ok(FeedbackType::Complaint));
        assert!("manager".parse::<AgentRole>().is_err());
    }

    #[test]
    fn test_score_payload_builders() {
        let score = ScorePayload::new("t1", 5, "ok").awarded(4, "close enough");
        assert_eq!(score.awarded_score, Some(4));
        assert_eq!(score.award_reason.as_deref(), Some("close enough"));
        assert!(score.reject_reason.is_none());
    }
}
