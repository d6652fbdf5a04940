//! Generic message dispatch from loosely-typed JSON content.
//!
//! External callers route an opaque payload by kind tag. Missing or malformed
//! fields are replaced by defaults (empty strings, a generated id, the first
//! enum variant that makes sense) instead of failing. Review comments without
//! text are dropped. The one field no default can stand in for is the file
//! list of a code submission, which is left to payload validation.

use serde_json::Value;
use std::collections::BTreeMap;
use tandem_core::constants::{MAX_TASK_PRIORITY, MIN_TASK_PRIORITY};
use tandem_core::{
    new_message_id, CodePayload, CommentType, FeedbackPayload, FeedbackType, HeartbeatPayload,
    MessageKind, MessagePriority, ReviewComment, ReviewPayload, ScorePayload, TaskPayload,
    TaskType, Timestamp,
};

/// A payload of any kind, tagged by variant.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyPayload {
    Task(TaskPayload),
    Code(CodePayload),
    Review(ReviewPayload),
    Score(ScorePayload),
    Feedback(FeedbackPayload),
    Heartbeat(HeartbeatPayload),
}

impl AnyPayload {
    pub fn kind(&self) -> MessageKind {
        match self {
            AnyPayload::Task(_) => MessageKind::Task,
            AnyPayload::Code(_) => MessageKind::Code,
            AnyPayload::Review(_) => MessageKind::Review,
            AnyPayload::Score(_) => MessageKind::Score,
            AnyPayload::Feedback(_) => MessageKind::Feedback,
            AnyPayload::Heartbeat(_) => MessageKind::Heartbeat,
        }
    }
}

/// Values the sender supplies when the content omits them.
#[derive(Debug, Clone)]
pub struct DispatchDefaults {
    pub reviewer: String,
    pub ai_role: String,
    pub heartbeat_status: String,
}

fn string(content: &Value, key: &str) -> String {
    opt_string(content, key).unwrap_or_default()
}

fn opt_string(content: &Value, key: &str) -> Option<String> {
    content.get(key).and_then(Value::as_str).map(str::to_string)
}

fn id_or_generated(content: &Value, key: &str) -> String {
    opt_string(content, key)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| new_message_id().to_string())
}

fn string_list(content: &Value, key: &str) -> Option<Vec<String>> {
    content.get(key).and_then(Value::as_array).map(|items| {
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    })
}

fn parse_or<T: std::str::FromStr>(content: &Value, key: &str, default: T) -> T {
    content
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn comment_type(value: Option<&str>) -> CommentType {
    match value.map(str::to_ascii_lowercase).as_deref() {
        Some("error") => CommentType::Error,
        Some("warning") => CommentType::Warning,
        Some("suggestion") => CommentType::Suggestion,
        _ => CommentType::Info,
    }
}

/// Message priority carried under `message_priority`, default normal.
pub fn message_priority(content: &Value) -> MessagePriority {
    content
        .get("message_priority")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

/// Build a typed payload of `kind` from `content`, substituting defaults.
pub fn payload_from_value(
    kind: MessageKind,
    content: &Value,
    defaults: &DispatchDefaults,
) -> AnyPayload {
    match kind {
        MessageKind::Task => {
            let priority = content
                .get("priority")
                .and_then(Value::as_i64)
                .map(|p| p.clamp(MIN_TASK_PRIORITY as i64, MAX_TASK_PRIORITY as i64) as u8)
                .unwrap_or(MIN_TASK_PRIORITY);
            AnyPayload::Task(TaskPayload {
                task_id: id_or_generated(content, "task_id"),
                description: string(content, "description"),
                task_type: parse_or(content, "task_type", TaskType::Coding),
                priority,
                files: string_list(content, "files"),
                deadline: opt_string(content, "deadline")
                    .and_then(|s| s.parse::<Timestamp>().ok()),
            })
        }
        MessageKind::Code => AnyPayload::Code(CodePayload {
            code_id: id_or_generated(content, "code_id"),
            title: string(content, "title"),
            description: string(content, "description"),
            files: string_list(content, "files").unwrap_or_default(),
            branch: opt_string(content, "branch"),
            commit_sha: opt_string(content, "commit_sha"),
        }),
        MessageKind::Review => {
            let comments = content.get("comments").and_then(Value::as_array).map(|items| {
                items
                    .iter()
                    .filter_map(|c| {
                        let message = opt_string(c, "message").filter(|m| !m.trim().is_empty())?;
                        Some(ReviewComment {
                            file: opt_string(c, "file"),
                            line: c.get("line").and_then(Value::as_i64).unwrap_or(0).max(0),
                            comment_type: comment_type(c.get("type").and_then(Value::as_str)),
                            message,
                        })
                    })
                    .collect()
            });
            AnyPayload::Review(ReviewPayload {
                task_id: id_or_generated(content, "task_id"),
                approved: content
                    .get("approved")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                reviewer: opt_string(content, "reviewer")
                    .unwrap_or_else(|| defaults.reviewer.clone()),
                comments,
                feedback: opt_string(content, "feedback"),
                files_reviewed: string_list(content, "files_reviewed"),
            })
        }
        MessageKind::Score => AnyPayload::Score(ScorePayload {
            task_id: id_or_generated(content, "task_id"),
            requested_score: content
                .get("requested_score")
                .and_then(Value::as_i64)
                .unwrap_or(0),
            quality_justification: string(content, "quality_justification"),
            awarded_score: content.get("awarded_score").and_then(Value::as_i64),
            award_reason: opt_string(content, "award_reason"),
            reject_reason: opt_string(content, "reject_reason"),
        }),
        MessageKind::Feedback => AnyPayload::Feedback(FeedbackPayload {
            feedback_type: parse_or(content, "feedback_type", FeedbackType::General),
            subject: string(content, "subject"),
            content: string(content, "content"),
            related_task_id: opt_string(content, "related_task_id"),
            response: opt_string(content, "response"),
        }),
        MessageKind::Heartbeat => {
            let metadata = content.get("metadata").and_then(Value::as_object).map(|m| {
                m.iter()
                    .map(|(k, v)| {
                        let value = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
                        (k.clone(), value)
                    })
                    .collect::<BTreeMap<_, _>>()
            });
            AnyPayload::Heartbeat(HeartbeatPayload {
                ai_role: opt_string(content, "ai_role")
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| defaults.ai_role.clone()),
                status: opt_string(content, "status")
                    .unwrap_or_else(|| defaults.heartbeat_status.clone()),
                current_task: opt_string(content, "current_task"),
                metadata,
            })
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
