//! tandem Test Utilities
//!
//! Centralized test infrastructure for the tandem workspace:
//! - Proptest generators for payloads, statuses and agent names
//! - Fixtures for in-memory stores, sample payloads and daemon configs
//! - Custom assertions for tandem error variants

// Re-export in-memory stores from their source crate
pub use tandem_storage::{InMemoryBrainStateStore, InMemoryLedgerStore, InMemoryMessageRepository};

// Re-export core types for convenience
pub use tandem_core::{
    AgentRole, CodePayload, CommentType, ConfigError, DaemonConfig, DaemonError, FeedbackPayload,
    FeedbackType, HeartbeatPayload, LedgerError, Lifecycle, MessageKind, MessagePriority,
    ReviewComment, ReviewPayload, ScorePayload, StorageError, TandemError, TandemResult,
    TaskPayload, TaskType, Timestamp, ValidationError,
};

use chrono::Utc;

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for tandem message types.

    use super::*;
    use proptest::prelude::*;
    use proptest::sample::select;
    use uuid::Uuid;

    /// Generate a valid UUIDv7.
    pub fn arb_uuid_v7() -> impl Strategy<Value = Uuid> {
        Just(()).prop_map(|_| Uuid::now_v7())
    }

    /// Generate a Timestamp between 2020 and 2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
        })
    }

    /// Generate a plausible agent name.
    pub fn arb_agent_name() -> impl Strategy<Value = String> {
        "[A-Z][a-z]{2,9}"
    }

    pub fn arb_task_id() -> impl Strategy<Value = String> {
        "task-[a-z0-9]{1,8}"
    }

    pub fn arb_file_path() -> impl Strategy<Value = String> {
        "src/[a-z_]{1,12}\\.rs"
    }

    // === Enum Generators ===

    pub fn arb_message_kind() -> impl Strategy<Value = MessageKind> {
        select(MessageKind::POLL_ORDER.to_vec())
    }

    pub fn arb_message_priority() -> impl Strategy<Value = MessagePriority> {
        prop_oneof![
            Just(MessagePriority::Low),
            Just(MessagePriority::Normal),
            Just(MessagePriority::High),
            Just(MessagePriority::Urgent),
        ]
    }

    /// Any status of lifecycle `S`.
    pub fn arb_status<S: Lifecycle>() -> impl Strategy<Value = S> {
        select(S::ALL)
    }

    pub fn arb_agent_role() -> impl Strategy<Value = AgentRole> {
        prop_oneof![Just(AgentRole::Coder), Just(AgentRole::Overseer)]
    }

    pub fn arb_task_type() -> impl Strategy<Value = TaskType> {
        prop_oneof![
            Just(TaskType::Coding),
            Just(TaskType::Review),
            Just(TaskType::Testing),
            Just(TaskType::Documentation),
        ]
    }

    pub fn arb_feedback_type() -> impl Strategy<Value = FeedbackType> {
        prop_oneof![
            Just(FeedbackType::Bug),
            Just(FeedbackType::Suggestion),
            Just(FeedbackType::Question),
            Just(FeedbackType::Praise),
            Just(FeedbackType::Complaint),
            Just(FeedbackType::General),
        ]
    }

    pub fn arb_comment_type() -> impl Strategy<Value = CommentType> {
        prop_oneof![
            Just(CommentType::Error),
            Just(CommentType::Warning),
            Just(CommentType::Suggestion),
            Just(CommentType::Info),
        ]
    }

    // === Payload Generators ===

    /// Generate a TaskPayload that passes validation.
    pub fn arb_task_payload() -> impl Strategy<Value = TaskPayload> {
        (
            arb_task_id(),
            ".{0,40}",
            arb_task_type(),
            1u8..=10,
            prop::option::of(prop::collection::vec(arb_file_path(), 0..4)),
        )
            .prop_map(|(task_id, description, task_type, priority, files)| {
                let mut payload =
                    TaskPayload::new(task_id, description, task_type).with_priority(priority);
                payload.files = files;
                payload
            })
    }

    /// Generate a CodePayload with at least one file.
    pub fn arb_code_payload() -> impl Strategy<Value = CodePayload> {
        (
            "code-[a-z0-9]{1,8}",
            ".{1,30}",
            ".{0,40}",
            prop::collection::vec(arb_file_path(), 1..5),
            prop::option::of("[a-z]{3,10}"),
        )
            .prop_map(|(code_id, title, description, files, branch)| {
                let mut payload = CodePayload::new(code_id, title, description, files);
                payload.branch = branch;
                payload
            })
    }

    pub fn arb_review_comment() -> impl Strategy<Value = ReviewComment> {
        (
            0i64..500,
            arb_comment_type(),
            "[A-Z][a-z ]{0,29}",
            prop::option::of(arb_file_path()),
        )
            .prop_map(|(line, comment_type, message, file)| {
                let comment = ReviewComment::new(line, comment_type, message);
                match file {
                    Some(file) => comment.with_file(file),
                    None => comment,
                }
            })
    }

    pub fn arb_review_payload() -> impl Strategy<Value = ReviewPayload> {
        (
            arb_task_id(),
            any::<bool>(),
            arb_agent_name(),
            prop::collection::vec(arb_review_comment(), 0..4),
        )
            .prop_map(|(task_id, approved, reviewer, comments)| {
                ReviewPayload::new(task_id, approved, reviewer).with_comments(comments)
            })
    }

    pub fn arb_score_payload() -> impl Strategy<Value = ScorePayload> {
        (arb_task_id(), -50i64..200, ".{0,40}").prop_map(|(task_id, score, justification)| {
            ScorePayload::new(task_id, score, justification)
        })
    }

    pub fn arb_feedback_payload() -> impl Strategy<Value = FeedbackPayload> {
        (
            arb_feedback_type(),
            ".{0,20}",
            ".{0,60}",
            prop::option::of(arb_task_id()),
        )
            .prop_map(|(feedback_type, subject, content, related)| {
                let payload = FeedbackPayload::new(feedback_type, subject, content);
                match related {
                    Some(task_id) => payload.with_related_task(task_id),
                    None => payload,
                }
            })
    }

    pub fn arb_heartbeat_payload() -> impl Strategy<Value = HeartbeatPayload> {
        (arb_agent_role(), "[a-z]{3,10}", prop::option::of(arb_task_id())).prop_map(
            |(role, status, current_task)| {
                HeartbeatPayload::new(role.as_str(), status).with_current_task(current_task)
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built stores, payloads and configs for common scenarios.

    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tandem_storage::{BrainStateStore, LedgerStore, MessageRepository};

    /// A repository handle plus a trait object sharing the same storage.
    pub fn shared_repository() -> (InMemoryMessageRepository, Arc<dyn MessageRepository>) {
        let repo = InMemoryMessageRepository::new();
        let shared: Arc<dyn MessageRepository> = Arc::new(repo.clone());
        (repo, shared)
    }

    pub fn brain_store() -> Arc<dyn BrainStateStore> {
        Arc::new(InMemoryBrainStateStore::new())
    }

    /// An in-memory ledger store with its tables created.
    pub async fn initialized_ledger_store() -> TandemResult<Arc<dyn LedgerStore>> {
        let store = InMemoryLedgerStore::new();
        store.initialize().await?;
        Ok(Arc::new(store))
    }

    pub fn sample_task(task_id: &str) -> TaskPayload {
        TaskPayload::new(task_id, format!("Implement {task_id}"), TaskType::Coding)
            .with_priority(3)
            .with_files(vec!["src/lib.rs".to_string()])
    }

    pub fn sample_code(code_id: &str) -> CodePayload {
        CodePayload::new(
            code_id,
            "Add parser",
            "First pass at the parser",
            vec!["src/parser.rs".to_string()],
        )
        .with_branch("feature/parser")
    }

    pub fn sample_review(task_id: &str, approved: bool, reviewer: &str) -> ReviewPayload {
        let comment = ReviewComment::new(12, CommentType::Suggestion, "Consider a helper here")
            .with_file("src/parser.rs");
        ReviewPayload::new(task_id, approved, reviewer).with_comments(vec![comment])
    }

    pub fn sample_score(task_id: &str, requested: i64) -> ScorePayload {
        ScorePayload::new(task_id, requested, "All tests pass")
    }

    pub fn sample_feedback(subject: &str) -> FeedbackPayload {
        FeedbackPayload::new(FeedbackType::Question, subject, "Could you clarify?")
    }

    /// Short intervals for loop tests.
    pub fn fast_config(ai_name: &str, role: AgentRole) -> DaemonConfig {
        DaemonConfig::new(ai_name, role)
            .with_poll_interval(Duration::from_millis(20))
            .with_heartbeat_interval(Duration::from_millis(50))
    }

    /// No heartbeats and a single poll tick at start.
    pub fn quiet_config(ai_name: &str, role: AgentRole) -> DaemonConfig {
        DaemonConfig::new(ai_name, role)
            .with_poll_interval(Duration::from_secs(3600))
            .with_heartbeat_interval(Duration::from_secs(3600))
            .with_auto_heartbeat(false)
    }

    /// Poll `cond` every 10ms until it holds or `timeout` elapses.
    pub async fn eventually<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if cond() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for tandem-specific error variants.

    use super::*;

    /// Assert that a TandemResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &TandemResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a TandemResult is Err.
    #[track_caller]
    pub fn assert_err<T: std::fmt::Debug>(result: &TandemResult<T>) {
        assert!(result.is_err(), "Expected Err, got Ok: {:?}", result);
    }

    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &TandemResult<T>) {
        match result {
            Err(TandemError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }

    /// Assert a NotFound storage error for the given message kind.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &TandemResult<T>, kind: MessageKind) {
        match result {
            Err(TandemError::Storage(StorageError::NotFound { kind: k, .. })) => {
                assert_eq!(*k, kind, "Wrong kind in NotFound error");
            }
            other => panic!("Expected NotFound error for {}, got: {:?}", kind, other),
        }
    }

    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &TandemResult<T>) {
        match result {
            Err(TandemError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    /// Assert a refused lifecycle move between the named statuses.
    #[track_caller]
    pub fn assert_invalid_transition<T: std::fmt::Debug>(
        result: &TandemResult<T>,
        from: &str,
        to: &str,
    ) {
        match result {
            Err(TandemError::Validation(ValidationError::InvalidTransition {
                from: f, to: t, ..
            })) => {
                assert_eq!(f, from, "Wrong source status");
                assert_eq!(t, to, "Wrong target status");
            }
            other => panic!("Expected InvalidTransition {} -> {}, got: {:?}", from, to, other),
        }
    }

    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &TandemResult<T>) {
        match result {
            Err(TandemError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_already_running<T: std::fmt::Debug>(result: &TandemResult<T>) {
        match result {
            Err(TandemError::Daemon(DaemonError::AlreadyRunning { .. })) => {}
            other => panic!("Expected AlreadyRunning, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_not_running<T: std::fmt::Debug>(result: &TandemResult<T>) {
        match result {
            Err(TandemError::Daemon(DaemonError::NotRunning { .. })) => {}
            other => panic!("Expected NotRunning, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_ledger_not_initialized<T: std::fmt::Debug>(result: &TandemResult<T>) {
        match result {
            Err(TandemError::Ledger(LedgerError::NotInitialized)) => {}
            other => panic!("Expected NotInitialized, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_invalid_request<T: std::fmt::Debug>(result: &TandemResult<T>, request_id: i64) {
        match result {
            Err(TandemError::Ledger(LedgerError::InvalidRequest { request_id: id, .. })) => {
                assert_eq!(*id, request_id, "Wrong request id");
            }
            other => panic!("Expected InvalidRequest for {}, got: {:?}", request_id, other),
        }
    }

    /// Assert that `actor` was refused resolving `request_id`.
    #[track_caller]
    pub fn assert_unauthorized<T: std::fmt::Debug>(
        result: &TandemResult<T>,
        request_id: i64,
        actor: &str,
    ) {
        match result {
            Err(TandemError::Ledger(LedgerError::Unauthorized {
                request_id: id,
                actor: a,
                ..
            })) => {
                assert_eq!(*id, request_id, "Wrong request id");
                assert_eq!(a, actor, "Wrong actor");
            }
            other => panic!("Expected Unauthorized for {}, got: {:?}", actor, other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
