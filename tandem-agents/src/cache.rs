//! Message cache facade.
//!
//! A [`MessageCache`] speaks for one agent: every message it sends carries the
//! fixed `from_ai` identity. It assigns ids and timestamps, validates payloads
//! and converts between typed messages and repository records. It holds no
//! other state.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tandem_core::{
    CodePayload, CodeStatus, FeedbackPayload, FeedbackStatus, HeartbeatPayload, Lifecycle,
    Message, MessageId, MessagePayload, MessagePriority, ReviewPayload, ReviewStatus,
    ScorePayload, ScoreStatus, StorageError, TandemResult, TaskPayload, TaskStatus,
    ValidationError,
};
use tandem_storage::MessageRepository;

use crate::dispatch::AnyPayload;

#[derive(Clone)]
pub struct MessageCache {
    from_ai: String,
    repository: Arc<dyn MessageRepository>,
}

impl std::fmt::Debug for MessageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageCache")
            .field("from_ai", &self.from_ai)
            .finish_non_exhaustive()
    }
}

impl MessageCache {
    pub fn new(from_ai: impl Into<String>, repository: Arc<dyn MessageRepository>) -> Self {
        Self {
            from_ai: from_ai.into(),
            repository,
        }
    }

    pub fn from_ai(&self) -> &str {
        &self.from_ai
    }

    // ========================================================================
    // GENERIC OPERATIONS
    // ========================================================================

    /// Validate and store a new message, returning its id.
    pub async fn send<P: MessagePayload>(
        &self,
        to: &str,
        priority: MessagePriority,
        payload: P,
    ) -> TandemResult<MessageId> {
        if to.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "to".to_string(),
            }
            .into());
        }
        payload.validate()?;

        let message = Message::new(self.from_ai.clone(), to, payload).with_priority(priority);
        let id = message.id;
        self.repository.insert_message(message.to_record()?).await?;

        tracing::debug!(
            kind = %P::KIND,
            message_id = %id,
            from = %self.from_ai,
            to = %to,
            "Message sent"
        );
        Ok(id)
    }

    /// Messages of kind `P` addressed to `for_agent`. `None` means the
    /// initial status only, so handled work is not re-delivered.
    pub async fn receive<P: MessagePayload>(
        &self,
        for_agent: &str,
        status: Option<P::Status>,
    ) -> TandemResult<Vec<Message<P>>> {
        let status = status.unwrap_or(P::Status::INITIAL);
        self.repository
            .list_messages(P::KIND, for_agent, Some(status.as_str()))
            .await?
            .into_iter()
            .map(Message::from_record)
            .collect()
    }

    pub async fn get<P: MessagePayload>(&self, id: MessageId) -> TandemResult<Option<Message<P>>> {
        self.repository
            .get_message(P::KIND, id)
            .await?
            .map(Message::from_record)
            .transpose()
    }

    /// Overwrite the status of a message. Returns `false` for an unknown id.
    ///
    /// No lifecycle check is made; use [`MessageCache::transition_status`]
    /// for forward-only moves.
    pub async fn update_status<P: MessagePayload>(
        &self,
        id: MessageId,
        status: P::Status,
    ) -> TandemResult<bool> {
        self.repository
            .update_message_status(P::KIND, id, status.as_str(), Utc::now())
            .await
    }

    /// Move a message to `next` only if its lifecycle allows it.
    pub async fn transition_status<P: MessagePayload>(
        &self,
        id: MessageId,
        next: P::Status,
    ) -> TandemResult<()> {
        let current = self.get::<P>(id).await?.ok_or(StorageError::NotFound {
            kind: P::KIND,
            id,
        })?;
        if !current.status.can_transition_to(next) {
            return Err(ValidationError::InvalidTransition {
                kind: P::KIND,
                from: current.status.as_str().to_string(),
                to: next.as_str().to_string(),
            }
            .into());
        }
        if !self.update_status::<P>(id, next).await? {
            return Err(StorageError::NotFound { kind: P::KIND, id }.into());
        }
        Ok(())
    }

    pub async fn delete<P: MessagePayload>(&self, id: MessageId) -> TandemResult<bool> {
        self.repository.delete_message(P::KIND, id).await
    }

    /// Send a payload whose kind is only known at runtime.
    pub async fn send_any(
        &self,
        to: &str,
        priority: MessagePriority,
        payload: AnyPayload,
    ) -> TandemResult<MessageId> {
        match payload {
            AnyPayload::Task(p) => self.send(to, priority, p).await,
            AnyPayload::Code(p) => self.send(to, priority, p).await,
            AnyPayload::Review(p) => self.send(to, priority, p).await,
            AnyPayload::Score(p) => self.send(to, priority, p).await,
            AnyPayload::Feedback(p) => self.send(to, priority, p).await,
            AnyPayload::Heartbeat(p) => self.send(to, priority, p).await,
        }
    }

    // ========================================================================
    // TASKS
    // ========================================================================

    pub async fn send_task(
        &self,
        to: &str,
        payload: TaskPayload,
        priority: MessagePriority,
    ) -> TandemResult<MessageId> {
        self.send(to, priority, payload).await
    }

    pub async fn receive_tasks(
        &self,
        for_agent: &str,
        status: Option<TaskStatus>,
    ) -> TandemResult<Vec<Message<TaskPayload>>> {
        self.receive(for_agent, status).await
    }

    pub async fn update_task_status(&self, id: MessageId, status: TaskStatus) -> TandemResult<bool> {
        self.update_status::<TaskPayload>(id, status).await
    }

    pub async fn delete_task(&self, id: MessageId) -> TandemResult<bool> {
        self.delete::<TaskPayload>(id).await
    }

    // ========================================================================
    // CODE
    // ========================================================================

    pub async fn send_code(
        &self,
        to: &str,
        payload: CodePayload,
        priority: MessagePriority,
    ) -> TandemResult<MessageId> {
        self.send(to, priority, payload).await
    }

    pub async fn receive_codes(
        &self,
        for_agent: &str,
        status: Option<CodeStatus>,
    ) -> TandemResult<Vec<Message<CodePayload>>> {
        self.receive(for_agent, status).await
    }

    pub async fn update_code_status(&self, id: MessageId, status: CodeStatus) -> TandemResult<bool> {
        self.update_status::<CodePayload>(id, status).await
    }

    pub async fn delete_code(&self, id: MessageId) -> TandemResult<bool> {
        self.delete::<CodePayload>(id).await
    }

    // ========================================================================
    // REVIEWS
    // ========================================================================

    pub async fn send_review(
        &self,
        to: &str,
        payload: ReviewPayload,
        priority: MessagePriority,
    ) -> TandemResult<MessageId> {
        self.send(to, priority, payload).await
    }

    pub async fn receive_reviews(
        &self,
        for_agent: &str,
        status: Option<ReviewStatus>,
    ) -> TandemResult<Vec<Message<ReviewPayload>>> {
        self.receive(for_agent, status).await
    }

    pub async fn update_review_status(
        &self,
        id: MessageId,
        status: ReviewStatus,
    ) -> TandemResult<bool> {
        self.update_status::<ReviewPayload>(id, status).await
    }

    pub async fn delete_review(&self, id: MessageId) -> TandemResult<bool> {
        self.delete::<ReviewPayload>(id).await
    }

    // ========================================================================
    // SCORES
    // ========================================================================

    pub async fn send_score(
        &self,
        to: &str,
        payload: ScorePayload,
        priority: MessagePriority,
    ) -> TandemResult<MessageId> {
        self.send(to, priority, payload).await
    }

    pub async fn receive_scores(
        &self,
        for_agent: &str,
        status: Option<ScoreStatus>,
    ) -> TandemResult<Vec<Message<ScorePayload>>> {
        self.receive(for_agent, status).await
    }

    pub async fn update_score_status(
        &self,
        id: MessageId,
        status: ScoreStatus,
    ) -> TandemResult<bool> {
        self.update_status::<ScorePayload>(id, status).await
    }

    pub async fn delete_score(&self, id: MessageId) -> TandemResult<bool> {
        self.delete::<ScorePayload>(id).await
    }

    // ========================================================================
    // FEEDBACK
    // ========================================================================

    pub async fn send_feedback(
        &self,
        to: &str,
        payload: FeedbackPayload,
        priority: MessagePriority,
    ) -> TandemResult<MessageId> {
        self.send(to, priority, payload).await
    }

    pub async fn receive_feedbacks(
        &self,
        for_agent: &str,
        status: Option<FeedbackStatus>,
    ) -> TandemResult<Vec<Message<FeedbackPayload>>> {
        self.receive(for_agent, status).await
    }

    pub async fn update_feedback_status(
        &self,
        id: MessageId,
        status: FeedbackStatus,
    ) -> TandemResult<bool> {
        self.update_status::<FeedbackPayload>(id, status).await
    }

    pub async fn delete_feedback(&self, id: MessageId) -> TandemResult<bool> {
        self.delete::<FeedbackPayload>(id).await
    }

    // ========================================================================
    // HEARTBEATS
    // ========================================================================

    pub async fn send_heartbeat(
        &self,
        to: &str,
        ai_role: &str,
        status: &str,
        current_task: Option<String>,
        metadata: Option<BTreeMap<String, String>>,
    ) -> TandemResult<MessageId> {
        let mut payload = HeartbeatPayload::new(ai_role, status).with_current_task(current_task);
        payload.metadata = metadata;
        self.send(to, MessagePriority::Low, payload).await
    }

    /// Every heartbeat addressed to `for_agent`; heartbeats have no lifecycle.
    pub async fn receive_heartbeats(
        &self,
        for_agent: &str,
    ) -> TandemResult<Vec<Message<HeartbeatPayload>>> {
        self.receive(for_agent, None).await
    }

    pub async fn delete_heartbeat(&self, id: MessageId) -> TandemResult<bool> {
        self.delete::<HeartbeatPayload>(id).await
    }
}

// =============================================================================
// TESTS
// =============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
