//! tandem Storage - Repository Contract
//!
//! Async traits the coordination layer consumes, plus two implementations:
//! in-memory maps for tests and single-process use, and an LMDB environment
//! for durable messages and scores.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tandem_core::{
    MessageId, MessageKind, MessageRecord, NewScoreRequest, ScoreHistoryEntry, ScoreRecord,
    ScoreRequest, ScoreRequestStatus, ScoreResolution, TandemResult, Timestamp,
};

pub mod lmdb;
pub mod memory;

pub use lmdb::{LmdbStore, LmdbStoreError};
pub use memory::{InMemoryBrainStateStore, InMemoryLedgerStore, InMemoryMessageRepository};

// ============================================================================
// MESSAGE REPOSITORY
// ============================================================================

/// Persistence operations every message kind requires.
///
/// Records are kind-erased; callers convert with
/// [`tandem_core::Message::to_record`] and [`tandem_core::Message::from_record`].
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Store a new message. Fails if the id already exists.
    async fn insert_message(&self, record: MessageRecord) -> TandemResult<()>;

    async fn get_message(&self, kind: MessageKind, id: MessageId)
        -> TandemResult<Option<MessageRecord>>;

    /// Messages of `kind` addressed to `to_agent`, in insertion order,
    /// optionally restricted to one status.
    async fn list_messages(
        &self,
        kind: MessageKind,
        to_agent: &str,
        status: Option<&str>,
    ) -> TandemResult<Vec<MessageRecord>>;

    /// Returns `false` when no message of `kind` has this id.
    async fn update_message_status(
        &self,
        kind: MessageKind,
        id: MessageId,
        status: &str,
        updated_at: Timestamp,
    ) -> TandemResult<bool>;

    /// Returns `false` when no message of `kind` has this id.
    async fn delete_message(&self, kind: MessageKind, id: MessageId) -> TandemResult<bool>;
}

// ============================================================================
// LEDGER STORE
// ============================================================================

/// Durable tables behind the score ledger.
///
/// Every method except [`LedgerStore::initialize`] fails with
/// `LedgerError::NotInitialized` until the tables exist.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Create the ledger tables if absent. Idempotent.
    async fn initialize(&self) -> TandemResult<()>;

    async fn get_score(&self, ai_name: &str) -> TandemResult<Option<ScoreRecord>>;

    /// Upsert a balance without touching the history.
    async fn set_score(&self, ai_name: &str, score: i64, now: Timestamp) -> TandemResult<()>;

    /// Add `by` to a balance (creating it at zero) and return the new value.
    async fn increment_score(&self, ai_name: &str, by: i64, now: Timestamp) -> TandemResult<i64>;

    async fn list_scores(&self) -> TandemResult<Vec<ScoreRecord>>;

    /// Set every balance to zero.
    async fn reset_scores(&self, now: Timestamp) -> TandemResult<()>;

    /// Store a pending request and return it with its assigned id.
    async fn insert_request(&self, request: NewScoreRequest) -> TandemResult<ScoreRequest>;

    async fn get_request(&self, id: i64) -> TandemResult<Option<ScoreRequest>>;

    /// Requests targeting `target_ai`, newest first.
    async fn list_requests(
        &self,
        target_ai: &str,
        status: Option<ScoreRequestStatus>,
    ) -> TandemResult<Vec<ScoreRequest>>;

    /// Mark the request resolved, apply the balance change and append the
    /// history entry as one atomic unit.
    async fn apply_resolution(&self, resolution: ScoreResolution) -> TandemResult<()>;

    /// History of `ai_name`, newest first, at most `limit` entries.
    async fn history(&self, ai_name: &str, limit: usize) -> TandemResult<Vec<ScoreHistoryEntry>>;
}

// ============================================================================
// BRAIN STATE
// ============================================================================

/// Per-agent key/value working memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrainState {
    pub ai_name: String,
    pub state: serde_json::Map<String, serde_json::Value>,
    pub updated_at: Timestamp,
}

impl BrainState {
    pub fn value(&self, key: &str) -> Option<&serde_json::Value> {
        self.state.get(key)
    }

    /// String value under `key`, if present and a string.
    pub fn string(&self, key: &str) -> Option<String> {
        self.state
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

#[async_trait]
pub trait BrainStateStore: Send + Sync {
    async fn load_brain_state(&self, ai_name: &str) -> TandemResult<Option<BrainState>>;

    /// Set one key, creating the agent's state if needed.
    async fn set_brain_state_value(
        &self,
        ai_name: &str,
        key: &str,
        value: serde_json::Value,
    ) -> TandemResult<bool>;
}
