//! In-memory stores backed by `tokio::sync` locks.

use crate::{BrainState, BrainStateStore, LedgerStore, MessageRepository};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tandem_core::{
    LedgerError, MessageId, MessageKind, MessageRecord, NewScoreRequest, ScoreHistoryEntry,
    ScoreRecord, ScoreRequest, ScoreRequestStatus, ScoreResolution, StorageError, TandemResult,
    Timestamp,
};
use tokio::sync::{Mutex, RwLock};

// ============================================================================
// MESSAGES
// ============================================================================

/// Message repository holding one insertion-ordered list per kind.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMessageRepository {
    messages: Arc<RwLock<HashMap<MessageKind, Vec<MessageRecord>>>>,
}

impl InMemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total messages of one kind, regardless of recipient or status.
    pub async fn count(&self, kind: MessageKind) -> usize {
        self.messages
            .read()
            .await
            .get(&kind)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn insert_message(&self, record: MessageRecord) -> TandemResult<()> {
        let mut messages = self.messages.write().await;
        let rows = messages.entry(record.kind).or_default();
        if rows.iter().any(|r| r.id == record.id) {
            return Err(StorageError::InsertFailed {
                kind: record.kind,
                reason: format!("message {} already exists", record.id),
            }
            .into());
        }
        rows.push(record);
        Ok(())
    }

    async fn get_message(
        &self,
        kind: MessageKind,
        id: MessageId,
    ) -> TandemResult<Option<MessageRecord>> {
        let messages = self.messages.read().await;
        Ok(messages
            .get(&kind)
            .and_then(|rows| rows.iter().find(|r| r.id == id))
            .cloned())
    }

    async fn list_messages(
        &self,
        kind: MessageKind,
        to_agent: &str,
        status: Option<&str>,
    ) -> TandemResult<Vec<MessageRecord>> {
        let messages = self.messages.read().await;
        Ok(messages
            .get(&kind)
            .map(|rows| {
                rows.iter()
                    .filter(|r| r.to_agent == to_agent)
                    .filter(|r| status.map_or(true, |s| r.status == s))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update_message_status(
        &self,
        kind: MessageKind,
        id: MessageId,
        status: &str,
        updated_at: Timestamp,
    ) -> TandemResult<bool> {
        let mut messages = self.messages.write().await;
        let Some(row) = messages
            .get_mut(&kind)
            .and_then(|rows| rows.iter_mut().find(|r| r.id == id))
        else {
            return Ok(false);
        };
        row.status = status.to_string();
        row.updated_at = updated_at;
        Ok(true)
    }

    async fn delete_message(&self, kind: MessageKind, id: MessageId) -> TandemResult<bool> {
        let mut messages = self.messages.write().await;
        let Some(rows) = messages.get_mut(&kind) else {
            return Ok(false);
        };
        let before = rows.len();
        rows.retain(|r| r.id != id);
        Ok(rows.len() != before)
    }
}

// ============================================================================
// LEDGER
// ============================================================================

#[derive(Debug, Default)]
struct LedgerTables {
    scores: HashMap<String, ScoreRecord>,
    requests: BTreeMap<i64, ScoreRequest>,
    history: Vec<ScoreHistoryEntry>,
    next_request_id: i64,
}

/// Ledger store whose tables live behind a single mutex.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedgerStore {
    tables: Arc<Mutex<Option<LedgerTables>>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn tables_mut(tables: &mut Option<LedgerTables>) -> TandemResult<&mut LedgerTables> {
    tables
        .as_mut()
        .ok_or_else(|| LedgerError::NotInitialized.into())
}

fn newest_first(requests: &mut [ScoreRequest]) {
    requests.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn initialize(&self) -> TandemResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.is_none() {
            *tables = Some(LedgerTables {
                next_request_id: 1,
                ..LedgerTables::default()
            });
        }
        Ok(())
    }

    async fn get_score(&self, ai_name: &str) -> TandemResult<Option<ScoreRecord>> {
        let mut guard = self.tables.lock().await;
        let tables = tables_mut(&mut guard)?;
        Ok(tables.scores.get(ai_name).cloned())
    }

    async fn set_score(&self, ai_name: &str, score: i64, now: Timestamp) -> TandemResult<()> {
        let mut guard = self.tables.lock().await;
        let tables = tables_mut(&mut guard)?;
        tables.scores.insert(
            ai_name.to_string(),
            ScoreRecord {
                ai_name: ai_name.to_string(),
                score,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn increment_score(&self, ai_name: &str, by: i64, now: Timestamp) -> TandemResult<i64> {
        let mut guard = self.tables.lock().await;
        let tables = tables_mut(&mut guard)?;
        let record = tables
            .scores
            .entry(ai_name.to_string())
            .or_insert_with(|| ScoreRecord {
                ai_name: ai_name.to_string(),
                score: 0,
                updated_at: now,
            });
        record.score = record.checked_balance(by)?;
        record.updated_at = now;
        Ok(record.score)
    }

    async fn list_scores(&self) -> TandemResult<Vec<ScoreRecord>> {
        let mut guard = self.tables.lock().await;
        let tables = tables_mut(&mut guard)?;
        Ok(tables.scores.values().cloned().collect())
    }

    async fn reset_scores(&self, now: Timestamp) -> TandemResult<()> {
        let mut guard = self.tables.lock().await;
        let tables = tables_mut(&mut guard)?;
        for record in tables.scores.values_mut() {
            record.score = 0;
            record.updated_at = now;
        }
        Ok(())
    }

    async fn insert_request(&self, request: NewScoreRequest) -> TandemResult<ScoreRequest> {
        let mut guard = self.tables.lock().await;
        let tables = tables_mut(&mut guard)?;
        let id = tables.next_request_id;
        tables.next_request_id += 1;
        let stored = ScoreRequest {
            id,
            task_id: request.task_id,
            requester: request.requester,
            target_ai: request.target_ai,
            requested_score: request.requested_score,
            quality_justification: request.quality_justification,
            status: ScoreRequestStatus::Pending,
            created_at: request.created_at,
            reviewed_at: None,
        };
        tables.requests.insert(id, stored.clone());
        Ok(stored)
    }

    async fn get_request(&self, id: i64) -> TandemResult<Option<ScoreRequest>> {
        let mut guard = self.tables.lock().await;
        let tables = tables_mut(&mut guard)?;
        Ok(tables.requests.get(&id).cloned())
    }

    async fn list_requests(
        &self,
        target_ai: &str,
        status: Option<ScoreRequestStatus>,
    ) -> TandemResult<Vec<ScoreRequest>> {
        let mut guard = self.tables.lock().await;
        let tables = tables_mut(&mut guard)?;
        let mut requests: Vec<ScoreRequest> = tables
            .requests
            .values()
            .filter(|r| r.target_ai == target_ai)
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        newest_first(&mut requests);
        Ok(requests)
    }

    async fn apply_resolution(&self, resolution: ScoreResolution) -> TandemResult<()> {
        let mut guard = self.tables.lock().await;
        let tables = tables_mut(&mut guard)?;

        // All checks happen before the first mutation.
        let request = tables.requests.get(&resolution.request_id).ok_or_else(|| {
            LedgerError::InvalidRequest {
                request_id: resolution.request_id,
                reason: "no such request".to_string(),
            }
        })?;
        if !request.is_pending() {
            return Err(LedgerError::InvalidRequest {
                request_id: resolution.request_id,
                reason: format!("request already {}", request.status),
            }
            .into());
        }

        let ai_name = resolution.history.ai_name.clone();
        let balance = match tables.scores.get(&ai_name) {
            Some(record) => record.checked_balance(resolution.score_delta)?,
            None => resolution.score_delta,
        };

        if let Some(request) = tables.requests.get_mut(&resolution.request_id) {
            request.status = resolution.status;
            request.reviewed_at = Some(resolution.reviewed_at);
        }

        if resolution.score_delta != 0 {
            tables.scores.insert(
                ai_name.clone(),
                ScoreRecord {
                    ai_name,
                    score: balance,
                    updated_at: resolution.reviewed_at,
                },
            );
        }

        tables.history.push(resolution.history);
        Ok(())
    }

    async fn history(&self, ai_name: &str, limit: usize) -> TandemResult<Vec<ScoreHistoryEntry>> {
        let mut guard = self.tables.lock().await;
        let tables = tables_mut(&mut guard)?;
        Ok(tables
            .history
            .iter()
            .rev()
            .filter(|h| h.ai_name == ai_name)
            .take(limit)
            .cloned()
            .collect())
    }
}

// ============================================================================
// BRAIN STATE
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct InMemoryBrainStateStore {
    states: Arc<RwLock<HashMap<String, BrainState>>>,
}

impl InMemoryBrainStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BrainStateStore for InMemoryBrainStateStore {
    async fn load_brain_state(&self, ai_name: &str) -> TandemResult<Option<BrainState>> {
        Ok(self.states.read().await.get(ai_name).cloned())
    }

    async fn set_brain_state_value(
        &self,
        ai_name: &str,
        key: &str,
        value: serde_json::Value,
    ) -> TandemResult<bool> {
        let now = Utc::now();
        let mut states = self.states.write().await;
        let state = states
            .entry(ai_name.to_string())
            .or_insert_with(|| BrainState {
                ai_name: ai_name.to_string(),
                state: serde_json::Map::new(),
                updated_at: now,
            });
        state.state.insert(key.to_string(), value);
        state.updated_at = now;
        Ok(true)
    }
}

// =============================================================================
// TESTS
// =============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use tandem_core::{Message, TaskPayload, TaskType};

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime")
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Listing by recipient returns exactly that recipient's rows, in
        /// insertion order.
        #[test]
        fn prop_list_filters_by_recipient(recipients in prop::collection::vec(0usize..3, 0..12)) {
            let names = ["coder", "overseer", "monitor"];
            let rt = runtime();
            let (expected, listed) = rt.block_on(async {
                let repo = InMemoryMessageRepository::new();
                let mut expected = Vec::new();
                for (i, r) in recipients.iter().enumerate() {
                    let record = Message::new("x", names[*r], TaskPayload::new(format!("t{i}"), "d", TaskType::Coding))
                        .to_record()
                        .expect("record");
                    if *r == 0 {
                        expected.push(record.id);
                    }
                    repo.insert_message(record).await.expect("insert");
                }
                let listed: Vec<MessageId> = repo
                    .list_messages(MessageKind::Task, "coder", None)
                    .await
                    .expect("list")
                    .into_iter()
                    .map(|r| r.id)
                    .collect();
                (expected, listed)
            });
            prop_assert_eq!(expected, listed);
        }

        /// Request ids are assigned 1, 2, 3, ... in insertion order.
        #[test]
        fn prop_request_ids_are_sequential(count in 1usize..10) {
            let rt = runtime();
            let ids = rt.block_on(async {
                let store = InMemoryLedgerStore::new();
                store.initialize().await.expect("initialize");
                let mut ids = Vec::new();
                for _ in 0..count {
                    let request = store
                        .insert_request(NewScoreRequest {
                            task_id: "t1".to_string(),
                            requester: "coder".to_string(),
                            target_ai: "overseer".to_string(),
                            requested_score: 1,
                            quality_justification: String::new(),
                            created_at: Utc::now(),
                        })
                        .await
                        .expect("insert");
                    ids.push(request.id);
                }
                ids
            });
            let expected: Vec<i64> = (1..=count as i64).collect();
            prop_assert_eq!(ids, expected);
        }
    }
}
