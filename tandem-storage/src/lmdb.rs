//! LMDB-backed durable store for messages and the score ledger.
//!
//! Uses the heed crate (Rust bindings for LMDB). One environment holds every
//! table as a named database:
//!
//! - `messages`: `[kind][seq: u64 BE]` -> JSON [`MessageRecord`]
//! - `message_index`: `[kind][uuid]` -> `messages` key
//! - `scores`: `ai_name` -> JSON [`ScoreRecord`]
//! - `score_requests`: `id: i64 BE` -> JSON [`ScoreRequest`]
//! - `score_history`: `seq: u64 BE` -> JSON [`ScoreHistoryEntry`]
//! - `meta`: sequence counters
//!
//! Sequence keys make key order equal insertion order. The ledger tables are
//! only created by [`LedgerStore::initialize`]; reopening an environment
//! where they exist restores the initialized state.
//!
//! # Transactions
//!
//! LMDB allows a single writer at a time, so every mutation runs in one
//! write transaction and resolution of a score request (status change,
//! balance change and history append) commits or aborts as a unit.
//! Resolution and reset commit on the blocking pool via
//! [`tokio::task::spawn_blocking`] so a slow fsync stalls no runtime worker.

use std::path::Path;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tandem_core::{
    LedgerConfig, LedgerError, MessageId, MessageKind, MessageRecord, NewScoreRequest,
    ScoreHistoryEntry, ScoreRecord, ScoreRequest, ScoreRequestStatus, ScoreResolution,
    StorageError, TandemError, TandemResult, Timestamp,
};

use crate::{LedgerStore, MessageRepository};

const MAX_DBS: u32 = 8;

const MESSAGE_SEQ: &[u8] = b"message_seq";
const REQUEST_SEQ: &[u8] = b"request_seq";
const HISTORY_SEQ: &[u8] = b"history_seq";

/// Errors specific to the LMDB store.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    #[error("Failed to open database: {0}")]
    DbOpen(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for TandemError {
    fn from(e: LmdbStoreError) -> Self {
        TandemError::Storage(StorageError::TransactionFailed {
            reason: e.to_string(),
        })
    }
}

fn txn_err(e: heed::Error) -> LmdbStoreError {
    LmdbStoreError::Transaction(e.to_string())
}

fn join_err(e: tokio::task::JoinError) -> TandemError {
    StorageError::TransactionFailed {
        reason: format!("blocking task failed: {}", e),
    }
    .into()
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, LmdbStoreError> {
    serde_json::to_vec(value).map_err(|e| LmdbStoreError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, LmdbStoreError> {
    serde_json::from_slice(bytes).map_err(|e| LmdbStoreError::Deserialization(e.to_string()))
}

fn kind_tag(kind: MessageKind) -> u8 {
    match kind {
        MessageKind::Task => 1,
        MessageKind::Code => 2,
        MessageKind::Review => 3,
        MessageKind::Score => 4,
        MessageKind::Feedback => 5,
        MessageKind::Heartbeat => 6,
    }
}

fn index_key(kind: MessageKind, id: MessageId) -> Vec<u8> {
    let mut key = Vec::with_capacity(17);
    key.push(kind_tag(kind));
    key.extend_from_slice(id.as_bytes());
    key
}

fn message_key(kind: MessageKind, seq: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(kind_tag(kind));
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

#[derive(Clone, Copy)]
struct LedgerDbs {
    scores: Database<Bytes, Bytes>,
    requests: Database<Bytes, Bytes>,
    history: Database<Bytes, Bytes>,
}

/// Environment and the always-present databases, shared with blocking tasks.
struct LmdbTables {
    env: Env,
    messages: Database<Bytes, Bytes>,
    message_index: Database<Bytes, Bytes>,
    meta: Database<Bytes, Bytes>,
}

/// Durable message repository and ledger store in one LMDB environment.
pub struct LmdbStore {
    tables: Arc<LmdbTables>,
    ledger: RwLock<Option<LedgerDbs>>,
}

impl LmdbStore {
    /// Open (creating if needed) an environment at `path`.
    pub fn open<P: AsRef<Path>>(path: P, map_size: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(MAX_DBS)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let messages = env
            .create_database(&mut wtxn, Some("messages"))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        let message_index = env
            .create_database(&mut wtxn, Some("message_index"))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        let meta = env
            .create_database(&mut wtxn, Some("meta"))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        let ledger = Self::open_ledger_dbs(&env, &wtxn)?;
        wtxn.commit().map_err(txn_err)?;

        tracing::debug!(
            path = %path.as_ref().display(),
            ledger_initialized = ledger.is_some(),
            "Opened LMDB store"
        );

        Ok(Self {
            tables: Arc::new(LmdbTables {
                env,
                messages,
                message_index,
                meta,
            }),
            ledger: RwLock::new(ledger),
        })
    }

    pub fn from_config(config: &LedgerConfig) -> Result<Self, LmdbStoreError> {
        Self::open(&config.path, config.map_size)
    }

    fn open_ledger_dbs(env: &Env, txn: &RoTxn) -> Result<Option<LedgerDbs>, LmdbStoreError> {
        let open = |name: &str| {
            env.open_database::<Bytes, Bytes>(txn, Some(name))
                .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))
        };
        match (open("scores")?, open("score_requests")?, open("score_history")?) {
            (Some(scores), Some(requests), Some(history)) => Ok(Some(LedgerDbs {
                scores,
                requests,
                history,
            })),
            _ => Ok(None),
        }
    }

    fn ledger(&self) -> TandemResult<LedgerDbs> {
        let guard = self.ledger.read().map_err(|_| StorageError::LockPoisoned)?;
        (*guard).ok_or_else(|| LedgerError::NotInitialized.into())
    }
}

impl LmdbTables {
    fn next_seq(&self, wtxn: &mut RwTxn, counter: &[u8]) -> Result<u64, LmdbStoreError> {
        let current = match self.meta.get(wtxn, counter).map_err(txn_err)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .try_into()
                    .map_err(|_| LmdbStoreError::Deserialization("Invalid sequence".into()))?;
                u64::from_be_bytes(raw)
            }
            None => 0,
        };
        let next = current + 1;
        self.meta
            .put(wtxn, counter, &next.to_be_bytes())
            .map_err(txn_err)?;
        Ok(next)
    }

    fn read_score(
        &self,
        txn: &RoTxn,
        dbs: LedgerDbs,
        ai_name: &str,
    ) -> Result<Option<ScoreRecord>, LmdbStoreError> {
        match dbs.scores.get(txn, ai_name.as_bytes()).map_err(txn_err)? {
            Some(bytes) => Ok(Some(decode(bytes)?)),
            None => Ok(None),
        }
    }

    fn add_to_score(
        &self,
        wtxn: &mut RwTxn,
        dbs: LedgerDbs,
        ai_name: &str,
        by: i64,
        now: Timestamp,
    ) -> TandemResult<i64> {
        let mut record = self
            .read_score(wtxn, dbs, ai_name)?
            .unwrap_or_else(|| ScoreRecord {
                ai_name: ai_name.to_string(),
                score: 0,
                updated_at: now,
            });
        record.score = record.checked_balance(by)?;
        record.updated_at = now;
        dbs.scores
            .put(wtxn, ai_name.as_bytes(), &encode(&record)?)
            .map_err(txn_err)?;
        Ok(record.score)
    }

    fn apply_resolution(&self, dbs: LedgerDbs, resolution: ScoreResolution) -> TandemResult<()> {
        let key = resolution.request_id.to_be_bytes();
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        let mut request: ScoreRequest = match dbs.requests.get(&wtxn, &key).map_err(txn_err)? {
            Some(bytes) => decode(bytes)?,
            None => {
                return Err(LedgerError::InvalidRequest {
                    request_id: resolution.request_id,
                    reason: "no such request".to_string(),
                }
                .into())
            }
        };
        if !request.is_pending() {
            return Err(LedgerError::InvalidRequest {
                request_id: resolution.request_id,
                reason: format!("request already {}", request.status),
            }
            .into());
        }

        if resolution.score_delta != 0 {
            self.add_to_score(
                &mut wtxn,
                dbs,
                &resolution.history.ai_name,
                resolution.score_delta,
                resolution.reviewed_at,
            )?;
        }

        request.status = resolution.status;
        request.reviewed_at = Some(resolution.reviewed_at);
        dbs.requests
            .put(&mut wtxn, &key, &encode(&request)?)
            .map_err(txn_err)?;

        let seq = self.next_seq(&mut wtxn, HISTORY_SEQ)?;
        dbs.history
            .put(&mut wtxn, &seq.to_be_bytes(), &encode(&resolution.history)?)
            .map_err(txn_err)?;

        // Dropping the transaction on any error above aborts every write.
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    fn reset_scores(&self, dbs: LedgerDbs, now: Timestamp) -> TandemResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let mut records: Vec<ScoreRecord> = Vec::new();
        for entry in dbs.scores.iter(&wtxn).map_err(txn_err)? {
            let (_, bytes) = entry.map_err(txn_err)?;
            records.push(decode(bytes)?);
        }
        for mut record in records {
            record.score = 0;
            record.updated_at = now;
            dbs.scores
                .put(&mut wtxn, record.ai_name.as_bytes(), &encode(&record)?)
                .map_err(txn_err)?;
        }
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }
}

// ============================================================================
// MESSAGE REPOSITORY
// ============================================================================

#[async_trait]
impl MessageRepository for LmdbStore {
    async fn insert_message(&self, record: MessageRecord) -> TandemResult<()> {
        let mut wtxn = self.tables.env.write_txn().map_err(txn_err)?;
        let idx = index_key(record.kind, record.id);
        if self
            .tables
            .message_index
            .get(&wtxn, &idx)
            .map_err(txn_err)?
            .is_some()
        {
            return Err(StorageError::InsertFailed {
                kind: record.kind,
                reason: format!("message {} already exists", record.id),
            }
            .into());
        }

        let seq = self.tables.next_seq(&mut wtxn, MESSAGE_SEQ)?;
        let key = message_key(record.kind, seq);
        self.tables
            .messages
            .put(&mut wtxn, &key, &encode(&record)?)
            .map_err(txn_err)?;
        self.tables.message_index
            .put(&mut wtxn, &idx, &key)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    async fn get_message(
        &self,
        kind: MessageKind,
        id: MessageId,
    ) -> TandemResult<Option<MessageRecord>> {
        let rtxn = self.tables.env.read_txn().map_err(txn_err)?;
        let Some(key) = self
            .tables
            .message_index
            .get(&rtxn, &index_key(kind, id))
            .map_err(txn_err)?
        else {
            return Ok(None);
        };
        match self.tables.messages.get(&rtxn, key).map_err(txn_err)? {
            Some(bytes) => Ok(Some(decode(bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_messages(
        &self,
        kind: MessageKind,
        to_agent: &str,
        status: Option<&str>,
    ) -> TandemResult<Vec<MessageRecord>> {
        let rtxn = self.tables.env.read_txn().map_err(txn_err)?;
        let tag = kind_tag(kind);
        let mut rows = Vec::new();
        for entry in self.tables.messages.iter(&rtxn).map_err(txn_err)? {
            let (key, bytes) = entry.map_err(txn_err)?;
            if key.first() != Some(&tag) {
                continue;
            }
            let record: MessageRecord = decode(bytes)?;
            if record.to_agent == to_agent && status.map_or(true, |s| record.status == s) {
                rows.push(record);
            }
        }
        Ok(rows)
    }

    async fn update_message_status(
        &self,
        kind: MessageKind,
        id: MessageId,
        status: &str,
        updated_at: Timestamp,
    ) -> TandemResult<bool> {
        let mut wtxn = self.tables.env.write_txn().map_err(txn_err)?;
        let Some(key) = self
            .tables
            .message_index
            .get(&wtxn, &index_key(kind, id))
            .map_err(txn_err)?
            .map(<[u8]>::to_vec)
        else {
            return Ok(false);
        };
        let Some(bytes) = self.tables.messages.get(&wtxn, &key).map_err(txn_err)? else {
            return Err(StorageError::UpdateFailed {
                kind,
                id,
                reason: "index entry points at a missing row".to_string(),
            }
            .into());
        };
        let mut record: MessageRecord = decode(bytes)?;
        record.status = status.to_string();
        record.updated_at = updated_at;
        self.tables
            .messages
            .put(&mut wtxn, &key, &encode(&record)?)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(true)
    }

    async fn delete_message(&self, kind: MessageKind, id: MessageId) -> TandemResult<bool> {
        let mut wtxn = self.tables.env.write_txn().map_err(txn_err)?;
        let idx = index_key(kind, id);
        let Some(key) = self
            .tables
            .message_index
            .get(&wtxn, &idx)
            .map_err(txn_err)?
            .map(<[u8]>::to_vec)
        else {
            return Ok(false);
        };
        self.tables.messages.delete(&mut wtxn, &key).map_err(txn_err)?;
        self.tables.message_index.delete(&mut wtxn, &idx).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(true)
    }
}

// ============================================================================
// LEDGER STORE
// ============================================================================

#[async_trait]
impl LedgerStore for LmdbStore {
    async fn initialize(&self) -> TandemResult<()> {
        let mut guard = self.ledger.write().map_err(|_| StorageError::LockPoisoned)?;
        if guard.is_some() {
            return Ok(());
        }

        let mut wtxn = self.tables.env.write_txn().map_err(txn_err)?;
        let mut create = |name: &str| {
            self.tables
                .env
                .create_database::<Bytes, Bytes>(&mut wtxn, Some(name))
                .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))
        };
        let dbs = LedgerDbs {
            scores: create("scores")?,
            requests: create("score_requests")?,
            history: create("score_history")?,
        };
        wtxn.commit().map_err(txn_err)?;

        *guard = Some(dbs);
        tracing::info!("Score ledger tables initialized");
        Ok(())
    }

    async fn get_score(&self, ai_name: &str) -> TandemResult<Option<ScoreRecord>> {
        let dbs = self.ledger()?;
        let rtxn = self.tables.env.read_txn().map_err(txn_err)?;
        Ok(self.tables.read_score(&rtxn, dbs, ai_name)?)
    }

    async fn set_score(&self, ai_name: &str, score: i64, now: Timestamp) -> TandemResult<()> {
        let dbs = self.ledger()?;
        let record = ScoreRecord {
            ai_name: ai_name.to_string(),
            score,
            updated_at: now,
        };
        let mut wtxn = self.tables.env.write_txn().map_err(txn_err)?;
        dbs.scores
            .put(&mut wtxn, ai_name.as_bytes(), &encode(&record)?)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    async fn increment_score(&self, ai_name: &str, by: i64, now: Timestamp) -> TandemResult<i64> {
        let dbs = self.ledger()?;
        let mut wtxn = self.tables.env.write_txn().map_err(txn_err)?;
        let score = self.tables.add_to_score(&mut wtxn, dbs, ai_name, by, now)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(score)
    }

    async fn list_scores(&self) -> TandemResult<Vec<ScoreRecord>> {
        let dbs = self.ledger()?;
        let rtxn = self.tables.env.read_txn().map_err(txn_err)?;
        let mut scores = Vec::new();
        for entry in dbs.scores.iter(&rtxn).map_err(txn_err)? {
            let (_, bytes) = entry.map_err(txn_err)?;
            scores.push(decode(bytes)?);
        }
        Ok(scores)
    }

    async fn reset_scores(&self, now: Timestamp) -> TandemResult<()> {
        let dbs = self.ledger()?;
        let tables = Arc::clone(&self.tables);
        tokio::task::spawn_blocking(move || tables.reset_scores(dbs, now))
            .await
            .map_err(join_err)?
    }

    async fn insert_request(&self, request: NewScoreRequest) -> TandemResult<ScoreRequest> {
        let dbs = self.ledger()?;
        let mut wtxn = self.tables.env.write_txn().map_err(txn_err)?;
        let id = self.tables.next_seq(&mut wtxn, REQUEST_SEQ)? as i64;
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
        dbs.requests
            .put(&mut wtxn, &id.to_be_bytes(), &encode(&stored)?)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(stored)
    }

    async fn get_request(&self, id: i64) -> TandemResult<Option<ScoreRequest>> {
        let dbs = self.ledger()?;
        let rtxn = self.tables.env.read_txn().map_err(txn_err)?;
        match dbs.requests.get(&rtxn, &id.to_be_bytes()).map_err(txn_err)? {
            Some(bytes) => Ok(Some(decode(bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_requests(
        &self,
        target_ai: &str,
        status: Option<ScoreRequestStatus>,
    ) -> TandemResult<Vec<ScoreRequest>> {
        let dbs = self.ledger()?;
        let rtxn = self.tables.env.read_txn().map_err(txn_err)?;
        let mut requests = Vec::new();
        for entry in dbs.requests.rev_iter(&rtxn).map_err(txn_err)? {
            let (_, bytes) = entry.map_err(txn_err)?;
            let request: ScoreRequest = decode(bytes)?;
            if request.target_ai == target_ai && status.map_or(true, |s| request.status == s) {
                requests.push(request);
            }
        }
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(requests)
    }

    async fn apply_resolution(&self, resolution: ScoreResolution) -> TandemResult<()> {
        let dbs = self.ledger()?;
        let tables = Arc::clone(&self.tables);
        tokio::task::spawn_blocking(move || tables.apply_resolution(dbs, resolution))
            .await
            .map_err(join_err)?
    }

    async fn history(&self, ai_name: &str, limit: usize) -> TandemResult<Vec<ScoreHistoryEntry>> {
        let dbs = self.ledger()?;
        let rtxn = self.tables.env.read_txn().map_err(txn_err)?;
        let mut entries = Vec::new();
        for entry in dbs.history.rev_iter(&rtxn).map_err(txn_err)? {
            if entries.len() >= limit {
                break;
            }
            let (_, bytes) = entry.map_err(txn_err)?;
            let row: ScoreHistoryEntry = decode(bytes)?;
            if row.ai_name == ai_name {
                entries.push(row);
            }
        }
        Ok(entries)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tandem_core::{CodePayload, Message};
    use tempfile::TempDir;

    fn create_test_store() -> (LmdbStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LmdbStore::open(temp_dir.path(), 10 * 1024 * 1024)
            .expect("Failed to open LMDB store");
        (store, temp_dir)
    }

    fn code_record(to: &str, code_id: &str) -> MessageRecord {
        let payload = CodePayload::new(code_id, "Add foo", "adds foo", vec!["src/foo.rs".into()]);
        Message::new("coder", to, payload)
            .to_record()
            .expect("record should encode")
    }

    fn new_request(requester: &str, target: &str) -> NewScoreRequest {
        NewScoreRequest {
            task_id: "t1".to_string(),
            requester: requester.to_string(),
            target_ai: target.to_string(),
            requested_score: 5,
            quality_justification: "ok".to_string(),
            created_at: Utc::now(),
        }
    }

    fn award(request_id: i64, ai_name: &str, change: i64) -> ScoreResolution {
        let now = Utc::now();
        ScoreResolution {
            request_id,
            status: ScoreRequestStatus::Awarded,
            reviewed_at: now,
            score_delta: change,
            history: ScoreHistoryEntry {
                ai_name: ai_name.to_string(),
                change,
                reason: "approved".to_string(),
                requester: ai_name.to_string(),
                awarder: ai_name.to_string(),
                task_id: "t1".to_string(),
                created_at: now,
            },
        }
    }

    // === Messages ===

    #[tokio::test]
    async fn test_message_roundtrip_and_order() {
        let (store, _temp_dir) = create_test_store();
        let first = code_record("overseer", "c1");
        let second = code_record("overseer", "c2");
        store.insert_message(first.clone()).await.expect("insert");
        store.insert_message(second.clone()).await.expect("insert");
        store
            .insert_message(code_record("elsewhere", "c3"))
            .await
            .expect("insert");

        let rows = store
            .list_messages(MessageKind::Code, "overseer", None)
            .await
            .expect("list");
        assert_eq!(rows, vec![first.clone(), second]);

        let fetched = store
            .get_message(MessageKind::Code, first.id)
            .await
            .expect("get");
        assert_eq!(fetched, Some(first));
    }

    #[tokio::test]
    async fn test_message_duplicate_rejected() {
        let (store, _temp_dir) = create_test_store();
        let record = code_record("overseer", "c1");
        store.insert_message(record.clone()).await.expect("insert");
        let err = store.insert_message(record).await.unwrap_err();
        assert!(matches!(
            err,
            TandemError::Storage(StorageError::InsertFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_message_update_and_delete() {
        let (store, _temp_dir) = create_test_store();
        let record = code_record("overseer", "c1");
        let id = record.id;
        store.insert_message(record).await.expect("insert");

        assert!(store
            .update_message_status(MessageKind::Code, id, "reviewing", Utc::now())
            .await
            .expect("update"));
        let pending = store
            .list_messages(MessageKind::Code, "overseer", Some("pending"))
            .await
            .expect("list");
        assert!(pending.is_empty());

        assert!(store
            .delete_message(MessageKind::Code, id)
            .await
            .expect("delete"));
        assert!(!store
            .delete_message(MessageKind::Code, id)
            .await
            .expect("delete"));
        assert!(!store
            .update_message_status(MessageKind::Code, id, "approved", Utc::now())
            .await
            .expect("update"));
    }

    // === Ledger ===

    #[tokio::test]
    async fn test_ledger_not_initialized() {
        let (store, _temp_dir) = create_test_store();
        let err = store.get_score("coder").await.unwrap_err();
        assert_eq!(err, TandemError::Ledger(LedgerError::NotInitialized));
        assert!(store.insert_request(new_request("coder", "coder")).await.is_err());
    }

    #[tokio::test]
    async fn test_resolution_commits_all_three_writes() {
        let (store, _temp_dir) = create_test_store();
        store.initialize().await.expect("initialize");
        store.initialize().await.expect("initialize is idempotent");

        let request = store
            .insert_request(new_request("coder", "coder"))
            .await
            .expect("insert request");
        assert_eq!(request.id, 1);

        store
            .apply_resolution(award(request.id, "coder", 5))
            .await
            .expect("apply");

        assert_eq!(
            store.get_score("coder").await.expect("score").map(|r| r.score),
            Some(5)
        );
        assert_eq!(store.history("coder", 50).await.expect("history").len(), 1);
        let stored = store
            .get_request(request.id)
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(stored.status, ScoreRequestStatus::Awarded);
    }

    #[tokio::test]
    async fn test_resolution_of_resolved_request_writes_nothing() {
        let (store, _temp_dir) = create_test_store();
        store.initialize().await.expect("initialize");
        let request = store
            .insert_request(new_request("coder", "coder"))
            .await
            .expect("insert request");
        store
            .apply_resolution(award(request.id, "coder", 5))
            .await
            .expect("apply");

        let err = store
            .apply_resolution(award(request.id, "coder", 5))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TandemError::Ledger(LedgerError::InvalidRequest { .. })
        ));
        assert_eq!(
            store.get_score("coder").await.expect("score").map(|r| r.score),
            Some(5)
        );
        assert_eq!(store.history("coder", 50).await.expect("history").len(), 1);

        let err = store
            .apply_resolution(award(99, "coder", 5))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TandemError::Ledger(LedgerError::InvalidRequest { request_id: 99, .. })
        ));
    }

    #[tokio::test]
    async fn test_overflowing_award_writes_nothing() {
        let (store, _temp_dir) = create_test_store();
        store.initialize().await.expect("initialize");
        store
            .set_score("coder", i64::MAX, Utc::now())
            .await
            .expect("set");
        let request = store
            .insert_request(new_request("coder", "coder"))
            .await
            .expect("insert request");

        let err = store
            .apply_resolution(award(request.id, "coder", 1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TandemError::Ledger(LedgerError::ScoreOverflow { change: 1, .. })
        ));
        assert_eq!(
            store.get_score("coder").await.expect("score").map(|r| r.score),
            Some(i64::MAX)
        );
        assert!(store.history("coder", 50).await.expect("history").is_empty());
        let stored = store
            .get_request(request.id)
            .await
            .expect("get")
            .expect("exists");
        assert!(stored.is_pending());

        let err = store
            .increment_score("coder", 1, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TandemError::Ledger(LedgerError::ScoreOverflow { .. })
        ));
    }

    #[tokio::test]
    async fn test_status_update_on_dangling_index_fails() {
        let (store, _temp_dir) = create_test_store();
        let record = code_record("overseer", "c1");
        let id = record.id;
        store.insert_message(record).await.expect("insert");

        {
            let tables = &store.tables;
            let mut wtxn = tables.env.write_txn().expect("write txn");
            tables.messages.clear(&mut wtxn).expect("clear");
            wtxn.commit().expect("commit");
        }

        let err = store
            .update_message_status(MessageKind::Code, id, "reviewing", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TandemError::Storage(StorageError::UpdateFailed { kind: MessageKind::Code, .. })
        ));
    }

    #[tokio::test]
    async fn test_history_newest_first_with_limit() {
        let (store, _temp_dir) = create_test_store();
        store.initialize().await.expect("initialize");
        for score in 1..=4 {
            let request = store
                .insert_request(new_request("coder", "coder"))
                .await
                .expect("insert request");
            store
                .apply_resolution(award(request.id, "coder", score))
                .await
                .expect("apply");
        }

        let history = store.history("coder", 3).await.expect("history");
        let changes: Vec<i64> = history.iter().map(|h| h.change).collect();
        assert_eq!(changes, vec![4, 3, 2]);
        assert_eq!(
            store.get_score("coder").await.expect("score").map(|r| r.score),
            Some(10)
        );
    }

    #[tokio::test]
    async fn test_reopen_keeps_ledger_and_messages() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let record = code_record("overseer", "c1");
        {
            let store = LmdbStore::open(temp_dir.path(), 10 * 1024 * 1024).expect("open");
            store.initialize().await.expect("initialize");
            store.set_score("coder", 42, Utc::now()).await.expect("set");
            store.insert_message(record.clone()).await.expect("insert");
        }

        let store = LmdbStore::open(temp_dir.path(), 10 * 1024 * 1024).expect("reopen");
        assert_eq!(
            store.get_score("coder").await.expect("score").map(|r| r.score),
            Some(42)
        );
        let rows = store
            .list_messages(MessageKind::Code, "overseer", None)
            .await
            .expect("list");
        assert_eq!(rows, vec![record]);
    }

    #[tokio::test]
    async fn test_reset_and_list_scores() {
        let (store, _temp_dir) = create_test_store();
        store.initialize().await.expect("initialize");
        store.set_score("coder", 7, Utc::now()).await.expect("set");
        store
            .increment_score("overseer", -3, Utc::now())
            .await
            .expect("increment");
        assert_eq!(store.list_scores().await.expect("list").len(), 2);

        store.reset_scores(Utc::now()).await.expect("reset");
        for record in store.list_scores().await.expect("list") {
            assert_eq!(record.score, 0);
        }
    }
}
