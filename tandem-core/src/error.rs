//! Error types for tandem operations

use crate::MessageKind;
use thiserror::Error;
use uuid::Uuid;

/// Storage layer errors raised by message repositories and ledger stores.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Message not found: {kind} with id {id}")]
    NotFound { kind: MessageKind, id: Uuid },

    #[error("Insert failed for {kind}: {reason}")]
    InsertFailed { kind: MessageKind, reason: String },

    #[error("Update failed for {kind} with id {id}: {reason}")]
    UpdateFailed {
        kind: MessageKind,
        id: Uuid,
        reason: String,
    },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Serialization failed for {what}: {reason}")]
    Serialization { what: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Validation errors for message payloads and status changes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Invalid {kind} status transition from {from} to {to}")]
    InvalidTransition {
        kind: MessageKind,
        from: String,
        to: String,
    },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Agent daemon lifecycle errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DaemonError {
    #[error("Daemon for {ai_name} is already running")]
    AlreadyRunning { ai_name: String },

    #[error("Daemon for {ai_name} is not running")]
    NotRunning { ai_name: String },

    #[error("{kind} callback failed: {reason}")]
    Callback { kind: MessageKind, reason: String },
}

/// Score ledger workflow errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Score ledger not initialized")]
    NotInitialized,

    #[error("Invalid score request {request_id}: {reason}")]
    InvalidRequest { request_id: i64, reason: String },

    #[error("{actor} is not authorized to resolve score request {request_id} (target is {target_ai})")]
    Unauthorized {
        request_id: i64,
        actor: String,
        target_ai: String,
    },

    #[error("Score for {ai_name} would overflow: {score} + {change}")]
    ScoreOverflow {
        ai_name: String,
        score: i64,
        change: i64,
    },
}

/// Master error type for all tandem errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TandemError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Daemon error: {0}")]
    Daemon(#[from] DaemonError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Result type alias for tandem operations.
pub type TandemResult<T> = Result<T, TandemError>;

// =============================================================================
// TESTS
// =============================================================================
