//! tandem Agents - Coder/Overseer Coordination
//!
//! Runtime pieces built on the storage traits:
//! - [`MessageCache`]: typed send/receive/update/delete for one agent identity
//! - [`AgentDaemon`]: background poll and heartbeat loops with callbacks
//! - [`ScoreLedger`]: score requests, awards and rejections with history
//! - [`dispatch`]: building payloads from loosely-typed JSON by kind

pub mod cache;
pub mod daemon;
pub mod dispatch;
pub mod ledger;

pub use cache::MessageCache;
pub use daemon::{
    AgentDaemon, CallbackFuture, DaemonCallbacks, DaemonMetrics, DaemonMetricsSnapshot,
    DaemonState, DaemonStatus, ErrorCallback, MessageCallback,
};
pub use dispatch::{payload_from_value, AnyPayload, DispatchDefaults};
pub use ledger::ScoreLedger;
