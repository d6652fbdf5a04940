//! Default values shared across tandem crates.

/// Poll loop interval (1 second).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Heartbeat loop interval (30 seconds).
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;

/// Recipient of daemon heartbeats.
pub const DEFAULT_MONITOR_NAME: &str = "Monitor";

/// Liveness label carried by daemon heartbeats.
pub const DEFAULT_HEARTBEAT_STATUS: &str = "working";

/// Brain-state key holding the agent's current task.
pub const CURRENT_TASK_KEY: &str = "current_task";

/// Number of score history entries returned when no limit is given.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// LMDB map size for the durable store (1 GiB).
pub const DEFAULT_LMDB_MAP_SIZE: usize = 1024 * 1024 * 1024;

/// Inclusive bounds of the numeric task priority.
pub const MIN_TASK_PRIORITY: u8 = 1;
pub const MAX_TASK_PRIORITY: u8 = 10;
