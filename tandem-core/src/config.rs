//! Daemon and ledger configuration.

use crate::constants::{
    DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_HEARTBEAT_STATUS, DEFAULT_LMDB_MAP_SIZE,
    DEFAULT_MONITOR_NAME, DEFAULT_POLL_INTERVAL_MS,
};
use crate::error::{ConfigError, TandemError, TandemResult};
use crate::payload::AgentRole;
use std::path::PathBuf;
use std::time::Duration;

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| s.to_lowercase() != "false")
        .unwrap_or(default)
}

// ============================================================================
// DAEMON
// ============================================================================

/// Configuration for one agent daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    /// Identity the daemon sends as and polls for
    pub ai_name: String,

    /// Role reported in heartbeats
    pub role: AgentRole,

    /// Delay between poll ticks (default: 1 second)
    pub poll_interval: Duration,

    /// Delay between heartbeats (default: 30 seconds)
    pub heartbeat_interval: Duration,

    /// Run the heartbeat loop (default: true)
    pub auto_heartbeat: bool,

    /// Run the poll loop (default: true)
    pub process_messages: bool,

    /// Recipient of heartbeats (default: "Monitor")
    pub monitor_name: String,

    /// Status label carried by heartbeats (default: "working")
    pub heartbeat_status: String,

    /// Post a keep-alive reminder to the agent itself on start (default: false)
    pub send_keep_alive_tips: bool,
}

impl DaemonConfig {
    pub fn new(ai_name: impl Into<String>, role: AgentRole) -> Self {
        Self {
            ai_name: ai_name.into(),
            role,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            auto_heartbeat: true,
            process_messages: true,
            monitor_name: DEFAULT_MONITOR_NAME.to_string(),
            heartbeat_status: DEFAULT_HEARTBEAT_STATUS.to_string(),
            send_keep_alive_tips: false,
        }
    }

    /// Create DaemonConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `TANDEM_AI_NAME`: Agent identity (required)
    /// - `TANDEM_ROLE`: `coder` or `overseer` (default: coder)
    /// - `TANDEM_POLL_INTERVAL_MS`: Poll interval (default: 1000)
    /// - `TANDEM_HEARTBEAT_INTERVAL_MS`: Heartbeat interval (default: 30000)
    /// - `TANDEM_AUTO_HEARTBEAT`: Run the heartbeat loop (default: true)
    /// - `TANDEM_PROCESS_MESSAGES`: Run the poll loop (default: true)
    /// - `TANDEM_MONITOR_NAME`: Heartbeat recipient (default: Monitor)
    pub fn from_env() -> TandemResult<Self> {
        let ai_name = std::env::var("TANDEM_AI_NAME").map_err(|_| {
            TandemError::Config(ConfigError::MissingRequired {
                field: "TANDEM_AI_NAME".to_string(),
            })
        })?;
        let role = env_parse::<AgentRole>("TANDEM_ROLE").unwrap_or_default();

        let mut config = Self::new(ai_name, role);
        config.poll_interval = Duration::from_millis(
            env_parse("TANDEM_POLL_INTERVAL_MS").unwrap_or(DEFAULT_POLL_INTERVAL_MS),
        );
        config.heartbeat_interval = Duration::from_millis(
            env_parse("TANDEM_HEARTBEAT_INTERVAL_MS").unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_MS),
        );
        config.auto_heartbeat = env_flag("TANDEM_AUTO_HEARTBEAT", true);
        config.process_messages = env_flag("TANDEM_PROCESS_MESSAGES", true);
        if let Ok(monitor) = std::env::var("TANDEM_MONITOR_NAME") {
            config.monitor_name = monitor;
        }

        config.validate()?;
        Ok(config)
    }

    /// Short intervals for local runs and tests.
    pub fn development(ai_name: impl Into<String>, role: AgentRole) -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            heartbeat_interval: Duration::from_secs(1),
            ..Self::new(ai_name, role)
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_auto_heartbeat(mut self, enabled: bool) -> Self {
        self.auto_heartbeat = enabled;
        self
    }

    pub fn with_process_messages(mut self, enabled: bool) -> Self {
        self.process_messages = enabled;
        self
    }

    pub fn with_keep_alive_tips(mut self, enabled: bool) -> Self {
        self.send_keep_alive_tips = enabled;
        self
    }

    pub fn validate(&self) -> TandemResult<()> {
        if self.ai_name.trim().is_empty() {
            return Err(TandemError::Config(ConfigError::InvalidValue {
                field: "ai_name".to_string(),
                value: self.ai_name.clone(),
                reason: "ai_name must not be empty".to_string(),
            }));
        }

        if self.poll_interval.is_zero() {
            return Err(TandemError::Config(ConfigError::InvalidValue {
                field: "poll_interval".to_string(),
                value: format!("{:?}", self.poll_interval),
                reason: "poll_interval must be positive".to_string(),
            }));
        }

        if self.heartbeat_interval.is_zero() {
            return Err(TandemError::Config(ConfigError::InvalidValue {
                field: "heartbeat_interval".to_string(),
                value: format!("{:?}", self.heartbeat_interval),
                reason: "heartbeat_interval must be positive".to_string(),
            }));
        }

        if self.monitor_name.trim().is_empty() {
            return Err(TandemError::Config(ConfigError::InvalidValue {
                field: "monitor_name".to_string(),
                value: self.monitor_name.clone(),
                reason: "monitor_name must not be empty".to_string(),
            }));
        }

        Ok(())
    }
}

// ============================================================================
// LEDGER
// ============================================================================

/// Location and sizing of the durable LMDB store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub path: PathBuf,
    pub map_size: usize,
}

impl LedgerConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            map_size: DEFAULT_LMDB_MAP_SIZE,
        }
    }

    /// Create LedgerConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `TANDEM_LEDGER_PATH`: Directory of the LMDB environment (required)
    /// - `TANDEM_LEDGER_MAP_SIZE`: Map size in bytes (default: 1 GiB)
    pub fn from_env() -> TandemResult<Self> {
        let path = std::env::var("TANDEM_LEDGER_PATH").map_err(|_| {
            TandemError::Config(ConfigError::MissingRequired {
                field: "TANDEM_LEDGER_PATH".to_string(),
            })
        })?;
        let config = Self {
            path: PathBuf::from(path),
            map_size: env_parse("TANDEM_LEDGER_MAP_SIZE").unwrap_or(DEFAULT_LMDB_MAP_SIZE),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TandemResult<()> {
        if self.map_size == 0 {
            return Err(TandemError::Config(ConfigError::InvalidValue {
                field: "map_size".to_string(),
                value: self.map_size.to_string(),
                reason: "map_size must be greater than 0".to_string(),
            }));
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::new("coder", AgentRole::Coder);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert!(config.auto_heartbeat);
        assert!(config.process_messages);
        assert_eq!(config.monitor_name, "Monitor");
        assert_eq!(config.heartbeat_status, "working");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_name() {
        let config = DaemonConfig::new("  ", AgentRole::Overseer);
        assert!(matches!(
            config.validate(),
            Err(TandemError::Config(ConfigError::InvalidValue { field, .. })) if field == "ai_name"
        ));
    }

    #[test]
    fn test_validate_rejects_zero_intervals() {
        let config =
            DaemonConfig::new("coder", AgentRole::Coder).with_poll_interval(Duration::ZERO);
        assert!(config.validate().is_err());

        let config =
            DaemonConfig::new("coder", AgentRole::Coder).with_heartbeat_interval(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_development_preset() {
        let config = DaemonConfig::development("overseer", AgentRole::Overseer);
        assert!(config.poll_interval < Duration::from_secs(1));
        assert_eq!(config.role, AgentRole::Overseer);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ledger_config_validate() {
        let mut config = LedgerConfig::new("/tmp/tandem");
        assert!(config.validate().is_ok());
        config.map_size = 0;
        assert!(config.validate().is_err());
    }
}
