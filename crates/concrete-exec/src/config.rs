//! Executor and instrumentation configuration

use crate::coverage::DEFAULT_TRACE_CAPACITY;
use crate::result::{ExecError, ExecResult};
use crate::runtime::SandboxPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable overriding the default invocation timeout
pub const ENV_TIMEOUT_MS: &str = "CONCRETE_EXEC_TIMEOUT_MS";
/// Environment variable overriding the pool size
pub const ENV_POOL_SIZE: &str = "CONCRETE_EXEC_POOL_SIZE";

/// Largest frame accepted on the worker channel
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;
/// Depth to which live objects are expanded into models
pub const DEFAULT_MODEL_DEPTH: u32 = 7;

/// Settings for executors and the executor pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Invocation timeout used when a request does not carry its own
    pub default_timeout_ms: u64,
    /// Extra time the client waits beyond the invocation timeout
    pub protocol_slack_ms: u64,
    /// Maximum number of live executors in a pool
    pub pool_size: usize,
    /// Time a stopping worker gets before it is killed
    pub stop_grace_ms: u64,
    /// Time the watchdog waits for interrupted code to unwind
    pub interrupt_grace_ms: u64,
    /// Largest accepted frame
    pub max_frame_bytes: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 1000,
            protocol_slack_ms: 500,
            pool_size: 10,
            stop_grace_ms: 300,
            interrupt_grace_ms: 200,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl ExecutorConfig {
    /// Create default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, overridden by `CONCRETE_EXEC_TIMEOUT_MS` and
    /// `CONCRETE_EXEC_POOL_SIZE` when set
    pub fn from_env() -> ExecResult<Self> {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> ExecResult<Self> {
        if let Some(raw) = lookup(ENV_TIMEOUT_MS) {
            self.default_timeout_ms = raw
                .trim()
                .parse()
                .map_err(|_| ExecError::config(format!("{ENV_TIMEOUT_MS}: '{raw}' is not a number")))?;
        }
        if let Some(raw) = lookup(ENV_POOL_SIZE) {
            self.pool_size = raw
                .trim()
                .parse()
                .map_err(|_| ExecError::config(format!("{ENV_POOL_SIZE}: '{raw}' is not a number")))?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Parse a JSON document; missing keys keep their defaults
    pub fn from_json_str(json: &str) -> ExecResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no executor can run with
    pub fn validate(&self) -> ExecResult<()> {
        if self.pool_size == 0 {
            return Err(ExecError::config("pool size must be at least 1"));
        }
        if self.max_frame_bytes < 1024 {
            return Err(ExecError::config("max frame size must be at least 1 KiB"));
        }
        Ok(())
    }

    /// Set the default timeout
    #[must_use]
    pub const fn with_default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    /// Set the protocol slack
    #[must_use]
    pub const fn with_protocol_slack_ms(mut self, slack_ms: u64) -> Self {
        self.protocol_slack_ms = slack_ms;
        self
    }

    /// Set the pool size
    #[must_use]
    pub const fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Set the stop grace period
    #[must_use]
    pub const fn with_stop_grace_ms(mut self, grace_ms: u64) -> Self {
        self.stop_grace_ms = grace_ms;
        self
    }

    /// Set the watchdog interrupt grace period
    #[must_use]
    pub const fn with_interrupt_grace_ms(mut self, grace_ms: u64) -> Self {
        self.interrupt_grace_ms = grace_ms;
        self
    }

    /// Set the maximum frame size
    #[must_use]
    pub const fn with_max_frame_bytes(mut self, bytes: usize) -> Self {
        self.max_frame_bytes = bytes;
        self
    }

    /// How long the client waits for an invocation with `timeout_ms`
    #[must_use]
    pub const fn client_deadline(&self, timeout_ms: u64) -> Duration {
        Duration::from_millis(timeout_ms.saturating_add(self.protocol_slack_ms))
    }

    /// Stop grace period
    #[must_use]
    pub const fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    /// Watchdog interrupt grace period
    #[must_use]
    pub const fn interrupt_grace(&self) -> Duration {
        Duration::from_millis(self.interrupt_grace_ms)
    }
}

/// Instrumentation settings shipped to a worker with `setInstrumentation`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentationSpec {
    /// Operations user code may perform
    pub policy: SandboxPolicy,
    /// Maximum number of trace entries recorded per invocation
    pub trace_capacity: usize,
    /// Depth to which after-state objects are expanded
    pub max_depth: u32,
}

impl Default for InstrumentationSpec {
    fn default() -> Self {
        Self {
            policy: SandboxPolicy::default(),
            trace_capacity: DEFAULT_TRACE_CAPACITY,
            max_depth: DEFAULT_MODEL_DEPTH,
        }
    }
}

impl InstrumentationSpec {
    /// Create default settings
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sandbox policy
    #[must_use]
    pub fn with_policy(mut self, policy: SandboxPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the trace capacity
    #[must_use]
    pub const fn with_trace_capacity(mut self, capacity: usize) -> Self {
        self.trace_capacity = capacity;
        self
    }

    /// Set the model depth
    #[must_use]
    pub const fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth;
        self
    }

    /// Encode as the opaque `setInstrumentation` payload
    pub fn to_payload(&self) -> ExecResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode an opaque `setInstrumentation` payload
    pub fn from_payload(bytes: &[u8]) -> ExecResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    mod executor_config_tests {
        use super::*;

        #[test]
        fn test_defaults() {
            let config = ExecutorConfig::default();
            assert_eq!(config.default_timeout_ms, 1000);
            assert_eq!(config.pool_size, 10);
            assert_eq!(config.max_frame_bytes, 16 * 1024 * 1024);
            assert_eq!(config.client_deadline(100), Duration::from_millis(600));
        }

        #[test]
        fn test_builders() {
            let config = ExecutorConfig::new()
                .with_default_timeout_ms(50)
                .with_pool_size(2)
                .with_stop_grace_ms(10);
            assert_eq!(config.default_timeout_ms, 50);
            assert_eq!(config.pool_size, 2);
            assert_eq!(config.stop_grace(), Duration::from_millis(10));
        }

        #[test]
        fn test_env_overrides() {
            let env: HashMap<&str, &str> =
                HashMap::from([(ENV_TIMEOUT_MS, "250"), (ENV_POOL_SIZE, " 3 ")]);
            let config = ExecutorConfig::default()
                .with_env_overrides(|key| env.get(key).map(|v| (*v).to_string()))
                .unwrap();
            assert_eq!(config.default_timeout_ms, 250);
            assert_eq!(config.pool_size, 3);
        }

        #[test]
        fn test_env_override_rejects_garbage() {
            let err = ExecutorConfig::default()
                .with_env_overrides(|key| (key == ENV_POOL_SIZE).then(|| "many".to_string()))
                .unwrap_err();
            assert!(err.to_string().contains(ENV_POOL_SIZE));
        }

        #[test]
        fn test_json_partial_document() {
            let config = ExecutorConfig::from_json_str(r#"{"pool_size": 4}"#).unwrap();
            assert_eq!(config.pool_size, 4);
            assert_eq!(config.default_timeout_ms, 1000);
        }

        #[test]
        fn test_json_file_round_trip() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("executor.json");
            let config = ExecutorConfig::new().with_pool_size(7);
            std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
            let text = std::fs::read_to_string(&path).unwrap();
            assert_eq!(ExecutorConfig::from_json_str(&text).unwrap(), config);
        }

        #[test]
        fn test_zero_pool_rejected() {
            assert!(ExecutorConfig::from_json_str(r#"{"pool_size": 0}"#).is_err());
        }
    }

    mod instrumentation_tests {
        use super::*;
        use crate::runtime::Permission;

        #[test]
        fn test_payload_round_trip() {
            let spec = InstrumentationSpec::new()
                .with_policy(SandboxPolicy::default().allow(Permission::FileRead))
                .with_max_depth(3);
            let decoded = InstrumentationSpec::from_payload(&spec.to_payload().unwrap()).unwrap();
            assert_eq!(decoded, spec);
            assert_eq!(decoded.trace_capacity, DEFAULT_TRACE_CAPACITY);
        }

        #[test]
        fn test_garbage_payload_rejected() {
            assert!(InstrumentationSpec::from_payload(&[0xff; 3]).is_err());
        }
    }
}
