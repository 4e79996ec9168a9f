//! Scheduler configuration types.
//!
//! These types hold the concrete values that drive scheduler behavior. In
//! most cases you should use
//! [`SchedulerBuilder`](crate::scheduler::SchedulerBuilder) rather than
//! creating a [`SchedulerConfig`] directly.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `thread_name_prefix` | `"taskgrove-worker"` |
//! | `worker_defaults.self_poll` | `drain_all` |
//! | `worker_defaults.children_poll` | `drain_one` |
//! | `worker_defaults.idle_rounds` | 1 |
//! | `worker_defaults.idle_policy` | `yield` |
//! | `worker_defaults.idle_sleep` | 500 ms |
//! | `panic_response` | `log` |
//!
//! # Environment overrides
//!
//! [`SchedulerConfig::from_env`] reads `TASKGROVE_*` variables. Policy
//! names are parsed leniently (an unknown name falls back to the default,
//! matching blueprint normalization); numeric values must parse or a
//! [`ConfigError`] is returned.

use crate::tree::{IdlePolicy, PollPolicy, WorkerParams};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What a worker does with a caught task panic when no panic hook is
/// installed on the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanicResponse {
    /// Emit a `tracing` error event and keep draining.
    #[default]
    Log,
    /// Swallow the panic and keep draining.
    Silent,
}

/// Error raised when an environment override cannot be parsed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A numeric environment variable held a non-numeric value.
    #[error("invalid value `{value}` for {var}")]
    InvalidValue {
        /// The offending environment variable.
        var: &'static str,
        /// The value found in the environment.
        value: String,
    },
}

/// Scheduler-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Name prefix for worker threads (`<prefix>-<context>-<slot>`).
    pub thread_name_prefix: String,
    /// Worker parameters applied by trees built through
    /// [`ContextTree::with_worker_defaults`](crate::tree::ContextTree::with_worker_defaults).
    pub worker_defaults: WorkerParams,
    /// Response to task panics when no hook is installed.
    pub panic_response: PanicResponse,
}

impl SchedulerConfig {
    /// Normalizes configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.thread_name_prefix.is_empty() {
            self.thread_name_prefix = "taskgrove-worker".to_string();
        }
        self.worker_defaults = self.worker_defaults.clone().normalized();
    }

    /// Builds a configuration from defaults plus `TASKGROVE_*` overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(prefix) = std::env::var("TASKGROVE_THREAD_PREFIX") {
            config.thread_name_prefix = prefix;
        }
        if let Ok(value) = std::env::var("TASKGROVE_SELF_POLL") {
            config.worker_defaults.self_poll =
                PollPolicy::parse_lenient(&value, PollPolicy::DrainAll);
        }
        if let Ok(value) = std::env::var("TASKGROVE_CHILDREN_POLL") {
            config.worker_defaults.children_poll =
                PollPolicy::parse_lenient(&value, PollPolicy::DrainOne);
        }
        if let Ok(value) = std::env::var("TASKGROVE_IDLE_POLICY") {
            config.worker_defaults.idle_policy = IdlePolicy::parse_lenient(&value);
        }
        if let Ok(value) = std::env::var("TASKGROVE_IDLE_ROUNDS") {
            let rounds = value.parse::<usize>().map_err(|_| ConfigError::InvalidValue {
                var: "TASKGROVE_IDLE_ROUNDS",
                value: value.clone(),
            })?;
            config.worker_defaults.idle_rounds = rounds;
        }
        if let Ok(value) = std::env::var("TASKGROVE_IDLE_SLEEP_MS") {
            let ms = value.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                var: "TASKGROVE_IDLE_SLEEP_MS",
                value: value.clone(),
            })?;
            config.worker_defaults.idle_sleep = Duration::from_millis(ms);
        }
        if let Ok(value) = std::env::var("TASKGROVE_PANIC_RESPONSE") {
            config.panic_response = match value.trim() {
                "silent" => PanicResponse::Silent,
                _ => PanicResponse::Log,
            };
        }

        config.normalize();
        Ok(config)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: "taskgrove-worker".to_string(),
            worker_defaults: WorkerParams::default(),
            panic_response: PanicResponse::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    // Env mutation is process-global; serialize these tests.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for var in [
            "TASKGROVE_THREAD_PREFIX",
            "TASKGROVE_SELF_POLL",
            "TASKGROVE_CHILDREN_POLL",
            "TASKGROVE_IDLE_POLICY",
            "TASKGROVE_IDLE_ROUNDS",
            "TASKGROVE_IDLE_SLEEP_MS",
            "TASKGROVE_PANIC_RESPONSE",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn defaults_are_normalized() {
        let mut config = SchedulerConfig {
            thread_name_prefix: String::new(),
            ..SchedulerConfig::default()
        };
        config.worker_defaults.idle_rounds = 0;
        config.normalize();
        assert_eq!(config.thread_name_prefix, "taskgrove-worker");
        assert_eq!(config.worker_defaults.idle_rounds, 1);
    }

    #[test]
    fn from_env_reads_overrides() {
        let _guard = ENV_LOCK.lock();
        clear_env();
        std::env::set_var("TASKGROVE_THREAD_PREFIX", "grove");
        std::env::set_var("TASKGROVE_SELF_POLL", "drain_one");
        std::env::set_var("TASKGROVE_IDLE_POLICY", "sleep");
        std::env::set_var("TASKGROVE_IDLE_SLEEP_MS", "25");

        let config = SchedulerConfig::from_env().expect("config");
        assert_eq!(config.thread_name_prefix, "grove");
        assert_eq!(config.worker_defaults.self_poll, PollPolicy::DrainOne);
        assert_eq!(config.worker_defaults.idle_policy, IdlePolicy::Sleep);
        assert_eq!(config.worker_defaults.idle_sleep, Duration::from_millis(25));
        clear_env();
    }

    #[test]
    fn from_env_is_lenient_about_policy_names() {
        let _guard = ENV_LOCK.lock();
        clear_env();
        std::env::set_var("TASKGROVE_SELF_POLL", "definitely_not_a_policy");
        let config = SchedulerConfig::from_env().expect("config");
        assert_eq!(config.worker_defaults.self_poll, PollPolicy::DrainAll);
        clear_env();
    }

    #[test]
    fn from_env_rejects_bad_numbers() {
        let _guard = ENV_LOCK.lock();
        clear_env();
        std::env::set_var("TASKGROVE_IDLE_ROUNDS", "many");
        let err = SchedulerConfig::from_env().expect_err("bad number");
        assert!(err.to_string().contains("TASKGROVE_IDLE_ROUNDS"));
        clear_env();
    }
}
