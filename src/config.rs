//! Runtime timing configuration
//!
//! Built once from [`GateConfig`] and handed to the client by value.

use std::time::Duration;

use crate::models::config::GateConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    Request,
    Initialization,
    Shutdown,
}

impl OperationType {
    pub fn from_method(method: &str) -> Self {
        match method {
            "initialize" => Self::Initialization,
            "shutdown" => Self::Shutdown,
            _ => Self::Request,
        }
    }

    fn base_multiplier(self) -> f64 {
        match self {
            Self::Request => 1.0,
            Self::Initialization => 2.0,
            Self::Shutdown => 0.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    base_timeout: Duration,
    pub shutdown_grace: Duration,
    pub exit_wait: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            base_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(2),
            exit_wait: Duration::from_secs(5),
        }
    }
}

impl From<&GateConfig> for RuntimeConfig {
    fn from(config: &GateConfig) -> Self {
        Self {
            base_timeout: Duration::from_secs(config.lsp.timeout_secs),
            shutdown_grace: Duration::from_millis(config.lsp.shutdown_grace_ms),
            exit_wait: Duration::from_millis(config.lsp.exit_wait_ms),
        }
    }
}

impl RuntimeConfig {
    pub fn with_base_timeout(mut self, timeout: Duration) -> Self {
        self.base_timeout = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_exit_wait(mut self, wait: Duration) -> Self {
        self.exit_wait = wait;
        self
    }

    /// Bound for notifications and replies, which have no response to wait on
    pub fn write_timeout(&self) -> Duration {
        self.base_timeout
    }

    pub fn timeout_for(&self, method: &str) -> Duration {
        let op_type = OperationType::from_method(method);
        Duration::from_secs_f64(self.base_timeout.as_secs_f64() * op_type.base_multiplier())
    }
}
