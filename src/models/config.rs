//! Configuration model for lspgate
//!
//! One language server per gateway; the server command is fixed at
//! construction and reused across restarts.

use serde::{Deserialize, Serialize};

/// lspgate configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct GateConfig {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub lsp: LspConfig,
}

/// Language server executable settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSettings {
    /// Executable name or path
    #[serde(default = "defaults::command")]
    pub command: String,

    /// Startup arguments
    #[serde(default = "defaults::args")]
    pub args: Vec<String>,

    /// Language id sent with didOpen when the caller does not name one
    #[serde(default = "defaults::language_id")]
    pub language_id: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            command: defaults::command(),
            args: defaults::args(),
            language_id: defaults::language_id(),
        }
    }
}

/// Protocol timing configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LspConfig {
    #[serde(default = "defaults::timeout_secs")]
    pub timeout_secs: u64,

    /// How long to wait for the shutdown response before sending exit
    #[serde(default = "defaults::shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// How long to wait for the process to exit before killing it
    #[serde(default = "defaults::exit_wait_ms")]
    pub exit_wait_ms: u64,
}

impl Default for LspConfig {
    fn default() -> Self {
        Self {
            timeout_secs: defaults::timeout_secs(),
            shutdown_grace_ms: defaults::shutdown_grace_ms(),
            exit_wait_ms: defaults::exit_wait_ms(),
        }
    }
}

mod defaults {
    // Server
    pub fn command() -> String {
        "haskell-language-server-wrapper".to_string()
    }
    pub fn args() -> Vec<String> {
        vec!["--lsp".to_string()]
    }
    pub fn language_id() -> String {
        "haskell".to_string()
    }

    // LSP
    pub fn timeout_secs() -> u64 {
        30
    }
    pub fn shutdown_grace_ms() -> u64 {
        2000
    }
    pub fn exit_wait_ms() -> u64 {
        5000
    }
}
