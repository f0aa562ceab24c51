//! Error types for lspgate

use std::time::Duration;

use thiserror::Error;

pub type GateResult<T> = std::result::Result<T, GateError>;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("{0}")]
    Lsp(#[from] LspError),

    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Frame decoding failure. Any of these means the connection is corrupted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FramingError {
    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    #[error("Missing Content-Length header")]
    MissingContentLength,

    #[error("Invalid Content-Length value: {0:?}")]
    InvalidContentLength(String),

    #[error("Frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Invalid message body: {0}")]
    InvalidBody(String),

    #[error("Stream ended with {0} bytes of incomplete frame")]
    Truncated(usize),
}

#[derive(Debug, Error)]
pub enum LspError {
    #[error("Failed to start server '{command}': {source}")]
    SpawnFailure {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection corrupted: {0}")]
    Framing(#[from] FramingError),

    /// `id` is `None` when the request never got a writer slot
    #[error(
        "'{method}'{} timed out after {}ms",
        .id.map(|id| format!(" (id {})", id)).unwrap_or_default(),
        .after.as_millis()
    )]
    Timeout {
        method: String,
        id: Option<u64>,
        after: Duration,
    },

    #[error("Server error [{code}]: {message}")]
    ServerError { code: i32, message: String },

    #[error("Connection closed while '{method}' was outstanding")]
    ConnectionClosed { method: String },

    #[error("Language server not initialized. Call initialize first")]
    NotInitialized,

    #[error("Document not open: {0}")]
    NotOpen(String),

    #[error("Language server not running. Start or restart it first")]
    NotRunning,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl LspError {
    pub fn error_code(&self) -> i32 {
        match self {
            Self::ServerError { code, .. } => *code,
            Self::ConnectionClosed { .. } => -32099,
            Self::Timeout { .. } => -32001,
            Self::NotInitialized => -32002,
            Self::NotRunning => -32003,
            Self::NotOpen(_) => -32004,
            Self::Framing(_) => -32700,
            _ => -32000,
        }
    }

    /// The connection is unusable until an explicit start or restart
    pub fn needs_restart(&self) -> bool {
        matches!(
            self,
            Self::NotRunning | Self::Framing(_) | Self::ConnectionClosed { .. }
        )
    }

    /// Another attempt on the same connection may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub(crate) fn closed(method: &str) -> Self {
        Self::ConnectionClosed {
            method: method.to_string(),
        }
    }
}

impl From<crate::infra::lsp::protocol::ResponseError> for LspError {
    fn from(err: crate::infra::lsp::protocol::ResponseError) -> Self {
        LspError::ServerError {
            code: err.code,
            message: err.message,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config parse error: {0}")]
    Parse(String),

    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Tool-layer argument and I/O failures
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for '{tool}': {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("Cannot read {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_transient() {
        let err = LspError::Timeout {
            method: "textDocument/hover".to_string(),
            id: Some(7),
            after: Duration::from_millis(1500),
        };
        assert!(err.is_transient());
        assert!(!err.needs_restart());
        assert_eq!(err.error_code(), -32001);
        assert_eq!(
            err.to_string(),
            "'textDocument/hover' (id 7) timed out after 1500ms"
        );

        let queued = LspError::Timeout {
            method: "shutdown".to_string(),
            id: None,
            after: Duration::from_millis(100),
        };
        assert_eq!(queued.to_string(), "'shutdown' timed out after 100ms");
    }

    #[test]
    fn test_connection_failures_need_restart() {
        assert!(LspError::NotRunning.needs_restart());
        assert!(LspError::closed("initialize").needs_restart());
        assert!(LspError::Framing(FramingError::MissingContentLength).needs_restart());
        assert!(!LspError::NotInitialized.needs_restart());
    }

    #[test]
    fn test_server_error_keeps_code_and_message() {
        let err: LspError = crate::infra::lsp::protocol::ResponseError {
            code: -32601,
            message: "Method not found".to_string(),
            data: None,
        }
        .into();
        assert_eq!(err.error_code(), -32601);
        assert_eq!(err.to_string(), "Server error [-32601]: Method not found");
    }

    #[test]
    fn test_lsp_error_wraps_into_gate_error() {
        let err: GateError = LspError::NotOpen("file:///a.hs".to_string()).into();
        assert_eq!(err.to_string(), "Document not open: file:///a.hs");
    }
}
