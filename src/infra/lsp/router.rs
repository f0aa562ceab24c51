//! Notification Router
//!
//! Handles messages the server sends without being asked: notifications are
//! routed by method, server-to-client requests get a minimal reply.

use std::sync::Arc;

use serde_json::Value;

use super::documents::DocumentStore;
use super::protocol::{
    PublishDiagnosticsParams, Request, Response, ResponseError, error_codes,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    /// LSP MessageType: 1=Error, 2=Warning, 3=Info, 4=Log
    fn from_message_type(msg_type: Option<u64>) -> Self {
        match msg_type {
            Some(1) => Self::Error,
            Some(2) => Self::Warn,
            Some(3) => Self::Info,
            _ => Self::Debug,
        }
    }
}

pub struct NotificationRouter {
    documents: Arc<DocumentStore>,
}

impl NotificationRouter {
    pub fn new(documents: Arc<DocumentStore>) -> Self {
        Self { documents }
    }

    /// Route one incoming notification. Never fails; bad params are logged.
    pub fn dispatch(&self, method: &str, params: Option<Value>) {
        match method {
            "textDocument/publishDiagnostics" => self.publish_diagnostics(params),
            "window/logMessage" | "window/showMessage" => log_server_message(method, params),
            _ => tracing::trace!("Unhandled notification: {}", method),
        }
    }

    fn publish_diagnostics(&self, params: Option<Value>) {
        let params = params.unwrap_or(Value::Null);
        match serde_json::from_value::<PublishDiagnosticsParams>(params) {
            Ok(published) => {
                tracing::debug!(
                    "Cached {} diagnostics for {}",
                    published.diagnostics.len(),
                    published.uri
                );
                self.documents
                    .publish(&published.uri, published.diagnostics);
            }
            Err(e) => tracing::warn!("Ignoring malformed publishDiagnostics: {}", e),
        }
    }

    /// Build the reply for a server-to-client request
    pub fn answer(&self, request: &Request) -> Response {
        let result = match request.method.as_str() {
            "workspace/configuration" => Ok(workspace_configuration(&request.params)),
            "client/registerCapability"
            | "client/unregisterCapability"
            | "window/workDoneProgress/create" => Ok(Value::Null),
            _ => {
                tracing::debug!("Unhandled server request: {}", request.method);
                Err(ResponseError {
                    code: error_codes::METHOD_NOT_FOUND,
                    message: format!("Method not found: {}", request.method),
                    data: None,
                })
            }
        };

        match result {
            Ok(value) => Response::success(request.id.clone(), value),
            Err(error) => Response::failure(request.id.clone(), error),
        }
    }
}

/// One empty settings object per requested item
fn workspace_configuration(params: &Option<Value>) -> Value {
    let items = params
        .as_ref()
        .and_then(|p| p.get("items"))
        .and_then(Value::as_array)
        .map_or(0, Vec::len);
    Value::Array(vec![Value::Object(serde_json::Map::new()); items])
}

fn log_server_message(method: &str, params: Option<Value>) {
    let Some(params) = params else {
        return;
    };
    let Some(msg) = params.get("message").and_then(Value::as_str) else {
        return;
    };
    match LogLevel::from_message_type(params.get("type").and_then(Value::as_u64)) {
        LogLevel::Error => tracing::error!("LSP {}: {}", method, msg),
        LogLevel::Warn => tracing::warn!("LSP {}: {}", method, msg),
        LogLevel::Info => tracing::info!("LSP {}: {}", method, msg),
        LogLevel::Debug => tracing::debug!("LSP {}: {}", method, msg),
    }
}
