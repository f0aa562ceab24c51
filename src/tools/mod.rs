//! Tool layer
//!
//! Maps `{tool, arguments}` calls onto the client facade and renders the
//! results as text. Caller coordinates are 1-based and pass through
//! unchanged; the facade converts them to protocol positions.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GateError, ToolError};
use crate::infra::lsp::LspClient;
use crate::infra::lsp::protocol::{CodeAction, CompletionItem, LspDiagnostic};
use crate::models::lsp::{path_to_uri, uri_to_path};

pub const TOOL_NAMES: &[&str] = &[
    "start_lsp",
    "open_document",
    "close_document",
    "get_info_on_location",
    "get_completions",
    "get_code_actions",
    "get_diagnostics",
    "restart_lsp_server",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(tool: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool: tool.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResponse {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            success: true,
            text: Some(text.into()),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            text: None,
            error: Some(message.into()),
        }
    }
}

// ============================================================================
// Argument Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct StartArgs {
    root_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct OpenArgs {
    file_path: PathBuf,
    language_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileArgs {
    file_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct PositionArgs {
    file_path: PathBuf,
    line: u32,
    column: u32,
}

#[derive(Debug, Deserialize)]
struct RangeArgs {
    file_path: PathBuf,
    start_line: u32,
    start_column: u32,
    end_line: u32,
    end_column: u32,
}

#[derive(Debug, Default, Deserialize)]
struct OptionalFileArgs {
    file_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct RestartArgs {
    root_dir: Option<PathBuf>,
}

// ============================================================================
// Dispatch
// ============================================================================

pub struct Tools {
    client: Arc<LspClient>,
    language_id: String,
}

impl Tools {
    /// `language_id` is used for documents opened without an explicit one
    pub fn new(client: Arc<LspClient>, language_id: impl Into<String>) -> Self {
        Self {
            client,
            language_id: language_id.into(),
        }
    }

    pub fn client(&self) -> &Arc<LspClient> {
        &self.client
    }

    /// Run one tool call. Failures become error responses.
    pub async fn call(&self, call: ToolCall) -> ToolResponse {
        tracing::debug!("Tool call: {}", call.tool);
        match self.dispatch(&call).await {
            Ok(text) => ToolResponse::ok(text),
            Err(e) => {
                tracing::debug!("Tool '{}' failed: {}", call.tool, e);
                ToolResponse::err(e.to_string())
            }
        }
    }

    async fn dispatch(&self, call: &ToolCall) -> Result<String, GateError> {
        let tool = call.tool.as_str();
        match tool {
            "start_lsp" => self.start(args(tool, &call.arguments)?).await,
            "open_document" => self.open(args(tool, &call.arguments)?).await,
            "close_document" => self.close(args(tool, &call.arguments)?).await,
            "get_info_on_location" => self.hover(args(tool, &call.arguments)?).await,
            "get_completions" => self.completions(args(tool, &call.arguments)?).await,
            "get_code_actions" => self.code_actions(args(tool, &call.arguments)?).await,
            "get_diagnostics" => self.diagnostics(optional_args(tool, &call.arguments)?),
            "restart_lsp_server" => self.restart(optional_args(tool, &call.arguments)?).await,
            _ => Err(ToolError::UnknownTool(call.tool.clone()).into()),
        }
    }

    async fn start(&self, args: StartArgs) -> Result<String, GateError> {
        let root = absolute(&args.root_dir, None)?;
        if !root.is_dir() {
            return Err(invalid(
                "start_lsp",
                format!("root_dir is not a directory: {}", root.display()),
            ));
        }

        let moved = self
            .client
            .root()
            .is_some_and(|current| current != root);
        let result = if moved && self.client.is_initialized() {
            tracing::info!("Workspace root changed; restarting language server");
            self.client.restart(Some(&root)).await?;
            self.client.capabilities().unwrap_or_default()
        } else {
            self.client.start(Some(&root)).await?;
            self.client.initialize(&root).await?
        };
        let server = result
            .server_info
            .map(|info| format!(" ({})", info.name))
            .unwrap_or_default();
        Ok(format!(
            "Language server started at {}{}",
            root.display(),
            server
        ))
    }

    async fn open(&self, args: OpenArgs) -> Result<String, GateError> {
        let path = self.resolve(&args.file_path)?;
        let uri = path_to_uri(&path);
        if self.client.is_open(&uri) {
            return Ok(format!("{} is already open", self.display(&path)));
        }
        let language_id = args.language_id.as_deref().unwrap_or(&self.language_id);
        let content = read_file(&path).await?;
        self.client
            .open_document(&uri, &content, language_id)
            .await?;
        Ok(format!("Opened {}", self.display(&path)))
    }

    async fn close(&self, args: FileArgs) -> Result<String, GateError> {
        let path = self.resolve(&args.file_path)?;
        let uri = path_to_uri(&path);
        if !self.client.is_open(&uri) {
            return Ok(format!("{} was not open", self.display(&path)));
        }
        self.client.close_document(&uri).await?;
        Ok(format!("Closed {}", self.display(&path)))
    }

    async fn hover(&self, args: PositionArgs) -> Result<String, GateError> {
        let path = self.resolve(&args.file_path)?;
        let uri = self.ensure_open(&path).await?;
        let text = self
            .client
            .hover(&uri, args.line, args.column)
            .await?;
        if text.trim().is_empty() {
            return Ok(format!(
                "No information available at {}:{}:{}",
                self.display(&path),
                args.line,
                args.column
            ));
        }
        Ok(text)
    }

    async fn completions(&self, args: PositionArgs) -> Result<String, GateError> {
        let path = self.resolve(&args.file_path)?;
        let uri = self.ensure_open(&path).await?;
        let items = self
            .client
            .completion(&uri, args.line, args.column)
            .await?;
        if items.is_empty() {
            return Ok("No completions available".to_string());
        }
        Ok(items
            .iter()
            .map(format_completion)
            .collect::<Vec<_>>()
            .join("\n"))
    }

    async fn code_actions(&self, args: RangeArgs) -> Result<String, GateError> {
        let path = self.resolve(&args.file_path)?;
        let uri = self.ensure_open(&path).await?;
        let actions = self
            .client
            .code_actions(
                &uri,
                (args.start_line, args.start_column),
                (args.end_line, args.end_column),
            )
            .await?;
        if actions.is_empty() {
            return Ok("No code actions available".to_string());
        }
        Ok(actions
            .iter()
            .enumerate()
            .map(|(i, action)| format_action(i + 1, action))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    fn diagnostics(&self, args: OptionalFileArgs) -> Result<String, GateError> {
        if let Some(file_path) = args.file_path {
            let path = self.resolve(&file_path)?;
            let diagnostics = self.client.diagnostics(&path_to_uri(&path))?;
            if diagnostics.is_empty() {
                return Ok(format!("No diagnostics for {}", self.display(&path)));
            }
            return Ok(self.format_file_diagnostics(&path, &diagnostics));
        }

        let all: BTreeMap<String, Vec<LspDiagnostic>> = self
            .client
            .all_diagnostics()?
            .into_iter()
            .filter(|(_, diags)| !diags.is_empty())
            .collect();
        if all.is_empty() {
            return Ok("No diagnostics".to_string());
        }
        Ok(all
            .iter()
            .map(|(uri, diags)| self.format_file_diagnostics(&uri_to_path(uri), diags))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    async fn restart(&self, args: RestartArgs) -> Result<String, GateError> {
        let root = args
            .root_dir
            .map(|r| absolute(&r, None))
            .transpose()?;
        self.client.restart(root.as_deref()).await?;
        Ok(match self.client.root() {
            Some(root) => format!("Language server restarted at {}", root.display()),
            None => "Language server restarted".to_string(),
        })
    }

    /// Open `path` with the server unless it already is; returns its uri
    async fn ensure_open(&self, path: &Path) -> Result<String, GateError> {
        let uri = path_to_uri(path);
        if !self.client.is_open(&uri) {
            let content = read_file(path).await?;
            self.client
                .open_document(&uri, &content, &self.language_id)
                .await?;
        }
        Ok(uri)
    }

    fn resolve(&self, path: &Path) -> Result<PathBuf, GateError> {
        absolute(path, self.client.root().as_deref())
    }

    fn display(&self, path: &Path) -> String {
        match self.client.root() {
            Some(root) => path
                .strip_prefix(&root)
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| path.display().to_string()),
            None => path.display().to_string(),
        }
    }

    fn format_file_diagnostics(&self, path: &Path, diagnostics: &[LspDiagnostic]) -> String {
        let file = self.display(path);
        diagnostics
            .iter()
            .map(|d| format_diagnostic(&file, d))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn args<T: DeserializeOwned>(tool: &str, arguments: &Value) -> Result<T, GateError> {
    serde_json::from_value(arguments.clone()).map_err(|e| invalid(tool, e.to_string()))
}

/// Like [`args`], but a missing or null argument object means "all defaults"
fn optional_args<T: DeserializeOwned + Default>(
    tool: &str,
    arguments: &Value,
) -> Result<T, GateError> {
    if arguments.is_null() {
        return Ok(T::default());
    }
    args(tool, arguments)
}

fn invalid(tool: &str, message: impl Into<String>) -> GateError {
    ToolError::InvalidArguments {
        tool: tool.to_string(),
        message: message.into(),
    }
    .into()
}

/// Make `path` absolute against `base`, or the working directory
fn absolute(path: &Path, base: Option<&Path>) -> Result<PathBuf, GateError> {
    if path.as_os_str().is_empty() {
        return Err(invalid("path", "path must not be empty"));
    }
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let base = match base {
        Some(base) => base.to_path_buf(),
        None => std::env::current_dir()?,
    };
    Ok(base.join(path))
}

async fn read_file(path: &Path) -> Result<String, GateError> {
    tokio::fs::read_to_string(path).await.map_err(|source| {
        ToolError::ReadFile {
            path: path.display().to_string(),
            source,
        }
        .into()
    })
}

fn format_completion(item: &CompletionItem) -> String {
    match &item.detail {
        Some(detail) if !detail.is_empty() => format!("{} :: {}", item.label, detail),
        _ => item.label.clone(),
    }
}

fn format_action(index: usize, action: &CodeAction) -> String {
    let mut line = format!("{}. {}", index, action.title);
    if let Some(kind) = &action.kind {
        line.push_str(&format!(" [{}]", kind));
    }
    if action.is_preferred == Some(true) {
        line.push_str(" (preferred)");
    }
    if action.is_bare_command() {
        line.push_str(" (command)");
    }
    line
}

fn format_diagnostic(file: &str, diagnostic: &LspDiagnostic) -> String {
    let (line, column) = diagnostic.range.start.to_display();
    let severity = diagnostic
        .severity
        .map(|s| s.to_string())
        .unwrap_or_else(|| "error".to_string());
    let mut text = format!(
        "{}:{}:{}: {}: {}",
        file, line, column, severity, diagnostic.message
    );
    if let Some(source) = &diagnostic.source {
        text.push_str(&format!(" [{}]", source));
    }
    text
}
