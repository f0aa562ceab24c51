//! LSP Client Facade
//!
//! Public operation surface of the adapter. Owns the dispatcher, the document
//! store and the supervisor for one language server. Positions are taken in
//! the 1-based caller convention and converted to protocol positions here.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::Mutex as AsyncMutex;

use super::dispatcher::Dispatcher;
use super::documents::DocumentStore;
use super::process::{ProcessState, ServerLauncher, Supervisor};
use super::protocol::{
    ClientCapabilities, ClientInfo, CodeAction, CodeActionContext, CodeActionParams,
    CompletionItem, CompletionResponse, DidCloseTextDocumentParams, DidOpenTextDocumentParams,
    Hover, InitializeParams, InitializeResult, LspDiagnostic, Position, Range,
    TextDocumentClientCapabilities, TextDocumentIdentifier, TextDocumentPositionParams,
    WorkspaceFolder,
};
use crate::config::RuntimeConfig;
use crate::error::LspError;
use crate::models::lsp::path_to_uri;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Initializing,
    ShuttingDown,
    NotRunning,
}

pub struct LspClient {
    dispatcher: Arc<Dispatcher>,
    documents: Arc<DocumentStore>,
    supervisor: Supervisor,
    runtime: RuntimeConfig,
    root: Mutex<Option<PathBuf>>,
    capabilities: RwLock<Option<InitializeResult>>,
    initialized: Arc<AtomicBool>,
    /// Serializes initialize, restart and shutdown
    lifecycle: AsyncMutex<()>,
}

impl LspClient {
    pub fn new(launcher: Arc<dyn ServerLauncher>, runtime: RuntimeConfig) -> Self {
        let dispatcher = Arc::new(Dispatcher::with_write_timeout(runtime.write_timeout()));
        let documents = Arc::new(DocumentStore::new());
        let supervisor = Supervisor::new(
            launcher,
            Arc::clone(&dispatcher),
            Arc::clone(&documents),
            runtime.clone(),
        );

        let initialized = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&initialized);
        supervisor.on_exit(move |reason| {
            flag.store(false, Ordering::Release);
            tracing::warn!(
                "Language server exited unexpectedly ({}); restart required",
                reason
            );
        });

        Self {
            dispatcher,
            documents,
            supervisor,
            runtime,
            root: Mutex::new(None),
            capabilities: RwLock::new(None),
            initialized,
            lifecycle: AsyncMutex::new(()),
        }
    }

    /// Spawn the server without initializing it
    pub async fn start(&self, root: Option<&Path>) -> Result<(), LspError> {
        self.supervisor.start(root).await
    }

    /// Run the initialize handshake against `root`
    pub async fn initialize(&self, root: &Path) -> Result<InitializeResult, LspError> {
        let _guard = self.lifecycle.lock().await;
        self.handshake(root).await
    }

    async fn handshake(&self, root: &Path) -> Result<InitializeResult, LspError> {
        if self.supervisor.state() != ProcessState::Running {
            return Err(LspError::NotRunning);
        }
        if self.initialized.load(Ordering::Acquire)
            && let Some(result) = self.capabilities()
        {
            tracing::debug!("Language server already initialized");
            return Ok(result);
        }

        let root_uri = path_to_uri(root);
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| root_uri.clone());
        let params = InitializeParams {
            process_id: Some(std::process::id()),
            root_uri: Some(root_uri.clone()),
            root_path: Some(root.to_string_lossy().into_owned()),
            capabilities: Self::client_capabilities(),
            client_info: Some(ClientInfo {
                name: "lspgate".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
            workspace_folders: Some(vec![WorkspaceFolder {
                uri: root_uri,
                name,
            }]),
        };

        tracing::debug!("Initializing language server at {}", root.display());
        let result: InitializeResult = self
            .request("initialize", Some(serde_json::to_value(params)?))
            .await?;

        if let Some(info) = &result.server_info {
            tracing::info!(
                "Connected to {} {}",
                info.name,
                info.version.as_deref().unwrap_or("")
            );
        }

        self.dispatcher
            .notify("initialized", Some(json!({})))
            .await?;

        *self.root_slot() = Some(root.to_path_buf());
        *self
            .capabilities
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(result.clone());
        self.initialized.store(true, Ordering::Release);
        Ok(result)
    }

    /// Capabilities for the four supported request kinds only
    fn client_capabilities() -> ClientCapabilities {
        let text_document = TextDocumentClientCapabilities {
            synchronization: Some(json!({
                "dynamicRegistration": false,
                "didSave": false
            })),
            completion: Some(json!({
                "completionItem": {
                    "snippetSupport": false,
                    "documentationFormat": ["markdown", "plaintext"]
                },
                "contextSupport": false
            })),
            hover: Some(json!({
                "contentFormat": ["markdown", "plaintext"]
            })),
            code_action: Some(json!({
                "isPreferredSupport": true,
                "codeActionLiteralSupport": {
                    "codeActionKind": {
                        "valueSet": [
                            "", "quickfix", "refactor", "refactor.extract", "refactor.inline",
                            "refactor.rewrite", "source", "source.organizeImports"
                        ]
                    }
                }
            })),
            publish_diagnostics: Some(json!({
                "relatedInformation": false
            })),
        };

        ClientCapabilities {
            general: None,
            window: Some(json!({ "workDoneProgress": true })),
            text_document: Some(text_document),
            workspace: Some(json!({ "configuration": true, "workspaceFolders": true })),
        }
    }

    /// Open a document. A uri that is already open is left untouched.
    pub async fn open_document(
        &self,
        uri: &str,
        content: &str,
        language_id: &str,
    ) -> Result<(), LspError> {
        self.ensure_ready()?;

        let Some(state) = self.documents.track(uri, content, language_id) else {
            tracing::debug!("Document already open: {}", uri);
            return Ok(());
        };

        let params = DidOpenTextDocumentParams {
            text_document: state.to_item(),
        };
        if let Err(e) = self
            .dispatcher
            .notify("textDocument/didOpen", Some(serde_json::to_value(params)?))
            .await
        {
            self.documents.untrack(uri);
            tracing::warn!("didOpen for {} failed: {}", uri, e);
            return Err(e);
        }
        tracing::debug!("Opened {} ({})", uri, language_id);
        Ok(())
    }

    /// Close a document and drop its diagnostics. Unknown uris are a no-op.
    pub async fn close_document(&self, uri: &str) -> Result<(), LspError> {
        self.ensure_ready()?;
        if !self.documents.is_open(uri) {
            tracing::debug!("Close of unopened document ignored: {}", uri);
            return Ok(());
        }

        self.documents.untrack(uri);
        let params = DidCloseTextDocumentParams {
            text_document: TextDocumentIdentifier::new(uri),
        };
        self.dispatcher
            .notify("textDocument/didClose", Some(serde_json::to_value(params)?))
            .await?;
        tracing::debug!("Closed {}", uri);
        Ok(())
    }

    /// Hover text at a 1-based line and column, flattened to one string.
    /// Empty when the server has none.
    pub async fn hover(&self, uri: &str, line: u32, column: u32) -> Result<String, LspError> {
        self.ensure_ready()?;
        let position = Position::from_caller(line, column);
        let hover: Option<Hover> = self
            .request(
                "textDocument/hover",
                Some(serde_json::to_value(Self::position_params(uri, position))?),
            )
            .await?;
        Ok(hover
            .and_then(|h| h.contents)
            .map(|c| c.flatten())
            .unwrap_or_default())
    }

    /// Completion items in server order; both response shapes normalize here
    pub async fn completion(
        &self,
        uri: &str,
        line: u32,
        column: u32,
    ) -> Result<Vec<CompletionItem>, LspError> {
        self.ensure_ready()?;
        let position = Position::from_caller(line, column);
        let response: Option<CompletionResponse> = self
            .request(
                "textDocument/completion",
                Some(serde_json::to_value(Self::position_params(uri, position))?),
            )
            .await?;
        Ok(response.map(CompletionResponse::into_items).unwrap_or_default())
    }

    /// Code actions between two 1-based `(line, column)` positions, sent with
    /// the cached diagnostics the range overlaps
    pub async fn code_actions(
        &self,
        uri: &str,
        start: (u32, u32),
        end: (u32, u32),
    ) -> Result<Vec<CodeAction>, LspError> {
        self.ensure_ready()?;
        let range = Range::from_caller(start, end);
        let diagnostics: Vec<LspDiagnostic> = self
            .documents
            .diagnostics_for(uri)
            .unwrap_or_default()
            .into_iter()
            .filter(|d| d.range.overlaps(&range))
            .collect();

        let params = CodeActionParams {
            text_document: TextDocumentIdentifier::new(uri),
            range,
            context: CodeActionContext {
                diagnostics,
                only: None,
            },
        };
        let actions: Option<Vec<CodeAction>> = self
            .request("textDocument/codeAction", Some(serde_json::to_value(params)?))
            .await?;
        Ok(actions.unwrap_or_default())
    }

    /// Cached diagnostics for an open document
    pub fn diagnostics(&self, uri: &str) -> Result<Vec<LspDiagnostic>, LspError> {
        self.ensure_ready()?;
        self.documents
            .diagnostics_for(uri)
            .ok_or_else(|| LspError::NotOpen(uri.to_string()))
    }

    pub fn all_diagnostics(&self) -> Result<HashMap<String, Vec<LspDiagnostic>>, LspError> {
        self.ensure_ready()?;
        Ok(self.documents.all_diagnostics())
    }

    pub fn is_open(&self, uri: &str) -> bool {
        self.documents.is_open(uri)
    }

    pub fn open_documents(&self) -> Vec<String> {
        self.documents.open_uris()
    }

    /// Stop, respawn and re-initialize. Documents are not re-opened.
    ///
    /// Without a root and without a previous initialize, the new server is
    /// left uninitialized.
    pub async fn restart(&self, root: Option<&Path>) -> Result<(), LspError> {
        let _guard = self.lifecycle.lock().await;
        let root = root.map(Path::to_path_buf).or_else(|| self.root());
        tracing::info!(
            "Restarting language server{}",
            root.as_ref()
                .map(|r| format!(" at {}", r.display()))
                .unwrap_or_default()
        );

        self.reset_session();
        self.supervisor.restart(root.as_deref()).await?;

        match root {
            Some(root) => {
                self.handshake(&root).await?;
            }
            None => tracing::warn!("No root directory known; server left uninitialized"),
        }
        Ok(())
    }

    /// Graceful stop without respawn
    pub async fn shutdown(&self) -> Result<(), LspError> {
        let _guard = self.lifecycle.lock().await;
        self.reset_session();
        self.supervisor.stop().await
    }

    pub async fn health_status(&self) -> HealthStatus {
        match self.supervisor.state() {
            ProcessState::Exited => HealthStatus::NotRunning,
            ProcessState::Restarting => HealthStatus::ShuttingDown,
            ProcessState::Starting => HealthStatus::Initializing,
            ProcessState::Running => {
                if !self.supervisor.is_running().await {
                    HealthStatus::NotRunning
                } else if self.initialized.load(Ordering::Acquire) {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Initializing
                }
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        self.supervisor.is_running().await
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn capabilities(&self) -> Option<InitializeResult> {
        self.capabilities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Root of the last successful initialize
    pub fn root(&self) -> Option<PathBuf> {
        self.root_slot().clone()
    }

    pub fn position_params(uri: &str, position: Position) -> TextDocumentPositionParams {
        TextDocumentPositionParams {
            text_document: TextDocumentIdentifier::new(uri),
            position,
        }
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T, LspError> {
        let result = self
            .dispatcher
            .send(method, params, self.runtime.timeout_for(method))
            .await?;
        serde_json::from_value(result).map_err(|e| {
            tracing::warn!("Unexpected '{}' result shape: {}", method, e);
            LspError::Protocol(format!("{}: {}", method, e))
        })
    }

    fn ensure_ready(&self) -> Result<(), LspError> {
        if self.supervisor.state() != ProcessState::Running {
            return Err(LspError::NotRunning);
        }
        if !self.initialized.load(Ordering::Acquire) {
            return Err(LspError::NotInitialized);
        }
        Ok(())
    }

    fn reset_session(&self) {
        self.initialized.store(false, Ordering::Release);
        *self
            .capabilities
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn root_slot(&self) -> MutexGuard<'_, Option<PathBuf>> {
        self.root.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::infra::lsp::framer::encode;
    use crate::infra::lsp::protocol::{Message, Request};
    use crate::infra::lsp::testing::{FakeLauncher, Reply, haskell_reply, wait_until};

    const URI: &str = "file:///work/app/Main.hs";

    fn runtime() -> RuntimeConfig {
        RuntimeConfig::default()
            .with_base_timeout(Duration::from_secs(5))
            .with_shutdown_grace(Duration::from_millis(200))
            .with_exit_wait(Duration::from_millis(200))
    }

    async fn ready_client(launcher: &Arc<FakeLauncher>) -> LspClient {
        let client = LspClient::new(Arc::clone(launcher) as Arc<dyn ServerLauncher>, runtime());
        client.start(Some(Path::new("/work/app"))).await.unwrap();
        client.initialize(Path::new("/work/app")).await.unwrap();
        client
    }

    #[tokio::test]
    async fn test_operations_before_start_are_not_running() {
        let client = LspClient::new(FakeLauncher::new(), runtime());
        assert!(matches!(
            client.hover(URI, 1, 1).await,
            Err(LspError::NotRunning)
        ));
        assert!(matches!(
            client.initialize(Path::new("/work/app")).await,
            Err(LspError::NotRunning)
        ));
        assert_eq!(client.health_status().await, HealthStatus::NotRunning);
    }

    #[tokio::test]
    async fn test_operations_before_initialize_fail() {
        let client = LspClient::new(FakeLauncher::new(), runtime());
        client.start(None).await.unwrap();
        assert_eq!(client.health_status().await, HealthStatus::Initializing);
        assert!(matches!(
            client.open_document(URI, "main = pure ()", "haskell").await,
            Err(LspError::NotInitialized)
        ));
        assert!(matches!(
            client.completion(URI, 1, 1).await,
            Err(LspError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_local_reads_before_initialize_fail() {
        let launcher = FakeLauncher::new();
        let client = LspClient::new(Arc::clone(&launcher) as Arc<dyn ServerLauncher>, runtime());
        client.start(Some(Path::new("/work/app"))).await.unwrap();
        launcher.publish_diagnostics(URI, &["early"]);

        assert!(matches!(client.diagnostics(URI), Err(LspError::NotInitialized)));
        assert!(matches!(client.all_diagnostics(), Err(LspError::NotInitialized)));
        assert!(matches!(
            client.close_document(URI).await,
            Err(LspError::NotInitialized)
        ));
        assert!(matches!(
            client.close_document("file:///never.hs").await,
            Err(LspError::NotInitialized)
        ));
        assert_eq!(launcher.count("textDocument/didClose"), 0);

        client.initialize(Path::new("/work/app")).await.unwrap();
        assert!(client.all_diagnostics().unwrap().is_empty());
        client.close_document("file:///never.hs").await.unwrap();
    }

    #[tokio::test]
    async fn test_initialize_handshake() {
        let launcher = FakeLauncher::new();
        let client = ready_client(&launcher).await;

        assert_eq!(client.health_status().await, HealthStatus::Healthy);
        assert_eq!(client.root(), Some(PathBuf::from("/work/app")));
        let caps = client.capabilities().unwrap();
        assert_eq!(caps.capabilities.hover_provider, Some(json!(true)));
        assert_eq!(caps.server_info.unwrap().name, "haskell-language-server");

        wait_until(|| launcher.count("initialized") == 1).await;
        let sent: Vec<String> = launcher
            .received()
            .iter()
            .filter_map(|m| m.method().map(str::to_string))
            .collect();
        assert_eq!(sent, vec!["initialize", "initialized"]);
        let params = &launcher.params_of("initialize")[0];
        assert_eq!(params["rootUri"], "file:///work/app");
        assert_eq!(params["clientInfo"]["name"], "lspgate");
    }

    #[tokio::test]
    async fn test_haskell_hover_scenario() {
        let launcher = FakeLauncher::new();
        let client = ready_client(&launcher).await;
        client
            .open_document(URI, "main :: IO ()\nmain = pure ()\n", "haskell")
            .await
            .unwrap();

        let text = client
            .hover(URI, 2, 1)
            .await
            .unwrap();
        assert_eq!(text, "main :: IO ()");

        let params = &launcher.params_of("textDocument/hover")[0];
        assert_eq!(params["position"], json!({ "line": 1, "character": 0 }));
    }

    #[tokio::test]
    async fn test_caller_positions_convert_at_the_facade() {
        let launcher = FakeLauncher::new();
        let client = ready_client(&launcher).await;
        client.completion(URI, 3, 7).await.unwrap();
        client.hover(URI, 0, 0).await.unwrap();

        let completion = &launcher.params_of("textDocument/completion")[0];
        assert_eq!(completion["position"], json!({ "line": 2, "character": 6 }));
        let hover = &launcher.params_of("textDocument/hover")[0];
        assert_eq!(hover["position"], json!({ "line": 0, "character": 0 }));
    }

    #[tokio::test]
    async fn test_hover_null_is_empty() {
        let launcher = FakeLauncher::with_behavior(Arc::new(|request: &Request| {
            match request.method.as_str() {
                "textDocument/hover" => Reply::Result(Value::Null),
                _ => haskell_reply(request),
            }
        }));
        let client = ready_client(&launcher).await;
        assert_eq!(client.hover(URI, 1, 1).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_hover_unexpected_shape_is_protocol_error() {
        let launcher = FakeLauncher::with_behavior(Arc::new(|request: &Request| {
            match request.method.as_str() {
                "textDocument/hover" => Reply::Result(json!(42)),
                _ => haskell_reply(request),
            }
        }));
        let client = ready_client(&launcher).await;
        assert!(matches!(
            client.hover(URI, 1, 1).await,
            Err(LspError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_completion_shapes_normalize() {
        let wrapped = FakeLauncher::new();
        let client = ready_client(&wrapped).await;
        let items = client.completion(URI, 1, 4).await.unwrap();
        let labels: Vec<&str> = items.iter().map(|i| i.label.as_str()).collect();
        assert_eq!(labels, vec!["putStrLn", "print"]);

        let bare = FakeLauncher::with_behavior(Arc::new(|request: &Request| {
            match request.method.as_str() {
                "textDocument/completion" => Reply::Result(json!([
                    { "label": "putStrLn", "kind": 3, "detail": "String -> IO ()" },
                    { "label": "print", "kind": 3 }
                ])),
                _ => haskell_reply(request),
            }
        }));
        let client = ready_client(&bare).await;
        assert_eq!(
            client.completion(URI, 1, 4).await.unwrap(),
            items
        );

        let empty = FakeLauncher::with_behavior(Arc::new(|request: &Request| {
            match request.method.as_str() {
                "textDocument/completion" => Reply::Result(Value::Null),
                _ => haskell_reply(request),
            }
        }));
        let client = ready_client(&empty).await;
        assert!(client.completion(URI, 1, 4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_double_open_sends_one_did_open() {
        let launcher = FakeLauncher::new();
        let client = ready_client(&launcher).await;
        client.open_document(URI, "main = pure ()", "haskell").await.unwrap();
        client.open_document(URI, "main = print 1", "haskell").await.unwrap();

        // The server handles messages in order; a reply means didOpen was seen.
        client.hover(URI, 1, 1).await.unwrap();
        assert_eq!(launcher.count("textDocument/didOpen"), 1);
        let opened = &launcher.params_of("textDocument/didOpen")[0];
        assert_eq!(opened["textDocument"]["version"], 1);
        assert_eq!(opened["textDocument"]["languageId"], "haskell");
        assert_eq!(opened["textDocument"]["text"], "main = pure ()");
    }

    #[tokio::test]
    async fn test_diagnostics_follow_open_state() {
        let launcher = FakeLauncher::new();
        let client = ready_client(&launcher).await;
        assert!(matches!(client.diagnostics(URI), Err(LspError::NotOpen(_))));

        client.open_document(URI, "main = pure ()", "haskell").await.unwrap();
        launcher.publish_diagnostics(URI, &["Variable not in scope: foo"]);
        launcher.publish_diagnostics(URI, &["Parse error", "Type mismatch"]);
        client.hover(URI, 1, 1).await.unwrap();

        let diags = client.diagnostics(URI).unwrap();
        assert_eq!(diags.len(), 2);
        assert_eq!(diags[0].message, "Parse error");
        assert_eq!(client.all_diagnostics().unwrap().len(), 1);

        client.close_document(URI).await.unwrap();
        assert!(!client.is_open(URI));
        launcher.publish_diagnostics(URI, &["late"]);
        client.hover(URI, 1, 1).await.unwrap();
        assert!(client.all_diagnostics().unwrap().is_empty());
        assert!(matches!(client.diagnostics(URI), Err(LspError::NotOpen(_))));
        assert_eq!(launcher.count("textDocument/didClose"), 1);

        client.open_document(URI, "main = pure ()", "haskell").await.unwrap();
        launcher.publish_diagnostics(URI, &["back"]);
        client.hover(URI, 1, 1).await.unwrap();
        assert_eq!(client.diagnostics(URI).unwrap()[0].message, "back");
    }

    #[tokio::test]
    async fn test_close_unknown_is_noop() {
        let launcher = FakeLauncher::new();
        let client = ready_client(&launcher).await;
        client.close_document("file:///never.hs").await.unwrap();
        client.hover(URI, 1, 1).await.unwrap();
        assert_eq!(launcher.count("textDocument/didClose"), 0);
    }

    #[tokio::test]
    async fn test_code_actions_carry_overlapping_diagnostics() {
        let launcher = FakeLauncher::new();
        let client = ready_client(&launcher).await;
        client.open_document(URI, "a\nb\nc\n", "haskell").await.unwrap();
        // One diagnostic per line, lines 0..3
        launcher.publish_diagnostics(URI, &["a", "b", "c"]);
        client.hover(URI, 1, 1).await.unwrap();

        let actions = client
            .code_actions(URI, (2, 1), (3, 1))
            .await
            .unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].title, "Fix 2 issues");
        assert_eq!(actions[0].kind.as_deref(), Some("quickfix"));
        assert!(actions[1].is_bare_command());

        let params = &launcher.params_of("textDocument/codeAction")[0];
        assert_eq!(params["range"]["start"], json!({ "line": 1, "character": 0 }));
    }

    #[tokio::test]
    async fn test_server_error_surfaces() {
        let launcher = FakeLauncher::with_behavior(Arc::new(|request: &Request| {
            match request.method.as_str() {
                "textDocument/codeAction" => Reply::Error(-32603, "ghc crashed".to_string()),
                _ => haskell_reply(request),
            }
        }));
        let client = ready_client(&launcher).await;
        match client.code_actions(URI, (1, 1), (1, 1)).await {
            Err(LspError::ServerError { code, message }) => {
                assert_eq!(code, -32603);
                assert_eq!(message, "ghc crashed");
            }
            other => panic!("unexpected {:?}", other),
        }
        // Connection stays usable
        assert_eq!(client.hover(URI, 1, 1).await.unwrap(), "main :: IO ()");
    }

    #[tokio::test]
    async fn test_timeout_keeps_connection_usable() {
        let launcher = FakeLauncher::with_behavior(Arc::new(|request: &Request| {
            match request.method.as_str() {
                "textDocument/completion" => Reply::Silent,
                _ => haskell_reply(request),
            }
        }));
        let client = LspClient::new(
            Arc::clone(&launcher) as Arc<dyn ServerLauncher>,
            runtime().with_base_timeout(Duration::from_millis(100)),
        );
        client.start(None).await.unwrap();
        client.initialize(Path::new("/work/app")).await.unwrap();

        let err = client.completion(URI, 1, 1).await.unwrap_err();
        assert!(matches!(err, LspError::Timeout { .. }));
        assert!(err.is_transient());
        assert_eq!(client.hover(URI, 1, 1).await.unwrap(), "main :: IO ()");
    }

    #[tokio::test]
    async fn test_restart_fails_outstanding_and_restores_operation() {
        let launcher = FakeLauncher::with_behavior(Arc::new(|request: &Request| {
            match request.method.as_str() {
                "textDocument/hover" => Reply::Silent,
                _ => haskell_reply(request),
            }
        }));
        let client = Arc::new(ready_client(&launcher).await);
        client.open_document(URI, "main = pure ()", "haskell").await.unwrap();
        launcher.publish_diagnostics(URI, &["stale"]);
        client.completion(URI, 1, 1).await.unwrap();
        assert_eq!(client.all_diagnostics().unwrap().len(), 1);

        let mut outstanding = Vec::new();
        for _ in 0..4 {
            let c = Arc::clone(&client);
            outstanding.push(tokio::spawn(async move {
                c.hover(URI, 1, 1).await
            }));
        }
        wait_until(|| launcher.count("textDocument/hover") == 4).await;

        client.restart(Some(Path::new("/work/other"))).await.unwrap();

        for call in outstanding {
            assert!(matches!(
                call.await.unwrap(),
                Err(LspError::ConnectionClosed { .. })
            ));
        }
        assert!(client.all_diagnostics().unwrap().is_empty());
        assert!(!client.is_open(URI));
        assert_eq!(client.health_status().await, HealthStatus::Healthy);
        assert_eq!(client.root(), Some(PathBuf::from("/work/other")));
        assert_eq!(
            launcher.roots(),
            vec![
                Some(PathBuf::from("/work/app")),
                Some(PathBuf::from("/work/other"))
            ]
        );

        // No automatic re-open after restart
        client.completion(URI, 1, 1).await.unwrap();
        assert_eq!(launcher.count("textDocument/didOpen"), 1);
        assert_eq!(launcher.count("initialize"), 2);
    }

    #[tokio::test]
    async fn test_concurrent_restarts_serialize() {
        let launcher = FakeLauncher::new();
        let client = Arc::new(ready_client(&launcher).await);

        let restarts: Vec<_> = (0..2)
            .map(|_| {
                let c = Arc::clone(&client);
                tokio::spawn(async move { c.restart(None).await })
            })
            .collect();
        for restart in restarts {
            restart.await.unwrap().unwrap();
        }

        assert_eq!(launcher.launches(), 3);
        assert_eq!(launcher.count("shutdown"), 2);
        assert_eq!(client.health_status().await, HealthStatus::Healthy);

        // Every initialize after the first is preceded by a shutdown
        let mut live = false;
        for method in launcher.received().iter().filter_map(|m| m.method()) {
            match method {
                "initialize" => {
                    assert!(!live, "initialize sent to a server already initialized");
                    live = true;
                }
                "shutdown" => live = false,
                _ => {}
            }
        }
        assert!(live);
    }

    #[tokio::test]
    async fn test_restart_reuses_stored_root() {
        let launcher = FakeLauncher::new();
        let client = ready_client(&launcher).await;
        client.restart(None).await.unwrap();
        let params = launcher.params_of("initialize");
        assert_eq!(params.len(), 2);
        assert_eq!(params[1]["rootUri"], "file:///work/app");
    }

    #[tokio::test]
    async fn test_request_ids_strictly_increase_across_restart() {
        let launcher = FakeLauncher::new();
        let client = ready_client(&launcher).await;
        client.hover(URI, 1, 1).await.unwrap();
        client.restart(None).await.unwrap();
        client.hover(URI, 1, 1).await.unwrap();

        let ids: Vec<u64> = launcher
            .received()
            .iter()
            .filter_map(|m| match m {
                Message::Request(r) => r.id.as_number(),
                _ => None,
            })
            .collect();
        assert!(ids.len() >= 5);
        assert!(ids.windows(2).all(|w| w[0] < w[1]), "ids {:?}", ids);
    }

    #[tokio::test]
    async fn test_server_crash_requires_restart() {
        let launcher = FakeLauncher::new();
        let client = ready_client(&launcher).await;
        client.open_document(URI, "main = pure ()", "haskell").await.unwrap();

        launcher.close();
        wait_until(|| !client.is_initialized()).await;
        assert_eq!(client.health_status().await, HealthStatus::NotRunning);
        assert!(!client.is_open(URI));
        assert!(matches!(
            client.hover(URI, 1, 1).await,
            Err(LspError::NotRunning)
        ));

        client.restart(None).await.unwrap();
        assert_eq!(client.hover(URI, 1, 1).await.unwrap(), "main :: IO ()");
    }

    #[tokio::test]
    async fn test_restart_spawn_failure_leaves_not_running() {
        let launcher = FakeLauncher::new();
        let client = ready_client(&launcher).await;
        launcher.fail_launches();
        assert!(matches!(
            client.restart(None).await,
            Err(LspError::SpawnFailure { .. })
        ));
        assert_eq!(client.health_status().await, HealthStatus::NotRunning);
    }

    #[tokio::test]
    async fn test_shutdown() {
        let launcher = FakeLauncher::new();
        let client = ready_client(&launcher).await;
        client.open_document(URI, "main = pure ()", "haskell").await.unwrap();
        client.shutdown().await.unwrap();

        assert_eq!(client.health_status().await, HealthStatus::NotRunning);
        assert!(!client.is_running().await);
        assert!(client.open_documents().is_empty());
        assert_eq!(launcher.count("shutdown"), 1);
        wait_until(|| launcher.count("exit") == 1).await;
        client.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_health_follows_lifecycle() {
        let launcher = FakeLauncher::new();
        let client = LspClient::new(Arc::clone(&launcher) as Arc<dyn ServerLauncher>, runtime());
        assert_eq!(client.health_status().await, HealthStatus::NotRunning);

        client.start(Some(Path::new("/work/app"))).await.unwrap();
        assert_eq!(client.health_status().await, HealthStatus::Initializing);
        assert!(client.capabilities().is_none());

        client.initialize(Path::new("/work/app")).await.unwrap();
        assert_eq!(client.health_status().await, HealthStatus::Healthy);
        let caps = client.capabilities().unwrap();
        assert_eq!(
            caps.server_info.map(|info| info.name).as_deref(),
            Some("haskell-language-server")
        );
    }

    #[tokio::test]
    async fn test_server_requests_are_answered() {
        let launcher = FakeLauncher::new();
        let client = ready_client(&launcher).await;
        launcher.send_raw(
            encode(&Message::Request(Request::new(
                900,
                "workspace/configuration",
                Some(json!({ "items": [{ "section": "haskell" }] })),
            )))
            .unwrap(),
        );
        wait_until(|| {
            launcher.received().iter().any(|m| {
                matches!(m, Message::Response(r) if r.id.as_ref().and_then(|id| id.as_number()) == Some(900))
            })
        })
        .await;
        assert_eq!(client.health_status().await, HealthStatus::Healthy);
    }
}
