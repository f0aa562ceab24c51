//! In-process scripted language server for tests

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

use super::framer::{FrameReader, encode};
use super::process::{ServerIo, ServerLauncher};
use super::protocol::{Message, Notification, Request, Response, ResponseError};
use crate::error::LspError;

pub(crate) enum Reply {
    Result(Value),
    Error(i32, String),
    /// Never answer
    Silent,
}

pub(crate) type Behavior = Arc<dyn Fn(&Request) -> Reply + Send + Sync>;

enum Command {
    Notify(Notification),
    Raw(Vec<u8>),
    Close,
}

/// Launches [`run_server`] tasks over duplex pipes and records everything
/// the client sends, across every launch.
pub(crate) struct FakeLauncher {
    behavior: Behavior,
    received: Arc<Mutex<Vec<Message>>>,
    roots: Mutex<Vec<Option<PathBuf>>>,
    controls: Mutex<Vec<mpsc::UnboundedSender<Command>>>,
    fail: AtomicBool,
}

impl FakeLauncher {
    /// Answers like a Haskell server
    pub(crate) fn new() -> Arc<Self> {
        Self::with_behavior(Arc::new(haskell_reply))
    }

    /// Completes the lifecycle handshakes, never answers anything else
    pub(crate) fn silent() -> Arc<Self> {
        Self::with_behavior(Arc::new(|request: &Request| match request.method.as_str() {
            "initialize" | "shutdown" => haskell_reply(request),
            _ => Reply::Silent,
        }))
    }

    pub(crate) fn with_behavior(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            received: Arc::new(Mutex::new(Vec::new())),
            roots: Mutex::new(Vec::new()),
            controls: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        })
    }

    /// Make later launches fail like a missing executable
    pub(crate) fn fail_launches(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub(crate) fn launches(&self) -> usize {
        self.roots.lock().unwrap().len()
    }

    pub(crate) fn roots(&self) -> Vec<Option<PathBuf>> {
        self.roots.lock().unwrap().clone()
    }

    pub(crate) fn received(&self) -> Vec<Message> {
        self.received.lock().unwrap().clone()
    }

    /// Requests and notifications received with `method`
    pub(crate) fn count(&self, method: &str) -> usize {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.method() == Some(method))
            .count()
    }

    /// Params of every message received with `method`
    pub(crate) fn params_of(&self, method: &str) -> Vec<Value> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| match m {
                Message::Request(r) if r.method == method => r.params.clone(),
                Message::Notification(n) if n.method == method => n.params.clone(),
                _ => None,
            })
            .collect()
    }

    /// Push a notification from the latest server
    pub(crate) fn notify(&self, method: &str, params: Value) {
        self.command(Command::Notify(Notification::new(method, Some(params))));
    }

    pub(crate) fn publish_diagnostics(&self, uri: &str, messages: &[&str]) {
        let diagnostics: Vec<Value> = messages
            .iter()
            .enumerate()
            .map(|(line, message)| {
                json!({
                    "range": {
                        "start": { "line": line, "character": 0 },
                        "end": { "line": line, "character": 10 }
                    },
                    "severity": 1,
                    "source": "typecheck",
                    "message": message
                })
            })
            .collect();
        self.notify(
            "textDocument/publishDiagnostics",
            json!({ "uri": uri, "diagnostics": diagnostics }),
        );
    }

    pub(crate) fn send_raw(&self, bytes: Vec<u8>) {
        self.command(Command::Raw(bytes));
    }

    /// Latest server closes its output, as if it crashed
    pub(crate) fn close(&self) {
        self.command(Command::Close);
    }

    fn command(&self, command: Command) {
        if let Some(control) = self.controls.lock().unwrap().last() {
            let _ = control.send(command);
        }
    }
}

#[async_trait]
impl ServerLauncher for FakeLauncher {
    async fn launch(&self, root: Option<&Path>) -> Result<ServerIo, LspError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(LspError::SpawnFailure {
                command: self.describe(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
            });
        }
        self.roots.lock().unwrap().push(root.map(Path::to_path_buf));

        let (client_in, server_out) = tokio::io::duplex(256 * 1024);
        let (client_out, server_in) = tokio::io::duplex(256 * 1024);
        let (tx, rx) = mpsc::unbounded_channel();
        self.controls.lock().unwrap().push(tx);

        tokio::spawn(run_server(
            Arc::clone(&self.behavior),
            Arc::clone(&self.received),
            server_in,
            server_out,
            rx,
        ));

        Ok(ServerIo {
            reader: Box::new(client_in),
            writer: Box::new(client_out),
            child: None,
        })
    }

    fn describe(&self) -> String {
        "fake-hls".to_string()
    }
}

async fn run_server(
    behavior: Behavior,
    received: Arc<Mutex<Vec<Message>>>,
    inbound: DuplexStream,
    mut outbound: DuplexStream,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut reader = FrameReader::new(inbound);
    loop {
        tokio::select! {
            biased;
            command = commands.recv() => match command {
                Some(Command::Notify(notification)) => {
                    if write(&mut outbound, &notification.into()).await.is_err() {
                        break;
                    }
                }
                Some(Command::Raw(bytes)) => {
                    if outbound.write_all(&bytes).await.is_err() {
                        break;
                    }
                }
                Some(Command::Close) | None => break,
            },
            message = reader.next_message() => {
                let Ok(Some(message)) = message else {
                    break;
                };
                received.lock().unwrap().push(message.clone());
                match message {
                    Message::Request(request) => {
                        let response = match behavior(&request) {
                            Reply::Result(value) => Response::success(request.id, value),
                            Reply::Error(code, message) => Response::failure(
                                request.id,
                                ResponseError { code, message, data: None },
                            ),
                            Reply::Silent => continue,
                        };
                        if write(&mut outbound, &response.into()).await.is_err() {
                            break;
                        }
                    }
                    Message::Notification(notification) if notification.method == "exit" => break,
                    _ => {}
                }
            }
        }
    }
}

async fn write(outbound: &mut DuplexStream, message: &Message) -> std::io::Result<()> {
    let frame = encode(message).map_err(std::io::Error::other)?;
    outbound.write_all(&frame).await
}

pub(crate) fn haskell_reply(request: &Request) -> Reply {
    match request.method.as_str() {
        "initialize" => Reply::Result(json!({
            "capabilities": {
                "textDocumentSync": 1,
                "hoverProvider": true,
                "completionProvider": { "triggerCharacters": ["."] },
                "codeActionProvider": true
            },
            "serverInfo": { "name": "haskell-language-server", "version": "2.9.0" }
        })),
        "shutdown" => Reply::Result(Value::Null),
        "textDocument/hover" => Reply::Result(json!({
            "contents": { "kind": "markdown", "value": "main :: IO ()" }
        })),
        "textDocument/completion" => Reply::Result(json!({
            "isIncomplete": false,
            "items": [
                { "label": "putStrLn", "kind": 3, "detail": "String -> IO ()" },
                { "label": "print", "kind": 3 }
            ]
        })),
        "textDocument/codeAction" => {
            let seen = request
                .params
                .as_ref()
                .and_then(|p| p.pointer("/context/diagnostics"))
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            Reply::Result(json!([
                { "title": format!("Fix {} issues", seen), "kind": "quickfix" },
                { "title": "Run hlint", "command": "hlint.apply", "arguments": [] }
            ]))
        }
        _ => Reply::Result(Value::Null),
    }
}

/// Poll `condition` until it holds; panics after two seconds
pub(crate) async fn wait_until<F: Fn() -> bool>(condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
