//! Process Supervisor
//!
//! Spawns the language server, wires its stdio to the framer, runs one reader
//! task per process generation and tears the connection down when the server
//! goes away. A reader from a retired generation never touches a newer one.

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::dispatcher::Dispatcher;
use super::documents::DocumentStore;
use super::framer::{BoxedReader, BoxedWriter, FrameReader};
use super::protocol::Message;
use super::router::NotificationRouter;
use crate::config::RuntimeConfig;
use crate::error::LspError;

/// Streams of a freshly launched server
pub struct ServerIo {
    /// Server stdout
    pub reader: BoxedReader,
    /// Server stdin
    pub writer: BoxedWriter,
    /// `None` when the server is not an OS process
    pub child: Option<Child>,
}

#[async_trait]
pub trait ServerLauncher: Send + Sync {
    async fn launch(&self, root: Option<&Path>) -> Result<ServerIo, LspError>;

    /// Human readable command line for logs
    fn describe(&self) -> String;
}

/// Launches the server as a child process; command and args are fixed at
/// construction and reused for every restart.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    command: String,
    args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    fn missing_pipe(&self, name: &str) -> LspError {
        LspError::SpawnFailure {
            command: self.command.clone(),
            source: std::io::Error::other(format!("{} not captured", name)),
        }
    }
}

#[async_trait]
impl ServerLauncher for ProcessLauncher {
    async fn launch(&self, root: Option<&Path>) -> Result<ServerIo, LspError> {
        let mut command = Command::new(&self.command);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(root) = root.filter(|r| r.is_dir()) {
            command.current_dir(root);
        }

        let mut child = command.spawn().map_err(|source| LspError::SpawnFailure {
            command: self.command.clone(),
            source,
        })?;

        let stdin = child.stdin.take().ok_or_else(|| self.missing_pipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.missing_pipe("stdout"))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(self.command.clone(), stderr));
        }

        Ok(ServerIo {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            child: Some(child),
        })
    }

    fn describe(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }
}

async fn forward_stderr(name: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!("{} stderr: {}", name, line);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProcessState {
    Starting = 0,
    Running = 1,
    /// A stop is in progress, for a restart or a final shutdown
    Restarting = 2,
    /// No live server; also the initial state
    Exited = 3,
}

impl ProcessState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Starting,
            1 => Self::Running,
            2 => Self::Restarting,
            _ => Self::Exited,
        }
    }

    fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Why a connection ended without being asked to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// Server closed stdout
    StreamClosed,
    /// Unreadable or corrupted stream
    ReadFailed(String),
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StreamClosed => write!(f, "server closed its output"),
            Self::ReadFailed(e) => write!(f, "read failed: {}", e),
        }
    }
}

type ExitHook = Box<dyn Fn(&ExitReason) + Send + Sync>;

/// State shared with the reader task
struct Shared {
    dispatcher: Arc<Dispatcher>,
    documents: Arc<DocumentStore>,
    router: NotificationRouter,
    child: AsyncMutex<Option<Child>>,
    state: AtomicU8,
    generation: AtomicU64,
    /// Serializes start, stop and teardown
    lifecycle: AsyncMutex<()>,
    exit_hooks: Mutex<Vec<ExitHook>>,
}

impl Shared {
    fn state(&self) -> ProcessState {
        ProcessState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ProcessState) {
        self.state.store(state.to_u8(), Ordering::Release);
    }

    fn hooks(&self) -> MutexGuard<'_, Vec<ExitHook>> {
        self.exit_hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Unsolicited end of a connection. Ignored for retired generations.
    async fn teardown(&self, generation: u64, reason: ExitReason) {
        let _guard = self.lifecycle.lock().await;
        if self.generation.load(Ordering::Acquire) != generation {
            tracing::debug!(
                "Reader for retired generation {} ended: {}",
                generation,
                reason
            );
            return;
        }

        tracing::warn!("Language server connection lost: {}", reason);
        self.set_state(ProcessState::Exited);
        self.dispatcher.detach().await;
        let failed = self.dispatcher.fail_all("server terminated");
        if failed > 0 {
            tracing::warn!("{} requests failed: server terminated", failed);
        }
        self.documents.clear();

        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                tracing::debug!("Killing exited server: {}", e);
            }
        }

        for hook in self.hooks().iter() {
            hook(&reason);
        }
    }
}

async fn read_loop(shared: Arc<Shared>, mut reader: FrameReader<BoxedReader>, generation: u64) {
    let reason = loop {
        match reader.next_message().await {
            Ok(Some(Message::Response(response))) => shared.dispatcher.resolve(response),
            Ok(Some(Message::Notification(notification))) => shared
                .router
                .dispatch(&notification.method, notification.params),
            Ok(Some(Message::Request(request))) => {
                let response = shared.router.answer(&request);
                let dispatcher = Arc::clone(&shared.dispatcher);
                // Replying must not stall the read side behind a caller's write.
                tokio::spawn(async move {
                    if let Err(e) = dispatcher.reply(response).await {
                        tracing::debug!("Reply to '{}' not sent: {}", request.method, e);
                    }
                });
            }
            Ok(None) => break ExitReason::StreamClosed,
            Err(e) => {
                tracing::error!("LSP read error: {}", e);
                break ExitReason::ReadFailed(e.to_string());
            }
        }
    };
    shared.teardown(generation, reason).await;
}

pub struct Supervisor {
    shared: Arc<Shared>,
    launcher: Arc<dyn ServerLauncher>,
    runtime: RuntimeConfig,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    pub fn new(
        launcher: Arc<dyn ServerLauncher>,
        dispatcher: Arc<Dispatcher>,
        documents: Arc<DocumentStore>,
        runtime: RuntimeConfig,
    ) -> Self {
        let shared = Shared {
            router: NotificationRouter::new(Arc::clone(&documents)),
            dispatcher,
            documents,
            child: AsyncMutex::new(None),
            state: AtomicU8::new(ProcessState::Exited.to_u8()),
            generation: AtomicU64::new(0),
            lifecycle: AsyncMutex::new(()),
            exit_hooks: Mutex::new(Vec::new()),
        };
        Self {
            shared: Arc::new(shared),
            launcher,
            runtime,
            reader_task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ProcessState {
        self.shared.state()
    }

    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::Acquire)
    }

    /// Register a callback for unsolicited exits. Not called on stop.
    pub fn on_exit<F>(&self, hook: F)
    where
        F: Fn(&ExitReason) + Send + Sync + 'static,
    {
        self.shared.hooks().push(Box::new(hook));
    }

    /// Running and, for an OS process, not yet exited
    pub async fn is_running(&self) -> bool {
        if self.state() != ProcessState::Running {
            return false;
        }
        let mut child = self.shared.child.lock().await;
        match child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => true,
        }
    }

    /// Spawn the server and start reading. No-op when already running.
    pub async fn start(&self, root: Option<&Path>) -> Result<(), LspError> {
        let _guard = self.shared.lifecycle.lock().await;
        if self.state() == ProcessState::Running {
            tracing::debug!("Language server already running");
            return Ok(());
        }

        self.shared.set_state(ProcessState::Starting);
        tracing::info!("Starting language server: {}", self.launcher.describe());

        let io = match self.launcher.launch(root).await {
            Ok(io) => io,
            Err(e) => {
                self.shared.set_state(ProcessState::Exited);
                tracing::error!("{}", e);
                return Err(e);
            }
        };

        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *self.shared.child.lock().await = io.child;
        self.shared.dispatcher.attach(io.writer).await;

        let handle = tokio::spawn(read_loop(
            Arc::clone(&self.shared),
            FrameReader::new(io.reader),
            generation,
        ));
        if let Some(old) = self.reader_slot().replace(handle) {
            old.abort();
        }

        self.shared.set_state(ProcessState::Running);
        tracing::info!("Language server started (generation {})", generation);
        Ok(())
    }

    /// Shutdown handshake, then kill if needed, fail in-flight requests and
    /// forget all documents. Exit hooks are not called.
    pub async fn stop(&self) -> Result<(), LspError> {
        let _guard = self.shared.lifecycle.lock().await;
        if self.state() == ProcessState::Exited {
            tracing::debug!("Language server not running, nothing to stop");
            return Ok(());
        }

        self.shared.set_state(ProcessState::Restarting);
        // Retire the current reader before the server closes its output.
        self.shared.generation.fetch_add(1, Ordering::AcqRel);

        let dispatcher = &self.shared.dispatcher;
        let grace = self.runtime.shutdown_grace;
        // A server that answered, even with an error, is still reading stdin.
        let graceful = match dispatcher.send("shutdown", None, grace).await {
            Ok(_) => true,
            Err(e @ LspError::ServerError { .. }) => {
                tracing::debug!("LSP shutdown request failed: {}", e);
                true
            }
            Err(e) => {
                tracing::warn!("Language server did not take shutdown ({}), forcing kill", e);
                false
            }
        };
        if graceful && let Err(e) = dispatcher.notify_within("exit", None, grace).await {
            tracing::debug!("LSP exit notification failed: {}", e);
        }
        dispatcher.detach().await;

        if let Some(mut child) = self.shared.child.lock().await.take() {
            let exited = if graceful {
                match timeout(self.runtime.exit_wait, child.wait()).await {
                    Ok(Ok(status)) => {
                        tracing::debug!("Language server exited: {:?}", status);
                        true
                    }
                    Ok(Err(e)) => {
                        tracing::warn!("Language server wait error: {}", e);
                        false
                    }
                    Err(_) => {
                        tracing::warn!("Language server termination timed out, forcing kill");
                        false
                    }
                }
            } else {
                false
            };
            if !exited && let Err(e) = child.kill().await {
                tracing::warn!("Failed to kill language server: {}", e);
            }
        }

        if let Some(handle) = self.reader_slot().take() {
            handle.abort();
        }

        let failed = dispatcher.fail_all("server stopped");
        if failed > 0 {
            tracing::debug!("{} requests closed by stop", failed);
        }
        self.shared.documents.clear();
        self.shared.set_state(ProcessState::Exited);
        tracing::info!("Language server stopped");
        Ok(())
    }

    /// Stop then start against `root`
    pub async fn restart(&self, root: Option<&Path>) -> Result<(), LspError> {
        self.stop().await?;
        self.start(root).await
    }

    fn reader_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.reader_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Some(handle) = self.reader_slot().take() {
            handle.abort();
        }
        match self.shared.child.try_lock() {
            Ok(mut guard) => {
                if let Some(child) = guard.as_mut() {
                    let _ = child.start_kill();
                    tracing::debug!("Supervisor dropped, language server killed");
                }
            }
            Err(_) => {
                tracing::warn!("Supervisor dropped while server handle was busy; relying on kill_on_drop");
            }
        }
    }
}
