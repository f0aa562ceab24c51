//! LSP Infrastructure for lspgate
//!
//! Drives one language server over stdio:
//! - JSON-RPC 2.0 protocol types and Content-Length framing
//! - Request dispatcher with per-request timeouts and id correlation
//! - Notification router feeding the diagnostics cache
//! - Document store for open files
//! - Process supervisor with generation-checked teardown and restart
//! - Client facade composing the above

pub mod client;
pub mod dispatcher;
pub mod documents;
pub mod framer;
pub mod process;
pub mod protocol;
pub mod router;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{HealthStatus, LspClient};
pub use dispatcher::Dispatcher;
pub use documents::{DocumentState, DocumentStore};
pub use framer::{FrameDecoder, FrameReader, FrameWriter};
pub use process::{ExitReason, ProcessLauncher, ProcessState, ServerIo, ServerLauncher, Supervisor};
pub use router::NotificationRouter;
