//! lspgate - Tool-call gateway to a language server
//!
//! Spawns and supervises one language server process, speaks JSON-RPC to it
//! over stdio, and exposes hover, completion, code actions and diagnostics
//! as plain operations and JSON tool calls.

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod infra;
pub mod models;
pub mod services;
pub mod tools;

pub use error::{GateError, GateResult};
