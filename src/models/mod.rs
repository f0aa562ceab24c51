//! Domain models for lspgate

pub mod config;
pub mod lsp;

pub use config::{GateConfig, LspConfig, ServerSettings};
pub use lsp::{Position, Range, path_to_uri, uri_to_path};
