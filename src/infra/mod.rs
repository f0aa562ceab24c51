//! Infrastructure layer for lspgate
//!
//! Contains the language server adapter and its process plumbing.

pub mod lsp;
