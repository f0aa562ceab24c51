//! Command implementations for lspgate
//!
//! Each command is implemented in its own module. One-shot commands start
//! the server, run a single tool call and print its response.

pub mod actions;
pub mod complete;
pub mod diagnostics;
pub mod hover;
pub mod serve;
