//! CLI module for lspgate
//!
//! Provides command-line interface using clap derive macros.

pub mod commands;
pub mod location;
pub mod output;

pub use location::ParsedLocation;
pub use output::OutputContext;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::{
    actions::ActionsArgs, complete::CompleteArgs, diagnostics::DiagnosticsArgs, hover::HoverArgs,
    serve::ServeArgs,
};

const LONG_ABOUT: &str = r#"
lspgate - Tool-call gateway to a language server

lspgate drives one language server (haskell-language-server by default) over
stdio and exposes hover, completion, code actions and diagnostics as simple
tool calls or one-shot commands.

QUICK START:
  1. Serve tool calls:        lspgate serve
  2. Hover a position:        lspgate hover src/Main.hs:10:5
  3. List diagnostics:        lspgate diagnostics src/Main.hs

TOOL CALLS (serve reads one JSON object per line on stdin):
  {"tool":"start_lsp","arguments":{"root_dir":"/work/app"}}
  {"tool":"get_info_on_location","arguments":{"file_path":"src/Main.hs","line":10,"column":5}}
  {"tool":"get_diagnostics"}

CONFIGURATION:
  ~/.config/lspgate/config.toml     Global settings
  <root>/.lspgate/config.toml       Project settings
  LSPGATE_SERVER, LSPGATE_TIMEOUT   Environment overrides
"#;

/// lspgate - Tool-call gateway to a language server
#[derive(Parser, Debug)]
#[command(name = "lspgate")]
#[command(author, version, about, long_about = LONG_ABOUT)]
#[command(propagate_version = true)]
#[command(after_help = "Use 'lspgate <COMMAND> --help' for more information about a command.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root handed to the server (defaults to the current directory)
    #[arg(long, global = true, env = "LSPGATE_ROOT")]
    pub root: Option<PathBuf>,

    /// Server command line, overriding the configured one
    #[arg(long, global = true)]
    pub server: Option<String>,

    /// Verbose output (debug logs on stderr)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Answer JSON tool calls read line by line from stdin
    Serve(ServeArgs),

    /// Get hover information for a position
    Hover(HoverArgs),

    /// Get completion candidates for a position
    Complete(CompleteArgs),

    /// Code actions for a position or range
    Actions(ActionsArgs),

    /// Diagnostics published for a file
    Diagnostics(DiagnosticsArgs),
}
