//! Diagnostics command implementation
//!
//! Opens the file, lets the server publish for a while, then prints what
//! arrived. Servers push diagnostics on their own schedule, so the wait is
//! a best effort.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Args;
use serde_json::json;

use crate::app::App;
use crate::tools::ToolCall;

#[derive(Args, Debug)]
pub struct DiagnosticsArgs {
    /// File path to check
    pub file: PathBuf,

    /// How long to collect published diagnostics, in milliseconds
    #[arg(long, default_value_t = 3000)]
    pub wait_ms: u64,
}

pub async fn execute(args: DiagnosticsArgs, app: &App) -> Result<()> {
    let file = if args.file.is_absolute() {
        args.file.clone()
    } else {
        std::env::current_dir()?.join(&args.file)
    };
    if !file.is_file() {
        bail!("File not found: {}", file.display());
    }
    app.connect().await?;

    let opened = app
        .tools()
        .call(ToolCall::new("open_document", json!({ "file_path": file })))
        .await;
    if !opened.success {
        app.output.print_response(&opened);
        return Ok(());
    }

    tracing::debug!("Collecting diagnostics for {}ms", args.wait_ms);
    tokio::time::sleep(Duration::from_millis(args.wait_ms)).await;

    let call = ToolCall::new("get_diagnostics", json!({ "file_path": file }));
    app.output.print_response(&app.tools().call(call).await);
    Ok(())
}
