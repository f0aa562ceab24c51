//! Actions command implementation
//!
//! List the code actions the server offers for a position or range.
//! Cached diagnostics overlapping the range are sent along, so quickfixes
//! show up once the server has published them.

use anyhow::Result;
use clap::Args;
use serde_json::json;

use crate::app::App;
use crate::cli::ParsedLocation;
use crate::cli::location::parse_line_col;
use crate::tools::ToolCall;

#[derive(Args, Debug)]
pub struct ActionsArgs {
    /// Range start (file:line[:column])
    pub location: String,

    /// Range end as LINE:COL (defaults to the start)
    #[arg(long)]
    pub end: Option<String>,
}

pub async fn execute(args: ActionsArgs, app: &App) -> Result<()> {
    let loc = ParsedLocation::parse_absolute(&args.location)?;
    let (end_line, end_column) = match args.end.as_deref() {
        Some(end) => parse_line_col(end)?,
        None => (loc.line, loc.column),
    };
    app.connect().await?;

    let call = ToolCall::new(
        "get_code_actions",
        json!({
            "file_path": loc.file,
            "start_line": loc.line,
            "start_column": loc.column,
            "end_line": end_line,
            "end_column": end_column,
        }),
    );
    app.output.print_response(&app.tools().call(call).await);
    Ok(())
}
