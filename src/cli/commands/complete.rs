//! Complete command implementation

use anyhow::Result;
use clap::Args;
use serde_json::json;

use crate::app::App;
use crate::cli::ParsedLocation;
use crate::tools::ToolCall;

#[derive(Args, Debug)]
pub struct CompleteArgs {
    /// File path with position (file:line[:column])
    pub location: String,
}

pub async fn execute(args: CompleteArgs, app: &App) -> Result<()> {
    let loc = ParsedLocation::parse_absolute(&args.location)?;
    app.connect().await?;

    let call = ToolCall::new(
        "get_completions",
        json!({ "file_path": loc.file, "line": loc.line, "column": loc.column }),
    );
    app.output.print_response(&app.tools().call(call).await);
    Ok(())
}
