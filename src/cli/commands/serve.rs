//! Serve command implementation
//!
//! Reads one JSON tool call per line on stdin and writes one compact JSON
//! response per line on stdout. Calls are answered in order. EOF on stdin
//! ends the session.

use anyhow::Result;
use clap::Args;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::app::App;
use crate::cli::OutputContext;
use crate::tools::{ToolCall, ToolResponse, Tools};

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Start the server at the workspace root before reading calls
    #[arg(long)]
    pub start: bool,
}

pub async fn execute(args: ServeArgs, app: &App) -> Result<()> {
    if args.start {
        app.connect().await?;
    }

    let stdin = BufReader::new(tokio::io::stdin());
    let handled = serve_lines(app.tools(), stdin, tokio::io::stdout()).await?;
    tracing::debug!("Session ended after {} tool calls", handled);
    Ok(())
}

/// Answer every non-blank line of `reader`; returns how many were answered
pub async fn serve_lines<R, W>(tools: &Tools, reader: R, mut writer: W) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let output = OutputContext::compact();
    let mut lines = reader.lines();
    let mut handled = 0;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<ToolCall>(line) {
            Ok(call) => tools.call(call).await,
            Err(e) => ToolResponse::err(format!("Invalid tool call: {}", e)),
        };

        writer.write_all(output.render(&response).as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        handled += 1;
    }

    Ok(handled)
}
