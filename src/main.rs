//! lspgate - Tool-call gateway to a language server
//!
//! Logs go to stderr; stdout carries only JSON responses.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lspgate::app::App;
use lspgate::cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();

    // Quiet by default; RUST_LOG=lspgate=trace shows every frame
    let default_filter = if cli.verbose {
        "lspgate=debug"
    } else {
        "lspgate=warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!(
                r#"{{"success":false,"error":"Failed to create runtime: {}"}}"#,
                e
            );
            std::process::exit(1);
        }
    };
    let result = runtime.block_on(async_main(cli));

    if let Err(e) = result {
        let response = serde_json::json!({
            "success": false,
            "error": e.to_string()
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&response)
                .unwrap_or_else(|_| format!(r#"{{"success":false,"error":"{}"}}"#, e))
        );
        std::process::exit(2);
    }
}

async fn async_main(cli: Cli) -> anyhow::Result<()> {
    let root = resolve_root(cli.root)?;
    let app = App::new(root, cli.server.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize: {}", e))?;

    let result = execute_command(cli.command, &app).await;
    app.shutdown().await;
    result
}

fn resolve_root(root: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    Ok(match root {
        Some(root) if root.is_absolute() => root,
        Some(root) => cwd.join(root),
        None => cwd,
    })
}

async fn execute_command(command: Commands, app: &App) -> anyhow::Result<()> {
    use lspgate::cli::commands;

    match command {
        Commands::Serve(args) => commands::serve::execute(args, app).await,
        Commands::Hover(args) => commands::hover::execute(args, app).await,
        Commands::Complete(args) => commands::complete::execute(args, app).await,
        Commands::Actions(args) => commands::actions::execute(args, app).await,
        Commands::Diagnostics(args) => commands::diagnostics::execute(args, app).await,
    }
}
