//! Application container for lspgate

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cli::OutputContext;
use crate::config::RuntimeConfig;
use crate::error::GateResult;
use crate::infra::lsp::{LspClient, ProcessLauncher, ServerLauncher};
use crate::models::config::GateConfig;
use crate::services::config::{ConfigService, DefaultConfigService};
use crate::tools::Tools;

pub struct App {
    root: PathBuf,
    pub(crate) output: OutputContext,
    config: GateConfig,
    client: Arc<LspClient>,
    tools: Tools,
}

impl App {
    /// Load layered config for `root` and build the client. `server`
    /// replaces the configured command line when given.
    pub async fn new(root: PathBuf, server: Option<&str>) -> GateResult<Self> {
        tracing::debug!("Initializing lspgate at {:?}", root);

        let config_service = DefaultConfigService::new(&root);
        let mut config = config_service.load().await?;
        if let Some(server) = server {
            apply_server_override(&mut config, server);
        }

        let launcher = Arc::new(ProcessLauncher::new(
            config.server.command.clone(),
            config.server.args.clone(),
        ));
        Ok(Self::with_launcher(root, config, launcher))
    }

    pub fn with_launcher(
        root: PathBuf,
        config: GateConfig,
        launcher: Arc<dyn ServerLauncher>,
    ) -> Self {
        tracing::info!("Language server: {}", launcher.describe());
        let client = Arc::new(LspClient::new(launcher, RuntimeConfig::from(&config)));
        let tools = Tools::new(Arc::clone(&client), config.server.language_id.clone());
        Self {
            root,
            output: OutputContext::new(),
            config,
            client,
            tools,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn client(&self) -> &Arc<LspClient> {
        &self.client
    }

    pub fn tools(&self) -> &Tools {
        &self.tools
    }

    /// Start the server at the workspace root and complete the handshake
    pub async fn connect(&self) -> GateResult<()> {
        self.client.start(Some(&self.root)).await?;
        self.client.initialize(&self.root).await?;
        Ok(())
    }

    /// Stop a running server; failures are logged, not returned
    pub async fn shutdown(&self) {
        if !self.client.is_running().await {
            return;
        }
        if let Err(e) = self.client.shutdown().await {
            tracing::warn!("Language server shutdown failed: {}", e);
        }
    }
}

/// `--server "hls --lsp -d"` sets both command and args
fn apply_server_override(config: &mut GateConfig, server: &str) {
    let mut parts = server.split_whitespace().map(str::to_string);
    if let Some(command) = parts.next() {
        config.server.command = command;
        config.server.args = parts.collect();
    }
}
