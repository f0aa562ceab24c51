//! Configuration service for lspgate
//!
//! Layers, lowest first: built-in defaults, global file, project file,
//! environment. Files are merged as TOML tables so a project file only
//! overrides the keys it actually sets.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::ConfigError;
use crate::models::config::GateConfig;

pub const ENV_SERVER: &str = "LSPGATE_SERVER";
pub const ENV_TIMEOUT: &str = "LSPGATE_TIMEOUT";

#[async_trait]
pub trait ConfigService: Send + Sync {
    async fn load(&self) -> Result<GateConfig, ConfigError>;
    fn config_path(&self, global: bool) -> PathBuf;
}

pub struct DefaultConfigService {
    root: PathBuf,
    global_path: PathBuf,
}

impl DefaultConfigService {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            global_path: Self::global_config_path(),
        }
    }

    /// Use a specific global file instead of the XDG location
    pub fn with_global_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.global_path = path.into();
        self
    }

    fn global_config_path() -> PathBuf {
        // XDG standard: ~/.config/lspgate/config.toml
        std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .ok()
            .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lspgate")
            .join("config.toml")
    }

    fn project_config_path(&self) -> PathBuf {
        self.root.join(".lspgate").join("config.toml")
    }

    async fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
        if !path.exists() {
            return Ok(toml::Table::new());
        }
        tracing::debug!("Loading config from {}", path.display());
        let content = tokio::fs::read_to_string(path).await?;
        content
            .parse::<toml::Table>()
            .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))
    }
}

#[async_trait]
impl ConfigService for DefaultConfigService {
    async fn load(&self) -> Result<GateConfig, ConfigError> {
        let mut table = Self::load_table(&self.config_path(true)).await?;
        let project = Self::load_table(&self.config_path(false)).await?;
        merge_tables(&mut table, project);

        let config: GateConfig = toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse(e.to_string()))?;
        let config = apply_env_overrides(config, |key| std::env::var(key).ok())?;
        validate(&config)?;
        Ok(config)
    }

    fn config_path(&self, global: bool) -> PathBuf {
        if global {
            self.global_path.clone()
        } else {
            self.project_config_path()
        }
    }
}

/// Recursively overlay `overlay` onto `base`; tables merge, values replace
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

fn apply_env_overrides<F>(mut config: GateConfig, lookup: F) -> Result<GateConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup(ENV_SERVER).filter(|v| !v.trim().is_empty()) {
        config.server.command = val.trim().to_string();
    }
    if let Some(val) = lookup(ENV_TIMEOUT) {
        config.lsp.timeout_secs = val.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: ENV_TIMEOUT.to_string(),
            message: format!("expected whole seconds, got {:?}", val),
        })?;
    }
    Ok(config)
}

fn validate(config: &GateConfig) -> Result<(), ConfigError> {
    if config.server.command.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            key: "server.command".to_string(),
            message: "must not be empty".to_string(),
        });
    }
    if config.lsp.timeout_secs == 0 {
        return Err(ConfigError::InvalidValue {
            key: "lsp.timeout_secs".to_string(),
            message: "must be at least 1".to_string(),
        });
    }
    Ok(())
}
