//! Service layer for lspgate

pub mod config;

pub use config::{ConfigService, DefaultConfigService};
