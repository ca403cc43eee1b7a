//! Layered settings: CLI flags override the optional TOML config file,
//! which overrides built-in defaults.

use serde::Deserialize;
use std::path::Path;

use crate::cli::Args;
use crate::providers::Provider;
use crate::{DemoError, Result};

pub const DEFAULT_PORT: u16 = 8787;
pub const DEFAULT_DB_PATH: &str = "demoforge.db";

/// On-disk config file shape. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    pub provider: Option<Provider>,
    pub model: Option<String>,
    pub port: Option<u16>,
    pub db: Option<String>,
    pub chat_only: Option<bool>,
    pub knowledge_url: Option<String>,
}

impl FileConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| DemoError::Config(e.to_string()))
    }
}

/// Fully resolved settings used to wire up the application.
#[derive(Debug, Clone)]
pub struct Settings {
    pub provider: Provider,
    pub model: String,
    pub port: u16,
    pub db: String,
    pub chat_only: bool,
    pub knowledge_url: Option<String>,
}

impl Settings {
    pub fn resolve(args: &Args, file: FileConfig) -> Self {
        let provider = args
            .provider
            .or(file.provider)
            .unwrap_or(Provider::Openai);
        let model = args
            .model
            .clone()
            .or(file.model)
            .unwrap_or_else(|| provider.default_model().to_string());
        Settings {
            provider,
            model,
            port: args.port.or(file.port).unwrap_or(DEFAULT_PORT),
            db: args.db.clone().or(file.db).unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            chat_only: args.chat_only || file.chat_only.unwrap_or(false),
            knowledge_url: args.knowledge_url.clone().or(file.knowledge_url),
        }
    }
}
