use clap::Parser;

use crate::providers::Provider;

#[derive(Parser, Debug)]
#[command(name = "demoforge")]
#[command(version)]
#[command(about = "Chat-driven generator for self-contained HTML physics demos")]
pub struct Args {
    /// Prompt for a one-shot terminal generation (omit when using --web)
    pub prompt: Option<String>,

    /// Launch the web UI instead of a terminal one-shot
    #[arg(long)]
    pub web: bool,

    /// Port for the web UI server
    #[arg(long)]
    pub port: Option<u16>,

    /// LLM provider: openai or anthropic
    #[arg(long, value_enum)]
    pub provider: Option<Provider>,

    /// Model name (defaults to the provider's standard model)
    #[arg(long)]
    pub model: Option<String>,

    /// SQLite database path
    #[arg(long)]
    pub db: Option<String>,

    /// Path to a TOML config file
    #[arg(long)]
    pub config: Option<String>,

    /// Answer every turn in chat mode, never generating a demo
    #[arg(long)]
    pub chat_only: bool,

    /// Base URL of the background-knowledge service
    #[arg(long)]
    pub knowledge_url: Option<String>,
}
