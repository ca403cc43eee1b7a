use thiserror::Error;

/// Crate-level error for the generation pipeline.
#[derive(Debug, Error)]
pub enum DemoError {
    #[error("{0} not set. Export it or pass via environment.")]
    MissingApiKey(&'static str),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("storage error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("prompt must not be empty")]
    EmptyPrompt,

    #[error("unknown conversation: {0}")]
    UnknownConversation(String),

    #[error("unknown message: {0}")]
    UnknownMessage(String),

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, DemoError>;
