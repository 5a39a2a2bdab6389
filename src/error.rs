use thiserror::Error;

pub type Result<T> = std::result::Result<T, BotError>;

#[derive(Debug, Error)]
pub enum BotError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("language model error: {0}")]
    LanguageModel(String),

    #[error("weather lookup error: {0}")]
    Weather(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("`{operation}` timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
