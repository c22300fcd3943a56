use thiserror::Error;

/// Failures the chat core cannot absorb on its own.
///
/// Not-found conversations, duplicate deliveries, blank messages and relay
/// disconnects are not errors; they come back as outcome values instead.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("relay connection error: {0}")]
    Connection(String),

    #[error("invalid relay url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("chat session is closed")]
    SessionClosed,
}

pub type Result<T> = std::result::Result<T, ChatError>;
