//! Error types shared by the session, request and live-channel layers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsoleError {
    /// Credentials rejected or token no longer accepted.
    #[error("{0}")]
    Auth(String),

    /// Non-2xx response or transport failure. The message is the server's
    /// `detail` when it sent one.
    #[error("{message}")]
    Request { status: Option<u16>, message: String },

    #[error("Live channel error: {0}")]
    Channel(String),

    #[error("Token store error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl ConsoleError {
    pub fn request(message: impl Into<String>) -> Self {
        ConsoleError::Request {
            status: None,
            message: message.into(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ConsoleError::Request { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ConsoleError {
    fn from(err: reqwest::Error) -> Self {
        ConsoleError::Request {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ConsoleError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ConsoleError::Channel(err.to_string())
    }
}

impl From<config::ConfigError> for ConsoleError {
    fn from(err: config::ConfigError) -> Self {
        ConsoleError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConsoleError>;
