// Error types shared across the crate

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// The push channel could not be opened, or dropped mid-stream.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The REST collaborator answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The stream client's dispatch task is no longer running.
    #[error("Stream client is closed")]
    ClientClosed,
}

impl AppError {
    /// Transport faults are the only errors the reconnect loop treats as transient.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Transport(_) => true,
            AppError::Http(e) => e.is_connect() || e.is_timeout() || e.is_body() || e.is_request(),
            AppError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub type AppResult<T> = std::result::Result<T, AppError>;
