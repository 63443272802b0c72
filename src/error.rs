use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// Errors caused by the query itself. Surfaced verbatim to the client.
    #[error("{0}")]
    User(String),

    #[error("SQL error: {0}")]
    Sql(String),

    #[error("column not found: {0}")]
    ColumnNotFound(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// The error a cancelled job terminates with.
    pub fn cancelled() -> Self {
        EngineError::User("Cancelled".to_string())
    }

    /// Whether the message is safe to surface to the client verbatim.
    /// Everything else is a system-side failure and gets a generic label.
    pub fn is_user(&self) -> bool {
        matches!(
            self,
            EngineError::User(_) | EngineError::Sql(_) | EngineError::ColumnNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

// Error conversions for common error types

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}

impl From<bincode::error::EncodeError> for EngineError {
    fn from(e: bincode::error::EncodeError) -> Self {
        EngineError::Serialization(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for EngineError {
    fn from(e: bincode::error::DecodeError) -> Self {
        EngineError::Serialization(e.to_string())
    }
}
