use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("date/time parse error: {0}")]
    DateParse(String),

    /// A stored or user-supplied fact id could not be decoded.
    #[error("malformed fact id {id:?}: {reason}")]
    MalformedFactId { id: String, reason: &'static str },

    #[error("unknown operation: {0:?}")]
    UnknownOperation(String),

    #[error("unknown level: {0}")]
    UnknownLevel(String),

    #[error("unknown strategy: {0:?}")]
    UnknownStrategy(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("user not found: {0}")]
    UserNotFound(i64),

    #[error("practice session has not been initialized")]
    NotInitialized,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
