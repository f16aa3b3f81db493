//! Application-wide error types.

use thiserror::Error;

use crate::transport::ApiError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("bad argument: {0}")]
    BadArgument(String),

    #[error("bad handler: {0}")]
    BadHandler(String),

    #[error("bad keyword: {0}")]
    BadKeyword(String),

    #[error("supervisor already initialized")]
    AlreadyInitialized,

    #[error("supervisor not initialized")]
    NotInitialized,

    #[error("supervisor is shutting down")]
    ShuttingDown,

    #[error("no valid channels ({skipped} skipped)")]
    NoValidChannels { skipped: usize },

    #[error("no teams connected ({failed} failed)")]
    NoTeamsConnected { failed: usize },

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
