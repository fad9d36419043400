//! Error types for shardcoord

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Status returned to the caller of every coordinator command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnCode {
    Success,
    NotFound,
    Duplicate,
    Malformed,
    NoCanDo,
}

impl ReturnCode {
    pub fn is_success(&self) -> bool {
        matches!(self, ReturnCode::Success)
    }
}

impl std::fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReturnCode::Success => write!(f, "SUCCESS"),
            ReturnCode::NotFound => write!(f, "NOT_FOUND"),
            ReturnCode::Duplicate => write!(f, "DUPLICATE"),
            ReturnCode::Malformed => write!(f, "MALFORMED"),
            ReturnCode::NoCanDo => write!(f, "NO_CAN_DO"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    // === Command Errors ===
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("Malformed: {0}")]
    Malformed(String),

    #[error("No can do: {0}")]
    NoCanDo(String),

    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Snapshot Errors ===
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupted data: {0}")]
    Corrupted(String),

    #[error("Checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration source error: {0}")]
    Config(#[from] config::ConfigError),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Status code reported to the command's caller.
    ///
    /// Only the four command errors are produced by state machine handlers;
    /// everything else surfaces from the hosting side and is reported as
    /// `NO_CAN_DO`.
    pub fn return_code(&self) -> ReturnCode {
        match self {
            Error::NotFound(_) => ReturnCode::NotFound,
            Error::Duplicate(_) => ReturnCode::Duplicate,
            Error::Malformed(_) => ReturnCode::Malformed,
            _ => ReturnCode::NoCanDo,
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
