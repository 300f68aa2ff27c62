//! Error types shared across the ncvoter crates

use thiserror::Error;

/// Result type alias for ncvoter operations
pub type Result<T> = std::result::Result<T, VoterError>;

/// Main error type for ncvoter
#[derive(Error, Debug)]
pub enum VoterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Voter not found: {0}")]
    VoterNotFound(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),
}
