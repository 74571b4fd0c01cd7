//! Common error types for the coach core
//!
//! The only hard failures are configuration-time: a malformed policy
//! document or an out-of-range parameter rejects construction. Noisy
//! input, partial takes, and unavailable modalities are policy
//! outcomes, not errors, and never pass through this type.

use thiserror::Error;

/// Common result type for coach operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types shared across the coach crates
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid caller input (bad exercise context, wrong lifecycle call)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O error while reading a policy document
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Policy document failed to parse as TOML
    #[error("Policy parse error: {0}")]
    PolicyParse(#[from] toml::de::Error),
}
