//! Common error types for WDKP

use crate::ingest::BuildError;
use crate::residency::ResidencyError;
use crate::store::StoreError;
use thiserror::Error;

/// Common result type for WDKP operations
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-level error, wrapping each component's own error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Ingestion stage failed
    #[error("Ingest error: {0}")]
    Build(#[from] BuildError),

    /// Store query or snapshot error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Residency manager error
    #[error("Residency error: {0}")]
    Residency(#[from] ResidencyError),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),
}
