//! Error handling module for tri-install
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Each stage of the pipeline has its own error type; `InstallError` wraps them
//! for callers that drive the whole flow.

use crate::engine::compiler::CompileError;
use crate::engine::storage::ValidationError;
use crate::installer::SupervisorError;
use thiserror::Error;

/// Main error type for tri-install
#[derive(Error, Debug)]
pub enum InstallError {
    /// IO errors (plan files, catalogs, engine config)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Plan does not fit the devices present on the host
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Plan is not in a compilable state
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// Supervisor protocol misuse or engine failure
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    /// Catalog or plan content that cannot be interpreted
    #[error("Catalog error: {0}")]
    Catalog(String),
}

/// Result type alias for tri-install operations
pub type Result<T> = std::result::Result<T, InstallError>;

impl InstallError {
    /// Create a catalog error
    pub fn catalog(msg: impl Into<String>) -> Self {
        Self::Catalog(msg.into())
    }
}
