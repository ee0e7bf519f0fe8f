//! Engine error types

use thiserror::Error;

/// Errors surfaced by the engine layer. The runtime classifies
/// `Connection` as transient (retry once) and `Execution` as user-caused.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Failed to open or hand out an engine connection
    #[error("engine connection failed: {0}")]
    Connection(String),

    /// The engine rejected a statement
    #[error("engine execution failed: {0}")]
    Execution(String),
}

/// Result type alias for EngineError
pub type EngineResult<T> = Result<T, EngineError>;

/// Extension trait for converting `duckdb::Error` into `EngineResult`.
///
/// Reduces boilerplate when propagating engine errors through the crate.
pub(crate) trait DuckResultExt<T> {
    fn to_engine_err(self) -> EngineResult<T>;
}

impl<T> DuckResultExt<T> for Result<T, duckdb::Error> {
    fn to_engine_err(self) -> EngineResult<T> {
        self.map_err(|e| EngineError::Execution(e.to_string()))
    }
}
