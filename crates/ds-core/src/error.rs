//! Error taxonomy for ducksearch
//!
//! Every user-visible failure carries one of the stable bracketed codes so
//! that callers (HTTP clients, the lint command, tests) can match on the
//! code without parsing message text.

use thiserror::Error;

/// Core error type for ducksearch
#[derive(Error, Debug)]
pub enum CoreError {
    /// Registry lookup miss
    #[error("[ReportNotFound] no report named '{report}'")]
    ReportNotFound { report: String },

    /// YAML or schema error in a metadata block
    #[error("[InvalidMetadataBlock] {block}: {detail}")]
    InvalidMetadataBlock { block: String, detail: String },

    /// DDL/DML keywords or multiple statements in the report SQL
    #[error("[ForbiddenSqlConstruct] {detail}")]
    ForbiddenSqlConstruct { detail: String },

    /// Malformed `{{...}}` token or unknown placeholder kind
    #[error("[InvalidPlaceholder] {detail} at line {line}")]
    InvalidPlaceholder { detail: String, line: usize },

    /// A parquet_scan path built from expressions or concatenation
    #[error("[IllegalScanPath] {detail} at line {line}")]
    IllegalScanPath { detail: String, line: usize },

    /// Placeholder or metadata entry referencing an unknown entity
    #[error("[UndeclaredName] {kind} '{name}' is not declared")]
    UndeclaredName { kind: String, name: String },

    /// Cycle in the import (or plan dependency) graph
    #[error("[ImportCycle] dependency cycle: {cycle}")]
    ImportCycle { cycle: String },

    /// Two incoming query keys fold to the same scalar parameter
    #[error("[DuplicateParamCasing] parameter '{name}' supplied with conflicting casings")]
    DuplicateParamCasing { name: String },

    /// Value failed type or literal-set coercion
    #[error("[BadParamType] parameter '{param}': {detail}")]
    BadParamType { param: String, detail: String },

    /// `__client__` routing requested for a data-scoped parameter
    #[error("[BadScopeRouting] parameter '{param}' is data-scoped and cannot be client-routed")]
    BadScopeRouting { param: String },

    /// A plan node exceeded its hard build deadline
    #[error("[BuildTimeout] node '{node}' exceeded its build deadline")]
    BuildTimeout { node: String },

    /// The engine rejected the resolved SQL
    #[error("[SqlExecutionError] report '{report}', node '{node}': {detail}")]
    SqlExecutionError {
        report: String,
        node: String,
        detail: String,
    },

    /// Transient engine failure (connection, resource exhaustion)
    #[error("[EngineUnavailable] {detail}")]
    EngineUnavailable { detail: String },

    /// Artifact publish failed or published bytes are inconsistent
    #[error("[CacheCorrupt] {detail}")]
    CacheCorrupt { detail: String },

    /// Config file not found under the root
    #[error("[ConfigError] config file not found: {path}")]
    ConfigNotFound { path: String },

    /// Failed to parse config.toml
    #[error("[ConfigError] failed to parse config: {detail}")]
    ConfigParse { detail: String },

    /// Structurally valid config with an invalid value
    #[error("[ConfigError] invalid config: {detail}")]
    ConfigInvalid { detail: String },

    /// Required root paths are missing
    #[error("[RootLayout] missing required paths: {missing}")]
    RootLayout { missing: String },

    /// Another process owns the cache directory
    #[error("[CacheLocked] cache is locked by another process: {path}")]
    CacheLocked { path: String },

    /// A declared secret has no value in the environment or sidecar file
    #[error("[SecretUnavailable] no value for secret '{name}'")]
    SecretUnavailable { name: String },

    /// IO error
    #[error("[Io] {0}")]
    Io(#[from] std::io::Error),

    /// IO error with file path context
    #[error("[Io] failed to access '{path}': {source}")]
    IoWithPath {
        path: String,
        source: std::io::Error,
    },
}

impl CoreError {
    /// Stable error code for HTTP bodies and lint output.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::ReportNotFound { .. } => "ReportNotFound",
            CoreError::InvalidMetadataBlock { .. } => "InvalidMetadataBlock",
            CoreError::ForbiddenSqlConstruct { .. } => "ForbiddenSqlConstruct",
            CoreError::InvalidPlaceholder { .. } => "InvalidPlaceholder",
            CoreError::IllegalScanPath { .. } => "IllegalScanPath",
            CoreError::UndeclaredName { .. } => "UndeclaredName",
            CoreError::ImportCycle { .. } => "ImportCycle",
            CoreError::DuplicateParamCasing { .. } => "DuplicateParamCasing",
            CoreError::BadParamType { .. } => "BadParamType",
            CoreError::BadScopeRouting { .. } => "BadScopeRouting",
            CoreError::BuildTimeout { .. } => "BuildTimeout",
            CoreError::SqlExecutionError { .. } => "SqlExecutionError",
            CoreError::EngineUnavailable { .. } => "EngineUnavailable",
            CoreError::CacheCorrupt { .. } => "CacheCorrupt",
            CoreError::ConfigNotFound { .. }
            | CoreError::ConfigParse { .. }
            | CoreError::ConfigInvalid { .. } => "ConfigError",
            CoreError::RootLayout { .. } => "RootLayout",
            CoreError::CacheLocked { .. } => "CacheLocked",
            CoreError::SecretUnavailable { .. } => "SecretUnavailable",
            CoreError::Io(_) | CoreError::IoWithPath { .. } => "Io",
        }
    }

    /// HTTP status for this error when surfaced by the server.
    pub fn http_status(&self) -> u16 {
        match self {
            CoreError::ReportNotFound { .. } => 404,
            CoreError::InvalidMetadataBlock { .. }
            | CoreError::ForbiddenSqlConstruct { .. }
            | CoreError::InvalidPlaceholder { .. }
            | CoreError::IllegalScanPath { .. }
            | CoreError::UndeclaredName { .. }
            | CoreError::ImportCycle { .. }
            | CoreError::DuplicateParamCasing { .. }
            | CoreError::BadParamType { .. }
            | CoreError::BadScopeRouting { .. } => 400,
            CoreError::SqlExecutionError { .. } => 422,
            CoreError::BuildTimeout { .. } => 504,
            CoreError::EngineUnavailable { .. } => 503,
            _ => 500,
        }
    }
}

/// Result type alias for CoreError
pub type CoreResult<T> = Result<T, CoreError>;
