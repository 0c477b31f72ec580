//! Error types for the windfarm-qc library.

use thiserror::Error;

/// Result type alias for quality-control operations.
pub type Result<T> = std::result::Result<T, QcError>;

/// Errors that can occur during standardization, imputation, or detection.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QcError {
    /// Signal catalog configuration is missing or unreadable. Fatal at load.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A detection mask with the given name has not been computed.
    #[error("unknown mask '{0}'")]
    UnknownMask(String),

    /// A stored mask no longer matches the shape of the current table.
    #[error("mask does not match table: {0}")]
    MaskMismatch(String),

    /// A requested column is not present in the table.
    #[error("column not found: {0}")]
    ColumnNotFound(String),

    /// A requested turbine identifier is not present in the table.
    #[error("turbine not found: {0}")]
    TurbineNotFound(String),

    /// Dimension mismatch between data structures.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Invalid parameter value.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}
