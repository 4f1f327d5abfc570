use thiserror::Error;

/// Engine-wide error type.
///
/// Schema and argument errors surface at call time; I/O errors during
/// materialization propagate to the caller. Panics are reserved for
/// invariant violations (engine bugs), which `Invariant` reports when the
/// condition is recoverable enough to return.
#[derive(Error, Debug)]
pub enum XFrameError {
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("out of range: {0}")]
    OutOfRange(String),

    #[error("duplicate column: {0}")]
    DuplicateColumn(String),

    #[error("not materialized: {0}")]
    NotMaterialized(String),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("invariant violation: {0}")]
    Invariant(String),
}

pub type Result<T> = std::result::Result<T, XFrameError>;
