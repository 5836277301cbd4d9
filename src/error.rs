//! Structured error types for the accountancy ledger engine.
//!
//! Every public library function returns [`Result<T>`] which carries an
//! [`AirError`].  All failures are recoverable and reported to the caller;
//! verification outcomes (tampered / unsigned records) are data, not errors,
//! and never appear here.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Primary error enum
// ---------------------------------------------------------------------------

/// Error taxonomy of the ledger engine.
#[derive(Error, Debug)]
pub enum AirError {
    /// A write was rejected by the store (constraint violation, e.g. a
    /// duplicate batch number).  Nothing was persisted.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// Delete / restore / lookup by an id that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Snapshot backup or restore I/O failure.  The store has been returned
    /// to its prior state.
    #[error("copy failed: {0}")]
    CopyFailed(String),

    /// Malformed collaborator input (missing field, unparseable number).
    #[error("validation: {0}")]
    Validation(String),

    /// Operation not permitted in the active database context.
    #[error("context: {0}")]
    InvalidContext(String),

    #[error("config: {0}")]
    Config(String),

    /// Writing an export (manifest / CSV) failed.
    #[error("export: {0}")]
    Export(String),

    /// Direct database errors (auto-converted via `?` in the store module).
    #[error("database: {0}")]
    Database(#[from] rusqlite::Error),

    /// Catch-all for errors that do not fit a specific category.
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, AirError>;

impl AirError {
    /// Map a SQLite constraint violation to [`AirError::WriteFailed`]; pass
    /// every other database error through unchanged.
    pub fn from_write(err: rusqlite::Error, what: &str) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref code, _)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                AirError::WriteFailed(format!("{what}: {err}"))
            }
            other => AirError::Database(other),
        }
    }

    /// Whether this error left the system in its prior state and can simply be
    /// shown to the operator for correction.
    pub fn is_rejected_write(&self) -> bool {
        matches!(self, AirError::WriteFailed(_) | AirError::Validation(_))
    }
}

// ---------------------------------------------------------------------------
// Context extension trait
// ---------------------------------------------------------------------------

/// Extension trait that adds subsystem context to any `Result<T, E>`.
///
/// ```ignore
/// std::fs::create_dir_all(dir).ctx_backup("create backups dir")?;
/// ```
pub trait ResultExt<T> {
    fn ctx_store(self, msg: &str) -> Result<T>;
    fn ctx_backup(self, msg: &str) -> Result<T>;
    fn ctx_config(self, msg: &str) -> Result<T>;
    fn ctx_validation(self, msg: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn ctx_store(self, msg: &str) -> Result<T> {
        self.map_err(|e| AirError::Other(format!("store: {msg}: {e}")))
    }
    fn ctx_backup(self, msg: &str) -> Result<T> {
        self.map_err(|e| AirError::CopyFailed(format!("{msg}: {e}")))
    }
    fn ctx_config(self, msg: &str) -> Result<T> {
        self.map_err(|e| AirError::Config(format!("{msg}: {e}")))
    }
    fn ctx_validation(self, msg: &str) -> Result<T> {
        self.map_err(|e| AirError::Validation(format!("{msg}: {e}")))
    }
}

/// Same as [`ResultExt`] but for `Option<T>` (converts `None` into an error).
pub trait OptionExt<T> {
    fn required_field(self, field: &str) -> Result<T>;
    fn required_found(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn required_field(self, field: &str) -> Result<T> {
        self.ok_or_else(|| AirError::Validation(format!("missing required field '{field}'")))
    }
    fn required_found(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| AirError::NotFound(msg.to_string()))
    }
}
