//! Bulk participant import from delimited text, and leaderboard export.

use thiserror::Error;

use crate::runtime::handle::RuntimeError;

use self::mapping::ImportField;

/// Delimited-text parsing and export.
pub mod csv;
/// Header to field auto-mapping.
pub mod mapping;
/// Turning mapped rows into races and participants.
pub mod plan;

/// Reasons an import is refused or interrupted.
#[derive(Debug, Error)]
pub enum ImportError {
    /// Required fields are set to ignore.
    #[error("required fields not mapped: {missing:?}")]
    Validation {
        /// Unmapped required fields.
        missing: Vec<ImportField>,
    },
    /// Header without data rows.
    #[error("no data rows to import")]
    EmptyInput,
    /// A row without a race value and no race to fall back on.
    #[error("row {row} has no race and no race exists to fall back on")]
    NoTargetRace {
        /// 1-based data row.
        row: usize,
    },
    /// Unreadable delimited text, or an export write failure.
    #[error("malformed delimited text: {0}")]
    Csv(#[from] ::csv::Error),
    /// Commit failure.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Result alias of the import layer.
pub type ImportResult<T> = Result<T, ImportError>;
