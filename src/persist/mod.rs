/// SQLite journal and snapshot store.
pub mod sqlite;

use thiserror::Error;

use crate::{
    core::store::{StoreError, StoreSnapshotV1},
    op::StoredOp,
    types::OpSeq,
};

/// Journal and snapshot failures.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Database error.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Payload encoding or decoding error.
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
    /// A journaled op no longer applies to the rebuilt store.
    #[error("replay rejected: {0}")]
    Replay(#[from] StoreError),
    /// Queue, worker or format failure.
    #[error("{0}")]
    Message(String),
}

/// Result alias of the persistence layer.
pub type PersistResult<T> = Result<T, PersistError>;

/// Durable destination for committed ops.
pub trait OpSink: Send {
    /// Appends ops in sequence order and returns the last sequence written.
    fn append_ops(&mut self, ops: &[StoredOp]) -> PersistResult<OpSeq>;
    /// Makes appended ops durable.
    fn flush(&mut self) -> PersistResult<()> {
        Ok(())
    }
    /// Stores a full snapshot taken at `last_seq`.
    fn write_snapshot(&mut self, _snapshot: &StoreSnapshotV1, _last_seq: OpSeq) -> PersistResult<()> {
        Ok(())
    }
    /// Drops journaled ops up to `seq`, returning how many went.
    fn compact_through(&mut self, _seq: OpSeq) -> PersistResult<usize> {
        Ok(0)
    }
}
