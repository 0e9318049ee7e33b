//! Runtime event stream payloads.

use crate::{model::Collection, types::OpSeq};

/// Events emitted from the single-writer runtime loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A committed batch touched this collection.
    Changed {
        /// Touched collection.
        collection: Collection,
        /// Last op sequence of the batch.
        seq: OpSeq,
    },
    /// Persistence has reached at least this op sequence.
    DurableUpTo {
        /// Highest sequence known durable.
        op_seq: OpSeq,
    },
    /// The durable sink rejected a batch; writes are not being persisted.
    PersistFailed {
        /// Sink error message.
        message: String,
    },
}
