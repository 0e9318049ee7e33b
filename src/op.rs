//! Mutation operation model and persistence wrappers.

use serde::{Deserialize, Serialize};

use crate::{
    model::{Collection, Document, ParticipantPatch, RacePatch},
    types::{OpSeq, ParticipantId, RaceId},
};

/// Version number for serialized [`StoredOpEnvelope`] payloads.
pub const OP_FORMAT_VERSION: u16 = 1;

/// Immutable operation appended to the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    /// Create or overwrite a document (last write wins).
    Put {
        /// Full document.
        doc: Document,
    },
    /// Sparse update of an existing participant.
    PatchParticipant {
        /// Participant to mutate.
        id: ParticipantId,
        /// Forward patch.
        patch: ParticipantPatch,
    },
    /// Sparse update of an existing race.
    PatchRace {
        /// Race to mutate.
        id: RaceId,
        /// Forward patch.
        patch: RacePatch,
    },
    /// Remove a document; removing an absent document is a no-op.
    Delete {
        /// Owning collection.
        collection: Collection,
        /// Document id.
        id: String,
    },
}

impl Op {
    /// Collection touched by this op.
    pub fn collection(&self) -> Collection {
        match self {
            Op::Put { doc } => doc.collection(),
            Op::PatchParticipant { .. } => Collection::Participants,
            Op::PatchRace { .. } => Collection::Races,
            Op::Delete { collection, .. } => *collection,
        }
    }

    /// Id of the document touched by this op.
    pub fn doc_id(&self) -> &str {
        match self {
            Op::Put { doc } => doc.id(),
            Op::PatchParticipant { id, .. } | Op::PatchRace { id, .. } => id,
            Op::Delete { id, .. } => id,
        }
    }
}

/// Journal row metadata plus operation payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredOp {
    /// Monotonic operation sequence.
    pub seq: OpSeq,
    /// Operation timestamp in milliseconds.
    pub ts_ms: u64,
    /// Operation body.
    pub op: Op,
}

/// Versioned wrapper for stable on-disk payload decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredOpEnvelope {
    /// Payload format version.
    pub format_version: u16,
    /// Wrapped operation.
    pub stored: StoredOp,
}

impl StoredOpEnvelope {
    /// Constructs an envelope using [`OP_FORMAT_VERSION`].
    pub fn new(stored: StoredOp) -> Self {
        Self {
            format_version: OP_FORMAT_VERSION,
            stored,
        }
    }
}
