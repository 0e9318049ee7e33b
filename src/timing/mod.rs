//! Operator-side timing: capture queue, recording contexts, passage planning,
//! race lifecycle control and marshal presence.

use thiserror::Error;

use crate::{
    runtime::handle::RuntimeError,
    types::{ParticipantStatus, RaceStatus},
};

/// Timestamp capture queue local to one operator session.
pub mod capture;
/// Combined-post bib resolution.
pub mod combined;
/// Recording contexts and shareable link fragments.
pub mod context;
/// Race and participant lifecycle operations.
pub mod lifecycle;
/// Marshal heartbeat documents and liveness classification.
pub mod presence;
/// Passage planning from bib, context and timestamp.
pub mod recorder;
/// Operator session tying the queue, recorder and store together.
pub mod session;

/// Refusals and failures of timing operations.
#[derive(Debug, Error)]
pub enum TimingError {
    /// No participant carries the bib in the searched scope.
    #[error("bib {bib} not found")]
    BibNotFound {
        /// Bib as typed, trimmed.
        bib: String,
    },
    /// The participant's race has no assignment on the combined post.
    #[error("bib {bib} runs a race not served by combined post {post_id}")]
    BibNotCovered {
        /// Bib as typed, trimmed.
        bib: String,
        /// Post the operator is recording on.
        post_id: String,
    },
    /// Passages are only accepted while the race runs.
    #[error("race {race_id} is not running ({status:?})")]
    RaceNotRunning {
        /// Race of the participant.
        race_id: String,
        /// Its current status.
        status: RaceStatus,
    },
    /// Lifecycle action not allowed from the race's status.
    #[error("race {race_id} cannot {action} from {status:?}")]
    InvalidTransition {
        /// Target race.
        race_id: String,
        /// Status at the time of the request.
        status: RaceStatus,
        /// Refused action, e.g. `start`.
        action: &'static str,
    },
    /// Participant action not allowed from the participant's status or race.
    #[error("participant {participant_id} cannot {action} while {status:?}")]
    InvalidParticipantState {
        /// Target participant.
        participant_id: String,
        /// Status at the time of the request.
        status: ParticipantStatus,
        /// Refused action.
        action: &'static str,
    },
    /// Race id not in the store.
    #[error("unknown race {0}")]
    UnknownRace(String),
    /// Participant id not in the store.
    #[error("unknown participant {0}")]
    UnknownParticipant(String),
    /// Passage id not in the store.
    #[error("unknown passage {0}")]
    UnknownPassage(String),
    /// Combined post id not in the store.
    #[error("unknown combined post {0}")]
    UnknownCombinedPost(String),
    /// Store read or write failure.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl TimingError {
    /// Store-level failures belong in the session banner; the rest are input errors.
    pub fn is_global(&self) -> bool {
        match self {
            Self::Runtime(err) => err.is_global(),
            _ => false,
        }
    }
}

/// Result alias of the timing layer.
pub type TimingResult<T> = Result<T, TimingError>;
