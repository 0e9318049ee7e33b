//! Shared primitive IDs, reserved constants, and lifecycle enums.

use serde::{Deserialize, Serialize};

/// Document identifier of a race.
pub type RaceId = String;
/// Document identifier of a participant.
pub type ParticipantId = String;
/// Document identifier of a passage.
pub type PassageId = String;
/// Checkpoint identifier, unique within its race.
pub type CheckpointId = String;
/// Document identifier of a combined post.
pub type CombinedPostId = String;
/// Monotonic operation sequence number.
pub type OpSeq = u64;
/// Milliseconds since the Unix epoch.
pub type EpochMs = u64;

/// Reserved virtual checkpoint id present in every race.
pub const FINISH_CHECKPOINT_ID: &str = "finish";

/// Returns true when `checkpoint_id` is the reserved finish checkpoint.
pub fn is_finish(checkpoint_id: &str) -> bool {
    checkpoint_id == FINISH_CHECKPOINT_ID
}

/// Start procedure of a race.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RaceType {
    /// Mass start, everybody shares the race start time.
    #[default]
    Group,
    /// Individual starts, participants may carry their own start time.
    TimeTrial,
}

/// Race lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RaceStatus {
    /// Not started, no start time.
    #[default]
    Ready,
    /// Clock running.
    Running,
    /// Clock stopped.
    Finished,
}

impl RaceStatus {
    /// True for the states that require a race start time.
    pub fn has_start_time(self) -> bool {
        matches!(self, Self::Running | Self::Finished)
    }
}

/// Participant lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantStatus {
    /// Registered, no passage yet.
    #[default]
    Registered,
    /// On course.
    Started,
    /// Finish passage recorded.
    Finished,
    /// Did not finish.
    Dnf,
}
