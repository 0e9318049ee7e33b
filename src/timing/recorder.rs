//! Passage planning.
//!
//! Everything here is pure: a snapshot, a context, a bib and a timestamp go
//! in, a [`PassagePlan`] with the ops to commit comes out. The session owns
//! the side effects.

use tracing::warn;

use crate::{
    engine::validator::{missing_mandatory, Completeness},
    model::{new_doc_id, Document, Participant, ParticipantPatch, Passage, Race},
    op::Op,
    snapshot::EventSnapshot,
    types::{is_finish, CheckpointId, EpochMs, ParticipantStatus, RaceStatus},
};

use super::{combined, context::RecordingContext, TimingError, TimingResult};

/// Default display name of the finish point on recorded passages.
pub const DEFAULT_FINISH_NAME: &str = "ARRIVÉE";

/// Participant, race and target point resolved from a bib.
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    /// Participant carrying the bib.
    pub participant: &'a Participant,
    /// Participant's race.
    pub race: &'a Race,
    /// Checkpoint id, or `finish`.
    pub checkpoint_id: &'a str,
    /// Name written on the passage.
    pub checkpoint_name: &'a str,
}

/// Result of planning one recording.
#[derive(Debug, Clone, PartialEq)]
pub struct PassagePlan {
    /// Passage to insert.
    pub passage: Passage,
    /// Participant as read before the commit.
    pub participant: Participant,
    /// New participant status, if the passage changes it.
    pub transition: Option<ParticipantStatus>,
    /// Advisory course check, finish passages only.
    pub completeness: Option<Completeness>,
}

impl PassagePlan {
    /// Passage put followed by the optional status patch.
    pub fn ops(&self) -> Vec<Op> {
        let mut ops = vec![Op::Put {
            doc: Document::Passage(self.passage.clone()),
        }];
        if let Some(status) = self.transition {
            ops.push(Op::PatchParticipant {
                id: self.participant.id.clone(),
                patch: ParticipantPatch::status(status),
            });
        }
        ops
    }

    /// True when the passage is recorded at the finish.
    pub fn is_finish(&self) -> bool {
        is_finish(&self.passage.checkpoint_id)
    }
}

/// `timestamp - (participant start ?? race start ?? timestamp)`; may be negative.
pub fn net_time(participant: &Participant, race: &Race, timestamp: EpochMs) -> i64 {
    let start = participant
        .start_time
        .or(race.start_time)
        .unwrap_or(timestamp);
    timestamp as i64 - start as i64
}

/// Resolves `bib` within `context` and checks the race is running.
pub fn resolve_target<'a>(
    snapshot: &'a EventSnapshot,
    context: &'a RecordingContext,
    bib: &str,
    finish_name: &'a str,
) -> TimingResult<Target<'a>> {
    let (participant, checkpoint_id, assigned_name) = match context {
        RecordingContext::Checkpoint {
            race_id,
            checkpoint_id,
        } => {
            let participant = snapshot
                .find_bib(bib, Some(race_id), |_| true)
                .ok_or_else(|| TimingError::BibNotFound {
                    bib: bib.trim().to_string(),
                })?;
            (participant, checkpoint_id.as_str(), None)
        }
        RecordingContext::Combined {
            post_id,
            active_race,
        } => {
            let post = snapshot
                .combined_post(post_id)
                .ok_or_else(|| TimingError::UnknownCombinedPost(post_id.clone()))?;
            let hit = combined::resolve(snapshot, post, active_race.as_deref(), bib)?;
            (
                hit.participant,
                hit.assignment.checkpoint_id.as_str(),
                Some(hit.assignment.checkpoint_name.as_str()),
            )
        }
    };

    let race = snapshot
        .race(&participant.race_id)
        .ok_or_else(|| TimingError::UnknownRace(participant.race_id.clone()))?;
    ensure_running(race)?;

    let checkpoint_name = match assigned_name {
        Some(name) => name,
        None if is_finish(checkpoint_id) => finish_name,
        None => match race.checkpoint(checkpoint_id) {
            Some(cp) => cp.name.as_str(),
            None => {
                warn!(
                    race = %race.id,
                    checkpoint = checkpoint_id,
                    bib = %participant.bib,
                    "checkpoint not configured on the participant's race"
                );
                checkpoint_id
            }
        },
    };

    Ok(Target {
        participant,
        race,
        checkpoint_id,
        checkpoint_name,
    })
}

pub(crate) fn ensure_running(race: &Race) -> TimingResult<()> {
    if race.status == RaceStatus::Running {
        Ok(())
    } else {
        Err(TimingError::RaceNotRunning {
            race_id: race.id.clone(),
            status: race.status,
        })
    }
}

/// Plans exactly one passage and at most one status transition.
pub fn plan_passage(
    snapshot: &EventSnapshot,
    context: &RecordingContext,
    bib: &str,
    timestamp: EpochMs,
    finish_name: &str,
) -> TimingResult<PassagePlan> {
    let target = resolve_target(snapshot, context, bib, finish_name)?;
    let participant = target.participant;

    let net_time = net_time(participant, target.race, timestamp);
    if net_time < 0 {
        warn!(bib = %participant.bib, net_time, "passage recorded before the effective start");
    }

    let passage = Passage {
        id: new_doc_id(),
        participant_id: participant.id.clone(),
        bib: participant.bib.clone(),
        checkpoint_id: CheckpointId::from(target.checkpoint_id),
        checkpoint_name: target.checkpoint_name.to_string(),
        timestamp,
        net_time,
    };

    let finishing = is_finish(target.checkpoint_id);
    let transition = next_status(participant.status, finishing);

    let completeness = finishing.then(|| {
        let missing = missing_mandatory(
            target.race,
            snapshot
                .passages_of(&participant.id)
                .chain(std::iter::once(&passage)),
        );
        if missing.is_empty() {
            Completeness::Complete
        } else {
            Completeness::Missing(missing)
        }
    });

    Ok(PassagePlan {
        participant: participant.clone(),
        passage,
        transition,
        completeness,
    })
}

fn next_status(current: ParticipantStatus, finishing: bool) -> Option<ParticipantStatus> {
    match (finishing, current) {
        (true, ParticipantStatus::Finished) => None,
        (true, _) => Some(ParticipantStatus::Finished),
        (false, ParticipantStatus::Registered) => Some(ParticipantStatus::Started),
        (false, _) => None,
    }
}
