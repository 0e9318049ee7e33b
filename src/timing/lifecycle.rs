use tracing::info;

use crate::{
    model::{Collection, FieldUpdate, ParticipantPatch, Participant, Passage, RacePatch},
    op::Op,
    runtime::handle::{ChunkReport, StoreHandle},
    snapshot::EventSnapshot,
    types::{is_finish, EpochMs, OpSeq, ParticipantStatus, RaceStatus, RaceType},
};

use super::{
    context::RecordingContext,
    recorder::resolve_target,
    TimingError, TimingResult,
};

/// Ops restoring a race to READY.
#[derive(Debug, Clone, PartialEq)]
pub struct ResetPlan {
    /// Participant resets and passage deletions, safe to split into chunks.
    pub bulk: Vec<Op>,
    /// Race patch, committed only once every bulk op landed.
    pub race: Op,
}

/// READY to RUNNING with the start instant `now`.
pub fn plan_start_race(snapshot: &EventSnapshot, race_id: &str, now: EpochMs) -> TimingResult<Op> {
    let race = snapshot
        .race(race_id)
        .ok_or_else(|| TimingError::UnknownRace(race_id.to_string()))?;
    if race.status != RaceStatus::Ready {
        return Err(TimingError::InvalidTransition {
            race_id: race.id.clone(),
            status: race.status,
            action: "start",
        });
    }
    Ok(Op::PatchRace {
        id: race.id.clone(),
        patch: RacePatch {
            status: Some(RaceStatus::Running),
            start_time: Some(FieldUpdate::Set(now)),
        },
    })
}

/// RUNNING to FINISHED; the start time is kept.
pub fn plan_stop_race(snapshot: &EventSnapshot, race_id: &str) -> TimingResult<Op> {
    let race = snapshot
        .race(race_id)
        .ok_or_else(|| TimingError::UnknownRace(race_id.to_string()))?;
    if race.status != RaceStatus::Running {
        return Err(TimingError::InvalidTransition {
            race_id: race.id.clone(),
            status: race.status,
            action: "stop",
        });
    }
    Ok(Op::PatchRace {
        id: race.id.clone(),
        patch: RacePatch {
            status: Some(RaceStatus::Finished),
            start_time: None,
        },
    })
}

/// Every runner back to REGISTERED, every passage removed, race back to READY.
pub fn plan_reset_race(snapshot: &EventSnapshot, race_id: &str) -> TimingResult<ResetPlan> {
    let race = snapshot
        .race(race_id)
        .ok_or_else(|| TimingError::UnknownRace(race_id.to_string()))?;

    let mut bulk = Vec::new();
    for participant in snapshot.participants_in_race(&race.id) {
        bulk.push(Op::PatchParticipant {
            id: participant.id.clone(),
            patch: ParticipantPatch {
                status: Some(ParticipantStatus::Registered),
                start_time: Some(FieldUpdate::Clear),
            },
        });
        bulk.extend(snapshot.passages_of(&participant.id).map(|p| Op::Delete {
            collection: Collection::Passages,
            id: p.id.clone(),
        }));
    }

    Ok(ResetPlan {
        bulk,
        race: Op::PatchRace {
            id: race.id.clone(),
            patch: RacePatch {
                status: Some(RaceStatus::Ready),
                start_time: Some(FieldUpdate::Clear),
            },
        },
    })
}

/// Individual start of a time-trial runner.
pub fn plan_start_participant(snapshot: &EventSnapshot, participant_id: &str, now: EpochMs) -> TimingResult<Op> {
    let participant = snapshot
        .participant(participant_id)
        .ok_or_else(|| TimingError::UnknownParticipant(participant_id.to_string()))?;
    let race = snapshot
        .race(&participant.race_id)
        .ok_or_else(|| TimingError::UnknownRace(participant.race_id.clone()))?;
    if race.race_type != RaceType::TimeTrial {
        return Err(TimingError::InvalidTransition {
            race_id: race.id.clone(),
            status: race.status,
            action: "start an individual runner",
        });
    }
    if participant.status != ParticipantStatus::Registered {
        return Err(TimingError::InvalidParticipantState {
            participant_id: participant.id.clone(),
            status: participant.status,
            action: "start",
        });
    }
    Ok(Op::PatchParticipant {
        id: participant.id.clone(),
        patch: ParticipantPatch {
            status: Some(ParticipantStatus::Started),
            start_time: Some(FieldUpdate::Set(now)),
        },
    })
}

/// Resolves `bib` like a passage would and marks the runner DNF.
pub fn plan_dnf<'a>(
    snapshot: &'a EventSnapshot,
    context: &'a RecordingContext,
    bib: &str,
) -> TimingResult<(&'a Participant, Op)> {
    let target = resolve_target(snapshot, context, bib, "")?;
    let participant = target.participant;
    Ok((
        participant,
        Op::PatchParticipant {
            id: participant.id.clone(),
            patch: ParticipantPatch::status(ParticipantStatus::Dnf),
        },
    ))
}

/// Status a participant falls back to given the passages left after an undo.
pub fn status_after_undo(participant: &Participant, remaining: &[&Passage]) -> ParticipantStatus {
    match participant.status {
        ParticipantStatus::Dnf => ParticipantStatus::Dnf,
        ParticipantStatus::Finished if remaining.iter().any(|p| is_finish(&p.checkpoint_id)) => {
            ParticipantStatus::Finished
        }
        _ => ParticipantStatus::Started,
    }
}

/// Passage deletion plus the status revert; the status is `None` for an orphaned passage.
pub fn plan_undo_passage(
    snapshot: &EventSnapshot,
    passage_id: &str,
) -> TimingResult<(Vec<Op>, Option<ParticipantStatus>)> {
    let passage = snapshot
        .passage(passage_id)
        .ok_or_else(|| TimingError::UnknownPassage(passage_id.to_string()))?;
    let mut ops = vec![Op::Delete {
        collection: Collection::Passages,
        id: passage.id.clone(),
    }];

    let Some(participant) = snapshot.participant(&passage.participant_id) else {
        return Ok((ops, None));
    };
    let remaining: Vec<&Passage> = snapshot
        .passages_of(&participant.id)
        .filter(|p| p.id != passage.id)
        .collect();
    let status = status_after_undo(participant, &remaining);
    if status != participant.status {
        ops.push(Op::PatchParticipant {
            id: participant.id.clone(),
            patch: ParticipantPatch::status(status),
        });
    }
    Ok((ops, Some(status)))
}

/// Commits [`plan_start_race`].
pub async fn start_race(handle: &StoreHandle, race_id: &str, now: EpochMs) -> TimingResult<OpSeq> {
    let snapshot = handle.snapshot().await?;
    let op = plan_start_race(&snapshot, race_id, now)?;
    let seq = handle.commit(vec![op]).await?;
    info!(race = race_id, start = now, "race started");
    Ok(seq)
}

/// Commits [`plan_stop_race`].
pub async fn stop_race(handle: &StoreHandle, race_id: &str) -> TimingResult<OpSeq> {
    let snapshot = handle.snapshot().await?;
    let op = plan_stop_race(&snapshot, race_id)?;
    let seq = handle.commit(vec![op]).await?;
    info!(race = race_id, "race stopped");
    Ok(seq)
}

/// Clears every passage and individual start of the race, then sets it READY.
///
/// A failing chunk leaves the race untouched and the earlier chunks applied.
pub async fn reset_race(handle: &StoreHandle, race_id: &str, chunk_size: usize) -> TimingResult<ChunkReport> {
    let snapshot = handle.snapshot().await?;
    let plan = plan_reset_race(&snapshot, race_id)?;
    let mut report = handle.commit_chunked(plan.bulk, chunk_size).await?;
    report.last_seq = handle.commit(vec![plan.race]).await?;
    info!(race = race_id, chunks = report.chunks, ops = report.ops, "race reset");
    Ok(report)
}

/// Commits [`plan_start_participant`].
pub async fn start_participant(handle: &StoreHandle, participant_id: &str, now: EpochMs) -> TimingResult<OpSeq> {
    let snapshot = handle.snapshot().await?;
    let op = plan_start_participant(&snapshot, participant_id, now)?;
    Ok(handle.commit(vec![op]).await?)
}

/// Deletes a passage and reverts the participant status. Returns the new status.
pub async fn undo_passage(handle: &StoreHandle, passage_id: &str) -> TimingResult<Option<ParticipantStatus>> {
    let snapshot = handle.snapshot().await?;
    let (ops, status) = plan_undo_passage(&snapshot, passage_id)?;
    handle.commit(ops).await?;
    info!(passage = passage_id, ?status, "passage undone");
    Ok(status)
}

/// Deletes every document of `collection` in chunks.
pub async fn purge_collection(handle: &StoreHandle, collection: Collection, chunk_size: usize) -> TimingResult<ChunkReport> {
    let docs = handle.query(collection, |_| true).await?;
    let ops = docs
        .iter()
        .map(|d| Op::Delete {
            collection,
            id: d.id().to_string(),
        })
        .collect();
    let report = handle.commit_chunked(ops, chunk_size).await?;
    info!(%collection, chunks = report.chunks, ops = report.ops, "collection purged");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Race;

    fn runner(status: ParticipantStatus) -> Participant {
        Participant {
            id: "p".into(),
            bib: "1".into(),
            first_name: "A".into(),
            last_name: "B".into(),
            gender: "M".into(),
            category: "SE".into(),
            club: None,
            race_id: "r".into(),
            status,
            start_time: None,
        }
    }

    fn passage(id: &str, cp: &str) -> Passage {
        Passage {
            id: id.into(),
            participant_id: "p".into(),
            bib: "1".into(),
            checkpoint_id: cp.into(),
            checkpoint_name: cp.into(),
            timestamp: 1,
            net_time: 1,
        }
    }

    #[test]
    fn undo_status_rules() {
        let fin = passage("f", "finish");
        let cp = passage("c", "cp1");
        assert_eq!(status_after_undo(&runner(ParticipantStatus::Dnf), &[]), ParticipantStatus::Dnf);
        assert_eq!(
            status_after_undo(&runner(ParticipantStatus::Finished), &[&fin]),
            ParticipantStatus::Finished
        );
        assert_eq!(
            status_after_undo(&runner(ParticipantStatus::Finished), &[&cp]),
            ParticipantStatus::Started
        );
        assert_eq!(
            status_after_undo(&runner(ParticipantStatus::Finished), &[]),
            ParticipantStatus::Started
        );
    }

    #[test]
    fn start_requires_ready_race() {
        let mut race = Race::new("r", "10K", 10.0);
        let snap = EventSnapshot {
            races: vec![race.clone()],
            ..EventSnapshot::default()
        };
        assert!(plan_start_race(&snap, "r", 5).is_ok());

        race.status = RaceStatus::Running;
        race.start_time = Some(5);
        let snap = EventSnapshot {
            races: vec![race],
            ..EventSnapshot::default()
        };
        assert!(matches!(
            plan_start_race(&snap, "r", 6),
            Err(TimingError::InvalidTransition { action: "start", .. })
        ));
        assert!(plan_stop_race(&snap, "r").is_ok());
    }

    #[test]
    fn reset_plan_keeps_race_patch_last() {
        let race = Race::new("r", "10K", 10.0);
        let snap = EventSnapshot {
            races: vec![race],
            participants: vec![runner(ParticipantStatus::Finished)],
            passages: vec![passage("a", "cp1"), passage("b", "finish")],
            ..EventSnapshot::default()
        };
        let plan = plan_reset_race(&snap, "r").unwrap();
        assert_eq!(plan.bulk.len(), 3);
        assert!(matches!(plan.race, Op::PatchRace { .. }));
    }
}
