use hashbrown::HashSet;
use serde::{Deserialize, Serialize};

use crate::{
    model::{Passage, Race},
    snapshot::EventSnapshot,
    types::{CheckpointId, FINISH_CHECKPOINT_ID},
};

/// Advisory course-completeness verdict shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Completeness {
    /// Every mandatory checkpoint and the finish were passed.
    Complete,
    /// Mandatory checkpoints without a passage, in course order.
    Missing(Vec<CheckpointId>),
}

impl Completeness {
    /// True for [`Completeness::Complete`].
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

/// Mandatory points of `race` (finish last) absent from `passages`.
pub fn missing_mandatory<'a>(
    race: &Race,
    passages: impl IntoIterator<Item = &'a Passage>,
) -> Vec<CheckpointId> {
    let passed: HashSet<&str> = passages
        .into_iter()
        .map(|p| p.checkpoint_id.as_str())
        .collect();

    race.mandatory_checkpoints()
        .map(|cp| cp.id.as_str())
        .chain(std::iter::once(FINISH_CHECKPOINT_ID))
        .filter(|id| !passed.contains(id))
        .map(str::to_string)
        .collect()
}

/// True when the mandatory set (finish included) is a subset of the passed checkpoints.
pub fn has_all_mandatory_points<'a>(
    race: &Race,
    passages: impl IntoIterator<Item = &'a Passage>,
) -> bool {
    missing_mandatory(race, passages).is_empty()
}

/// Completeness of one participant's course. An unknown race only requires the finish.
pub fn check(snapshot: &EventSnapshot, participant_id: &str, race_id: &str) -> Completeness {
    let passages = snapshot.passages_of(participant_id);
    let missing = match snapshot.race(race_id) {
        Some(race) => missing_mandatory(race, passages),
        None => {
            let finished = passages.into_iter().any(|p| p.checkpoint_id == FINISH_CHECKPOINT_ID);
            if finished {
                Vec::new()
            } else {
                vec![FINISH_CHECKPOINT_ID.to_string()]
            }
        }
    };

    if missing.is_empty() {
        Completeness::Complete
    } else {
        Completeness::Missing(missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Checkpoint;

    fn race() -> Race {
        let mut race = Race::new("r", "Trail", 20.0);
        race.checkpoints = vec![
            Checkpoint { id: "cp1".into(), name: "CP1".into(), distance: 5.0, is_mandatory: true },
            Checkpoint { id: "cp2".into(), name: "CP2".into(), distance: 10.0, is_mandatory: true },
            Checkpoint { id: "ravito".into(), name: "Ravito".into(), distance: 12.0, is_mandatory: false },
        ];
        race
    }

    fn passage(cp: &str) -> Passage {
        Passage {
            id: format!("pa-{cp}"),
            participant_id: "p".into(),
            bib: "1".into(),
            checkpoint_id: cp.into(),
            checkpoint_name: cp.into(),
            timestamp: 0,
            net_time: 0,
        }
    }

    #[test]
    fn skipped_mandatory_checkpoint_is_incomplete_despite_finish() {
        let passages = [passage("cp1"), passage("finish")];
        assert!(!has_all_mandatory_points(&race(), &passages));
        assert_eq!(missing_mandatory(&race(), &passages), vec!["cp2".to_string()]);
    }

    #[test]
    fn optional_checkpoints_are_not_required() {
        let passages = [passage("cp1"), passage("cp2"), passage("finish")];
        assert!(has_all_mandatory_points(&race(), &passages));
    }

    #[test]
    fn finish_is_always_required() {
        let bare = Race::new("r", "5K", 5.0);
        assert!(!has_all_mandatory_points(&bare, &[]));
        assert!(has_all_mandatory_points(&bare, &[passage("finish")]));
    }
}
