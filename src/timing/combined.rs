//! Resolution of a bib scanned at a station shared by several races.
//!
//! The target checkpoint always follows the participant's own race. The
//! race the operator last selected only decides where the bib is looked up
//! first, so an identical bib in two races resolves to the active one.

use crate::{
    model::{CombinedPost, Participant, PostAssignment},
    snapshot::EventSnapshot,
};

use super::{TimingError, TimingResult};

/// Participant and the post assignment serving its race.
#[derive(Debug, Clone, Copy)]
pub struct Resolution<'a> {
    /// Participant carrying the bib.
    pub participant: &'a Participant,
    /// Checkpoint the post records for that participant's race.
    pub assignment: &'a PostAssignment,
}

/// Looks `bib` up in `active_race`, then the post's races, then anywhere.
///
/// A participant outside the post's races is reported as
/// [`TimingError::BibNotCovered`] rather than not found.
pub fn resolve<'a>(
    snapshot: &'a EventSnapshot,
    post: &'a CombinedPost,
    active_race: Option<&str>,
    bib: &str,
) -> TimingResult<Resolution<'a>> {
    let participant = snapshot
        .find_bib(bib, active_race, |p| post.assignment_for(&p.race_id).is_some())
        .or_else(|| snapshot.find_bib(bib, None, |_| true))
        .ok_or_else(|| TimingError::BibNotFound {
            bib: bib.trim().to_string(),
        })?;

    let assignment = post
        .assignment_for(&participant.race_id)
        .ok_or_else(|| TimingError::BibNotCovered {
            bib: participant.bib.clone(),
            post_id: post.id.clone(),
        })?;

    Ok(Resolution {
        participant,
        assignment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ParticipantStatus;

    fn runner(id: &str, bib: &str, race: &str) -> Participant {
        Participant {
            id: id.into(),
            bib: bib.into(),
            first_name: "F".into(),
            last_name: "L".into(),
            gender: "M".into(),
            category: "SE".into(),
            club: None,
            race_id: race.into(),
            status: ParticipantStatus::Registered,
            start_time: None,
        }
    }

    fn assignment(race: &str, cp: &str) -> PostAssignment {
        PostAssignment {
            race_id: race.into(),
            race_name: race.to_uppercase(),
            checkpoint_id: cp.into(),
            checkpoint_name: cp.to_uppercase(),
        }
    }

    fn post() -> CombinedPost {
        CombinedPost {
            id: "col".into(),
            name: "Col".into(),
            assignments: vec![assignment("a", "cpA"), assignment("b", "cpB")],
        }
    }

    #[test]
    fn follows_participant_race_not_active_selection() {
        let snap = EventSnapshot {
            participants: vec![runner("p1", "007", "b")],
            ..EventSnapshot::default()
        };
        let post = post();
        let hit = resolve(&snap, &post, Some("a"), "007").unwrap();
        assert_eq!(hit.assignment.checkpoint_id, "cpB");
    }

    #[test]
    fn active_race_wins_on_shared_bib() {
        let snap = EventSnapshot {
            participants: vec![runner("p1", "12", "a"), runner("p2", "12", "b")],
            ..EventSnapshot::default()
        };
        let post = post();
        let hit = resolve(&snap, &post, Some("b"), "12").unwrap();
        assert_eq!(hit.participant.id, "p2");
    }

    #[test]
    fn uncovered_and_unknown_bibs() {
        let snap = EventSnapshot {
            participants: vec![runner("p1", "5", "c")],
            ..EventSnapshot::default()
        };
        let post = post();
        assert!(matches!(
            resolve(&snap, &post, None, "5"),
            Err(TimingError::BibNotCovered { .. })
        ));
        assert!(matches!(
            resolve(&snap, &post, None, "6"),
            Err(TimingError::BibNotFound { .. })
        ));
    }
}
