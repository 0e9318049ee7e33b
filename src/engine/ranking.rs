//! Live ranking over a full snapshot.
//!
//! Nothing is maintained incrementally: every call folds the current
//! participants and passages of one race into a fresh [`Leaderboard`].
//! Duplicate passages at one checkpoint are tolerated; a checkpoint counts
//! once and its latest passage wins.

use std::cmp::Ordering;

use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};

use crate::{
    format::speed_kmh,
    model::{Participant, Passage, Race},
    snapshot::EventSnapshot,
    types::{is_finish, CheckpointId, EpochMs, ParticipantId, ParticipantStatus, RaceId, FINISH_CHECKPOINT_ID},
};

/// Label of the position before any passage.
pub const START_LABEL: &str = "Start";
/// Label used for the finish point when building default segment names.
pub const FINISH_LABEL: &str = "Finish";

/// Duration of one stretch between consecutive course points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentSplit {
    /// Segment label.
    pub label: String,
    /// Point closing the segment.
    pub checkpoint_id: CheckpointId,
    /// Elapsed time on the segment; `None` while pending.
    pub duration: Option<i64>,
}

/// One row of the live leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standing {
    /// 1-based position.
    pub rank: usize,
    /// Ranked participant.
    pub participant_id: ParticipantId,
    /// Race number.
    pub bib: String,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// `M` or `F`.
    pub gender: String,
    /// Age category.
    pub category: String,
    /// Club, if any.
    pub club: Option<String>,
    /// Participant lifecycle state.
    pub status: ParticipantStatus,
    /// Distinct mandatory points passed, finish included.
    pub mandatory_count: usize,
    /// Latest passage at a mandatory point.
    pub last_mandatory: Option<Passage>,
    /// Latest passage anywhere.
    pub last_passage: Option<Passage>,
    /// Finish passed.
    pub is_finished: bool,
    /// Course progress in percent.
    pub progress: f64,
    /// Name of the last point passed, or [`START_LABEL`].
    pub checkpoint_name: String,
    /// Net time at the last passage.
    pub net_time: Option<i64>,
    /// Average speed to the last point passed.
    pub speed_kmh: f64,
    /// Per-segment durations, `checkpoints + 1` entries.
    pub splits: Vec<SegmentSplit>,
    /// Every passage of the participant, oldest first.
    pub passages: Vec<Passage>,
    /// Places gained since the previous snapshot (positive is better).
    pub evolution: Option<i64>,
}

/// Ranked standings of one race.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Leaderboard {
    /// Ranked race.
    pub race_id: RaceId,
    /// Race display name.
    pub race_name: String,
    /// Standings, best first.
    pub standings: Vec<Standing>,
}

impl Leaderboard {
    /// Standing of a participant.
    pub fn standing(&self, participant_id: &str) -> Option<&Standing> {
        self.standings.iter().find(|s| s.participant_id == participant_id)
    }

    /// Standing by bib.
    pub fn by_bib(&self, bib: &str) -> Option<&Standing> {
        self.standings.iter().find(|s| s.bib == bib)
    }

    /// Finishers ordered by most recent finish first.
    pub fn latest_finishers(&self, n: usize) -> Vec<&Standing> {
        let mut out: Vec<&Standing> = self.standings.iter().filter(|s| s.is_finished).collect();
        out.sort_by_key(|s| std::cmp::Reverse(finish_timestamp(s)));
        out.truncate(n);
        out
    }

    /// Case-insensitive search on bib, last name, or first name.
    pub fn search(&self, term: &str) -> Vec<&Standing> {
        let term = term.trim().to_lowercase();
        self.standings
            .iter()
            .filter(|s| {
                s.bib.contains(&term)
                    || s.last_name.to_lowercase().contains(&term)
                    || s.first_name.to_lowercase().contains(&term)
            })
            .collect()
    }
}

fn finish_timestamp(s: &Standing) -> EpochMs {
    s.passages
        .iter()
        .filter(|p| is_finish(&p.checkpoint_id))
        .map(|p| p.timestamp)
        .max()
        .unwrap_or(0)
}

/// Leaderboard of `race_id` from a snapshot.
pub fn compute_for_race(snapshot: &EventSnapshot, race_id: &str) -> Option<Leaderboard> {
    let race = snapshot.race(race_id)?;
    Some(compute_leaderboard(
        race,
        snapshot.participants_in_race(race_id),
        &snapshot.passages,
    ))
}

/// Ranks `participants` of `race`; residual ties keep the input order.
pub fn compute_leaderboard<'a>(
    race: &Race,
    participants: impl IntoIterator<Item = &'a Participant>,
    passages: &[Passage],
) -> Leaderboard {
    let mut by_participant: HashMap<&str, Vec<&Passage>> = HashMap::new();
    for p in passages {
        by_participant
            .entry(p.participant_id.as_str())
            .or_default()
            .push(p);
    }

    let mandatory_ids = race.mandatory_ids();
    let mandatory_cps = race.mandatory_checkpoints().count();

    let mut standings: Vec<Standing> = participants
        .into_iter()
        .map(|participant| {
            let mut own: Vec<&Passage> = by_participant
                .get(participant.id.as_str())
                .cloned()
                .unwrap_or_default();
            own.sort_by_key(|p| p.timestamp);
            standing_for(race, participant, &own, &mandatory_ids, mandatory_cps)
        })
        .collect();

    standings.sort_by(compare_standings);
    for (idx, s) in standings.iter_mut().enumerate() {
        s.rank = idx + 1;
    }

    Leaderboard {
        race_id: race.id.clone(),
        race_name: race.name.clone(),
        standings,
    }
}

fn standing_for(
    race: &Race,
    participant: &Participant,
    passages: &[&Passage],
    mandatory_ids: &HashSet<&str>,
    mandatory_cps: usize,
) -> Standing {
    let passed: HashSet<&str> = passages.iter().map(|p| p.checkpoint_id.as_str()).collect();
    let mandatory_count = passed.iter().filter(|id| mandatory_ids.contains(*id)).count();
    let is_finished = passed.contains(FINISH_CHECKPOINT_ID);

    let last_mandatory = passages
        .iter()
        .rev()
        .find(|p| mandatory_ids.contains(p.checkpoint_id.as_str()))
        .map(|p| (*p).clone());
    let last_passage = passages.last().map(|p| (*p).clone());

    let progress = if is_finished {
        100.0
    } else {
        mandatory_count as f64 / (mandatory_cps + 1) as f64 * 100.0
    };

    let (checkpoint_name, net_time, speed) = match &last_passage {
        Some(p) => {
            let distance = point_distance(race, &p.checkpoint_id);
            (p.checkpoint_name.clone(), Some(p.net_time), speed_kmh(distance, p.net_time))
        }
        None => (START_LABEL.to_string(), None, 0.0),
    };

    Standing {
        rank: 0,
        participant_id: participant.id.clone(),
        bib: participant.bib.clone(),
        first_name: participant.first_name.clone(),
        last_name: participant.last_name.clone(),
        gender: participant.gender.clone(),
        category: participant.category.clone(),
        club: participant.club.clone(),
        status: participant.status,
        mandatory_count,
        last_mandatory,
        last_passage,
        is_finished,
        progress,
        checkpoint_name,
        net_time,
        speed_kmh: speed,
        splits: segment_splits(race, passages),
        passages: passages.iter().map(|p| (*p).clone()).collect(),
        evolution: None,
    }
}

fn point_distance(race: &Race, checkpoint_id: &str) -> f64 {
    if is_finish(checkpoint_id) {
        return race.distance;
    }
    race.checkpoint(checkpoint_id)
        .map(|cp| cp.distance)
        .unwrap_or(race.distance)
}

fn compare_standings(a: &Standing, b: &Standing) -> Ordering {
    b.mandatory_count.cmp(&a.mandatory_count).then_with(|| {
        let a_ts = a.last_mandatory.as_ref().map(|p| p.timestamp);
        let b_ts = b.last_mandatory.as_ref().map(|p| p.timestamp);
        match (a_ts, b_ts) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    })
}

/// Splits over `[checkpoints…, finish]`; `passages` must be sorted by timestamp.
pub fn segment_splits(race: &Race, passages: &[&Passage]) -> Vec<SegmentSplit> {
    let mut latest: HashMap<&str, &Passage> = HashMap::new();
    for p in passages {
        latest.insert(p.checkpoint_id.as_str(), *p);
    }

    let points = race
        .checkpoints
        .iter()
        .map(|cp| (cp.id.as_str(), cp.name.as_str()))
        .chain(std::iter::once((FINISH_CHECKPOINT_ID, FINISH_LABEL)));

    let mut previous_net = 0i64;
    let mut previous_name = START_LABEL;
    let mut out = Vec::with_capacity(race.checkpoints.len() + 1);

    for (idx, (id, name)) in points.enumerate() {
        let label = race
            .segments
            .as_ref()
            .and_then(|labels| labels.get(idx).cloned())
            .unwrap_or_else(|| format!("{previous_name} - {name}"));

        let duration = latest.get(id).map(|p| {
            let d = p.net_time - previous_net;
            previous_net = p.net_time;
            d
        });

        out.push(SegmentSplit {
            label,
            checkpoint_id: id.to_string(),
            duration,
        });
        previous_name = name;
    }

    out
}
