use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::{
    format::speed_kmh,
    model::{Participant, Passage, Race},
    types::is_finish,
};

use super::validator::has_all_mandatory_points;

/// One finisher in the final classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinishResult {
    /// Overall position by finish net time.
    pub overall_rank: usize,
    /// Position within the participant's category.
    pub category_rank: usize,
    /// Position within the participant's gender.
    pub gender_rank: usize,
    /// Classified participant.
    pub participant: Participant,
    /// Latest finish passage.
    pub finish: Passage,
    /// Average speed over the race distance.
    pub speed_kmh: f64,
    /// Every mandatory checkpoint was passed.
    pub complete: bool,
}

/// Subset of the classification to publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultsFilter {
    /// Everybody.
    All,
    /// One category.
    Category(String),
    /// One gender.
    Gender(String),
    /// Top three overall.
    Podium,
}

/// Finishers of `race` ordered by finish net time; equal times keep finish order.
pub fn final_results<'a>(
    race: &Race,
    participants: impl IntoIterator<Item = &'a Participant>,
    passages: &[Passage],
) -> Vec<FinishResult> {
    let mut finish_of: HashMap<&str, &Passage> = HashMap::new();
    let mut passages_of: HashMap<&str, Vec<&Passage>> = HashMap::new();
    for p in passages {
        passages_of.entry(p.participant_id.as_str()).or_default().push(p);
        if is_finish(&p.checkpoint_id) {
            let slot = finish_of.entry(p.participant_id.as_str()).or_insert(p);
            if p.timestamp >= slot.timestamp {
                *slot = p;
            }
        }
    }

    let mut rows: Vec<(&Participant, &Passage)> = participants
        .into_iter()
        .filter(|part| part.race_id == race.id)
        .filter_map(|part| finish_of.get(part.id.as_str()).map(|f| (part, *f)))
        .collect();
    rows.sort_by(|a, b| {
        a.1.net_time
            .cmp(&b.1.net_time)
            .then(a.1.timestamp.cmp(&b.1.timestamp))
    });

    let mut per_category: HashMap<String, usize> = HashMap::new();
    let mut per_gender: HashMap<String, usize> = HashMap::new();

    rows.into_iter()
        .enumerate()
        .map(|(idx, (part, finish))| {
            let category_rank = bump(&mut per_category, &part.category);
            let gender_rank = bump(&mut per_gender, &part.gender);
            let own = passages_of.get(part.id.as_str()).cloned().unwrap_or_default();
            FinishResult {
                overall_rank: idx + 1,
                category_rank,
                gender_rank,
                participant: part.clone(),
                finish: finish.clone(),
                speed_kmh: speed_kmh(race.distance, finish.net_time),
                complete: has_all_mandatory_points(race, own),
            }
        })
        .collect()
}

fn bump(counter: &mut HashMap<String, usize>, key: &str) -> usize {
    let slot = counter.entry_ref(key).or_insert(0);
    *slot += 1;
    *slot
}

/// Applies a publication filter.
pub fn filter_results<'a>(results: &'a [FinishResult], filter: &ResultsFilter) -> Vec<&'a FinishResult> {
    match filter {
        ResultsFilter::All => results.iter().collect(),
        ResultsFilter::Category(cat) => results
            .iter()
            .filter(|r| r.participant.category.eq_ignore_ascii_case(cat))
            .collect(),
        ResultsFilter::Gender(g) => results
            .iter()
            .filter(|r| r.participant.gender.eq_ignore_ascii_case(g))
            .collect(),
        ResultsFilter::Podium => results.iter().take(3).collect(),
    }
}
