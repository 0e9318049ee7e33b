use std::sync::Arc;

use hashbrown::HashMap;
use tokio::sync::watch;
use tracing::debug;

use crate::{
    model::{Collection, Document, Participant, Passage},
    runtime::handle::{CollectionSnapshot, StoreHandle},
    types::ParticipantId,
};

use super::ranking::{compute_leaderboard, Leaderboard};

/// Recomputes one race's leaderboard and stamps each row with its rank delta.
#[derive(Debug, Default)]
pub struct LiveBoard {
    race_id: String,
    previous_ranks: HashMap<ParticipantId, usize>,
}

impl LiveBoard {
    /// Board for `race_id` with no rank history.
    pub fn new(race_id: impl Into<String>) -> Self {
        Self {
            race_id: race_id.into(),
            previous_ranks: HashMap::new(),
        }
    }

    /// Tracked race.
    pub fn race_id(&self) -> &str {
        &self.race_id
    }

    /// Fills `evolution` from the ranks of the previous call.
    pub fn track(&mut self, mut board: Leaderboard) -> Leaderboard {
        let mut ranks = HashMap::with_capacity(board.standings.len());
        for s in &mut board.standings {
            s.evolution = self
                .previous_ranks
                .get(&s.participant_id)
                .map(|prev| *prev as i64 - s.rank as i64);
            ranks.insert(s.participant_id.clone(), s.rank);
        }
        self.previous_ranks = ranks;
        board
    }

    /// Full recompute from the three collection snapshots.
    pub fn recompute(
        &mut self,
        races: &[Document],
        participants: &[Document],
        passages: &[Document],
    ) -> Leaderboard {
        let Some(race) = races
            .iter()
            .filter_map(Document::as_race)
            .find(|r| r.id == self.race_id)
        else {
            self.previous_ranks.clear();
            return Leaderboard {
                race_id: self.race_id.clone(),
                ..Leaderboard::default()
            };
        };

        let runners: Vec<&Participant> = participants
            .iter()
            .filter_map(Document::as_participant)
            .filter(|p| p.race_id == race.id)
            .collect();
        let passages: Vec<Passage> = passages
            .iter()
            .filter_map(Document::as_passage)
            .cloned()
            .collect();

        let board = compute_leaderboard(race, runners, &passages);
        self.track(board)
    }
}

/// Keeps a leaderboard of `race_id` current for as long as the store runs.
///
/// The collection watch channels are the only input; every change of races,
/// participants or passages triggers a full recompute.
pub fn spawn_live_board(handle: &StoreHandle, race_id: impl Into<String>) -> watch::Receiver<Arc<Leaderboard>> {
    let mut races = handle.subscribe_collection(Collection::Races);
    let mut participants = handle.subscribe_collection(Collection::Participants);
    let mut passages = handle.subscribe_collection(Collection::Passages);

    let mut board = LiveBoard::new(race_id);
    let initial = recompute_from(&mut board, &races, &participants, &passages);
    let (tx, rx) = watch::channel(Arc::new(initial));

    tokio::spawn(async move {
        loop {
            let changed = tokio::select! {
                r = races.changed() => r,
                r = participants.changed() => r,
                r = passages.changed() => r,
                _ = tx.closed() => break,
            };
            if changed.is_err() {
                break;
            }
            let next = recompute_from(&mut board, &races, &participants, &passages);
            debug!(race = board.race_id(), rows = next.standings.len(), "leaderboard recomputed");
            if tx.send(Arc::new(next)).is_err() {
                break;
            }
        }
    });

    rx
}

fn recompute_from(
    board: &mut LiveBoard,
    races: &watch::Receiver<CollectionSnapshot>,
    participants: &watch::Receiver<CollectionSnapshot>,
    passages: &watch::Receiver<CollectionSnapshot>,
) -> Leaderboard {
    let races = Arc::clone(&races.borrow());
    let participants = Arc::clone(&participants.borrow());
    let passages = Arc::clone(&passages.borrow());
    board.recompute(&races, &participants, &passages)
}
