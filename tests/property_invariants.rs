use std::collections::VecDeque;

use proptest::prelude::*;

use racelog::{
    core::store::DocStore,
    engine::ranking::compute_leaderboard,
    model::{Checkpoint, Collection, Document, Participant, Passage, Race},
    op::Op,
    timing::capture::CaptureQueue,
    types::ParticipantStatus,
};

#[derive(Debug, Clone)]
enum Action {
    PutRunner { idx: u8, race: u8 },
    PutPassage { idx: u8, runner: u8 },
    DeleteRunner { idx: u8 },
    DeletePassage { idx: u8 },
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        (0u8..16, 0u8..3).prop_map(|(idx, race)| Action::PutRunner { idx, race }),
        (0u8..32, 0u8..16).prop_map(|(idx, runner)| Action::PutPassage { idx, runner }),
        (0u8..16).prop_map(|idx| Action::DeleteRunner { idx }),
        (0u8..32).prop_map(|idx| Action::DeletePassage { idx }),
    ]
}

fn runner(idx: u8, race: u8) -> Participant {
    Participant {
        id: format!("p{idx}"),
        bib: idx.to_string(),
        first_name: String::new(),
        last_name: format!("R{idx}"),
        gender: "M".to_string(),
        category: "SENIOR".to_string(),
        club: None,
        race_id: format!("r{race}"),
        status: ParticipantStatus::Started,
        start_time: None,
    }
}

fn passage(idx: u8, runner: u8, cp: &str, ts: u64) -> Passage {
    Passage {
        id: format!("x{idx}"),
        participant_id: format!("p{runner}"),
        bib: runner.to_string(),
        checkpoint_id: cp.to_string(),
        checkpoint_name: cp.to_string(),
        timestamp: ts,
        net_time: ts as i64,
    }
}

fn sorted(mut ids: Vec<String>) -> Vec<String> {
    ids.sort();
    ids
}

fn scan_race(store: &DocStore, race: &str) -> Vec<String> {
    store
        .participants()
        .into_iter()
        .filter(|p| p.race_id == race)
        .map(|p| p.id.clone())
        .collect()
}

fn indexed_race(store: &DocStore, race: &str) -> Vec<String> {
    store
        .participants_in_race(race)
        .into_iter()
        .map(|p| p.id.clone())
        .collect()
}

fn scan_passages(store: &DocStore, participant: &str) -> Vec<String> {
    store
        .passages()
        .into_iter()
        .filter(|p| p.participant_id == participant)
        .map(|p| p.id.clone())
        .collect()
}

fn indexed_passages(store: &DocStore, participant: &str) -> Vec<String> {
    store
        .passages_of(participant)
        .into_iter()
        .map(|p| p.id.clone())
        .collect()
}

fn course() -> Race {
    let mut race = Race::new("r", "Trail 30", 30.0);
    race.checkpoints = ["cp1", "cp2", "cp3", "cp4"]
        .iter()
        .enumerate()
        .map(|(i, id)| Checkpoint {
            id: id.to_string(),
            name: id.to_uppercase(),
            distance: 6.0 * (i + 1) as f64,
            is_mandatory: i % 2 == 0,
        })
        .collect();
    race
}

const POINTS: [&str; 5] = ["cp1", "cp2", "cp3", "cp4", "finish"];

proptest! {
    #[test]
    fn random_sequences_keep_indices_consistent(actions in prop::collection::vec(action_strategy(), 1..200)) {
        let mut store = DocStore::new();

        for action in actions {
            let op = match action {
                Action::PutRunner { idx, race } => Op::Put { doc: Document::Participant(runner(idx, race)) },
                Action::PutPassage { idx, runner } => Op::Put {
                    doc: Document::Passage(passage(idx, runner, "finish", u64::from(idx))),
                },
                Action::DeleteRunner { idx } => Op::Delete {
                    collection: Collection::Participants,
                    id: format!("p{idx}"),
                },
                Action::DeletePassage { idx } => Op::Delete {
                    collection: Collection::Passages,
                    id: format!("x{idx}"),
                },
            };
            let before = store.latest_op_seq();
            let stored = store.apply(op).expect("unconditional op");
            prop_assert_eq!(stored.seq, before + 1);

            for race in ["r0", "r1", "r2"] {
                prop_assert_eq!(sorted(indexed_race(&store, race)), sorted(scan_race(&store, race)));
            }
            for r in 0..16u8 {
                let id = format!("p{r}");
                prop_assert_eq!(sorted(indexed_passages(&store, &id)), sorted(scan_passages(&store, &id)));
            }
        }
    }

    #[test]
    fn capture_queue_is_fifo(steps in prop::collection::vec((0u8..3, 0u8..8), 1..100)) {
        let mut queue = CaptureQueue::new();
        let mut model: VecDeque<(u64, u64)> = VecDeque::new();

        for (i, (kind, pick)) in steps.into_iter().enumerate() {
            match kind {
                0 => {
                    let ts = 1_000 + i as u64;
                    let id = queue.capture_at(ts);
                    model.push_back((id, ts));
                }
                1 => {
                    prop_assert_eq!(queue.peek_oldest(), model.front().map(|e| e.1));
                    prop_assert_eq!(queue.consume_oldest(), model.pop_front().map(|e| e.1));
                }
                _ => {
                    let target = model.get(usize::from(pick)).map(|e| e.0).unwrap_or(u64::MAX);
                    let removed = queue.discard(target);
                    let pos = model.iter().position(|e| e.0 == target);
                    prop_assert_eq!(removed, pos.is_some());
                    if let Some(pos) = pos {
                        model.remove(pos);
                    }
                }
            }
            let got: Vec<(u64, u64)> = queue.iter().map(|c| (c.id, c.timestamp)).collect();
            prop_assert_eq!(got, model.iter().copied().collect::<Vec<_>>());
        }
    }

    #[test]
    fn ranking_orders_by_mandatory_count_then_time(
        seen in prop::collection::vec((0u8..6, 0usize..5, 0u64..10_000), 0..60)
    ) {
        let race = course();
        let people: Vec<Participant> = (0..6).map(|i| runner(i, 0)).map(|mut p| {
            p.race_id = "r".to_string();
            p
        }).collect();
        let passages: Vec<Passage> = seen
            .iter()
            .enumerate()
            .map(|(i, (who, point, ts))| passage(i as u8, *who, POINTS[*point], *ts))
            .collect();

        let board = compute_leaderboard(&race, &people, &passages);
        let mandatory_points = race.mandatory_checkpoints().count() + 1;
        prop_assert_eq!(board.standings.len(), people.len());

        for (i, s) in board.standings.iter().enumerate() {
            prop_assert_eq!(s.rank, i + 1);
            prop_assert!(s.mandatory_count <= mandatory_points);
            prop_assert!((0.0..=100.0).contains(&s.progress));
            if s.is_finished {
                prop_assert_eq!(s.progress, 100.0);
            }
            if s.passages.is_empty() {
                prop_assert_eq!(s.progress, 0.0);
                prop_assert!(s.net_time.is_none());
            }
            prop_assert_eq!(s.splits.len(), race.checkpoints.len() + 1);
        }

        for pair in board.standings.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            prop_assert!(a.mandatory_count >= b.mandatory_count);
            if a.mandatory_count == b.mandatory_count {
                let ta = a.last_mandatory.as_ref().map(|p| p.timestamp);
                let tb = b.last_mandatory.as_ref().map(|p| p.timestamp);
                match (ta, tb) {
                    (Some(x), Some(y)) => prop_assert!(x <= y),
                    (None, Some(_)) => prop_assert!(false, "unranked ahead of ranked"),
                    _ => {}
                }
            }
        }
    }
}
