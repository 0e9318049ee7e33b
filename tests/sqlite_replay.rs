use tempfile::TempDir;

use racelog::{
    core::store::DocStore,
    model::{Collection, Document, FieldUpdate, Participant, ParticipantPatch, Passage, Race, RacePatch},
    op::Op,
    persist::{sqlite::SqliteOpSink, OpSink},
    types::{ParticipantStatus, RaceStatus},
};

fn runner(id: &str) -> Participant {
    Participant {
        id: id.to_string(),
        bib: id.trim_start_matches('p').to_string(),
        first_name: "Jo".to_string(),
        last_name: "LEROY".to_string(),
        gender: "M".to_string(),
        category: "V1".to_string(),
        club: Some("AC Vallée".to_string()),
        race_id: "r".to_string(),
        status: ParticipantStatus::Registered,
        start_time: None,
    }
}

fn passage(id: &str, participant: &str, ts: u64) -> Passage {
    Passage {
        id: id.to_string(),
        participant_id: participant.to_string(),
        bib: participant.to_string(),
        checkpoint_id: "finish".to_string(),
        checkpoint_name: "ARRIVÉE".to_string(),
        timestamp: ts,
        net_time: ts as i64 - 1_000,
    }
}

fn put(doc: Document) -> Op {
    Op::Put { doc }
}

fn seed(store: &mut DocStore) {
    store
        .commit_batch(vec![
            put(Document::Race(Race::new("r", "Semi 21", 21.0))),
            put(Document::Participant(runner("p1"))),
            put(Document::Participant(runner("p2"))),
        ])
        .expect("seed");
    store
        .apply(Op::PatchRace {
            id: "r".to_string(),
            patch: RacePatch {
                status: Some(RaceStatus::Running),
                start_time: Some(FieldUpdate::Set(1_000)),
            },
        })
        .expect("start");
    store
        .commit_batch(vec![
            put(Document::Passage(passage("x1", "p1", 5_000))),
            Op::PatchParticipant {
                id: "p1".to_string(),
                patch: ParticipantPatch::status(ParticipantStatus::Finished),
            },
        ])
        .expect("finish");
    store
        .apply(Op::Delete {
            collection: Collection::Participants,
            id: "p2".to_string(),
        })
        .expect("delete");
}

#[test]
fn sqlite_replay_round_trips_state_and_order() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("race.db");

    let mut store = DocStore::new();
    let mut sink = SqliteOpSink::open(&db_path).expect("open sqlite");
    seed(&mut store);

    let ops = store.drain_pending_ops();
    sink.append_ops(&ops).expect("append");
    drop(sink);

    let sink2 = SqliteOpSink::open(&db_path).expect("reopen");
    let replayed = sink2.load_store().expect("replay");

    assert_eq!(replayed.export_snapshot(), store.export_snapshot());
    assert_eq!(replayed.latest_op_seq(), store.latest_op_seq());
    assert_eq!(replayed.passages_of("p1").len(), 1);
    assert!(replayed.participant("p2").is_none());
}

#[test]
fn snapshot_and_compaction_preserve_replay() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("snap.db");

    let mut store = DocStore::new();
    let mut sink = SqliteOpSink::open(&db_path).expect("open sqlite");

    seed(&mut store);
    sink.append_ops(&store.drain_pending_ops()).expect("append");

    let snapshot = store.export_snapshot();
    let last_seq = store.latest_op_seq();
    sink.write_snapshot(&snapshot, last_seq).expect("snapshot");
    let removed = sink.compact_through(last_seq).expect("compact");
    assert!(removed > 0);

    store
        .apply(put(Document::Passage(passage("x2", "p1", 6_000))))
        .expect("late passage");
    sink.append_ops(&store.drain_pending_ops()).expect("append tail");
    drop(sink);

    let reopened = SqliteOpSink::open(&db_path).expect("reopen");
    assert_eq!(reopened.load_events_after(0).expect("tail").len(), 1);
    let replayed = reopened.load_store().expect("replay");

    assert_eq!(replayed.export_snapshot(), store.export_snapshot());
    assert_eq!(replayed.passages_of("p1").len(), 2);

    let narrow = reopened.load_store_with_ceiling(3).expect("replay with ceiling");
    assert_eq!(narrow.max_batch_ops(), 3);
    assert_eq!(narrow.export_snapshot(), store.export_snapshot());
}

#[test]
fn history_lists_every_op_of_one_document() {
    let mut store = DocStore::new();
    let mut sink = SqliteOpSink::open_in_memory().expect("memory");
    seed(&mut store);
    sink.append_ops(&store.drain_pending_ops()).expect("append");

    let p1: Vec<_> = sink
        .history_of(Collection::Participants, "p1")
        .expect("history")
        .into_iter()
        .map(|s| s.seq)
        .collect();
    assert_eq!(p1, vec![2, 6]);

    let p2 = sink
        .history_of(Collection::Participants, "p2")
        .expect("history");
    assert!(matches!(p2.last().map(|s| &s.op), Some(Op::Delete { .. })));
    assert!(sink.history_of(Collection::Races, "p1").expect("history").is_empty());
    assert_eq!(sink.latest_seq().expect("latest"), 7);
}
