use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use racelog::{
    core::store::DocStore,
    engine::ranking::compute_leaderboard,
    model::{Checkpoint, Document, Participant, Passage, Race},
    op::Op,
    types::ParticipantStatus,
};

fn race() -> Race {
    let mut race = Race::new("r", "Trail 42", 42.0);
    race.checkpoints = (1..=6)
        .map(|i| Checkpoint {
            id: format!("cp{i}"),
            name: format!("CP{i}"),
            distance: 6.0 * i as f64,
            is_mandatory: i % 2 == 0,
        })
        .collect();
    race
}

fn runner(i: u64) -> Participant {
    Participant {
        id: format!("p{i}"),
        bib: i.to_string(),
        first_name: "Bench".to_string(),
        last_name: format!("R{i}"),
        gender: if i % 2 == 0 { "M" } else { "F" }.to_string(),
        category: "SENIOR".to_string(),
        club: None,
        race_id: "r".to_string(),
        status: ParticipantStatus::Started,
        start_time: None,
    }
}

fn passages_for(runners: u64, points: usize) -> Vec<Passage> {
    let ids: Vec<String> = (1..=6)
        .map(|i| format!("cp{i}"))
        .chain(std::iter::once("finish".to_string()))
        .collect();
    (0..runners)
        .flat_map(|r| {
            let reached = (r as usize) % (points + 1);
            ids.iter().take(reached).enumerate().map(move |(k, cp)| {
                let ts = 600_000 * (k as u64 + 1) + r * 37;
                Passage {
                    id: format!("x{r}-{k}"),
                    participant_id: format!("p{r}"),
                    bib: r.to_string(),
                    checkpoint_id: cp.clone(),
                    checkpoint_name: cp.to_uppercase(),
                    timestamp: ts,
                    net_time: ts as i64,
                }
            })
        })
        .collect()
}

fn bench_store_puts(c: &mut Criterion) {
    c.bench_function("store_put_participants_20k", |b| {
        b.iter(|| {
            let mut store = DocStore::new();
            for i in 0..20_000u64 {
                let _ = store
                    .apply(Op::Put {
                        doc: Document::Participant(runner(i)),
                    })
                    .expect("put");
            }
        });
    });
}

fn bench_leaderboard(c: &mut Criterion) {
    let mut group = c.benchmark_group("leaderboard_recompute");
    let race = race();

    for n in [100u64, 1_000, 5_000] {
        let people: Vec<Participant> = (0..n).map(runner).collect();
        let passages = passages_for(n, 7);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let _ = compute_leaderboard(&race, &people, &passages);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_store_puts, bench_leaderboard);
criterion_main!(benches);
