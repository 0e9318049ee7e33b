use racelog::{
    config::EngineConfig,
    core::store::DocStore,
    engine::ranking::compute_for_race,
    import::{
        csv::{export_file_name, export_leaderboard_csv, parse, EXPORT_HEADERS},
        mapping::{auto_map, ImportField},
        plan::{execute_import, plan_import, ImportDefaults},
        ImportError,
    },
    model::{Collection, Participant, Passage, Race},
    runtime::handle::{spawn_store, RuntimeConfig},
    snapshot::EventSnapshot,
    types::ParticipantStatus,
};

fn runner(id: &str, bib: &str, club: Option<&str>) -> Participant {
    Participant {
        id: id.to_string(),
        bib: bib.to_string(),
        first_name: "Zoé".to_string(),
        last_name: format!("Nom{id}"),
        gender: "F".to_string(),
        category: "V2".to_string(),
        club: club.map(str::to_string),
        race_id: "r".to_string(),
        status: ParticipantStatus::Started,
        start_time: None,
    }
}

fn finished_snapshot() -> EventSnapshot {
    EventSnapshot {
        races: vec![Race::new("r", "Trail des Crêtes", 10.0)],
        participants: vec![runner("a", "007", Some("AC \"Sud\"")), runner("b", "12", None)],
        passages: vec![Passage {
            id: "x".to_string(),
            participant_id: "a".to_string(),
            bib: "007".to_string(),
            checkpoint_id: "finish".to_string(),
            checkpoint_name: "ARRIVÉE".to_string(),
            timestamp: 3_600_000,
            net_time: 3_600_000,
        }],
        ..EventSnapshot::default()
    }
}

#[test]
fn export_rows_and_file_name() {
    let snapshot = finished_snapshot();
    let board = compute_for_race(&snapshot, "r").expect("board");
    let text = export_leaderboard_csv(&board, true).expect("export");

    let mut lines = text.lines();
    let header = lines.next().expect("header");
    assert!(header.starts_with('\u{feff}'));
    assert!(header.contains("\"Vitesse (km/h)\""));
    let first = lines.next().expect("first row");
    assert_eq!(
        first,
        "\"1\";\"=\"\"007\"\"\";\"NOMA\";\"Zoé\";\"F\";\"V2\";\"AC \"\"Sud\"\"\";\"ARRIVÉE\";\"01:00:00.00\";\"10.00\";\"100%\""
    );
    let second = lines.next().expect("second row");
    assert!(second.contains("\"Individuel\""));
    assert!(second.contains("\"--:--:--.--\""));
    assert!(second.ends_with("\"0%\""));
    assert_eq!(export_file_name(&board.race_name), "Export_Live_Trail_des_Crêtes.csv");
}

#[test]
fn exported_file_imports_back() {
    let board = compute_for_race(&finished_snapshot(), "r").expect("board");
    let table = parse(&export_leaderboard_csv(&board, true).expect("export")).expect("parse");
    assert_eq!(table.delimiter, ';');
    assert_eq!(table.headers, EXPORT_HEADERS.to_vec());

    let mapping = auto_map(&table.headers);
    assert_eq!(mapping.column(ImportField::Bib), Some(1));
    assert_eq!(mapping.column(ImportField::LastName), Some(2));
    assert_eq!(mapping.column(ImportField::FirstName), Some(3));
    assert_eq!(mapping.column(ImportField::Gender), Some(4));
    assert_eq!(mapping.column(ImportField::Category), Some(5));
    assert_eq!(mapping.column(ImportField::Club), Some(6));

    let target = EventSnapshot {
        races: vec![Race::new("r2", "10K", 10.0)],
        ..EventSnapshot::default()
    };
    let plan = plan_import(&target, &table, &mapping, &ImportDefaults::default(), Some("r2")).expect("plan");
    let imported: Vec<(&str, &str, &str, &str, &str)> = plan
        .participants
        .iter()
        .map(|p| {
            (
                p.bib.as_str(),
                p.last_name.as_str(),
                p.first_name.as_str(),
                p.gender.as_str(),
                p.category.as_str(),
            )
        })
        .collect();
    assert_eq!(
        imported,
        vec![("007", "NOMA", "Zoé", "F", "V2"), ("12", "NOMB", "Zoé", "F", "V2")]
    );
    assert_eq!(plan.participants[0].club.as_deref(), Some("AC \"Sud\""));
    assert!(plan.participants.iter().all(|p| p.race_id == "r2"));
}

#[test]
fn semicolon_file_with_french_headers() {
    let table = parse("Dossard;Nom;Prenom;Sexe,Cat\n1;durand;Léa;F\n;sans;dossard;M\n").expect("parse");
    assert_eq!(table.delimiter, ';');
    let mapping = auto_map(&table.headers);
    assert_eq!(mapping.column(ImportField::Gender), Some(3));

    let snapshot = EventSnapshot {
        races: vec![Race::new("r", "10K", 10.0)],
        ..EventSnapshot::default()
    };
    let plan = plan_import(&snapshot, &table, &mapping, &ImportDefaults::default(), None).expect("plan");
    assert_eq!(plan.participants.len(), 1);
    assert_eq!(plan.skipped_rows, vec![2]);
    assert_eq!(plan.participants[0].last_name, "DURAND");
    assert_eq!(plan.participants[0].status, ParticipantStatus::Registered);
}

#[test]
fn unmapped_required_fields_block_the_import() {
    let table = parse("Prenom,Club\nA,B\n").expect("parse");
    let mapping = auto_map(&table.headers);
    match plan_import(&EventSnapshot::default(), &table, &mapping, &ImportDefaults::default(), None) {
        Err(ImportError::Validation { missing }) => {
            assert_eq!(missing, vec![ImportField::Bib, ImportField::LastName])
        }
        other => panic!("unexpected {other:?}"),
    }

    let header_only = parse("Dossard,Nom\n").expect("parse");
    assert!(matches!(
        plan_import(
            &EventSnapshot::default(),
            &header_only,
            &auto_map(&header_only.headers),
            &ImportDefaults::default(),
            None
        ),
        Err(ImportError::EmptyInput)
    ));
}

#[test]
fn configured_defaults_fill_unmapped_columns() {
    let cfg = EngineConfig::from_json_str(
        r#"{ "import": { "category": "espoir", "gender": "F", "race_distance_km": 5 } }"#,
    )
    .expect("config");
    let table = parse("Dossard,Nom,Course\n1,Abel,Relais\n").expect("parse");
    let plan = plan_import(&EventSnapshot::default(), &table, &auto_map(&table.headers), &cfg.import, None)
        .expect("plan");

    assert_eq!(plan.new_races[0].distance, 5.0);
    let p = &plan.participants[0];
    assert_eq!((p.category.as_str(), p.gender.as_str()), ("ESPOIR", "F"));
}

#[tokio::test]
async fn oversized_import_commits_in_chunks() {
    let handle = spawn_store(DocStore::with_batch_ceiling(10), None, RuntimeConfig::default());

    let mut text = String::from("Dossard,Nom,Course\n");
    for i in 0..25 {
        let race = if i % 2 == 0 { "Trail 21" } else { "Rando 12" };
        text.push_str(&format!("{i},Runner{i},{race}\n"));
    }
    let table = parse(&text).expect("parse");
    let mapping = auto_map(&table.headers);
    let snapshot = handle.snapshot().await.expect("snapshot");
    let plan = plan_import(&snapshot, &table, &mapping, &ImportDefaults::default(), None).expect("plan");
    assert_eq!(plan.new_races.len(), 2);
    assert_eq!(plan.len(), 27);

    let report = execute_import(&handle, plan).await.expect("import");
    assert_eq!(report.chunks, 3);
    assert_eq!(report.participants, 25);
    assert_eq!(report.races_created, 2);
    assert_eq!(report.last_seq, 27);

    let races = handle.query(Collection::Races, |_| true).await.expect("races");
    let distances: Vec<f64> = races
        .iter()
        .filter_map(|d| d.as_race())
        .map(|r| r.distance)
        .collect();
    assert_eq!(distances, vec![21.0, 12.0]);

    let small = parse("Dossard,Nom\n99,Last\n").expect("parse");
    let snapshot = handle.snapshot().await.expect("snapshot");
    let plan = plan_import(&snapshot, &small, &auto_map(&small.headers), &ImportDefaults::default(), None)
        .expect("plan");
    let report = execute_import(&handle, plan).await.expect("atomic import");
    assert_eq!(report.chunks, 1);

    handle.shutdown().await.expect("shutdown");
}
