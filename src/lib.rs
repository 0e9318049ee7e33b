//! Live race timing: passage capture, checkpoint validation, live ranking,
//! and participant import over an in-memory document store with optional
//! SQLite journaling.
//!
//! # Examples
//!
//! Ranking a snapshot directly:
//! ```
//! use racelog::{
//!     engine::ranking::compute_for_race,
//!     model::{Participant, Passage, Race},
//!     snapshot::EventSnapshot,
//!     types::ParticipantStatus,
//! };
//!
//! let runner = |id: &str| Participant {
//!     id: id.to_string(),
//!     bib: id.to_string(),
//!     first_name: "Sam".to_string(),
//!     last_name: "DOE".to_string(),
//!     gender: "M".to_string(),
//!     category: "SENIOR".to_string(),
//!     club: None,
//!     race_id: "r".to_string(),
//!     status: ParticipantStatus::Started,
//!     start_time: None,
//! };
//! let snapshot = EventSnapshot {
//!     races: vec![Race::new("r", "10K", 10.0)],
//!     participants: vec![runner("1"), runner("2")],
//!     passages: vec![Passage {
//!         id: "x".to_string(),
//!         participant_id: "2".to_string(),
//!         bib: "2".to_string(),
//!         checkpoint_id: "finish".to_string(),
//!         checkpoint_name: "ARRIVÉE".to_string(),
//!         timestamp: 3_600_000,
//!         net_time: 3_600_000,
//!     }],
//!     ..EventSnapshot::default()
//! };
//!
//! let board = compute_for_race(&snapshot, "r").expect("race exists");
//! assert_eq!(board.standings[0].bib, "2");
//! assert_eq!(board.standings[0].progress, 100.0);
//! ```
//!
//! Recording through an operator session backed by SQLite:
//! ```no_run
//! use racelog::{
//!     config::EngineConfig,
//!     model::{Document, Race},
//!     persist::sqlite::SqliteOpSink,
//!     timing::{context::RecordingContext, lifecycle, session::OperatorSession},
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let cfg = EngineConfig::default();
//! let sink = SqliteOpSink::open("race.db").expect("open sqlite");
//! let store = cfg.load_store(&sink).expect("replay journal");
//! let handle = cfg.spawn(store, Some(sink));
//!
//! handle.put(Document::Race(Race::new("r10", "10K", 10.0))).await.expect("race");
//! lifecycle::start_race(&handle, "r10", 1_700_000_000_000).await.expect("start");
//!
//! let mut session = OperatorSession::from_config(handle.clone(), RecordingContext::checkpoint("r10", "finish"), &cfg);
//! session.capture();
//! let _ = session.submit("42").await;
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```
#![deny(missing_docs)]

/// Engine settings.
pub mod config;
/// Core in-memory store and index helpers.
pub mod core;
/// Ranking, completeness and results.
pub mod engine;
/// Duration and speed display helpers.
pub mod format;
/// CSV import and export.
pub mod import;
/// Typed documents, patches and shape validation.
pub mod model;
/// Mutation op model and persistence wrapper types.
pub mod op;
/// Persistence abstraction and SQLite implementation.
pub mod persist;
/// Single-writer runtime handle and events.
pub mod runtime;
/// Read-only collection snapshots.
pub mod snapshot;
/// Capture queue, passage recording and operator sessions.
pub mod timing;
/// Shared primitive types and enums.
pub mod types;
