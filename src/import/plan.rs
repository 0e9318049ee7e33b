use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    model::{new_doc_id, Document, Participant, Race},
    op::Op,
    runtime::handle::StoreHandle,
    snapshot::EventSnapshot,
    types::{OpSeq, ParticipantStatus, RaceId},
};

use super::{
    csv::Table,
    mapping::{ColumnMapping, ImportField},
    ImportError, ImportResult,
};

/// Values used when a column is unmapped or empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportDefaults {
    /// Category of rows without one, upper-cased on use.
    pub category: String,
    /// Gender of rows without one.
    pub gender: String,
    /// Distance of created races whose name holds no number.
    pub race_distance_km: f64,
}

impl Default for ImportDefaults {
    fn default() -> Self {
        Self {
            category: "SENIOR".to_string(),
            gender: "M".to_string(),
            race_distance_km: 10.0,
        }
    }
}

/// Races to create and participants to register, in commit order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportPlan {
    /// Races missing from the store, in first-seen order.
    pub new_races: Vec<Race>,
    /// One REGISTERED participant per accepted row.
    pub participants: Vec<Participant>,
    /// 1-based data rows left out for lack of a bib.
    pub skipped_rows: Vec<usize>,
}

impl ImportPlan {
    /// Race puts first, so any chunk boundary keeps races ahead of their runners.
    pub fn ops(&self) -> Vec<Op> {
        self.new_races
            .iter()
            .cloned()
            .map(Document::Race)
            .chain(self.participants.iter().cloned().map(Document::Participant))
            .map(|doc| Op::Put { doc })
            .collect()
    }

    /// Ops the plan will commit.
    pub fn len(&self) -> usize {
        self.new_races.len() + self.participants.len()
    }

    /// True when nothing would be committed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of [`execute_import`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportReport {
    /// Races created.
    pub races_created: usize,
    /// Participants registered.
    pub participants: usize,
    /// Rows left out for lack of a bib.
    pub skipped_rows: usize,
    /// Commits used; 1 when the whole import was atomic.
    pub chunks: usize,
    /// Sequence of the last committed op.
    pub last_seq: OpSeq,
}

/// First run of ASCII digits in `name`, else `default`.
pub fn distance_from_name(name: &str, default: f64) -> f64 {
    let digits: String = name
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse::<f64>().unwrap_or(default)
}

/// `F` when the value starts with f or F, `M` otherwise.
pub fn normalize_gender(value: &str) -> String {
    if value.trim().starts_with(['f', 'F']) {
        "F".to_string()
    } else {
        "M".to_string()
    }
}

/// Builds one REGISTERED participant per row, creating missing races by name.
///
/// Rows without a race value join `default_race`, or the first existing race.
pub fn plan_import(
    snapshot: &EventSnapshot,
    table: &Table,
    mapping: &ColumnMapping,
    defaults: &ImportDefaults,
    default_race: Option<&str>,
) -> ImportResult<ImportPlan> {
    mapping.validate()?;
    if table.rows.is_empty() {
        return Err(ImportError::EmptyInput);
    }

    let mut race_ids: HashMap<String, RaceId> = HashMap::new();
    for race in &snapshot.races {
        race_ids
            .entry(race.name.trim().to_lowercase())
            .or_insert_with(|| race.id.clone());
    }
    let fallback_race = default_race
        .filter(|id| snapshot.race(id).is_some())
        .map(str::to_string)
        .or_else(|| snapshot.races.first().map(|r| r.id.clone()));

    let mut plan = ImportPlan::default();
    let cell = |row: usize, field: ImportField| mapped_cell(table, mapping, row, field);

    for row in 0..table.rows.len() {
        if cell(row, ImportField::Bib).is_empty() {
            warn!(row = row + 1, "row without bib skipped");
            plan.skipped_rows.push(row + 1);
            continue;
        }
        let race_name = cell(row, ImportField::Race);
        let race_id = if race_name.is_empty() {
            fallback_race
                .clone()
                .ok_or(ImportError::NoTargetRace { row: row + 1 })?
        } else {
            let key = race_name.to_lowercase();
            match race_ids.get(&key) {
                Some(id) => id.clone(),
                None => {
                    let race = Race::new(
                        new_doc_id(),
                        race_name,
                        distance_from_name(race_name, defaults.race_distance_km),
                    );
                    debug!(race = %race.name, distance = race.distance, "race created by import");
                    race_ids.insert(key, race.id.clone());
                    let id = race.id.clone();
                    plan.new_races.push(race);
                    id
                }
            }
        };

        let gender = match cell(row, ImportField::Gender) {
            "" => normalize_gender(&defaults.gender),
            g => normalize_gender(g),
        };
        let category = match cell(row, ImportField::Category) {
            "" => defaults.category.to_uppercase(),
            c => c.to_uppercase(),
        };
        let club = Some(cell(row, ImportField::Club))
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        plan.participants.push(Participant {
            id: new_doc_id(),
            bib: cell(row, ImportField::Bib).to_string(),
            first_name: cell(row, ImportField::FirstName).to_string(),
            last_name: cell(row, ImportField::LastName).to_uppercase(),
            gender,
            category,
            club,
            race_id,
            status: ParticipantStatus::Registered,
            start_time: None,
        });
    }

    Ok(plan)
}

fn mapped_cell<'t>(table: &'t Table, mapping: &ColumnMapping, row: usize, field: ImportField) -> &'t str {
    mapping
        .column(field)
        .map_or("", |c| table.cell(row, c))
        .trim()
}

/// Commits `plan` atomically when it fits one batch, in ordered chunks otherwise.
pub async fn execute_import(handle: &StoreHandle, plan: ImportPlan) -> ImportResult<ImportReport> {
    let ops = plan.ops();
    let ceiling = handle.max_batch_ops();
    let (chunks, last_seq) = if ops.len() <= ceiling {
        (1, handle.commit(ops).await?)
    } else {
        let report = handle.commit_chunked(ops, ceiling).await?;
        (report.chunks, report.last_seq)
    };

    let report = ImportReport {
        races_created: plan.new_races.len(),
        participants: plan.participants.len(),
        skipped_rows: plan.skipped_rows.len(),
        chunks,
        last_seq,
    };
    info!(
        races = report.races_created,
        participants = report.participants,
        skipped = report.skipped_rows,
        chunks = report.chunks,
        "participants imported"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::{csv::parse, mapping::auto_map};

    #[test]
    fn distance_uses_first_digit_run() {
        assert_eq!(distance_from_name("Trail 21km", 10.0), 21.0);
        assert_eq!(distance_from_name("Semi 21.1", 10.0), 21.0);
        assert_eq!(distance_from_name("Relais", 10.0), 10.0);
    }

    #[test]
    fn rows_create_races_once_and_normalize_fields() {
        let table = parse("Dossard,Nom,Prenom,Sexe,Course,Cat\n1,doe,Jane,femme,Trail 25,v1\n2,roe,Rick,,trail 25,\n").unwrap();
        let mapping = auto_map(&table.headers);
        let plan = plan_import(&EventSnapshot::default(), &table, &mapping, &ImportDefaults::default(), None).unwrap();

        assert_eq!(plan.new_races.len(), 1);
        assert_eq!(plan.new_races[0].distance, 25.0);
        let [jane, rick] = &plan.participants[..] else {
            panic!("two participants expected");
        };
        assert_eq!(jane.last_name, "DOE");
        assert_eq!(jane.gender, "F");
        assert_eq!(jane.category, "V1");
        assert_eq!(rick.gender, "M");
        assert_eq!(rick.category, "SENIOR");
        assert_eq!(jane.race_id, rick.race_id);
        assert_eq!(plan.ops().len(), 3);
    }

    #[test]
    fn missing_race_column_needs_an_existing_race() {
        let table = parse("Dossard;Nom\n1;DOE\n").unwrap();
        let mapping = auto_map(&table.headers);
        let err = plan_import(&EventSnapshot::default(), &table, &mapping, &ImportDefaults::default(), None);
        assert!(matches!(err, Err(ImportError::NoTargetRace { row: 1 })));

        let snap = EventSnapshot {
            races: vec![Race::new("r1", "10K", 10.0)],
            ..EventSnapshot::default()
        };
        let plan = plan_import(&snap, &table, &mapping, &ImportDefaults::default(), None).unwrap();
        assert_eq!(plan.participants[0].race_id, "r1");
        assert!(plan.new_races.is_empty());
    }

    #[test]
    fn duplicate_race_names_resolve_to_the_first() {
        let table = parse("Dossard,Nom,Course\n1,DOE,trail\n").unwrap();
        let mapping = auto_map(&table.headers);
        let snap = EventSnapshot {
            races: vec![Race::new("r1", "Trail", 20.0), Race::new("r2", "TRAIL ", 30.0)],
            ..EventSnapshot::default()
        };
        let plan = plan_import(&snap, &table, &mapping, &ImportDefaults::default(), None).unwrap();
        assert_eq!(plan.participants[0].race_id, "r1");
        assert_eq!(snap.race_by_name("trail").map(|r| r.id.as_str()), Some("r1"));
        assert!(plan.new_races.is_empty());
    }
}
