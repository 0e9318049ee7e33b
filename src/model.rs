//! Typed event documents, sparse patches, and boundary shape validation.

use std::fmt;
use std::str::FromStr;

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{
    is_finish, CheckpointId, CombinedPostId, EpochMs, ParticipantId, ParticipantStatus, PassageId,
    RaceId, RaceStatus, RaceType,
};

/// Control point along a race course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Stable identity key within the race.
    pub id: CheckpointId,
    /// Display name.
    pub name: String,
    /// Distance from the start in km.
    pub distance: f64,
    /// True when a passage here is required for a valid finish.
    pub is_mandatory: bool,
}

/// Race configuration and lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Race {
    /// Document id.
    pub id: RaceId,
    /// Display name, matched case-insensitively by the importer.
    pub name: String,
    /// Course length in km.
    pub distance: f64,
    /// Start procedure.
    #[serde(rename = "type", default)]
    pub race_type: RaceType,
    /// Lifecycle state.
    #[serde(default)]
    pub status: RaceStatus,
    /// Start instant, present iff running or finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<EpochMs>,
    /// Ordered intermediate checkpoints; the finish is implicit.
    #[serde(default)]
    pub checkpoints: Vec<Checkpoint>,
    /// One label per stretch between consecutive points.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segments: Option<Vec<String>>,
}

impl Race {
    /// Creates a READY race with no checkpoints.
    pub fn new(id: impl Into<RaceId>, name: impl Into<String>, distance: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            distance,
            race_type: RaceType::Group,
            status: RaceStatus::Ready,
            start_time: None,
            checkpoints: Vec::new(),
            segments: None,
        }
    }

    /// Looks up a configured checkpoint by id.
    pub fn checkpoint(&self, id: &str) -> Option<&Checkpoint> {
        self.checkpoints.iter().find(|cp| cp.id == id)
    }

    /// Mandatory configured checkpoints, excluding the implicit finish.
    pub fn mandatory_checkpoints(&self) -> impl Iterator<Item = &Checkpoint> {
        self.checkpoints.iter().filter(|cp| cp.is_mandatory)
    }

    /// Ids that must be passed for a complete course, finish included.
    pub fn mandatory_ids(&self) -> HashSet<&str> {
        let mut ids: HashSet<&str> = self.mandatory_checkpoints().map(|cp| cp.id.as_str()).collect();
        ids.insert(crate::types::FINISH_CHECKPOINT_ID);
        ids
    }
}

/// Registered runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// Document id.
    pub id: ParticipantId,
    /// Race number, unique within the owning race only.
    pub bib: String,
    /// Given name.
    #[serde(default)]
    pub first_name: String,
    /// Family name, stored upper-cased by the importer.
    #[serde(default)]
    pub last_name: String,
    /// `M` or `F`.
    #[serde(default)]
    pub gender: String,
    /// Age category, upper-cased.
    #[serde(default)]
    pub category: String,
    /// Optional club name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub club: Option<String>,
    /// Owning race.
    pub race_id: RaceId,
    /// Lifecycle state.
    #[serde(default)]
    pub status: ParticipantStatus,
    /// Individual start, overriding the race start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<EpochMs>,
}

impl Participant {
    /// `LASTNAME Firstname` display label.
    pub fn display_name(&self) -> String {
        format!("{} {}", self.last_name, self.first_name).trim().to_string()
    }
}

/// One recorded crossing of a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Passage {
    /// Document id.
    pub id: PassageId,
    /// Participant that crossed.
    pub participant_id: ParticipantId,
    /// Denormalized bib for display.
    pub bib: String,
    /// Crossed checkpoint, or `finish`.
    pub checkpoint_id: CheckpointId,
    /// Denormalized checkpoint name.
    pub checkpoint_name: String,
    /// Capture instant.
    pub timestamp: EpochMs,
    /// Elapsed time since the effective start; negative on clock error.
    pub net_time: i64,
}

/// One race/checkpoint served by a combined post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostAssignment {
    /// Served race.
    pub race_id: RaceId,
    /// Denormalized race name.
    pub race_name: String,
    /// Checkpoint of that race located at the post.
    pub checkpoint_id: CheckpointId,
    /// Denormalized checkpoint name.
    pub checkpoint_name: String,
}

/// Physical station serving checkpoints of several races.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedPost {
    /// Document id.
    pub id: CombinedPostId,
    /// Station name.
    pub name: String,
    /// Ordered assignments, one per race.
    pub assignments: Vec<PostAssignment>,
}

impl CombinedPost {
    /// Assignment serving `race_id`, if any.
    pub fn assignment_for(&self, race_id: &str) -> Option<&PostAssignment> {
        self.assignments.iter().find(|a| a.race_id == race_id)
    }

    /// Races served by this post, in assignment order.
    pub fn race_ids(&self) -> impl Iterator<Item = &str> {
        self.assignments.iter().map(|a| a.race_id.as_str())
    }
}

/// Marshal heartbeat record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarshalPresence {
    /// Session id of the marshal terminal.
    pub id: String,
    /// Marshal name.
    pub name: String,
    /// Station label shown to race control.
    pub station_name: String,
    /// Active checkpoint.
    pub checkpoint_id: CheckpointId,
    /// Active race.
    pub race_id: RaceId,
    /// Last heartbeat instant.
    pub last_active: EpochMs,
}

/// Tri-state update for an optional field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldUpdate<T> {
    /// Store this value.
    Set(T),
    /// Remove the value.
    Clear,
}

impl<T: Clone> FieldUpdate<T> {
    fn apply(&self, slot: &mut Option<T>) {
        *slot = match self {
            Self::Set(v) => Some(v.clone()),
            Self::Clear => None,
        };
    }
}

/// Sparse participant update; each `Some` field overwrites the record value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParticipantPatch {
    /// Optional replacement for status.
    pub status: Option<ParticipantStatus>,
    /// Optional individual start update.
    pub start_time: Option<FieldUpdate<EpochMs>>,
}

impl ParticipantPatch {
    /// Patch that only changes the status.
    pub fn status(status: ParticipantStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Returns true when no fields are set.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Applies this patch in place to `rec`.
    pub fn apply_to(&self, rec: &mut Participant) {
        if let Some(v) = self.status {
            rec.status = v;
        }
        if let Some(v) = &self.start_time {
            v.apply(&mut rec.start_time);
        }
    }
}

/// Sparse race update; each `Some` field overwrites the record value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RacePatch {
    /// Optional replacement for status.
    pub status: Option<RaceStatus>,
    /// Optional start time update.
    pub start_time: Option<FieldUpdate<EpochMs>>,
}

impl RacePatch {
    /// Returns true when no fields are set.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Applies this patch in place to `rec`.
    pub fn apply_to(&self, rec: &mut Race) {
        if let Some(v) = self.status {
            rec.status = v;
        }
        if let Some(v) = &self.start_time {
            v.apply(&mut rec.start_time);
        }
    }
}

/// Named collection of the document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    /// Race configurations.
    Races,
    /// Registered runners.
    Participants,
    /// Recorded passages.
    Passages,
    /// Shared stations.
    CombinedPosts,
    /// Marshal heartbeats.
    Marshals,
}

impl Collection {
    /// Every collection, in dependency order.
    pub const ALL: [Collection; 5] = [
        Collection::Races,
        Collection::Participants,
        Collection::Passages,
        Collection::CombinedPosts,
        Collection::Marshals,
    ];

    /// Stable wire name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Races => "races",
            Self::Participants => "participants",
            Self::Passages => "passages",
            Self::CombinedPosts => "global_combined_posts",
            Self::Marshals => "active_marshals",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Collection {
    type Err = ShapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Collection::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| ShapeError::UnknownCollection(s.to_string()))
    }
}

/// Document rejected at the store boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    /// Collection name is not one of [`Collection::ALL`].
    #[error("unknown collection `{0}`")]
    UnknownCollection(String),
    /// Payload does not deserialize into the collection's record type.
    #[error("malformed {collection} document: {reason}")]
    Malformed {
        /// Target collection.
        collection: Collection,
        /// Deserializer message.
        reason: String,
    },
    /// Record deserialized but breaks a model invariant.
    #[error("invalid {collection} document `{id}`: {reason}")]
    Invariant {
        /// Target collection.
        collection: Collection,
        /// Offending document id.
        id: String,
        /// Broken invariant.
        reason: String,
    },
}

/// Any document the store can hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "collection", content = "doc", rename_all = "snake_case")]
pub enum Document {
    /// Race document.
    Race(Race),
    /// Participant document.
    Participant(Participant),
    /// Passage document.
    Passage(Passage),
    /// Combined post document.
    CombinedPost(CombinedPost),
    /// Marshal heartbeat document.
    Marshal(MarshalPresence),
}

impl Document {
    /// Collection the document belongs to.
    pub fn collection(&self) -> Collection {
        match self {
            Self::Race(_) => Collection::Races,
            Self::Participant(_) => Collection::Participants,
            Self::Passage(_) => Collection::Passages,
            Self::CombinedPost(_) => Collection::CombinedPosts,
            Self::Marshal(_) => Collection::Marshals,
        }
    }

    /// Document id.
    pub fn id(&self) -> &str {
        match self {
            Self::Race(d) => &d.id,
            Self::Participant(d) => &d.id,
            Self::Passage(d) => &d.id,
            Self::CombinedPost(d) => &d.id,
            Self::Marshal(d) => &d.id,
        }
    }

    /// Borrowed race, if this is one.
    pub fn as_race(&self) -> Option<&Race> {
        match self {
            Self::Race(d) => Some(d),
            _ => None,
        }
    }

    /// Borrowed participant, if this is one.
    pub fn as_participant(&self) -> Option<&Participant> {
        match self {
            Self::Participant(d) => Some(d),
            _ => None,
        }
    }

    /// Borrowed passage, if this is one.
    pub fn as_passage(&self) -> Option<&Passage> {
        match self {
            Self::Passage(d) => Some(d),
            _ => None,
        }
    }

    /// Borrowed combined post, if this is one.
    pub fn as_combined_post(&self) -> Option<&CombinedPost> {
        match self {
            Self::CombinedPost(d) => Some(d),
            _ => None,
        }
    }

    /// Borrowed marshal heartbeat, if this is one.
    pub fn as_marshal(&self) -> Option<&MarshalPresence> {
        match self {
            Self::Marshal(d) => Some(d),
            _ => None,
        }
    }

    /// Decodes an untyped payload for `collection` and validates it.
    pub fn from_value(collection: Collection, value: serde_json::Value) -> Result<Self, ShapeError> {
        fn decode<T: serde::de::DeserializeOwned>(
            collection: Collection,
            value: serde_json::Value,
        ) -> Result<T, ShapeError> {
            serde_json::from_value(value).map_err(|e| ShapeError::Malformed {
                collection,
                reason: e.to_string(),
            })
        }

        let doc = match collection {
            Collection::Races => Self::Race(decode(collection, value)?),
            Collection::Participants => Self::Participant(decode(collection, value)?),
            Collection::Passages => Self::Passage(decode(collection, value)?),
            Collection::CombinedPosts => Self::CombinedPost(decode(collection, value)?),
            Collection::Marshals => Self::Marshal(decode(collection, value)?),
        };
        doc.validate()?;
        Ok(doc)
    }

    /// Checks the model invariants of this document.
    pub fn validate(&self) -> Result<(), ShapeError> {
        let fail = |reason: &str| ShapeError::Invariant {
            collection: self.collection(),
            id: self.id().to_string(),
            reason: reason.to_string(),
        };

        if self.id().trim().is_empty() {
            return Err(fail("empty id"));
        }

        match self {
            Self::Race(race) => {
                if race.status.has_start_time() != race.start_time.is_some() {
                    return Err(fail("start time must be set exactly when running or finished"));
                }
                if !race.distance.is_finite() || race.distance < 0.0 {
                    return Err(fail("distance must be a non-negative number"));
                }
                let mut seen = HashSet::new();
                for cp in &race.checkpoints {
                    if is_finish(&cp.id) {
                        return Err(fail("checkpoint id `finish` is reserved"));
                    }
                    if !seen.insert(cp.id.as_str()) {
                        return Err(fail("duplicate checkpoint id"));
                    }
                }
                if let Some(segments) = &race.segments {
                    if segments.len() != race.checkpoints.len() + 1 {
                        return Err(fail("segment labels must number checkpoints + 1"));
                    }
                }
            }
            Self::Participant(p) => {
                if p.bib.trim().is_empty() {
                    return Err(fail("empty bib"));
                }
                if p.race_id.is_empty() {
                    return Err(fail("missing race id"));
                }
            }
            Self::Passage(p) => {
                if p.participant_id.is_empty() || p.checkpoint_id.is_empty() {
                    return Err(fail("passage must reference a participant and a checkpoint"));
                }
            }
            Self::CombinedPost(post) => {
                let mut seen = HashSet::new();
                for a in &post.assignments {
                    if !seen.insert(a.race_id.as_str()) {
                        return Err(fail("race served twice by one post"));
                    }
                }
            }
            Self::Marshal(_) => {}
        }

        Ok(())
    }
}

/// Generates a fresh document id.
pub fn new_doc_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn running_race_without_start_is_rejected() {
        let err = Document::from_value(
            Collection::Races,
            json!({"id": "r1", "name": "10K", "distance": 10.0, "status": "RUNNING"}),
        )
        .unwrap_err();
        assert!(matches!(err, ShapeError::Invariant { .. }));
    }

    #[test]
    fn combined_post_with_repeated_race_is_rejected() {
        let a = PostAssignment {
            race_id: "r1".into(),
            race_name: "A".into(),
            checkpoint_id: "cp1".into(),
            checkpoint_name: "CP1".into(),
        };
        let doc = Document::CombinedPost(CombinedPost {
            id: "p".into(),
            name: "Junction".into(),
            assignments: vec![a.clone(), a],
        });
        assert!(doc.validate().is_err());
    }

    #[test]
    fn participant_decodes_from_camel_case() {
        let doc = Document::from_value(
            Collection::Participants,
            json!({"id": "p1", "bib": "42", "raceId": "r1", "lastName": "DOE", "status": "DNF"}),
        )
        .expect("decode");
        let Document::Participant(p) = doc else {
            panic!("wrong variant");
        };
        assert_eq!(p.status, ParticipantStatus::Dnf);
        assert_eq!(p.first_name, "");
    }

    #[test]
    fn collection_names_round_trip() {
        for c in Collection::ALL {
            assert_eq!(c.name().parse::<Collection>().unwrap(), c);
        }
    }
}
