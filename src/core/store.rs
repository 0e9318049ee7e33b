use std::time::{SystemTime, UNIX_EPOCH};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    model::{
        Collection, CombinedPost, Document, MarshalPresence, Participant, Passage, Race, ShapeError,
    },
    op::{Op, StoredOp},
    types::OpSeq,
};

use super::indices::{index_push, index_remove, VecIndex};

/// Default ceiling on the number of ops in one atomic batch.
pub const DEFAULT_MAX_BATCH_OPS: usize = 400;

/// Reasons a batch is rejected; a rejected batch changes nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A patch or delete names a document that does not exist.
    #[error("{collection} document `{id}` not found")]
    MissingDocument {
        /// Collection searched.
        collection: Collection,
        /// Missing id.
        id: String,
    },
    /// A put carries a malformed document.
    #[error(transparent)]
    InvalidDocument(#[from] ShapeError),
    /// More ops than one atomic batch may hold.
    #[error("batch of {len} ops exceeds the ceiling of {max}")]
    BatchTooLarge {
        /// Ops submitted.
        len: usize,
        /// Configured ceiling.
        max: usize,
    },
}

/// Full store contents at a sequence point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshotV1 {
    /// Sequence the next op will receive.
    pub next_op_seq: OpSeq,
    /// Every document, grouped by collection in store order.
    pub documents: Vec<Document>,
}

#[derive(Debug, Default, Clone)]
struct Table {
    docs: HashMap<String, Document>,
    order: Vec<String>,
}

impl Table {
    fn ordered(&self) -> impl Iterator<Item = &Document> {
        self.order.iter().filter_map(|id| self.docs.get(id))
    }
}

/// Authoritative in-memory collections with a monotonic op sequence.
#[derive(Debug)]
pub struct DocStore {
    tables: HashMap<Collection, Table>,
    participants_by_race: VecIndex<String>,
    passages_by_participant: VecIndex<String>,
    pending_ops: Vec<StoredOp>,
    next_op_seq: OpSeq,
    max_batch_ops: usize,
}

impl Default for DocStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocStore {
    /// Empty store with the default batch ceiling.
    pub fn new() -> Self {
        Self::with_batch_ceiling(DEFAULT_MAX_BATCH_OPS)
    }

    /// Empty store accepting at most `max_batch_ops` ops per batch.
    pub fn with_batch_ceiling(max_batch_ops: usize) -> Self {
        Self {
            tables: HashMap::new(),
            participants_by_race: VecIndex::new(),
            passages_by_participant: VecIndex::new(),
            pending_ops: Vec::new(),
            next_op_seq: 1,
            max_batch_ops: max_batch_ops.max(1),
        }
    }

    /// Rebuilds a store from `snapshot` with the default ceiling.
    pub fn from_snapshot(snapshot: StoreSnapshotV1) -> Result<Self, StoreError> {
        Self::from_snapshot_with_ceiling(snapshot, DEFAULT_MAX_BATCH_OPS)
    }

    /// Rebuilds a store from `snapshot` with a batch ceiling of `max_batch_ops`.
    pub fn from_snapshot_with_ceiling(snapshot: StoreSnapshotV1, max_batch_ops: usize) -> Result<Self, StoreError> {
        let mut store = Self::with_batch_ceiling(max_batch_ops);
        store.next_op_seq = snapshot.next_op_seq.max(1);
        for doc in snapshot.documents {
            doc.validate()?;
            store.put_unchecked(doc);
        }
        Ok(store)
    }

    /// Copies every document and the next sequence.
    pub fn export_snapshot(&self) -> StoreSnapshotV1 {
        let documents = Collection::ALL
            .into_iter()
            .flat_map(|c| self.docs(c))
            .cloned()
            .collect();

        StoreSnapshotV1 {
            next_op_seq: self.next_op_seq,
            documents,
        }
    }

    /// Ceiling of one atomic batch.
    pub fn max_batch_ops(&self) -> usize {
        self.max_batch_ops
    }

    /// Commits one op.
    pub fn apply(&mut self, op: Op) -> Result<StoredOp, StoreError> {
        let mut stored = self.commit_batch(vec![op])?;
        Ok(stored.remove(0))
    }

    /// Applies every op or none of them.
    pub fn commit_batch(&mut self, ops: Vec<Op>) -> Result<Vec<StoredOp>, StoreError> {
        if ops.len() > self.max_batch_ops {
            return Err(StoreError::BatchTooLarge {
                len: ops.len(),
                max: self.max_batch_ops,
            });
        }
        self.check_batch(&ops)?;

        let ts_ms = now_ms();
        let mut out = Vec::with_capacity(ops.len());
        for op in ops {
            let seq = self.take_next_op_seq();
            self.apply_unchecked(op.clone());
            let stored = StoredOp { seq, ts_ms, op };
            self.pending_ops.push(stored.clone());
            out.push(stored);
        }
        Ok(out)
    }

    /// Applies a journaled op, keeping its sequence.
    pub fn apply_replayed_op(&mut self, stored: StoredOp) -> Result<(), StoreError> {
        self.check_batch(std::slice::from_ref(&stored.op))?;
        self.apply_unchecked(stored.op);
        self.bump_next_seq_from(stored.seq);
        Ok(())
    }

    /// Document by collection and id.
    pub fn get(&self, collection: Collection, id: &str) -> Option<&Document> {
        self.tables.get(&collection)?.docs.get(id)
    }

    /// Documents of `collection` in store order.
    pub fn docs(&self, collection: Collection) -> impl Iterator<Item = &Document> {
        self.tables.get(&collection).into_iter().flat_map(Table::ordered)
    }

    /// Owned copy of [`docs`](Self::docs).
    pub fn docs_cloned(&self, collection: Collection) -> Vec<Document> {
        self.docs(collection).cloned().collect()
    }

    /// Document count of `collection`.
    pub fn len(&self, collection: Collection) -> usize {
        self.tables.get(&collection).map_or(0, |t| t.order.len())
    }

    /// Race by id.
    pub fn race(&self, id: &str) -> Option<&Race> {
        self.get(Collection::Races, id).and_then(Document::as_race)
    }

    /// Participant by id.
    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.get(Collection::Participants, id)
            .and_then(Document::as_participant)
    }

    /// Passage by id.
    pub fn passage(&self, id: &str) -> Option<&Passage> {
        self.get(Collection::Passages, id).and_then(Document::as_passage)
    }

    /// Combined post by id.
    pub fn combined_post(&self, id: &str) -> Option<&CombinedPost> {
        self.get(Collection::CombinedPosts, id)
            .and_then(Document::as_combined_post)
    }

    /// Every race.
    pub fn races(&self) -> Vec<&Race> {
        self.docs(Collection::Races).filter_map(Document::as_race).collect()
    }

    /// Every participant.
    pub fn participants(&self) -> Vec<&Participant> {
        self.docs(Collection::Participants)
            .filter_map(Document::as_participant)
            .collect()
    }

    /// Every passage.
    pub fn passages(&self) -> Vec<&Passage> {
        self.docs(Collection::Passages)
            .filter_map(Document::as_passage)
            .collect()
    }

    /// Every marshal heartbeat.
    pub fn marshals(&self) -> Vec<&MarshalPresence> {
        self.docs(Collection::Marshals)
            .filter_map(Document::as_marshal)
            .collect()
    }

    /// Participants registered on `race_id`, through the race index.
    pub fn participants_in_race(&self, race_id: &str) -> Vec<&Participant> {
        self.participants_by_race
            .get(race_id)
            .into_iter()
            .flat_map(|ids| ids.iter())
            .filter_map(|id| self.participant(id))
            .collect()
    }

    /// Passages of one participant, through the participant index.
    pub fn passages_of(&self, participant_id: &str) -> Vec<&Passage> {
        self.passages_by_participant
            .get(participant_id)
            .into_iter()
            .flat_map(|ids| ids.iter())
            .filter_map(|id| self.passage(id))
            .collect()
    }

    /// Takes the ops committed since the last drain.
    pub fn drain_pending_ops(&mut self) -> Vec<StoredOp> {
        std::mem::take(&mut self.pending_ops)
    }

    /// Sequence of the last committed op, 0 when empty.
    pub fn latest_op_seq(&self) -> OpSeq {
        self.next_op_seq.saturating_sub(1)
    }

    fn check_batch(&self, ops: &[Op]) -> Result<(), StoreError> {
        let mut overlay: HashMap<(Collection, &str), Option<Document>> = HashMap::new();

        for op in ops {
            match op {
                Op::Put { doc } => {
                    doc.validate()?;
                    overlay.insert((doc.collection(), doc.id()), Some(doc.clone()));
                }
                Op::PatchParticipant { id, patch } => {
                    let key = (Collection::Participants, id.as_str());
                    let current = self.virtual_doc(&overlay, key);
                    let Some(Document::Participant(mut rec)) = current else {
                        return Err(StoreError::MissingDocument {
                            collection: key.0,
                            id: id.clone(),
                        });
                    };
                    patch.apply_to(&mut rec);
                    let doc = Document::Participant(rec);
                    doc.validate()?;
                    overlay.insert(key, Some(doc));
                }
                Op::PatchRace { id, patch } => {
                    let key = (Collection::Races, id.as_str());
                    let current = self.virtual_doc(&overlay, key);
                    let Some(Document::Race(mut rec)) = current else {
                        return Err(StoreError::MissingDocument {
                            collection: key.0,
                            id: id.clone(),
                        });
                    };
                    patch.apply_to(&mut rec);
                    let doc = Document::Race(rec);
                    doc.validate()?;
                    overlay.insert(key, Some(doc));
                }
                Op::Delete { collection, id } => {
                    overlay.insert((*collection, id.as_str()), None);
                }
            }
        }

        Ok(())
    }

    fn virtual_doc(
        &self,
        overlay: &HashMap<(Collection, &str), Option<Document>>,
        key: (Collection, &str),
    ) -> Option<Document> {
        match overlay.get(&key) {
            Some(staged) => staged.clone(),
            None => self.get(key.0, key.1).cloned(),
        }
    }

    fn apply_unchecked(&mut self, op: Op) {
        match op {
            Op::Put { doc } => self.put_unchecked(doc),
            Op::PatchParticipant { id, patch } => {
                if let Some(Document::Participant(rec)) = self.get_mut(Collection::Participants, &id) {
                    patch.apply_to(rec);
                }
            }
            Op::PatchRace { id, patch } => {
                if let Some(Document::Race(rec)) = self.get_mut(Collection::Races, &id) {
                    patch.apply_to(rec);
                }
            }
            Op::Delete { collection, id } => self.delete_unchecked(collection, &id),
        }
    }

    fn put_unchecked(&mut self, doc: Document) {
        let collection = doc.collection();
        let id = doc.id().to_string();

        if let Some(old) = self.get(collection, &id).cloned() {
            self.remove_indices(&old);
        }
        self.insert_indices(&doc);

        let table = self.tables.entry(collection).or_default();
        if table.docs.insert(id.clone(), doc).is_none() {
            table.order.push(id);
        }
    }

    fn delete_unchecked(&mut self, collection: Collection, id: &str) {
        let Some(table) = self.tables.get_mut(&collection) else {
            return;
        };
        let Some(old) = table.docs.remove(id) else {
            return;
        };
        if let Some(pos) = table.order.iter().position(|x| x == id) {
            table.order.remove(pos);
        }
        self.remove_indices(&old);
    }

    fn get_mut(&mut self, collection: Collection, id: &str) -> Option<&mut Document> {
        self.tables.get_mut(&collection)?.docs.get_mut(id)
    }

    fn insert_indices(&mut self, doc: &Document) {
        match doc {
            Document::Participant(p) => index_push(&mut self.participants_by_race, &p.race_id, &p.id),
            Document::Passage(p) => {
                index_push(&mut self.passages_by_participant, &p.participant_id, &p.id)
            }
            _ => {}
        }
    }

    fn remove_indices(&mut self, doc: &Document) {
        match doc {
            Document::Participant(p) => {
                index_remove(&mut self.participants_by_race, &p.race_id, &p.id)
            }
            Document::Passage(p) => {
                index_remove(&mut self.passages_by_participant, &p.participant_id, &p.id)
            }
            _ => {}
        }
    }

    fn take_next_op_seq(&mut self) -> OpSeq {
        let seq = self.next_op_seq;
        self.next_op_seq += 1;
        seq
    }

    fn bump_next_seq_from(&mut self, seq: OpSeq) {
        self.next_op_seq = self.next_op_seq.max(seq.saturating_add(1));
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
