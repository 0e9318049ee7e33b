//! SQLite-backed append-only journal of committed ops.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    core::store::{now_ms, DocStore, StoreSnapshotV1, DEFAULT_MAX_BATCH_OPS},
    model::Collection,
    op::{StoredOp, StoredOpEnvelope, OP_FORMAT_VERSION},
    types::OpSeq,
};

use super::{OpSink, PersistError, PersistResult};

const SNAPSHOT_FORMAT_VERSION: u16 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotEnvelope {
    format_version: u16,
    snapshot: StoreSnapshotV1,
}

/// SQLite implementation of [`crate::persist::OpSink`].
pub struct SqliteOpSink {
    conn: Connection,
}

impl SqliteOpSink {
    /// Opens or creates a journal at `path` in WAL mode with `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    /// Private in-memory journal, for tests and dry runs.
    pub fn open_in_memory() -> PersistResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> PersistResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn })
    }

    /// Rebuilds the store from the latest snapshot plus the journal tail.
    pub fn load_store(&self) -> PersistResult<DocStore> {
        self.load_store_with_ceiling(DEFAULT_MAX_BATCH_OPS)
    }

    /// [`load_store`](Self::load_store) with an explicit batch ceiling.
    pub fn load_store_with_ceiling(&self, max_batch_ops: usize) -> PersistResult<DocStore> {
        let mut store = match self.load_latest_snapshot()? {
            Some(snapshot) => DocStore::from_snapshot_with_ceiling(snapshot, max_batch_ops)?,
            None => DocStore::with_batch_ceiling(max_batch_ops),
        };

        let start_seq = store.latest_op_seq();
        let events = self.load_events_after(start_seq)?;
        let replayed = events.len();
        for event in events {
            store.apply_replayed_op(event)?;
        }
        info!(from_seq = start_seq, replayed, "store reloaded from journal");
        Ok(store)
    }

    /// Events strictly after `seq`, oldest first.
    pub fn load_events_after(&self, seq: OpSeq) -> PersistResult<Vec<StoredOp>> {
        let mut stmt = self
            .conn
            .prepare("SELECT seq, ts_ms, payload FROM events WHERE seq > ?1 ORDER BY seq ASC")?;
        let rows = stmt.query_map(params![seq as i64], decode_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(PersistError::from)
    }

    /// Every journaled op touching one document, oldest first.
    pub fn history_of(&self, collection: Collection, doc_id: &str) -> PersistResult<Vec<StoredOp>> {
        let mut stmt = self.conn.prepare(
            "SELECT seq, ts_ms, payload FROM events WHERE collection = ?1 AND doc_id = ?2 ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![collection.name(), doc_id], decode_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(PersistError::from)
    }

    /// Stores `snapshot` as taken at `last_seq`.
    pub fn write_snapshot(&mut self, snapshot: &StoreSnapshotV1, last_seq: OpSeq) -> PersistResult<()> {
        let env = SnapshotEnvelope {
            format_version: SNAPSHOT_FORMAT_VERSION,
            snapshot: snapshot.clone(),
        };
        let payload = serde_json::to_vec(&env)?;
        self.conn.execute(
            "INSERT INTO snapshots(last_seq, ts_ms, payload) VALUES (?1, ?2, ?3)",
            params![last_seq as i64, now_ms() as i64, payload],
        )?;
        debug!(last_seq, "snapshot written");
        Ok(())
    }

    /// Deletes events up to and including `seq`.
    pub fn compact_through(&mut self, seq: OpSeq) -> PersistResult<usize> {
        let count = self
            .conn
            .execute("DELETE FROM events WHERE seq <= ?1", params![seq as i64])?;
        debug!(seq, removed = count, "journal compacted");
        Ok(count)
    }

    /// Highest journaled sequence, 0 when empty.
    pub fn latest_seq(&self) -> PersistResult<OpSeq> {
        let seq: Option<i64> = self
            .conn
            .query_row("SELECT MAX(seq) FROM events", [], |row| row.get(0))
            .optional()?
            .flatten();
        Ok(seq.unwrap_or(0) as OpSeq)
    }

    fn load_latest_snapshot(&self) -> PersistResult<Option<StoreSnapshotV1>> {
        let payload: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT payload FROM snapshots ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        let env: SnapshotEnvelope = serde_json::from_slice(&payload)?;
        if env.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(PersistError::Message(format!(
                "unsupported snapshot format: {}",
                env.format_version
            )));
        }
        Ok(Some(env.snapshot))
    }
}

impl OpSink for SqliteOpSink {
    fn append_ops(&mut self, ops: &[StoredOp]) -> PersistResult<OpSeq> {
        if ops.is_empty() {
            return self.latest_seq();
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO events(seq, ts_ms, collection, doc_id, payload) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for stored in ops {
                let payload = serde_json::to_vec(&StoredOpEnvelope::new(stored.clone()))?;
                stmt.execute(params![
                    stored.seq as i64,
                    stored.ts_ms as i64,
                    stored.op.collection().name(),
                    stored.op.doc_id(),
                    payload,
                ])?;
            }
        }
        tx.commit()?;

        Ok(ops.last().map_or(0, |o| o.seq))
    }

    fn flush(&mut self) -> PersistResult<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
        Ok(())
    }

    fn write_snapshot(&mut self, snapshot: &StoreSnapshotV1, last_seq: OpSeq) -> PersistResult<()> {
        SqliteOpSink::write_snapshot(self, snapshot, last_seq)
    }

    fn compact_through(&mut self, seq: OpSeq) -> PersistResult<usize> {
        SqliteOpSink::compact_through(self, seq)
    }
}

fn decode_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredOp> {
    let seq: i64 = row.get(0)?;
    let ts_ms: i64 = row.get(1)?;
    let payload: Vec<u8> = row.get(2)?;
    let mut op = decode_stored_op_payload(&payload).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(
            payload.len(),
            rusqlite::types::Type::Blob,
            Box::new(std::io::Error::other(err)),
        )
    })?;
    op.seq = seq as OpSeq;
    op.ts_ms = ts_ms as u64;
    Ok(op)
}

fn decode_stored_op_payload(payload: &[u8]) -> Result<StoredOp, String> {
    let envelope = serde_json::from_slice::<StoredOpEnvelope>(payload)
        .map_err(|e| format!("op payload decode failed: {e}"))?;
    if envelope.format_version != OP_FORMAT_VERSION {
        return Err(format!(
            "unsupported op format version: {}",
            envelope.format_version
        ));
    }
    Ok(envelope.stored)
}
