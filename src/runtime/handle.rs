use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch, Mutex},
    time::{Duration, Instant},
};
use tracing::{debug, error, info, warn};

use crate::{
    core::store::{DocStore, StoreError, StoreSnapshotV1},
    model::{Collection, Document, ParticipantPatch, RacePatch},
    op::{Op, StoredOp},
    persist::{OpSink, PersistError},
    snapshot::EventSnapshot,
    types::OpSeq,
};

use super::events::StoreEvent;

/// Failures reported by [`StoreHandle`] calls.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The batch was rejected by the store.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The journal could not take the batch.
    #[error("persistence failure: {0}")]
    Persist(#[from] PersistError),
    /// The runtime task has stopped.
    #[error("store runtime is no longer running")]
    ChannelClosed,
    /// A chunked commit stopped part way.
    #[error("batch aborted after {committed} of {total} chunks")]
    ChunkAborted {
        /// Chunks applied before the failure.
        committed: usize,
        /// Chunks planned.
        total: usize,
        /// Failure of the first rejected chunk.
        #[source]
        source: Box<RuntimeError>,
    },
}

impl RuntimeError {
    /// True for failures that invalidate every read and write, not one operation.
    pub fn is_global(&self) -> bool {
        match self {
            Self::Store(_) => false,
            Self::Persist(_) | Self::ChannelClosed => true,
            Self::ChunkAborted { source, .. } => source.is_global(),
        }
    }
}

/// Persistence worker tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Flush as soon as a passage is journaled.
    pub flush_on_passage: bool,
    /// Buffered ops that force a flush.
    pub batch_max_ops: usize,
    /// Longest time an op waits in the buffer.
    pub batch_max_latency_ms: u64,
    /// Committed batches that may wait for the worker.
    pub persist_queue_bound: usize,
    /// Ops between automatic snapshots; 0 disables them.
    pub snapshot_every_ops: usize,
    /// Compact the journal after each snapshot.
    pub compact_after_snapshot: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            flush_on_passage: true,
            batch_max_ops: 32,
            batch_max_latency_ms: 75,
            persist_queue_bound: 64,
            snapshot_every_ops: 2000,
            compact_after_snapshot: false,
        }
    }
}

/// Latest full document set of one collection.
pub type CollectionSnapshot = Arc<Vec<Document>>;

/// Outcome of a chunked batch that committed every chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkReport {
    /// Chunks committed.
    pub chunks: usize,
    /// Ops committed across all chunks.
    pub ops: usize,
    /// Sequence of the last op.
    pub last_seq: OpSeq,
}

/// Cloneable client of the single-writer store task.
pub struct StoreHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<StoreEvent>,
    collections: Arc<HashMap<Collection, watch::Sender<CollectionSnapshot>>>,
    max_batch_ops: usize,
}

impl Clone for StoreHandle {
    fn clone(&self) -> Self {
        Self {
            cmd_tx: self.cmd_tx.clone(),
            events_tx: self.events_tx.clone(),
            collections: Arc::clone(&self.collections),
            max_batch_ops: self.max_batch_ops,
        }
    }
}

enum Command {
    Commit {
        ops: Vec<Op>,
        resp: oneshot::Sender<Result<OpSeq, RuntimeError>>,
    },
    Get {
        collection: Collection,
        id: String,
        resp: oneshot::Sender<Option<Document>>,
    },
    Query {
        collection: Collection,
        resp: oneshot::Sender<Vec<Document>>,
    },
    Snapshot {
        resp: oneshot::Sender<EventSnapshot>,
    },
    Flush {
        resp: oneshot::Sender<Result<OpSeq, RuntimeError>>,
    },
    Checkpoint {
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    Shutdown {
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
}

enum PersistMsg {
    /// Every op of one committed batch.
    Ops(Vec<StoredOp>),
    Flush {
        resp: oneshot::Sender<Result<OpSeq, PersistError>>,
    },
    Checkpoint {
        snapshot: StoreSnapshotV1,
        last_seq: OpSeq,
        compact: bool,
        resp: oneshot::Sender<Result<(), PersistError>>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

/// Starts the store task, plus a persistence worker when `sink` is given.
pub fn spawn_store(
    store: DocStore,
    sink: Option<Box<dyn OpSink>>,
    config: RuntimeConfig,
) -> StoreHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(256);
    let (events_tx, _) = broadcast::channel::<StoreEvent>(1024);

    let collections: HashMap<Collection, watch::Sender<CollectionSnapshot>> = Collection::ALL
        .into_iter()
        .map(|c| {
            let (tx, _) = watch::channel(Arc::new(store.docs_cloned(c)));
            (c, tx)
        })
        .collect();
    let collections = Arc::new(collections);
    let max_batch_ops = store.max_batch_ops();

    let (persist_tx_opt, mut durable_rx) = if let Some(sink) = sink {
        let (persist_tx, persist_rx) = mpsc::channel::<PersistMsg>(config.persist_queue_bound);
        let (durable_tx, durable_rx) = mpsc::unbounded_channel::<Result<OpSeq, String>>();
        spawn_persistence_worker(sink, persist_rx, durable_tx, config.clone());
        (Some(persist_tx), Some(durable_rx))
    } else {
        (None, None)
    };

    let events_tx_loop = events_tx.clone();
    let collections_loop = Arc::clone(&collections);

    tokio::spawn(async move {
        let mut store = store;
        let mut ops_since_snapshot = 0usize;
        let ctx = LoopCtx {
            events_tx: &events_tx_loop,
            collections: &collections_loop,
            persist_tx: persist_tx_opt.as_ref(),
            config: &config,
        };

        loop {
            if let Some(rx) = durable_rx.as_mut() {
                tokio::select! {
                    cmd = cmd_rx.recv() => {
                        let Some(cmd) = cmd else { break; };
                        if handle_command(cmd, &mut store, &ctx, &mut ops_since_snapshot).await {
                            break;
                        }
                    }
                    durable = rx.recv() => {
                        match durable {
                            Some(Ok(op_seq)) => {
                                let _ = events_tx_loop.send(StoreEvent::DurableUpTo { op_seq });
                            }
                            Some(Err(message)) => {
                                let _ = events_tx_loop.send(StoreEvent::PersistFailed { message });
                            }
                            None => {}
                        }
                    }
                }
            } else {
                let Some(cmd) = cmd_rx.recv().await else { break; };
                if handle_command(cmd, &mut store, &ctx, &mut ops_since_snapshot).await {
                    break;
                }
            }
        }
        info!("store runtime stopped");
    });

    StoreHandle {
        cmd_tx,
        events_tx,
        collections,
        max_batch_ops,
    }
}

impl StoreHandle {
    /// Change, durability and failure events.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events_tx.subscribe()
    }

    /// Stream of full document sets of `collection`, one value per committed change.
    pub fn subscribe_collection(&self, collection: Collection) -> watch::Receiver<CollectionSnapshot> {
        match self.collections.get(&collection) {
            Some(tx) => tx.subscribe(),
            None => watch::channel(Arc::new(Vec::new())).1,
        }
    }

    /// Ceiling of one atomic [`commit`](Self::commit).
    pub fn max_batch_ops(&self) -> usize {
        self.max_batch_ops
    }

    /// Commits `ops` atomically and returns the last sequence.
    pub async fn commit(&self, ops: Vec<Op>) -> Result<OpSeq, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Commit { ops, resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Commits `ops` in sequential chunks of at most `chunk_size`, each atomic.
    ///
    /// Stops at the first failing chunk; earlier chunks stay committed.
    pub async fn commit_chunked(&self, ops: Vec<Op>, chunk_size: usize) -> Result<ChunkReport, RuntimeError> {
        let chunk_size = chunk_size.clamp(1, self.max_batch_ops);
        let total = ops.len().div_ceil(chunk_size);
        let op_count = ops.len();
        let mut report = ChunkReport {
            chunks: 0,
            ops: op_count,
            last_seq: 0,
        };

        let mut ops = ops.into_iter().peekable();
        while ops.peek().is_some() {
            let chunk: Vec<Op> = ops.by_ref().take(chunk_size).collect();
            match self.commit(chunk).await {
                Ok(seq) => {
                    report.chunks += 1;
                    report.last_seq = seq;
                    debug!(chunk = report.chunks, total, "chunk committed");
                }
                Err(err) => {
                    error!(committed = report.chunks, total, error = %err, "chunked batch aborted");
                    return Err(RuntimeError::ChunkAborted {
                        committed: report.chunks,
                        total,
                        source: Box::new(err),
                    });
                }
            }
        }
        Ok(report)
    }

    /// Inserts or replaces one document.
    pub async fn put(&self, doc: Document) -> Result<OpSeq, RuntimeError> {
        self.commit(vec![Op::Put { doc }]).await
    }

    /// Applies a sparse participant update.
    pub async fn patch_participant(&self, id: impl Into<String>, patch: ParticipantPatch) -> Result<OpSeq, RuntimeError> {
        self.commit(vec![Op::PatchParticipant { id: id.into(), patch }]).await
    }

    /// Applies a sparse race update.
    pub async fn patch_race(&self, id: impl Into<String>, patch: RacePatch) -> Result<OpSeq, RuntimeError> {
        self.commit(vec![Op::PatchRace { id: id.into(), patch }]).await
    }

    /// Removes one document.
    pub async fn delete(&self, collection: Collection, id: impl Into<String>) -> Result<OpSeq, RuntimeError> {
        self.commit(vec![Op::Delete {
            collection,
            id: id.into(),
        }])
        .await
    }

    /// One document by id.
    pub async fn get(&self, collection: Collection, id: impl Into<String>) -> Result<Option<Document>, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Get {
                collection,
                id: id.into(),
                resp: tx,
            })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    /// Documents of `collection` accepted by `filter`, in store order.
    pub async fn query(
        &self,
        collection: Collection,
        filter: impl Fn(&Document) -> bool,
    ) -> Result<Vec<Document>, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Query { collection, resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        let docs = rx.await.map_err(|_| RuntimeError::ChannelClosed)?;
        Ok(docs.into_iter().filter(|d| filter(d)).collect())
    }

    /// Copy of the collections the engine reads.
    pub async fn snapshot(&self) -> Result<EventSnapshot, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Snapshot { resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    /// Forces buffered ops to the journal; returns the durable sequence.
    pub async fn flush(&self) -> Result<OpSeq, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Flush { resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Writes a snapshot through the persistence worker.
    pub async fn checkpoint(&self) -> Result<(), RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Checkpoint { resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Flushes and stops the runtime.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Shutdown { resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }
}

struct LoopCtx<'a> {
    events_tx: &'a broadcast::Sender<StoreEvent>,
    collections: &'a HashMap<Collection, watch::Sender<CollectionSnapshot>>,
    persist_tx: Option<&'a mpsc::Sender<PersistMsg>>,
    config: &'a RuntimeConfig,
}

async fn handle_command(
    cmd: Command,
    store: &mut DocStore,
    ctx: &LoopCtx<'_>,
    ops_since_snapshot: &mut usize,
) -> bool {
    match cmd {
        Command::Commit { ops, resp } => {
            let touched: HashSet<Collection> = ops.iter().map(Op::collection).collect();
            let op_count = ops.len();

            // The journal slot is claimed before the store changes, so a full
            // queue rejects the batch with memory untouched.
            let permit = match ctx.persist_tx.filter(|_| op_count > 0).map(reserve_persist).transpose() {
                Ok(permit) => permit,
                Err(err) => {
                    warn!(ops = op_count, error = %err, "batch rejected before commit");
                    let _ = resp.send(Err(err));
                    return false;
                }
            };

            let res = store.commit_batch(ops).map_err(RuntimeError::from).map(|_| {
                let stored = store.drain_pending_ops();
                let last = stored.last().map_or(store.latest_op_seq(), |s| s.seq);
                match permit {
                    Some(permit) => permit.send(PersistMsg::Ops(stored)),
                    None if ctx.persist_tx.is_none() => {
                        let _ = ctx.events_tx.send(StoreEvent::DurableUpTo { op_seq: last });
                    }
                    None => {}
                }
                last
            });

            match &res {
                Ok(seq) if op_count > 0 => {
                    debug!(ops = op_count, seq, "batch committed");
                    for collection in touched {
                        if let Some(tx) = ctx.collections.get(&collection) {
                            tx.send_replace(Arc::new(store.docs_cloned(collection)));
                        }
                        let _ = ctx.events_tx.send(StoreEvent::Changed {
                            collection,
                            seq: *seq,
                        });
                    }
                    *ops_since_snapshot += op_count;
                    maybe_auto_checkpoint(store, ctx.persist_tx, ctx.config, ops_since_snapshot).await;
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "batch rejected"),
            }
            let _ = resp.send(res);
        }
        Command::Get { collection, id, resp } => {
            let _ = resp.send(store.get(collection, &id).cloned());
        }
        Command::Query { collection, resp } => {
            let _ = resp.send(store.docs_cloned(collection));
        }
        Command::Snapshot { resp } => {
            let _ = resp.send(EventSnapshot::from_store(store));
        }
        Command::Flush { resp } => {
            let out = if let Some(tx) = ctx.persist_tx {
                let (flush_tx, flush_rx) = oneshot::channel();
                if tx
                    .send(PersistMsg::Flush { resp: flush_tx })
                    .await
                    .is_err()
                {
                    Err(RuntimeError::ChannelClosed)
                } else {
                    flush_rx
                        .await
                        .map_err(|_| RuntimeError::ChannelClosed)
                        .and_then(|r| r.map_err(RuntimeError::from))
                }
            } else {
                Ok(store.latest_op_seq())
            };
            let _ = resp.send(out);
        }
        Command::Checkpoint { resp } => {
            let out = if let Some(tx) = ctx.persist_tx {
                let snapshot = store.export_snapshot();
                let last_seq = store.latest_op_seq();
                let (cp_tx, cp_rx) = oneshot::channel();
                if tx
                    .send(PersistMsg::Checkpoint {
                        snapshot,
                        last_seq,
                        compact: ctx.config.compact_after_snapshot,
                        resp: cp_tx,
                    })
                    .await
                    .is_err()
                {
                    Err(RuntimeError::ChannelClosed)
                } else {
                    cp_rx
                        .await
                        .map_err(|_| RuntimeError::ChannelClosed)
                        .and_then(|r| r.map_err(RuntimeError::from))
                }
            } else {
                Ok(())
            };
            let _ = resp.send(out);
        }
        Command::Shutdown { resp } => {
            let out = if let Some(tx) = ctx.persist_tx {
                let (done_tx, done_rx) = oneshot::channel();
                let send_res = tx.send(PersistMsg::Shutdown { resp: done_tx }).await;
                if send_res.is_err() {
                    Err(RuntimeError::ChannelClosed)
                } else {
                    match done_rx.await {
                        Ok(()) => Ok(()),
                        Err(_) => Err(RuntimeError::ChannelClosed),
                    }
                }
            } else {
                Ok(())
            };
            let _ = resp.send(out);
            return true;
        }
    }

    false
}

fn spawn_persistence_worker(
    sink: Box<dyn OpSink>,
    mut rx: mpsc::Receiver<PersistMsg>,
    durable_tx: mpsc::UnboundedSender<Result<OpSeq, String>>,
    config: RuntimeConfig,
) {
    let sink = Arc::new(Mutex::new(sink));
    tokio::spawn(async move {
        let mut buf = Vec::<StoredOp>::new();
        let mut deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
        let mut last_durable: OpSeq = 0;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else {
                        let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                        break;
                    };

                    match msg {
                        PersistMsg::Ops(stored) => {
                            let has_passage = stored.iter().any(|s| s.op.collection() == Collection::Passages);
                            buf.extend(stored);

                            if buf.len() >= config.batch_max_ops || (config.flush_on_passage && has_passage) {
                                let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                                deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                            }
                        }
                        PersistMsg::Flush { resp } => {
                            let result = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                            let _ = resp.send(result.map(|_| last_durable));
                            deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                        }
                        PersistMsg::Checkpoint { snapshot, last_seq, compact, resp } => {
                            let flush_result = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                            let result = if let Err(err) = flush_result {
                                Err(err)
                            } else {
                                let sink_ref = Arc::clone(&sink);
                                match tokio::task::spawn_blocking(move || {
                                    let mut sink = sink_ref.blocking_lock();
                                    sink.write_snapshot(&snapshot, last_seq)?;
                                    if compact {
                                        let _ = sink.compact_through(last_seq)?;
                                    }
                                    Result::<(), PersistError>::Ok(())
                                }).await {
                                    Ok(inner) => inner,
                                    Err(e) => Err(PersistError::Message(format!("join error: {e}"))),
                                }
                            };
                            let _ = resp.send(result);
                            deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                        }
                        PersistMsg::Shutdown { resp } => {
                            let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                            let _ = resp.send(());
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline), if !buf.is_empty() => {
                    let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, false).await;
                    deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                }
            }
        }
    });
}

async fn flush_buf(
    sink: &Arc<Mutex<Box<dyn OpSink>>>,
    buf: &mut Vec<StoredOp>,
    last_durable: &mut OpSeq,
    durable_tx: &mpsc::UnboundedSender<Result<OpSeq, String>>,
    call_flush: bool,
) -> Result<(), PersistError> {
    if buf.is_empty() {
        if call_flush {
            let sink_ref = Arc::clone(sink);
            tokio::task::spawn_blocking(move || {
                let mut sink = sink_ref.blocking_lock();
                sink.flush()
            })
            .await
            .map_err(|e| PersistError::Message(format!("join error: {e}")))??;
        }
        return Ok(());
    }

    let ops = std::mem::take(buf);
    let sink_ref = Arc::clone(sink);
    let append_res: Result<OpSeq, PersistError> = tokio::task::spawn_blocking(move || {
        let mut sink = sink_ref.blocking_lock();
        let seq = sink.append_ops(&ops)?;
        if call_flush {
            sink.flush()?;
        }
        Ok(seq)
    })
    .await
    .map_err(|e| PersistError::Message(format!("join error: {e}")))?;

    match append_res {
        Ok(seq) => {
            *last_durable = (*last_durable).max(seq);
            let _ = durable_tx.send(Ok(*last_durable));
            Ok(())
        }
        Err(err) => {
            warn!(error = %err, "journal append failed");
            let _ = durable_tx.send(Err(format!("append failed: {err}")));
            Err(err)
        }
    }
}

async fn maybe_auto_checkpoint(
    store: &DocStore,
    persist_tx: Option<&mpsc::Sender<PersistMsg>>,
    config: &RuntimeConfig,
    ops_since_snapshot: &mut usize,
) {
    if config.snapshot_every_ops == 0 || *ops_since_snapshot < config.snapshot_every_ops {
        return;
    }

    let Some(tx) = persist_tx else {
        return;
    };

    let snapshot = store.export_snapshot();
    let last_seq = store.latest_op_seq();
    let (cp_tx, cp_rx) = oneshot::channel();
    if tx
        .send(PersistMsg::Checkpoint {
            snapshot,
            last_seq,
            compact: config.compact_after_snapshot,
            resp: cp_tx,
        })
        .await
        .is_ok()
    {
        let _ = cp_rx.await;
        *ops_since_snapshot = 0;
    }
}

fn reserve_persist(tx: &mpsc::Sender<PersistMsg>) -> Result<mpsc::Permit<'_, PersistMsg>, RuntimeError> {
    tx.try_reserve()
        .map_err(|err| RuntimeError::Persist(PersistError::Message(format!("persist queue error: {err}"))))
}
