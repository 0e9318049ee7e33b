//! One operator terminal: a recording context, a private capture queue and
//! a health banner.
//!
//! The session waits for the store to acknowledge each write before it
//! reports success. A queued timestamp is consumed only once its passage
//! committed, so a mistyped bib keeps the head of the queue for the retry.

use tracing::{debug, info, warn};

use crate::{
    config::EngineConfig,
    core::store::now_ms,
    engine::validator::Completeness,
    model::{Collection, MarshalPresence, Participant, Passage},
    runtime::handle::{RuntimeError, StoreHandle},
    types::{EpochMs, OpSeq, ParticipantStatus},
};

use super::{
    capture::{CaptureQueue, CapturedTime},
    context::RecordingContext,
    lifecycle::{plan_dnf, plan_undo_passage},
    presence::{roster, Liveness, MarshalIdentity, PresenceThresholds},
    recorder::{plan_passage, DEFAULT_FINISH_NAME},
    TimingError, TimingResult,
};

/// Acknowledged recording.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    /// Passage as committed.
    pub passage: Passage,
    /// Participant before the status change.
    pub participant: Participant,
    /// Status written with the passage, if it changed.
    pub transition: Option<ParticipantStatus>,
    /// Mandatory-point verdict, finish passages only.
    pub completeness: Option<Completeness>,
    /// True when the timestamp came from the capture queue.
    pub from_queue: bool,
    /// Sequence of the commit.
    pub seq: OpSeq,
}

/// Recording state of one operator terminal.
pub struct OperatorSession {
    handle: StoreHandle,
    context: RecordingContext,
    queue: CaptureQueue,
    banner: Option<String>,
    finish_name: String,
    presence: PresenceThresholds,
    marshal: Option<MarshalIdentity>,
}

impl OperatorSession {
    /// Session with the default finish name and presence limits.
    pub fn new(handle: StoreHandle, context: RecordingContext) -> Self {
        Self {
            handle,
            context,
            queue: CaptureQueue::new(),
            banner: None,
            finish_name: DEFAULT_FINISH_NAME.to_string(),
            presence: PresenceThresholds::default(),
            marshal: None,
        }
    }

    /// Session taking its finish name and presence limits from `config`.
    pub fn from_config(handle: StoreHandle, context: RecordingContext, config: &EngineConfig) -> Self {
        let mut session = Self::new(handle, context).with_finish_name(config.finish_name.clone());
        session.presence = config.presence;
        session
    }

    /// Overrides the checkpoint name written on finish passages.
    pub fn with_finish_name(mut self, name: impl Into<String>) -> Self {
        self.finish_name = name.into();
        self
    }

    /// Identity used by [`heartbeat`](Self::heartbeat).
    pub fn with_marshal(mut self, identity: MarshalIdentity) -> Self {
        self.marshal = Some(identity);
        self
    }

    /// Current recording context.
    pub fn context(&self) -> &RecordingContext {
        &self.context
    }

    /// Switches context; pending captured times are kept.
    pub fn set_context(&mut self, context: RecordingContext) {
        info!(context = %context, "recording context changed");
        self.context = context;
    }

    /// Active race of a combined post; ignored in a checkpoint context.
    pub fn set_active_race(&mut self, race_id: Option<String>) {
        self.context.set_active_race(race_id);
    }

    /// Last global store failure, cleared by the next successful write.
    pub fn banner(&self) -> Option<&str> {
        self.banner.as_deref()
    }

    /// Queues the current time and returns its capture id.
    pub fn capture(&mut self) -> u64 {
        self.queue.capture()
    }

    /// Queues `timestamp` and returns its capture id.
    pub fn capture_at(&mut self, timestamp: EpochMs) -> u64 {
        self.queue.capture_at(timestamp)
    }

    /// Drops one queued time; false when the id is unknown.
    pub fn discard(&mut self, capture_id: u64) -> bool {
        self.queue.discard(capture_id)
    }

    /// Queued times, oldest first.
    pub fn pending(&self) -> impl Iterator<Item = &CapturedTime> {
        self.queue.iter()
    }

    /// Number of queued times.
    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    /// [`submit_at`](Self::submit_at) with the wall clock.
    pub async fn submit(&mut self, bib: &str) -> TimingResult<Submission> {
        self.submit_at(bib, now_ms()).await
    }

    /// Records `bib` at the oldest captured time, or at `now` when nothing is queued.
    pub async fn submit_at(&mut self, bib: &str, now: EpochMs) -> TimingResult<Submission> {
        let res = self.handle.snapshot().await;
        let snapshot = self.read(res)?;
        let queued = self.queue.peek_oldest();
        let timestamp = queued.unwrap_or(now);

        let plan = plan_passage(&snapshot, &self.context, bib, timestamp, &self.finish_name)
            .inspect_err(|err| debug!(bib, error = %err, "passage refused"))?;
        let res = self.handle.commit(plan.ops()).await;
        let seq = self.write(res)?;
        if queued.is_some() {
            self.queue.consume_oldest();
        }

        if let Some(Completeness::Missing(missing)) = &plan.completeness {
            warn!(bib = %plan.participant.bib, ?missing, "finish with missing mandatory checkpoints");
        }
        debug!(bib = %plan.participant.bib, checkpoint = %plan.passage.checkpoint_id, seq, "passage recorded");

        Ok(Submission {
            from_queue: queued.is_some(),
            passage: plan.passage,
            participant: plan.participant,
            transition: plan.transition,
            completeness: plan.completeness,
            seq,
        })
    }

    /// Marks `bib` DNF. Leaves the capture queue alone.
    pub async fn declare_dnf(&mut self, bib: &str) -> TimingResult<Participant> {
        let res = self.handle.snapshot().await;
        let snapshot = self.read(res)?;
        let (participant, op) = plan_dnf(&snapshot, &self.context, bib)?;
        let participant = participant.clone();
        let res = self.handle.commit(vec![op]).await;
        self.write(res)?;
        info!(bib = %participant.bib, "participant declared DNF");
        Ok(participant)
    }

    /// Deletes a passage and rolls the participant status back.
    pub async fn undo(&mut self, passage_id: &str) -> TimingResult<Option<ParticipantStatus>> {
        let res = self.handle.snapshot().await;
        let snapshot = self.read(res)?;
        let (ops, status) = plan_undo_passage(&snapshot, passage_id)?;
        let res = self.handle.commit(ops).await;
        self.write(res)?;
        info!(passage = passage_id, ?status, "passage undone");
        Ok(status)
    }

    /// Writes a presence document for the configured marshal, if any.
    pub async fn heartbeat(&mut self, now: EpochMs) -> TimingResult<Option<OpSeq>> {
        let Some(identity) = self.marshal.clone() else {
            return Ok(None);
        };

        let context = self.context.clone();
        let (race_id, checkpoint_id) = match &context {
            RecordingContext::Checkpoint {
                race_id,
                checkpoint_id,
            } => (race_id.clone(), checkpoint_id.clone()),
            RecordingContext::Combined {
                post_id,
                active_race,
            } => {
                let res = self.handle.snapshot().await;
                let snapshot = self.read(res)?;
                let post = snapshot
                    .combined_post(post_id)
                    .ok_or_else(|| TimingError::UnknownCombinedPost(post_id.clone()))?;
                let assignment = active_race
                    .as_deref()
                    .and_then(|r| post.assignment_for(r))
                    .or_else(|| post.assignments.first());
                match assignment {
                    Some(a) => (a.race_id.clone(), a.checkpoint_id.clone()),
                    None => (String::new(), post_id.clone()),
                }
            }
        };

        let doc = identity.heartbeat(&race_id, &checkpoint_id, now);
        let res = self.handle.put(doc).await;
        let seq = self.write(res)?;
        Ok(Some(seq))
    }

    /// Every marshal heartbeat with its liveness at `now`, most recent first.
    pub async fn roster(&mut self, now: EpochMs) -> TimingResult<Vec<(MarshalPresence, Liveness)>> {
        let res = self
            .handle
            .query(Collection::Marshals, |_| true)
            .await;
        let docs = self.read(res)?;
        let marshals: Vec<MarshalPresence> = docs.iter().filter_map(|d| d.as_marshal()).cloned().collect();
        Ok(roster(&marshals, now, &self.presence)
            .into_iter()
            .map(|(m, liveness)| (m.clone(), liveness))
            .collect())
    }

    fn read<T>(&mut self, res: Result<T, RuntimeError>) -> TimingResult<T> {
        res.map_err(|err| self.note_failure(err))
    }

    fn write<T>(&mut self, res: Result<T, RuntimeError>) -> TimingResult<T> {
        match res {
            Ok(v) => {
                self.banner = None;
                Ok(v)
            }
            Err(err) => Err(self.note_failure(err)),
        }
    }

    fn note_failure(&mut self, err: RuntimeError) -> TimingError {
        if err.is_global() {
            warn!(error = %err, "store unavailable");
            self.banner = Some(err.to_string());
        }
        TimingError::Runtime(err)
    }
}
