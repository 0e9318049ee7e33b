use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::{core::store::now_ms, types::EpochMs};

/// Instant captured before the bib was typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedTime {
    /// Capture id, unique within the queue.
    pub id: u64,
    /// Captured instant.
    pub timestamp: EpochMs,
}

/// FIFO of pending timestamps. Unbounded, owned by one session, never persisted.
#[derive(Debug, Default)]
pub struct CaptureQueue {
    entries: VecDeque<CapturedTime>,
    next_id: u64,
}

impl CaptureQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the current instant and returns its entry id.
    pub fn capture(&mut self) -> u64 {
        self.capture_at(now_ms())
    }

    /// Appends `timestamp` and returns its entry id.
    pub fn capture_at(&mut self, timestamp: EpochMs) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.entries.push_back(CapturedTime { id, timestamp });
        id
    }

    /// Oldest timestamp, left in place.
    pub fn peek_oldest(&self) -> Option<EpochMs> {
        self.entries.front().map(|e| e.timestamp)
    }

    /// Removes and returns the oldest timestamp.
    pub fn consume_oldest(&mut self) -> Option<EpochMs> {
        self.entries.pop_front().map(|e| e.timestamp)
    }

    /// Removes entry `id`; the remaining entries keep their order.
    pub fn discard(&mut self, id: u64) -> bool {
        match self.entries.iter().position(|e| e.id == id) {
            Some(pos) => self.entries.remove(pos).is_some(),
            None => false,
        }
    }

    /// Pending entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &CapturedTime> {
        self.entries.iter()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
