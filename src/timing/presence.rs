use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{
    core::store::now_ms,
    model::{Document, MarshalPresence},
    runtime::handle::{RuntimeError, StoreHandle},
    types::EpochMs,
};

/// Age limits of a heartbeat, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceThresholds {
    /// Heartbeats younger than this are online.
    pub online_ms: u64,
    /// Heartbeats younger than this are away; older are offline.
    pub away_ms: u64,
    /// Period of [`spawn_heartbeat`].
    pub heartbeat_ms: u64,
}

impl Default for PresenceThresholds {
    fn default() -> Self {
        Self {
            online_ms: 30_000,
            away_ms: 120_000,
            heartbeat_ms: 10_000,
        }
    }
}

/// Marshal state derived from heartbeat age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Liveness {
    /// Recently active.
    Online,
    /// Quiet for a while.
    Away,
    /// Gone.
    Offline,
}

/// Liveness of a heartbeat written at `last_active`.
pub fn classify(last_active: EpochMs, now: EpochMs, thresholds: &PresenceThresholds) -> Liveness {
    let age = now.saturating_sub(last_active);
    if age < thresholds.online_ms {
        Liveness::Online
    } else if age < thresholds.away_ms {
        Liveness::Away
    } else {
        Liveness::Offline
    }
}

/// Marshals with their liveness, most recently active first.
pub fn roster<'a>(
    marshals: impl IntoIterator<Item = &'a MarshalPresence>,
    now: EpochMs,
    thresholds: &PresenceThresholds,
) -> Vec<(&'a MarshalPresence, Liveness)> {
    let mut out: Vec<_> = marshals
        .into_iter()
        .map(|m| (m, classify(m.last_active, now, thresholds)))
        .collect();
    out.sort_by_key(|(m, _)| std::cmp::Reverse(m.last_active));
    out
}

/// Identity a marshal terminal reports in its heartbeats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarshalIdentity {
    /// Terminal session id, also the heartbeat document id.
    pub session_id: String,
    /// Marshal name.
    pub name: String,
    /// Station label shown on the roster.
    pub station_name: String,
}

impl MarshalIdentity {
    /// Presence document for the given position at `now`.
    pub fn heartbeat(&self, race_id: &str, checkpoint_id: &str, now: EpochMs) -> Document {
        Document::Marshal(MarshalPresence {
            id: self.session_id.clone(),
            name: self.name.clone(),
            station_name: self.station_name.clone(),
            checkpoint_id: checkpoint_id.to_string(),
            race_id: race_id.to_string(),
            last_active: now,
        })
    }
}

/// Writes a heartbeat every `thresholds.heartbeat_ms` until the store stops.
pub fn spawn_heartbeat(
    handle: StoreHandle,
    identity: MarshalIdentity,
    race_id: String,
    checkpoint_id: String,
    thresholds: PresenceThresholds,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(thresholds.heartbeat_ms.max(1)));
        loop {
            ticker.tick().await;
            let doc = identity.heartbeat(&race_id, &checkpoint_id, now_ms());
            match handle.put(doc).await {
                Ok(seq) => debug!(marshal = %identity.session_id, seq, "heartbeat"),
                Err(RuntimeError::ChannelClosed) => break,
                Err(err) => warn!(marshal = %identity.session_id, error = %err, "heartbeat failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_are_exclusive_upper_bounds() {
        let t = PresenceThresholds::default();
        assert_eq!(classify(0, 29_999, &t), Liveness::Online);
        assert_eq!(classify(0, 30_000, &t), Liveness::Away);
        assert_eq!(classify(0, 120_000, &t), Liveness::Offline);
        assert_eq!(classify(5_000, 1_000, &t), Liveness::Online);
    }
}
