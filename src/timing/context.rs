use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{CheckpointId, CombinedPostId, RaceId};

const MARSHAL_ROUTE: &str = "#/marshal?";

/// Where an operator records passages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordingContext {
    /// One race and one of its checkpoints (or the finish).
    Checkpoint {
        /// Race recorded.
        race_id: RaceId,
        /// Checkpoint id, or `finish`.
        checkpoint_id: CheckpointId,
    },
    /// A station shared by several races.
    Combined {
        /// Combined post document id.
        post_id: CombinedPostId,
        /// Race searched first when resolving a bib.
        active_race: Option<RaceId>,
    },
}

impl RecordingContext {
    /// Simple context on one checkpoint.
    pub fn checkpoint(race_id: impl Into<RaceId>, checkpoint_id: impl Into<CheckpointId>) -> Self {
        Self::Checkpoint {
            race_id: race_id.into(),
            checkpoint_id: checkpoint_id.into(),
        }
    }

    /// Combined-post context with no active race yet.
    pub fn combined(post_id: impl Into<CombinedPostId>) -> Self {
        Self::Combined {
            post_id: post_id.into(),
            active_race: None,
        }
    }

    /// Race searched first, combined posts only.
    pub fn active_race(&self) -> Option<&str> {
        match self {
            Self::Checkpoint { race_id, .. } => Some(race_id),
            Self::Combined { active_race, .. } => active_race.as_deref(),
        }
    }

    /// Selects the race searched first. Has no effect on a single checkpoint.
    pub fn set_active_race(&mut self, race: Option<RaceId>) {
        if let Self::Combined { active_race, .. } = self {
            *active_race = race;
        }
    }

    /// URL fragment that reopens this context on another terminal.
    pub fn to_fragment(&self) -> Result<String, LinkError> {
        match self {
            Self::Checkpoint {
                race_id,
                checkpoint_id,
            } => {
                ensure_url_safe(race_id)?;
                ensure_url_safe(checkpoint_id)?;
                Ok(format!("{MARSHAL_ROUTE}raceId={race_id}&cpId={checkpoint_id}"))
            }
            Self::Combined { post_id, .. } => {
                ensure_url_safe(post_id)?;
                Ok(format!("{MARSHAL_ROUTE}combinedPostId={post_id}"))
            }
        }
    }

    /// Parses a fragment produced by [`Self::to_fragment`]. A combined post id wins over a pair.
    pub fn parse_fragment(fragment: &str) -> Result<Self, LinkError> {
        let query = fragment
            .trim()
            .strip_prefix(MARSHAL_ROUTE)
            .ok_or(LinkError::NotAMarshalLink)?;

        let mut race_id = None;
        let mut cp_id = None;
        let mut post_id = None;
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let slot = match key {
                "raceId" => &mut race_id,
                "cpId" => &mut cp_id,
                "combinedPostId" => &mut post_id,
                _ => continue,
            };
            ensure_url_safe(value)?;
            *slot = Some(value.to_string());
        }

        if let Some(post_id) = post_id {
            return Ok(Self::combined(post_id));
        }
        match (race_id, cp_id) {
            (Some(race_id), Some(checkpoint_id)) => Ok(Self::Checkpoint {
                race_id,
                checkpoint_id,
            }),
            (None, _) => Err(LinkError::MissingParam("raceId")),
            (_, None) => Err(LinkError::MissingParam("cpId")),
        }
    }
}

impl fmt::Display for RecordingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Checkpoint {
                race_id,
                checkpoint_id,
            } => write!(f, "{race_id}/{checkpoint_id}"),
            Self::Combined { post_id, .. } => write!(f, "combined:{post_id}"),
        }
    }
}

/// Malformed or unusable link fragment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// Fragment does not open the marshal route.
    #[error("not a marshal link")]
    NotAMarshalLink,
    /// Neither a combined post nor a full race/checkpoint pair.
    #[error("missing `{0}` parameter")]
    MissingParam(&'static str),
    /// Id outside the URL-safe alphabet.
    #[error("id `{0}` is not URL-safe")]
    UnsafeId(String),
}

fn ensure_url_safe(id: &str) -> Result<(), LinkError> {
    let ok = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~'));
    if ok {
        Ok(())
    } else {
        Err(LinkError::UnsafeId(id.to_string()))
    }
}
