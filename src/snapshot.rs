//! Read-only view of the event collections handed to the timing and ranking code.

use serde::{Deserialize, Serialize};

use crate::{
    core::store::DocStore,
    model::{CombinedPost, Document, Participant, Passage, Race},
};

/// Point-in-time copy of the collections the engine reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventSnapshot {
    /// Races in store order.
    pub races: Vec<Race>,
    /// Participants in store order.
    pub participants: Vec<Participant>,
    /// Passages in store order.
    pub passages: Vec<Passage>,
    /// Combined posts in store order.
    pub combined_posts: Vec<CombinedPost>,
}

impl EventSnapshot {
    /// Copies the relevant collections out of `store`.
    pub fn from_store(store: &DocStore) -> Self {
        Self {
            races: store.races().into_iter().cloned().collect(),
            participants: store.participants().into_iter().cloned().collect(),
            passages: store.passages().into_iter().cloned().collect(),
            combined_posts: store
                .docs(crate::model::Collection::CombinedPosts)
                .filter_map(Document::as_combined_post)
                .cloned()
                .collect(),
        }
    }

    /// Race by id.
    pub fn race(&self, id: &str) -> Option<&Race> {
        self.races.iter().find(|r| r.id == id)
    }

    /// Race by case-insensitive name.
    pub fn race_by_name(&self, name: &str) -> Option<&Race> {
        let wanted = name.trim().to_lowercase();
        self.races.iter().find(|r| r.name.trim().to_lowercase() == wanted)
    }

    /// Participant by id.
    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    /// Passage by id.
    pub fn passage(&self, id: &str) -> Option<&Passage> {
        self.passages.iter().find(|p| p.id == id)
    }

    /// Combined post by id.
    pub fn combined_post(&self, id: &str) -> Option<&CombinedPost> {
        self.combined_posts.iter().find(|p| p.id == id)
    }

    /// Participants of `race_id`, in store order.
    pub fn participants_in_race<'a>(&'a self, race_id: &'a str) -> impl Iterator<Item = &'a Participant> {
        self.participants.iter().filter(move |p| p.race_id == race_id)
    }

    /// Passages of `participant_id`, in store order.
    pub fn passages_of<'a>(&'a self, participant_id: &'a str) -> impl Iterator<Item = &'a Passage> {
        self.passages
            .iter()
            .filter(move |p| p.participant_id == participant_id)
    }

    /// Finds `bib` in `preferred_race` first, then among every participant accepted by `in_scope`.
    pub fn find_bib(
        &self,
        bib: &str,
        preferred_race: Option<&str>,
        in_scope: impl Fn(&Participant) -> bool,
    ) -> Option<&Participant> {
        let bib = bib.trim();
        preferred_race
            .and_then(|race_id| {
                self.participants
                    .iter()
                    .find(|p| p.bib == bib && p.race_id == race_id)
            })
            .or_else(|| self.participants.iter().find(|p| p.bib == bib && in_scope(p)))
    }
}
