//! Substring search over entry metadata.
//!
//! The index is derived from the model and never persisted. Secrets are not
//! copied into it; the lowercased metadata it does hold is wiped on drop.

use std::collections::BTreeMap;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::model::{Entry, VaultModel};
use prasword_common::EntryId;

#[derive(Debug, Clone, Zeroize, ZeroizeOnDrop)]
struct Indexed {
    /// Lowercased title, also the sort key.
    title: String,
    username: String,
    url: String,
    notes: String,
}

impl Indexed {
    fn from_entry(entry: &Entry) -> Self {
        Self {
            title: entry.title.to_lowercase(),
            username: entry.username.to_lowercase(),
            url: entry.url.to_lowercase(),
            notes: entry.notes.to_lowercase(),
        }
    }

    fn matches(&self, needle: &str) -> bool {
        self.title.contains(needle)
            || self.username.contains(needle)
            || self.url.contains(needle)
            || self.notes.contains(needle)
    }
}

/// Case-insensitive lookup over title, username, URL and notes.
#[derive(Debug, Clone, Default)]
pub struct SearchIndex {
    docs: BTreeMap<EntryId, Indexed>,
}

impl SearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index for every entry in the model.
    pub fn build(model: &VaultModel) -> Self {
        let mut index = Self::new();
        index.rebuild(model);
        index
    }

    /// Discard everything and re-index the model.
    pub fn rebuild(&mut self, model: &VaultModel) {
        self.docs = model
            .entries()
            .map(|entry| (entry.id, Indexed::from_entry(entry)))
            .collect();
    }

    /// Index a new or changed entry.
    pub fn upsert(&mut self, entry: &Entry) {
        self.docs.insert(entry.id, Indexed::from_entry(entry));
    }

    /// Drop an entry from the index.
    pub fn remove(&mut self, id: EntryId) {
        self.docs.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Ids of matching entries, ordered by title (case-insensitive) then id.
    ///
    /// An empty query matches every entry.
    pub fn query(&self, text: &str) -> Vec<EntryId> {
        let needle = zeroize::Zeroizing::new(text.to_lowercase());
        let mut hits: Vec<(&str, EntryId)> = self
            .docs
            .iter()
            .filter(|(_, doc)| needle.is_empty() || doc.matches(&needle))
            .map(|(id, doc)| (doc.title.as_str(), *id))
            .collect();
        hits.sort();
        hits.into_iter().map(|(_, id)| id).collect()
    }
}
