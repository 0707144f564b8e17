use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::SessionError;
use crate::metrics;
use crate::model::{ChapterId, ChapterIdentity, ChapterKey, ChapterRecord, OrderAssignment};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChapterEntry {
    pub key: ChapterKey,
    pub identity: ChapterIdentity,
    pub title: String,
    pub body: String,
    pub order: u32,
    pub word_count: usize,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub(crate) creating: bool,
}

impl ChapterEntry {
    pub fn id(&self) -> Option<&ChapterId> {
        self.identity.id()
    }

    pub fn set_body(&mut self, body: String) {
        self.word_count = metrics::derive(&body).words;
        self.body = body;
    }
}

/// Ordered chapters of the current book. `order` is always `1..=len` in
/// sequence order; every structural change reindexes before returning.
#[derive(Debug, Default)]
pub struct ChapterList {
    entries: Vec<ChapterEntry>,
    next_key: u64,
    revision: u64,
}

impl ChapterList {
    pub fn from_records(mut records: Vec<ChapterRecord>) -> Self {
        records.sort_by(|a, b| a.order.cmp(&b.order));
        let mut list = Self::default();
        for record in records {
            let key = list.allocate_key();
            let word_count = metrics::derive(&record.body).words;
            list.entries.push(ChapterEntry {
                key,
                identity: ChapterIdentity::Persisted { id: record.id },
                title: record.title,
                body: record.body,
                order: record.order,
                word_count,
                updated_at: record.updated_at,
                creating: false,
            });
        }
        list.reindex();
        list
    }

    fn allocate_key(&mut self) -> ChapterKey {
        self.next_key += 1;
        ChapterKey(self.next_key)
    }

    fn reindex(&mut self) {
        for (idx, entry) in self.entries.iter_mut().enumerate() {
            entry.order = idx as u32 + 1;
        }
        self.revision += 1;
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ChapterEntry] {
        &self.entries
    }

    pub fn keys(&self) -> Vec<ChapterKey> {
        self.entries.iter().map(|entry| entry.key).collect()
    }

    pub fn get(&self, key: ChapterKey) -> Option<&ChapterEntry> {
        self.entries.iter().find(|entry| entry.key == key)
    }

    pub fn get_mut(&mut self, key: ChapterKey) -> Option<&mut ChapterEntry> {
        self.entries.iter_mut().find(|entry| entry.key == key)
    }

    pub fn key_of(&self, id: &ChapterId) -> Option<ChapterKey> {
        self.entries
            .iter()
            .find(|entry| entry.id() == Some(id))
            .map(|entry| entry.key)
    }

    pub fn key_at(&self, position: usize) -> Option<ChapterKey> {
        position
            .checked_sub(1)
            .and_then(|idx| self.entries.get(idx))
            .map(|entry| entry.key)
    }

    pub fn first(&self) -> Option<ChapterKey> {
        self.entries.first().map(|entry| entry.key)
    }

    /// Latest `updated_at` wins; entries without a timestamp never do.
    pub fn most_recently_edited(&self) -> Option<ChapterKey> {
        self.entries
            .iter()
            .filter(|entry| entry.updated_at.is_some())
            .max_by_key(|entry| entry.updated_at)
            .map(|entry| entry.key)
    }

    /// Refreshes the entry for `record.id` from the backend copy, or appends it.
    pub fn upsert(&mut self, record: ChapterRecord) -> ChapterKey {
        if let Some(key) = self.key_of(&record.id)
            && let Some(entry) = self.get_mut(key)
        {
            entry.title = record.title;
            entry.set_body(record.body);
            entry.updated_at = record.updated_at;
            return key;
        }
        let key = self.allocate_key();
        let word_count = metrics::derive(&record.body).words;
        self.entries.push(ChapterEntry {
            key,
            identity: ChapterIdentity::Persisted { id: record.id },
            title: record.title,
            body: record.body,
            order: 0,
            word_count,
            updated_at: record.updated_at,
            creating: false,
        });
        self.reindex();
        key
    }

    pub fn push_draft(&mut self, title: String, body: String) -> ChapterKey {
        let key = self.allocate_key();
        let word_count = metrics::derive(&body).words;
        self.entries.push(ChapterEntry {
            key,
            identity: ChapterIdentity::Draft,
            title,
            body,
            order: 0,
            word_count,
            updated_at: None,
            creating: false,
        });
        self.reindex();
        key
    }

    pub fn remove(&mut self, key: ChapterKey) -> Option<(usize, ChapterEntry)> {
        let idx = self.entries.iter().position(|entry| entry.key == key)?;
        let entry = self.entries.remove(idx);
        self.reindex();
        Some((idx, entry))
    }

    /// Puts a removed entry back near its former position.
    pub fn restore(&mut self, index: usize, entry: ChapterEntry) {
        if self.get(entry.key).is_some() {
            return;
        }
        let index = index.min(self.entries.len());
        self.entries.insert(index, entry);
        self.reindex();
    }

    /// Chapter to activate after the entry at `removed_index` went away: the
    /// preceding one, else the one that followed it.
    pub fn fallback_for(&self, removed_index: usize) -> Option<ChapterKey> {
        if removed_index > 0
            && let Some(entry) = self.entries.get(removed_index - 1)
        {
            return Some(entry.key);
        }
        self.entries.get(removed_index).map(|entry| entry.key)
    }

    /// Applies a new sequence. `keys` must be a permutation of the current
    /// keys. Returns the previous sequence.
    pub fn reorder(&mut self, keys: &[ChapterKey]) -> Result<Vec<ChapterKey>, SessionError> {
        if keys.len() != self.entries.len() {
            return Err(SessionError::Validation(format!(
                "reorder lists {} chapters, book has {}",
                keys.len(),
                self.entries.len()
            )));
        }
        let mut seen = HashSet::new();
        for key in keys {
            if !seen.insert(*key) {
                return Err(SessionError::Validation(format!(
                    "chapter {key} listed twice in reorder"
                )));
            }
            if self.get(*key).is_none() {
                return Err(SessionError::Validation(format!(
                    "unknown chapter {key} in reorder"
                )));
            }
        }

        let previous = self.keys();
        let mut remaining = std::mem::take(&mut self.entries);
        for key in keys {
            if let Some(idx) = remaining.iter().position(|entry| entry.key == *key) {
                self.entries.push(remaining.swap_remove(idx));
            }
        }
        self.reindex();
        Ok(previous)
    }

    /// `{id, order}` for every persisted entry; drafts have nothing to address.
    pub fn order_assignments(&self) -> Vec<OrderAssignment> {
        self.entries
            .iter()
            .filter_map(|entry| {
                entry.id().map(|id| OrderAssignment {
                    id: id.clone(),
                    order: entry.order,
                })
            })
            .collect()
    }
}
