use std::sync::Arc;

use chrono::Utc;

use crate::error::{GatewayError, SessionError, WriteOperation};
use crate::model::{
    ChannelKind, ChapterId, ChapterIdentity, ChapterKey, ChapterRecord, DEFAULT_CHAPTER_TITLE,
    normalize_title,
};
use crate::session::{ChapterEntry, EditSession, SaveChannel, SessionEvent};

impl EditSession {
    /// Switches the active chapter. Pending timers of the previous chapter are
    /// cancelled before the new chapter is fetched and armed.
    pub async fn select_chapter(&mut self, key: ChapterKey) -> Result<(), SessionError> {
        let Some(entry) = self.chapters.get(key) else {
            return Err(SessionError::NotFound(format!("chapter {key}")));
        };
        if key == self.active {
            return Ok(());
        }
        let id = entry.id().cloned();
        self.release_channels(self.active);

        let has_local_state = self.channels.contains_key(&(key, ChannelKind::Title))
            || self.channels.contains_key(&(key, ChannelKind::Content));
        if let Some(id) = id
            && !has_local_state
        {
            match self.gateway.get_chapter(&id).await {
                Ok(record) => {
                    self.chapters.upsert(record);
                }
                Err(err) if err.is_not_found() => {
                    tracing::warn!(chapter = %id, "selected chapter no longer exists");
                    self.chapters.remove(key);
                    let err = SessionError::NotFound(format!("chapter {id}"));
                    self.push_error(None, err.clone());
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!(chapter = %id, ?err, "refresh failed; using listed copy");
                    self.push_error(None, err.into());
                }
            }
        }

        self.activate(key);
        tracing::debug!(chapter = %key, "chapter selected");
        Ok(())
    }

    /// Appends a draft, makes it active, and persists it right away.
    pub fn new_chapter(&mut self, title: Option<String>) -> ChapterKey {
        let title = title.unwrap_or_else(|| format!("Chapter {}", self.chapters.len() + 1));
        let key = self
            .chapters
            .push_draft(normalize_title(&title), String::new());
        self.switch_active(key);
        self.spawn_create(key);
        key
    }

    pub fn delete_chapter(&mut self, key: ChapterKey) -> Result<(), SessionError> {
        let Some((index, entry)) = self.chapters.remove(key) else {
            return Err(SessionError::NotFound(format!("chapter {key}")));
        };
        self.channels.retain(|(channel_key, _), _| *channel_key != key);

        match entry.id().cloned() {
            Some(id) => self.spawn_delete(id, Some((index, entry))),
            None if entry.creating => {
                tracing::debug!(chapter = %key, "draft deleted mid-create; will remove once created");
                self.orphaned.insert(key);
            }
            None => {}
        }
        // Later chapters moved up one place; the backend must not keep the gap.
        if index < self.chapters.len() {
            self.persist_order(self.chapters.keys());
        }

        if key == self.active {
            match self.chapters.fallback_for(index) {
                Some(next) => self.activate(next),
                None => {
                    self.new_chapter(Some(DEFAULT_CHAPTER_TITLE.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Applies `keys` as the new chapter sequence and persists every order in
    /// one batched call.
    pub fn reorder(&mut self, keys: &[ChapterKey]) -> Result<(), SessionError> {
        let previous = self.chapters.reorder(keys)?;
        self.persist_order(previous);
        Ok(())
    }

    /// Sends the current `{id, order}` of every persisted chapter. On failure
    /// the list returns to `previous` unless it changed again meanwhile.
    fn persist_order(&mut self, previous: Vec<ChapterKey>) {
        let revision = self.chapters.revision();
        let assignments = self.chapters.order_assignments();
        if assignments.is_empty() {
            return;
        }

        self.in_flight += 1;
        let gateway = Arc::clone(&self.gateway);
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = gateway.reorder_chapters(&assignments).await;
            let _ = tx.send(SessionEvent::ReorderFinished {
                revision,
                previous,
                result,
            });
        });
    }

    /// Renames any chapter, active or not. The list reflects it immediately.
    pub fn rename_chapter(&mut self, key: ChapterKey, title: &str) -> Result<(), SessionError> {
        if key == self.active {
            self.on_title_edited(title);
            return Ok(());
        }
        let Some(entry) = self.chapters.get_mut(key) else {
            return Err(SessionError::NotFound(format!("chapter {key}")));
        };
        let title = normalize_title(title);
        let current = std::mem::replace(&mut entry.title, title.clone());
        self.channels
            .entry((key, ChannelKind::Title))
            .or_insert_with(|| SaveChannel::new(ChannelKind::Title, current));
        self.schedule(key, ChannelKind::Title, title);
        Ok(())
    }

    pub async fn rename_book(&mut self, title: &str) -> Result<(), SessionError> {
        let title = normalize_title(title);
        match self
            .gateway
            .update_book_title(&self.book.id, &title)
            .await
        {
            Ok(()) => {
                tracing::info!(book_id = %self.book.id, "book renamed");
                self.book.title = title;
                Ok(())
            }
            Err(err) => {
                let err = SessionError::from_write(
                    WriteOperation::RenameBook,
                    format!("book {}", self.book.id),
                    err,
                );
                self.push_error(None, err.clone());
                Err(err)
            }
        }
    }

    fn spawn_delete(&mut self, id: ChapterId, restore: Option<(usize, ChapterEntry)>) {
        tracing::info!(chapter = %id, "deleting chapter");
        self.in_flight += 1;
        let gateway = Arc::clone(&self.gateway);
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = gateway.delete_chapter(&id).await;
            let _ = tx.send(SessionEvent::DeleteFinished {
                id,
                restore,
                result,
            });
        });
    }

    pub(super) fn on_create_finished(
        &mut self,
        key: ChapterKey,
        sent_order: u32,
        sent: Vec<(ChannelKind, String)>,
        result: Result<ChapterRecord, GatewayError>,
    ) {
        let orphaned = self.orphaned.remove(&key);
        let record = match result {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(chapter = %key, ?err, "chapter create failed");
                if orphaned {
                    return;
                }
                if let Some(entry) = self.chapters.get_mut(key) {
                    entry.creating = false;
                }
                let err = SessionError::from_write(
                    WriteOperation::CreateChapter,
                    format!("chapter {key}"),
                    err,
                );
                for (kind, _) in &sent {
                    if let Some(channel) = self.channels.get_mut(&(key, *kind)) {
                        channel.fail(err.to_string());
                    }
                }
                self.push_error(None, err);
                return;
            }
        };

        let Some(entry) = self.chapters.get_mut(key).filter(|_| !orphaned) else {
            self.spawn_delete(record.id, None);
            return;
        };
        tracing::info!(chapter = %record.id, local = %key, "chapter created");
        entry.identity = ChapterIdentity::Persisted {
            id: record.id.clone(),
        };
        entry.creating = false;
        entry.updated_at = record.updated_at.or_else(|| Some(Utc::now()));
        let moved = entry.order != sent_order;

        for (kind, value) in sent {
            if let Some(channel) = self.channels.get_mut(&(key, kind)) {
                channel.complete(value);
            }
        }
        if key == self.active {
            self.last_saved_at = Some(Utc::now());
            self.set_location(record.id);
        }
        if moved {
            tracing::debug!(chapter = %key, sent_order, "chapter moved while being created");
            self.persist_order(self.chapters.keys());
        }
        for kind in super::CHANNEL_KINDS {
            self.flush_deferred(key, kind);
        }
    }

    pub(super) fn on_delete_finished(
        &mut self,
        id: ChapterId,
        restore: Option<(usize, ChapterEntry)>,
        result: Result<(), GatewayError>,
    ) {
        match result {
            Ok(()) => tracing::info!(chapter = %id, "chapter deleted"),
            Err(err) if err.is_not_found() => {
                tracing::debug!(chapter = %id, "chapter was already gone");
            }
            Err(err) => {
                tracing::warn!(chapter = %id, ?err, "chapter delete failed");
                if let Some((index, entry)) = restore {
                    self.chapters.restore(index, entry);
                    self.persist_order(self.chapters.keys());
                }
                self.push_error(
                    None,
                    SessionError::from_write(
                        WriteOperation::DeleteChapter,
                        format!("chapter {id}"),
                        err,
                    ),
                );
            }
        }
    }

    pub(super) fn on_reorder_finished(
        &mut self,
        revision: u64,
        previous: Vec<ChapterKey>,
        result: Result<(), GatewayError>,
    ) {
        let Err(err) = result else {
            tracing::debug!("chapter order saved");
            return;
        };
        tracing::warn!(?err, "chapter reorder failed");
        if self.chapters.revision() == revision {
            match self.chapters.reorder(&previous) {
                Ok(_) => tracing::info!("chapter order rolled back"),
                Err(rollback_err) => {
                    tracing::warn!(?rollback_err, "could not roll back chapter order")
                }
            }
        }
        self.push_error(
            None,
            SessionError::from_write(WriteOperation::ReorderChapters, "chapter order", err),
        );
    }
}
