use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_humanize::HumanTime;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::{SessionConfig, SwitchPolicy};
use crate::connectivity::ConnectivityMonitor;
use crate::error::{GatewayError, SessionError, WriteOperation};
use crate::gateway::PersistenceGateway;
use crate::metrics::{self, TextMetrics};
use crate::model::{
    BookId, BookRecord, ChannelKind, ChapterId, ChapterIdentity, ChapterKey, ChapterRecord,
    DEFAULT_CHAPTER_TITLE, NewChapter, SaveStatus, normalize_title,
};

pub mod channel;
pub mod chapters;
mod structure;

pub use channel::{Fire, SaveChannel};
pub use chapters::{ChapterEntry, ChapterList};

const CHANNEL_KINDS: [ChannelKind; 2] = [ChannelKind::Title, ChannelKind::Content];

/// Completions delivered back to the session by timer and gateway tasks.
#[derive(Debug)]
enum SessionEvent {
    TimerFired {
        key: ChapterKey,
        kind: ChannelKind,
        generation: u64,
    },
    WriteFinished {
        key: ChapterKey,
        id: ChapterId,
        kind: ChannelKind,
        value: String,
        result: Result<(), GatewayError>,
    },
    CreateFinished {
        key: ChapterKey,
        order: u32,
        sent: Vec<(ChannelKind, String)>,
        result: Result<ChapterRecord, GatewayError>,
    },
    DeleteFinished {
        id: ChapterId,
        restore: Option<(usize, ChapterEntry)>,
        result: Result<(), GatewayError>,
    },
    ReorderFinished {
        revision: u64,
        previous: Vec<ChapterKey>,
        result: Result<(), GatewayError>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionMessage {
    pub id: u64,
    pub channel: Option<ChannelKind>,
    pub text: String,
    pub at: DateTime<Utc>,
    #[serde(skip)]
    pub error: SessionError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChapterSummary {
    pub key: ChapterKey,
    pub id: Option<ChapterId>,
    pub title: String,
    pub order: u32,
    pub word_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionView {
    pub book_id: BookId,
    pub book_title: String,
    pub active: ChapterKey,
    pub active_chapter_id: Option<ChapterId>,
    pub location: Option<ChapterId>,
    pub title: String,
    pub title_status: SaveStatus,
    pub content_status: SaveStatus,
    pub word_count: usize,
    pub character_count: usize,
    pub chapters: Vec<ChapterSummary>,
    pub last_saved: Option<String>,
    pub online: bool,
    pub messages: Vec<SessionMessage>,
}

/// Editing session for one book.
///
/// All state lives here and is mutated only from `&mut self`. Timers and
/// gateway calls run as spawned tasks that report back through an internal
/// queue; nothing they produce is applied until the owner drives the session
/// with [`EditSession::process_next`], [`EditSession::pump`],
/// [`EditSession::run_for`] or [`EditSession::settle`].
pub struct EditSession {
    gateway: Arc<dyn PersistenceGateway>,
    config: SessionConfig,
    book: BookRecord,
    chapters: ChapterList,
    channels: HashMap<(ChapterKey, ChannelKind), SaveChannel>,
    active: ChapterKey,
    title_draft: String,
    content_draft: String,
    content_metrics: TextMetrics,
    location: Option<ChapterId>,
    last_saved_at: Option<DateTime<Utc>>,
    messages: Vec<SessionMessage>,
    next_message_id: u64,
    in_flight: usize,
    orphaned: HashSet<ChapterKey>,
    connectivity: ConnectivityMonitor,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl EditSession {
    /// Opens `book_id` on `chapter_id`, or on the most recently edited chapter,
    /// the first chapter, or a fresh draft, in that order of preference.
    pub async fn load(
        gateway: Arc<dyn PersistenceGateway>,
        config: SessionConfig,
        book_id: BookId,
        chapter_id: Option<ChapterId>,
    ) -> Result<Self, SessionError> {
        let book = gateway.get_book(&book_id).await?;
        let records = gateway.list_chapters(&book_id).await?;
        let mut chapters = ChapterList::from_records(records);
        tracing::debug!(book_id = %book.id, chapters = chapters.len(), "book loaded");

        let mut load_errors = Vec::new();
        let mut requested = None;
        if let Some(id) = chapter_id {
            match gateway.get_chapter(&id).await {
                Ok(record) if record.book_id != book.id => {
                    load_errors.push(SessionError::Validation(format!(
                        "chapter {id} belongs to another book"
                    )));
                }
                Ok(record) => requested = Some(chapters.upsert(record)),
                Err(err) if err.is_not_found() => {
                    tracing::warn!(chapter = %id, "requested chapter no longer exists");
                    if let Some(key) = chapters.key_of(&id) {
                        chapters.remove(key);
                    }
                    load_errors.push(SessionError::NotFound(format!("chapter {id}")));
                }
                Err(err) => return Err(err.into()),
            }
        }

        let (active, fell_back) = match requested {
            Some(key) => (key, false),
            None => {
                let key = chapters
                    .most_recently_edited()
                    .or_else(|| chapters.first())
                    .unwrap_or_else(|| {
                        chapters.push_draft(DEFAULT_CHAPTER_TITLE.to_string(), String::new())
                    });
                (key, true)
            }
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut session = Self {
            gateway,
            config,
            book,
            chapters,
            channels: HashMap::new(),
            active,
            title_draft: String::new(),
            content_draft: String::new(),
            content_metrics: TextMetrics::default(),
            location: None,
            last_saved_at: None,
            messages: Vec::new(),
            next_message_id: 0,
            in_flight: 0,
            orphaned: HashSet::new(),
            connectivity: ConnectivityMonitor::assume_online(),
            events_tx,
            events_rx,
        };
        for err in load_errors {
            session.push_error(None, err);
        }
        session.activate(active);
        if fell_back {
            tracing::info!(chapter = %active, "no chapter requested; selected fallback");
        }
        Ok(session)
    }

    pub fn with_connectivity(mut self, monitor: ConnectivityMonitor) -> Self {
        self.connectivity = monitor;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn book(&self) -> &BookRecord {
        &self.book
    }

    pub fn chapters(&self) -> &ChapterList {
        &self.chapters
    }

    pub fn active_key(&self) -> ChapterKey {
        self.active
    }

    pub fn active_chapter(&self) -> Option<&ChapterEntry> {
        self.chapters.get(self.active)
    }

    pub fn active_chapter_id(&self) -> Option<&ChapterId> {
        self.active_chapter().and_then(ChapterEntry::id)
    }

    /// The chapter the session is addressable at, kept in step with the active
    /// chapter once it has an id.
    pub fn location(&self) -> Option<&ChapterId> {
        self.location.as_ref()
    }

    pub fn title_draft(&self) -> &str {
        &self.title_draft
    }

    pub fn content_draft(&self) -> &str {
        &self.content_draft
    }

    pub fn last_saved_title(&self) -> Option<&str> {
        self.channel(self.active, ChannelKind::Title)
            .map(SaveChannel::confirmed)
    }

    pub fn last_saved_content(&self) -> Option<&str> {
        self.channel(self.active, ChannelKind::Content)
            .map(SaveChannel::confirmed)
    }

    pub fn channel(&self, key: ChapterKey, kind: ChannelKind) -> Option<&SaveChannel> {
        self.channels.get(&(key, kind))
    }

    pub fn status(&self, kind: ChannelKind) -> SaveStatus {
        self.channel(self.active, kind)
            .map(SaveChannel::status)
            .unwrap_or(SaveStatus::Idle)
    }

    pub fn title_status(&self) -> SaveStatus {
        self.status(ChannelKind::Title)
    }

    pub fn content_status(&self) -> SaveStatus {
        self.status(ChannelKind::Content)
    }

    pub fn metrics(&self) -> TextMetrics {
        self.content_metrics
    }

    pub fn last_saved_at(&self) -> Option<DateTime<Utc>> {
        self.last_saved_at
    }

    pub fn messages(&self) -> &[SessionMessage] {
        &self.messages
    }

    pub fn dismiss(&mut self, message_id: u64) -> bool {
        let before = self.messages.len();
        self.messages.retain(|message| message.id != message_id);
        self.messages.len() != before
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// No armed timer and no gateway call awaiting its result.
    pub fn is_quiescent(&self) -> bool {
        self.in_flight == 0 && self.channels.values().all(|channel| !channel.is_armed())
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            book_id: self.book.id.clone(),
            book_title: self.book.title.clone(),
            active: self.active,
            active_chapter_id: self.active_chapter_id().cloned(),
            location: self.location.clone(),
            title: self
                .active_chapter()
                .map(|entry| entry.title.clone())
                .unwrap_or_default(),
            title_status: self.title_status(),
            content_status: self.content_status(),
            word_count: self.content_metrics.words,
            character_count: self.content_metrics.characters,
            chapters: self
                .chapters
                .entries()
                .iter()
                .map(|entry| ChapterSummary {
                    key: entry.key,
                    id: entry.id().cloned(),
                    title: entry.title.clone(),
                    order: entry.order,
                    word_count: entry.word_count,
                })
                .collect(),
            last_saved: self
                .last_saved_at
                .map(|saved_at| HumanTime::from(saved_at).to_string()),
            online: self.is_online(),
            messages: self.messages.clone(),
        }
    }

    pub fn on_content_edited(&mut self, text: impl Into<String>) {
        let text = text.into();
        let key = self.active;
        self.content_metrics = metrics::derive(&text);
        if let Some(entry) = self.chapters.get_mut(key) {
            entry.body = text.clone();
            entry.word_count = self.content_metrics.words;
        }
        self.content_draft = text.clone();
        self.schedule(key, ChannelKind::Content, text);
    }

    pub fn on_title_edited(&mut self, text: impl Into<String>) {
        let raw = text.into();
        let key = self.active;
        let title = normalize_title(&raw);
        if let Some(entry) = self.chapters.get_mut(key) {
            entry.title = title.clone();
        }
        self.title_draft = raw;
        self.schedule(key, ChannelKind::Title, title);
    }

    /// Writes both channels of the active chapter without waiting for the
    /// settle delay. This is also the retry path after a failed save.
    pub fn save_now(&mut self) {
        let key = self.active;
        for kind in CHANNEL_KINDS {
            let value = self
                .channels
                .get_mut(&(key, kind))
                .and_then(SaveChannel::flush_now);
            if let Some(value) = value {
                self.dispatch_write(key, kind, value);
            }
        }
    }

    /// Applies one completion, waiting for it if none is queued. Only returns
    /// once something arrives, so check [`EditSession::is_quiescent`] first.
    pub async fn process_next(&mut self) -> bool {
        match self.events_rx.recv().await {
            Some(event) => {
                self.handle_event(event);
                true
            }
            None => false,
        }
    }

    /// Applies every completion already delivered, without waiting.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    pub async fn run_for(&mut self, duration: Duration) {
        let deadline = Instant::now() + duration;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                event = self.events_rx.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
            }
        }
    }

    /// Runs until every armed timer has fired and every write has resolved.
    /// A gateway call that never resolves keeps this pending.
    pub async fn settle(&mut self) {
        while !self.is_quiescent() {
            if !self.process_next().await {
                break;
            }
        }
    }

    /// Tears the session down: every pending timer is cancelled, unsaved values
    /// are flushed or dropped per the switch policy, and in-flight writes are
    /// awaited so their results still apply.
    pub async fn close(mut self) -> SessionView {
        let keys: HashSet<ChapterKey> = self.channels.keys().map(|(key, _)| *key).collect();
        for key in keys {
            self.release_channels(key);
        }
        self.settle().await;
        tracing::info!(book_id = %self.book.id, "session closed");
        self.view()
    }

    fn schedule(&mut self, key: ChapterKey, kind: ChannelKind, value: String) {
        let delay = self.config.settle_delay(kind);
        let Some(channel) = self.channels.get_mut(&(key, kind)) else {
            tracing::debug!(chapter = %key, %kind, "no save channel; edit not scheduled");
            return;
        };
        let Some(generation) = channel.schedule(value) else {
            tracing::trace!(chapter = %key, %kind, "draft matches saved value");
            return;
        };

        // Deadline is fixed now, not when the task first gets polled.
        let deadline = Instant::now() + delay;
        let tx = self.events_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = tx.send(SessionEvent::TimerFired {
                key,
                kind,
                generation,
            });
        });
        channel.arm(generation, task.abort_handle());
    }

    fn dispatch_write(&mut self, key: ChapterKey, kind: ChannelKind, value: String) {
        enum Target {
            Update(ChapterId),
            AwaitId,
            Create,
        }

        let target = match self.chapters.get(key) {
            None => {
                tracing::debug!(chapter = %key, %kind, "chapter no longer listed; write dropped");
                return;
            }
            Some(entry) => match &entry.identity {
                ChapterIdentity::Persisted { id } => Target::Update(id.clone()),
                ChapterIdentity::Draft if entry.creating => Target::AwaitId,
                ChapterIdentity::Draft => Target::Create,
            },
        };

        match target {
            Target::Update(id) => {
                if let Some(channel) = self.channels.get_mut(&(key, kind)) {
                    channel.begin_send(value.clone());
                }
                self.spawn_update(key, id, kind, value);
            }
            Target::AwaitId => {
                if let Some(channel) = self.channels.get_mut(&(key, kind)) {
                    channel.defer();
                }
                tracing::debug!(chapter = %key, %kind, "write waits for chapter id");
            }
            Target::Create => self.spawn_create(key),
        }
    }

    fn spawn_update(&mut self, key: ChapterKey, id: ChapterId, kind: ChannelKind, value: String) {
        tracing::debug!(chapter = %id, %kind, "issuing write");
        self.in_flight += 1;
        let gateway = Arc::clone(&self.gateway);
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = match kind {
                ChannelKind::Title => gateway.update_chapter_title(&id, &value).await,
                ChannelKind::Content => gateway.update_chapter_body(&id, &value).await,
            };
            let _ = tx.send(SessionEvent::WriteFinished {
                key,
                id,
                kind,
                value,
                result,
            });
        });
    }

    /// Issues the single creation write of a draft, carrying the latest title
    /// and body. Channels of the chapter count it as their in-flight write.
    fn spawn_create(&mut self, key: ChapterKey) {
        let Some(entry) = self.chapters.get_mut(key) else {
            return;
        };
        if entry.creating || !entry.identity.is_draft() {
            return;
        }
        entry.creating = true;
        let mut chapter = NewChapter {
            title: entry.title.clone(),
            body: entry.body.clone(),
            order: entry.order,
        };

        let mut sent = Vec::new();
        for kind in CHANNEL_KINDS {
            let Some(channel) = self.channels.get_mut(&(key, kind)) else {
                continue;
            };
            let value = channel.desired().to_string();
            match kind {
                ChannelKind::Title => chapter.title = value.clone(),
                ChannelKind::Content => chapter.body = value.clone(),
            }
            channel.begin_send(value.clone());
            sent.push((kind, value));
        }

        tracing::info!(chapter = %key, title = %chapter.title, "creating chapter");
        self.in_flight += 1;
        let gateway = Arc::clone(&self.gateway);
        let tx = self.events_tx.clone();
        let book_id = self.book.id.clone();
        let order = chapter.order;
        tokio::spawn(async move {
            let result = gateway.create_chapter(&book_id, &chapter).await;
            let _ = tx.send(SessionEvent::CreateFinished {
                key,
                order,
                sent,
                result,
            });
        });
    }

    fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::TimerFired {
                key,
                kind,
                generation,
            } => self.on_timer_fired(key, kind, generation),
            SessionEvent::WriteFinished {
                key,
                id,
                kind,
                value,
                result,
            } => {
                self.in_flight -= 1;
                self.on_write_finished(key, id, kind, value, result);
            }
            SessionEvent::CreateFinished {
                key,
                order,
                sent,
                result,
            } => {
                self.in_flight -= 1;
                self.on_create_finished(key, order, sent, result);
            }
            SessionEvent::DeleteFinished {
                id,
                restore,
                result,
            } => {
                self.in_flight -= 1;
                self.on_delete_finished(id, restore, result);
            }
            SessionEvent::ReorderFinished {
                revision,
                previous,
                result,
            } => {
                self.in_flight -= 1;
                self.on_reorder_finished(revision, previous, result);
            }
        }
        self.collect_idle_channels();
    }

    fn on_timer_fired(&mut self, key: ChapterKey, kind: ChannelKind, generation: u64) {
        let Some(channel) = self.channels.get_mut(&(key, kind)) else {
            return;
        };
        match channel.fire(generation) {
            Fire::Send(value) => self.dispatch_write(key, kind, value),
            Fire::Wait => {
                tracing::debug!(chapter = %key, %kind, "write in flight; latest value queued")
            }
            Fire::Nothing => {}
        }
    }

    fn on_write_finished(
        &mut self,
        key: ChapterKey,
        id: ChapterId,
        kind: ChannelKind,
        value: String,
        result: Result<(), GatewayError>,
    ) {
        match result {
            Ok(()) => {
                tracing::debug!(chapter = %id, %kind, "write saved");
                let now = Utc::now();
                if let Some(entry) = self.chapters.get_mut(key) {
                    entry.updated_at = Some(now);
                }
                if key == self.active {
                    self.last_saved_at = Some(now);
                }
                let Some(channel) = self.channels.get_mut(&(key, kind)) else {
                    return;
                };
                channel.complete(value);
                self.flush_deferred(key, kind);
            }
            Err(err) => {
                tracing::warn!(chapter = %id, %kind, ?err, "write failed");
                let err = SessionError::from_write(
                    WriteOperation::save(kind),
                    format!("chapter {id}"),
                    err,
                );
                if let Some(channel) = self.channels.get_mut(&(key, kind)) {
                    channel.fail(err.to_string());
                }
                self.push_error(Some(kind), err);
            }
        }
    }

    fn flush_deferred(&mut self, key: ChapterKey, kind: ChannelKind) {
        let value = self
            .channels
            .get_mut(&(key, kind))
            .and_then(SaveChannel::take_flush);
        if let Some(value) = value {
            self.dispatch_write(key, kind, value);
        }
    }

    /// Makes `key` the active chapter without touching the previous one.
    fn activate(&mut self, key: ChapterKey) {
        self.active = key;
        let Some(entry) = self.chapters.get(key) else {
            return;
        };
        let (title, body, id) = (entry.title.clone(), entry.body.clone(), entry.id().cloned());
        self.channels
            .entry((key, ChannelKind::Title))
            .or_insert_with(|| SaveChannel::new(ChannelKind::Title, title));
        self.channels
            .entry((key, ChannelKind::Content))
            .or_insert_with(|| SaveChannel::new(ChannelKind::Content, body));

        self.title_draft = self
            .channel(key, ChannelKind::Title)
            .map(|channel| channel.desired().to_string())
            .unwrap_or_default();
        self.content_draft = self
            .channel(key, ChannelKind::Content)
            .map(|channel| channel.desired().to_string())
            .unwrap_or_default();
        self.content_metrics = metrics::derive(&self.content_draft);
        if let Some(id) = id {
            self.set_location(id);
        }
    }

    fn switch_active(&mut self, key: ChapterKey) {
        if key != self.active {
            self.release_channels(self.active);
        }
        self.activate(key);
    }

    /// Cancels the pending timers of `key`; unsaved values are flushed or
    /// dropped per the configured switch policy.
    fn release_channels(&mut self, key: ChapterKey) {
        for kind in CHANNEL_KINDS {
            let Some(channel) = self.channels.get_mut(&(key, kind)) else {
                continue;
            };
            match self.config.switch_policy {
                SwitchPolicy::Flush => {
                    if let Some(value) = channel.flush_now() {
                        self.dispatch_write(key, kind, value);
                    }
                }
                SwitchPolicy::Discard => {
                    if channel.cancel_pending() {
                        tracing::info!(chapter = %key, %kind, "discarding unsaved edits");
                    }
                    channel.discard_unsaved();
                    let restored = channel.desired().to_string();
                    if let Some(entry) = self.chapters.get_mut(key) {
                        match kind {
                            ChannelKind::Title => entry.title = restored,
                            ChannelKind::Content => entry.set_body(restored),
                        }
                    }
                }
            }
        }
    }

    fn set_location(&mut self, id: ChapterId) {
        if self.location.as_ref() == Some(&id) {
            return;
        }
        tracing::info!(chapter = %id, "session location updated");
        self.location = Some(id);
    }

    fn collect_idle_channels(&mut self) {
        let active = self.active;
        self.channels.retain(|(key, _), channel| {
            *key == active || !channel.is_quiescent() || channel.has_unsaved()
        });
    }

    fn push_error(&mut self, channel: Option<ChannelKind>, error: SessionError) {
        self.next_message_id += 1;
        self.messages.push(SessionMessage {
            id: self.next_message_id,
            channel,
            text: error.to_string(),
            at: Utc::now(),
            error,
        });
    }
}
