#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chaptersync::config::SessionConfig;
use chaptersync::error::GatewayError;
use chaptersync::gateway::PersistenceGateway;
use chaptersync::model::{
    BookId, BookRecord, ChapterId, ChapterKey, ChapterRecord, NewChapter, OrderAssignment,
};
use chaptersync::session::EditSession;
use chrono::{TimeZone as _, Utc};

pub const BOOK: &str = "book-1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    GetChapter,
    Create,
    UpdateBody,
    UpdateTitle,
    Delete,
    Reorder,
    BookTitle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    GetBook,
    ListChapters,
    GetChapter(String),
    Create {
        title: String,
        body: String,
        order: u32,
    },
    UpdateBody {
        id: String,
        body: String,
    },
    UpdateTitle {
        id: String,
        title: String,
    },
    Delete(String),
    Reorder(Vec<(String, u32)>),
    BookTitle(String),
}

impl Call {
    pub fn is_write(&self) -> bool {
        !matches!(self, Self::GetBook | Self::ListChapters | Self::GetChapter(_))
    }
}

#[derive(Debug, Default)]
struct State {
    book: Option<BookRecord>,
    chapters: BTreeMap<String, ChapterRecord>,
    calls: Vec<Call>,
    next_id: u64,
    failing: HashSet<Op>,
    stalled: HashSet<Op>,
    delays: HashMap<Op, Duration>,
    active: HashMap<Op, usize>,
    max_active: HashMap<Op, usize>,
}

/// In-memory backend that records every call and can be told to fail,
/// delay, or stall individual operations.
#[derive(Debug, Default)]
pub struct FakeGateway {
    state: Mutex<State>,
}

pub fn chapter(id: &str, order: u32, body: &str, minute: Option<u32>) -> ChapterRecord {
    ChapterRecord {
        id: ChapterId::new(id),
        book_id: BookId::new(BOOK),
        title: format!("{} title", id.to_uppercase()),
        body: body.to_string(),
        order,
        word_count: 0,
        updated_at: minute.map(|m| Utc.with_ymd_and_hms(2024, 3, 1, 9, m, 0).unwrap()),
    }
}

impl FakeGateway {
    pub fn new(chapters: Vec<ChapterRecord>) -> Arc<Self> {
        let state = State {
            book: Some(BookRecord {
                id: BookId::new(BOOK),
                title: "Field Notes".to_string(),
            }),
            chapters: chapters
                .into_iter()
                .map(|record| (record.id.to_string(), record))
                .collect(),
            ..State::default()
        };
        Arc::new(Self {
            state: Mutex::new(state),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn writes(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_write).collect()
    }

    pub fn body_writes(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::UpdateBody { id, body } => Some((id, body)),
                _ => None,
            })
            .collect()
    }

    pub fn title_writes(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::UpdateTitle { id, title } => Some((id, title)),
                _ => None,
            })
            .collect()
    }

    pub fn creates(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, Call::Create { .. }))
            .collect()
    }

    pub fn set_failing(&self, op: Op, failing: bool) {
        let mut state = self.state.lock().unwrap();
        if failing {
            state.failing.insert(op);
        } else {
            state.failing.remove(&op);
        }
    }

    pub fn stall(&self, op: Op) {
        self.state.lock().unwrap().stalled.insert(op);
    }

    pub fn delay(&self, op: Op, delay: Duration) {
        self.state.lock().unwrap().delays.insert(op, delay);
    }

    pub fn max_concurrent(&self, op: Op) -> usize {
        self.state
            .lock()
            .unwrap()
            .max_active
            .get(&op)
            .copied()
            .unwrap_or(0)
    }

    pub fn stored(&self, id: &str) -> Option<ChapterRecord> {
        self.state.lock().unwrap().chapters.get(id).cloned()
    }

    pub fn book_title(&self) -> String {
        let state = self.state.lock().unwrap();
        state
            .book
            .as_ref()
            .map(|book| book.title.clone())
            .unwrap_or_default()
    }

    /// Deletes a chapter behind the session's back.
    pub fn remove_externally(&self, id: &str) {
        self.state.lock().unwrap().chapters.remove(id);
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }

    async fn enter(&self, op: Op) {
        let (delay, stalled) = {
            let mut state = self.state.lock().unwrap();
            let active = state.active.entry(op).or_default();
            *active += 1;
            let now = *active;
            let max = state.max_active.entry(op).or_default();
            *max = (*max).max(now);
            (state.delays.get(&op).copied(), state.stalled.contains(&op))
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn leave(&self, op: Op) -> Result<(), GatewayError> {
        let mut state = self.state.lock().unwrap();
        if let Some(active) = state.active.get_mut(&op) {
            *active -= 1;
        }
        if state.failing.contains(&op) {
            return Err(GatewayError::Backend(anyhow::anyhow!("backend unavailable")));
        }
        Ok(())
    }

    fn modify(
        &self,
        id: &ChapterId,
        apply: impl FnOnce(&mut ChapterRecord),
    ) -> Result<(), GatewayError> {
        let mut state = self.state.lock().unwrap();
        let record = state
            .chapters
            .get_mut(id.as_str())
            .ok_or_else(|| GatewayError::NotFound(format!("chapter {id}")))?;
        apply(record);
        record.updated_at = Some(Utc::now());
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for FakeGateway {
    async fn get_book(&self, book_id: &BookId) -> Result<BookRecord, GatewayError> {
        self.record(Call::GetBook);
        let state = self.state.lock().unwrap();
        state
            .book
            .clone()
            .filter(|book| book.id == *book_id)
            .ok_or_else(|| GatewayError::NotFound(format!("book {book_id}")))
    }

    async fn list_chapters(&self, book_id: &BookId) -> Result<Vec<ChapterRecord>, GatewayError> {
        self.record(Call::ListChapters);
        let state = self.state.lock().unwrap();
        let mut chapters: Vec<_> = state
            .chapters
            .values()
            .filter(|record| record.book_id == *book_id)
            .cloned()
            .collect();
        chapters.sort_by_key(|record| record.order);
        Ok(chapters)
    }

    async fn get_chapter(&self, id: &ChapterId) -> Result<ChapterRecord, GatewayError> {
        self.record(Call::GetChapter(id.to_string()));
        self.enter(Op::GetChapter).await;
        self.leave(Op::GetChapter)?;
        let state = self.state.lock().unwrap();
        state
            .chapters
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("chapter {id}")))
    }

    async fn create_chapter(
        &self,
        book_id: &BookId,
        chapter: &NewChapter,
    ) -> Result<ChapterRecord, GatewayError> {
        self.record(Call::Create {
            title: chapter.title.clone(),
            body: chapter.body.clone(),
            order: chapter.order,
        });
        self.enter(Op::Create).await;
        self.leave(Op::Create)?;
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let record = ChapterRecord {
            id: ChapterId::new(format!("ch-new-{}", state.next_id)),
            book_id: book_id.clone(),
            title: chapter.title.clone(),
            body: chapter.body.clone(),
            order: chapter.order,
            word_count: 0,
            updated_at: Some(Utc::now()),
        };
        state
            .chapters
            .insert(record.id.to_string(), record.clone());
        Ok(record)
    }

    async fn update_chapter_body(&self, id: &ChapterId, body: &str) -> Result<(), GatewayError> {
        self.record(Call::UpdateBody {
            id: id.to_string(),
            body: body.to_string(),
        });
        self.enter(Op::UpdateBody).await;
        self.leave(Op::UpdateBody)?;
        self.modify(id, |record| record.body = body.to_string())
    }

    async fn update_chapter_title(&self, id: &ChapterId, title: &str) -> Result<(), GatewayError> {
        self.record(Call::UpdateTitle {
            id: id.to_string(),
            title: title.to_string(),
        });
        self.enter(Op::UpdateTitle).await;
        self.leave(Op::UpdateTitle)?;
        self.modify(id, |record| record.title = title.to_string())
    }

    async fn delete_chapter(&self, id: &ChapterId) -> Result<(), GatewayError> {
        self.record(Call::Delete(id.to_string()));
        self.enter(Op::Delete).await;
        self.leave(Op::Delete)?;
        let mut state = self.state.lock().unwrap();
        state
            .chapters
            .remove(id.as_str())
            .map(|_| ())
            .ok_or_else(|| GatewayError::NotFound(format!("chapter {id}")))
    }

    async fn reorder_chapters(&self, assignments: &[OrderAssignment]) -> Result<(), GatewayError> {
        self.record(Call::Reorder(
            assignments
                .iter()
                .map(|assignment| (assignment.id.to_string(), assignment.order))
                .collect(),
        ));
        self.enter(Op::Reorder).await;
        self.leave(Op::Reorder)?;
        let mut state = self.state.lock().unwrap();
        for assignment in assignments {
            if let Some(record) = state.chapters.get_mut(assignment.id.as_str()) {
                record.order = assignment.order;
            }
        }
        Ok(())
    }

    async fn update_book_title(&self, book_id: &BookId, title: &str) -> Result<(), GatewayError> {
        self.record(Call::BookTitle(title.to_string()));
        self.enter(Op::BookTitle).await;
        self.leave(Op::BookTitle)?;
        let mut state = self.state.lock().unwrap();
        match state.book.as_mut().filter(|book| book.id == *book_id) {
            Some(book) => {
                book.title = title.to_string();
                Ok(())
            }
            None => Err(GatewayError::NotFound(format!("book {book_id}"))),
        }
    }
}

pub async fn open(gateway: &Arc<FakeGateway>, chapter: Option<&str>) -> EditSession {
    open_with(gateway, SessionConfig::default(), chapter).await
}

pub async fn open_with(
    gateway: &Arc<FakeGateway>,
    config: SessionConfig,
    chapter: Option<&str>,
) -> EditSession {
    let gateway: Arc<dyn PersistenceGateway> = gateway.clone();
    EditSession::load(
        gateway,
        config,
        BookId::new(BOOK),
        chapter.map(ChapterId::new),
    )
    .await
    .unwrap()
}

pub fn key_of(session: &EditSession, id: &str) -> ChapterKey {
    session.chapters().key_of(&ChapterId::new(id)).unwrap()
}

pub fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}
