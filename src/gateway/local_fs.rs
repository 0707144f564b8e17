use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

use crate::error::GatewayError;
use crate::gateway::PersistenceGateway;
use crate::metrics;
use crate::model::{BookId, BookRecord, ChapterId, ChapterRecord, NewChapter, OrderAssignment};

/// JSON files under a data directory: `books/<id>.json`, `chapters/<id>.json`.
#[derive(Debug)]
pub struct LocalFsGateway {
    base_dir: PathBuf,
    write_lock: Mutex<()>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredBook {
    id: BookId,
    title: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

// Older files carry the body under `content`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredChapter {
    id: ChapterId,
    book_id: BookId,
    title: String,
    #[serde(alias = "content")]
    body: String,
    order: u32,
    #[serde(default)]
    word_count: usize,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl From<StoredChapter> for ChapterRecord {
    fn from(stored: StoredChapter) -> Self {
        Self {
            id: stored.id,
            book_id: stored.book_id,
            title: stored.title,
            body: stored.body,
            order: stored.order,
            word_count: stored.word_count,
            updated_at: stored.updated_at,
        }
    }
}

impl LocalFsGateway {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn books_dir(&self) -> PathBuf {
        self.base_dir.join("books")
    }

    fn chapters_dir(&self) -> PathBuf {
        self.base_dir.join("chapters")
    }

    fn book_json_path(&self, book_id: &BookId) -> Result<PathBuf, GatewayError> {
        let stem = file_stem(book_id.as_str(), "book")?;
        Ok(self.books_dir().join(format!("{stem}.json")))
    }

    fn chapter_json_path(&self, id: &ChapterId) -> Result<PathBuf, GatewayError> {
        let stem = file_stem(id.as_str(), "chapter")?;
        Ok(self.chapters_dir().join(format!("{stem}.json")))
    }

    pub async fn create_book(&self, title: &str) -> anyhow::Result<BookRecord> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let book = StoredBook {
            id: BookId::new(new_id()),
            title: crate::model::normalize_title(title),
            created_at: now,
            updated_at: now,
        };
        write_json_atomic(&self.book_json_path(&book.id)?, &book)
            .await
            .context("write book json")?;
        tracing::info!(book_id = %book.id, "book created");
        Ok(BookRecord {
            id: book.id,
            title: book.title,
        })
    }

    async fn load_book(&self, book_id: &BookId) -> Result<StoredBook, GatewayError> {
        let path = self.book_json_path(book_id)?;
        read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))?
            .ok_or_else(|| GatewayError::NotFound(format!("book {book_id}")))
    }

    async fn load_chapter(&self, id: &ChapterId) -> Result<StoredChapter, GatewayError> {
        let path = self.chapter_json_path(id)?;
        read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))?
            .ok_or_else(|| GatewayError::NotFound(format!("chapter {id}")))
    }

    async fn store_chapter(&self, chapter: &StoredChapter) -> Result<(), GatewayError> {
        write_json_atomic(&self.chapter_json_path(&chapter.id)?, chapter)
            .await
            .context("write chapter json")?;
        Ok(())
    }

    async fn modify_chapter(
        &self,
        id: &ChapterId,
        apply: impl FnOnce(&mut StoredChapter) + Send,
    ) -> Result<(), GatewayError> {
        let _guard = self.write_lock.lock().await;
        let mut chapter = self.load_chapter(id).await?;
        apply(&mut chapter);
        chapter.updated_at = Some(Utc::now());
        self.store_chapter(&chapter).await
    }
}

#[async_trait]
impl PersistenceGateway for LocalFsGateway {
    async fn get_book(&self, book_id: &BookId) -> Result<BookRecord, GatewayError> {
        let book = self.load_book(book_id).await?;
        Ok(BookRecord {
            id: book.id,
            title: book.title,
        })
    }

    async fn list_chapters(&self, book_id: &BookId) -> Result<Vec<ChapterRecord>, GatewayError> {
        self.load_book(book_id).await?;

        let dir = self.chapters_dir();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("read chapters dir: {}", dir.display()))
                    .into());
            }
        };

        let mut chapters = Vec::new();
        while let Some(entry) = entries.next_entry().await.context("read chapters dir entry")? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(chapter) = read_json::<StoredChapter>(&path)
                .await
                .with_context(|| format!("read: {}", path.display()))?
            else {
                continue;
            };
            if &chapter.book_id == book_id {
                chapters.push(ChapterRecord::from(chapter));
            }
        }
        chapters.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
        Ok(chapters)
    }

    async fn get_chapter(&self, id: &ChapterId) -> Result<ChapterRecord, GatewayError> {
        Ok(self.load_chapter(id).await?.into())
    }

    async fn create_chapter(
        &self,
        book_id: &BookId,
        chapter: &NewChapter,
    ) -> Result<ChapterRecord, GatewayError> {
        self.load_book(book_id).await?;
        let _guard = self.write_lock.lock().await;
        let stored = StoredChapter {
            id: ChapterId::new(new_id()),
            book_id: book_id.clone(),
            title: crate::model::normalize_title(&chapter.title),
            body: chapter.body.clone(),
            order: chapter.order,
            word_count: metrics::derive(&chapter.body).words,
            updated_at: Some(Utc::now()),
        };
        self.store_chapter(&stored).await?;
        tracing::debug!(chapter = %stored.id, book_id = %book_id, "chapter stored");
        Ok(stored.into())
    }

    async fn update_chapter_body(&self, id: &ChapterId, body: &str) -> Result<(), GatewayError> {
        let word_count = metrics::derive(body).words;
        self.modify_chapter(id, |chapter| {
            chapter.body = body.to_string();
            chapter.word_count = word_count;
        })
        .await
    }

    async fn update_chapter_title(&self, id: &ChapterId, title: &str) -> Result<(), GatewayError> {
        self.modify_chapter(id, |chapter| chapter.title = title.to_string())
            .await
    }

    async fn delete_chapter(&self, id: &ChapterId) -> Result<(), GatewayError> {
        let _guard = self.write_lock.lock().await;
        let path = self.chapter_json_path(id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(GatewayError::NotFound(format!("chapter {id}")))
            }
            Err(err) => Err(anyhow::Error::new(err)
                .context(format!("remove: {}", path.display()))
                .into()),
        }
    }

    async fn reorder_chapters(&self, assignments: &[OrderAssignment]) -> Result<(), GatewayError> {
        let _guard = self.write_lock.lock().await;
        for assignment in assignments {
            let mut chapter = self.load_chapter(&assignment.id).await?;
            chapter.order = assignment.order;
            self.store_chapter(&chapter).await?;
        }
        Ok(())
    }

    async fn update_book_title(&self, book_id: &BookId, title: &str) -> Result<(), GatewayError> {
        let _guard = self.write_lock.lock().await;
        let mut book = self.load_book(book_id).await?;
        book.title = title.to_string();
        book.updated_at = Utc::now();
        write_json_atomic(&self.book_json_path(book_id)?, &book)
            .await
            .context("write book json")?;
        Ok(())
    }
}

/// Ids name files directly, so anything that could step outside the data
/// directory is reported as absent.
fn file_stem<'a>(raw: &'a str, kind: &str) -> Result<&'a str, GatewayError> {
    if raw.is_empty() || raw.contains(['/', '\\']) || raw.contains("..") {
        return Err(GatewayError::NotFound(format!("{kind} {raw}")));
    }
    Ok(raw)
}

fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value = serde_json::from_slice(&bytes).context("parse json")?;
    Ok(Some(value))
}

async fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    fs::write(&tmp_path, &data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_chapter(title: &str, body: &str, order: u32) -> NewChapter {
        NewChapter {
            title: title.to_string(),
            body: body.to_string(),
            order,
        }
    }

    #[tokio::test]
    async fn chapters_round_trip_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = LocalFsGateway::new(dir.path());
        let book = gateway.create_book("Field Notes").await.unwrap();

        let second = gateway
            .create_chapter(&book.id, &new_chapter("Two", "", 2))
            .await
            .unwrap();
        let first = gateway
            .create_chapter(&book.id, &new_chapter("", "opening line", 1))
            .await
            .unwrap();
        assert_eq!(first.title, "Untitled");
        assert_eq!(first.word_count, 2);

        gateway
            .update_chapter_body(&second.id, "three more words")
            .await
            .unwrap();
        gateway
            .update_chapter_title(&second.id, "Second")
            .await
            .unwrap();

        let chapters = gateway.list_chapters(&book.id).await.unwrap();
        let titles: Vec<_> = chapters.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, ["Untitled", "Second"]);
        assert_eq!(chapters[1].word_count, 3);
        assert!(chapters[1].updated_at.is_some());
    }

    #[tokio::test]
    async fn reorder_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = LocalFsGateway::new(dir.path());
        let book = gateway.create_book("Order").await.unwrap();
        let a = gateway
            .create_chapter(&book.id, &new_chapter("A", "", 1))
            .await
            .unwrap();
        let b = gateway
            .create_chapter(&book.id, &new_chapter("B", "", 2))
            .await
            .unwrap();

        gateway
            .reorder_chapters(&[
                OrderAssignment {
                    id: b.id.clone(),
                    order: 1,
                },
                OrderAssignment {
                    id: a.id.clone(),
                    order: 2,
                },
            ])
            .await
            .unwrap();
        let titles: Vec<_> = gateway
            .list_chapters(&book.id)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.title)
            .collect();
        assert_eq!(titles, ["B", "A"]);

        gateway.delete_chapter(&a.id).await.unwrap();
        assert!(gateway.get_chapter(&a.id).await.unwrap_err().is_not_found());
        assert!(gateway.delete_chapter(&a.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn legacy_content_field_reads_as_body() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = LocalFsGateway::new(dir.path());
        let book = gateway.create_book("Legacy").await.unwrap();

        let legacy = serde_json::json!({
            "id": "old1",
            "book_id": book.id,
            "title": "Old",
            "content": "kept under the old name",
            "order": 1
        });
        std::fs::create_dir_all(dir.path().join("chapters")).unwrap();
        std::fs::write(
            dir.path().join("chapters").join("old1.json"),
            serde_json::to_vec(&legacy).unwrap(),
        )
        .unwrap();

        let chapter = gateway.get_chapter(&ChapterId::new("old1")).await.unwrap();
        assert_eq!(chapter.body, "kept under the old name");

        gateway
            .update_chapter_body(&chapter.id, "rewritten")
            .await
            .unwrap();
        let raw = std::fs::read_to_string(dir.path().join("chapters").join("old1.json")).unwrap();
        assert!(raw.contains("\"body\""));
        assert!(!raw.contains("\"content\""));
    }

    #[tokio::test]
    async fn missing_book_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = LocalFsGateway::new(dir.path());
        let err = gateway
            .get_book(&BookId::new("nope"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        let err = gateway
            .list_chapters(&BookId::new("nope"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn ids_cannot_reach_outside_their_directory() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = LocalFsGateway::new(dir.path());
        let book = gateway.create_book("Escape").await.unwrap();

        let sneaky = ChapterId::new(format!("../books/{}", book.id));
        let err = gateway.get_chapter(&sneaky).await.unwrap_err();
        assert!(err.is_not_found());
        let err = gateway
            .update_chapter_body(&sneaky, "overwrite")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        let err = gateway.delete_chapter(&sneaky).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(
            gateway
                .get_book(&BookId::new(r"..\books"))
                .await
                .unwrap_err()
                .is_not_found()
        );

        assert_eq!(gateway.get_book(&book.id).await.unwrap().title, "Escape");
    }

    #[tokio::test]
    async fn book_title_updates() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = LocalFsGateway::new(dir.path());
        let book = gateway.create_book("Draft Title").await.unwrap();
        gateway
            .update_book_title(&book.id, "Final Title")
            .await
            .unwrap();
        assert_eq!(gateway.get_book(&book.id).await.unwrap().title, "Final Title");
    }
}
