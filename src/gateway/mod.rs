use async_trait::async_trait;

use crate::error::GatewayError;
use crate::model::{BookId, BookRecord, ChapterId, ChapterRecord, NewChapter, OrderAssignment};

pub mod local_fs;

pub use local_fs::LocalFsGateway;

/// CRUD boundary to the backend store. Every mutation that addresses an
/// existing chapter takes a [`ChapterId`], which only persisted chapters have.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn get_book(&self, book_id: &BookId) -> Result<BookRecord, GatewayError>;
    async fn list_chapters(&self, book_id: &BookId) -> Result<Vec<ChapterRecord>, GatewayError>;
    async fn get_chapter(&self, id: &ChapterId) -> Result<ChapterRecord, GatewayError>;
    async fn create_chapter(
        &self,
        book_id: &BookId,
        chapter: &NewChapter,
    ) -> Result<ChapterRecord, GatewayError>;
    async fn update_chapter_body(&self, id: &ChapterId, body: &str) -> Result<(), GatewayError>;
    async fn update_chapter_title(&self, id: &ChapterId, title: &str) -> Result<(), GatewayError>;
    async fn delete_chapter(&self, id: &ChapterId) -> Result<(), GatewayError>;
    async fn reorder_chapters(&self, assignments: &[OrderAssignment]) -> Result<(), GatewayError>;
    async fn update_book_title(&self, book_id: &BookId, title: &str) -> Result<(), GatewayError>;
}
