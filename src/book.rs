use anyhow::Context as _;
use serde::Serialize;

use crate::cli::{BookInitArgs, BookShowArgs};
use crate::gateway::{LocalFsGateway, PersistenceGateway as _};
use crate::model::{BookId, BookRecord, ChapterRecord};

#[derive(Debug, Serialize)]
struct BookListing {
    book: BookRecord,
    chapters: Vec<ChapterListing>,
}

#[derive(Debug, Serialize)]
struct ChapterListing {
    id: String,
    order: u32,
    title: String,
    word_count: usize,
    body: String,
}

impl From<ChapterRecord> for ChapterListing {
    fn from(record: ChapterRecord) -> Self {
        Self {
            id: record.id.to_string(),
            order: record.order,
            title: record.title,
            word_count: record.word_count,
            body: record.body,
        }
    }
}

pub async fn init(args: BookInitArgs) -> anyhow::Result<()> {
    let gateway = LocalFsGateway::new(&args.data_dir);
    let book = gateway
        .create_book(&args.title)
        .await
        .with_context(|| format!("create book in {}", args.data_dir))?;
    println!("{}", book.id);
    Ok(())
}

pub async fn show(args: BookShowArgs) -> anyhow::Result<()> {
    let gateway = LocalFsGateway::new(&args.data_dir);
    let book_id = BookId::new(args.book);
    let book = gateway.get_book(&book_id).await.context("load book")?;
    let chapters = gateway
        .list_chapters(&book_id)
        .await
        .context("list chapters")?;

    let listing = BookListing {
        book,
        chapters: chapters.into_iter().map(ChapterListing::from).collect(),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&listing).context("serialize book listing")?
    );
    Ok(())
}
