use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use serde::Deserialize;

use crate::cli::EditArgs;
use crate::config::{SessionConfig, SwitchPolicy};
use crate::connectivity::{self, ConnectivityMonitor};
use crate::gateway::{LocalFsGateway, PersistenceGateway};
use crate::model::{BookId, ChapterId, ChapterKey};
use crate::session::EditSession;

const PROBE_INTERVAL: Duration = Duration::from_secs(5);

/// One editor action replayed against a session.
///
/// Chapters are referenced as `active`, `#N` (position, 1-based) or by id.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptStep {
    Body(String),
    Title(String),
    WaitMs(u64),
    Select(String),
    NewChapter(Option<String>),
    Delete(String),
    Reorder(Vec<String>),
    Rename { chapter: String, title: String },
    BookTitle(String),
    SaveNow,
    Settle,
}

pub fn parse_script(raw: &str) -> anyhow::Result<Vec<ScriptStep>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let value: serde_json::Value = serde_yaml::from_str(raw).context("parse script yaml")?;
    if value.is_null() {
        return Ok(Vec::new());
    }
    serde_json::from_value(value).context("decode script steps")
}

pub fn load_script(path: &Path) -> anyhow::Result<Vec<ScriptStep>> {
    let raw =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse_script(&raw).with_context(|| format!("load script {}", path.display()))
}

pub fn resolve_chapter(session: &EditSession, reference: &str) -> anyhow::Result<ChapterKey> {
    let reference = reference.trim();
    if reference == "active" {
        return Ok(session.active_key());
    }
    if let Some(position) = reference.strip_prefix('#') {
        let position: usize = position
            .parse()
            .with_context(|| format!("invalid chapter position: {reference}"))?;
        return session
            .chapters()
            .key_at(position)
            .with_context(|| format!("no chapter at position {position}"));
    }
    session
        .chapters()
        .key_of(&ChapterId::new(reference))
        .with_context(|| format!("unknown chapter: {reference}"))
}

pub async fn apply_step(session: &mut EditSession, step: ScriptStep) -> anyhow::Result<()> {
    match step {
        ScriptStep::Body(text) => session.on_content_edited(text),
        ScriptStep::Title(text) => session.on_title_edited(text),
        ScriptStep::WaitMs(ms) => session.run_for(Duration::from_millis(ms)).await,
        ScriptStep::Select(reference) => {
            let key = resolve_chapter(session, &reference)?;
            session.select_chapter(key).await?;
        }
        ScriptStep::NewChapter(title) => {
            session.new_chapter(title);
        }
        ScriptStep::Delete(reference) => {
            let key = resolve_chapter(session, &reference)?;
            session.delete_chapter(key)?;
        }
        ScriptStep::Reorder(references) => {
            let keys = references
                .iter()
                .map(|reference| resolve_chapter(session, reference))
                .collect::<anyhow::Result<Vec<_>>>()?;
            session.reorder(&keys)?;
        }
        ScriptStep::Rename { chapter, title } => {
            let key = resolve_chapter(session, &chapter)?;
            session.rename_chapter(key, &title)?;
        }
        ScriptStep::BookTitle(title) => session.rename_book(&title).await?,
        ScriptStep::SaveNow => session.save_now(),
        ScriptStep::Settle => session.settle().await,
    }
    Ok(())
}

pub async fn run(args: EditArgs) -> anyhow::Result<()> {
    let mut config = SessionConfig::from_env()?;
    if let Some(ms) = args.title_settle_ms {
        config.title_settle = Duration::from_millis(ms);
    }
    if let Some(ms) = args.content_settle_ms {
        config.content_settle = Duration::from_millis(ms);
    }
    if let Some(policy) = &args.switch_policy {
        config.switch_policy = SwitchPolicy::parse(policy)?;
    }
    let steps = load_script(Path::new(&args.script))?;
    tracing::info!(steps = steps.len(), ?config, "replaying edit script");

    let gateway: Arc<dyn PersistenceGateway> = Arc::new(LocalFsGateway::new(&args.data_dir));
    let mut session = EditSession::load(
        gateway,
        config,
        BookId::new(args.book),
        args.chapter.map(ChapterId::new),
    )
    .await
    .context("open book")?;

    let probe = match args.probe_addr {
        Some(addr) => {
            let initially_online = connectivity::probe_once(addr, PROBE_INTERVAL).await;
            let (signal, monitor) = ConnectivityMonitor::new(initially_online);
            session = session.with_connectivity(monitor);
            Some(connectivity::spawn_tcp_probe(signal, addr, PROBE_INTERVAL))
        }
        None => None,
    };

    for (idx, step) in steps.into_iter().enumerate() {
        tracing::debug!(step = idx + 1, ?step, "applying step");
        session.pump();
        apply_step(&mut session, step)
            .await
            .with_context(|| format!("step {}", idx + 1))?;
    }

    let view = session.close().await;
    if let Some(probe) = probe {
        probe.abort();
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&view).context("serialize session view")?
    );
    Ok(())
}
