use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Book {
        #[command(subcommand)]
        command: BookCommand,
    },
    Edit(EditArgs),
    Metrics(MetricsArgs),
}

#[derive(Debug, Subcommand)]
pub enum BookCommand {
    Init(BookInitArgs),
    Show(BookShowArgs),
}

#[derive(Debug, Args)]
pub struct BookInitArgs {
    /// Data directory of the local store.
    #[arg(long)]
    pub data_dir: String,

    /// Book title.
    #[arg(long)]
    pub title: String,
}

#[derive(Debug, Args)]
pub struct BookShowArgs {
    /// Data directory of the local store.
    #[arg(long)]
    pub data_dir: String,

    /// Book id (printed by `book init`).
    #[arg(long)]
    pub book: String,
}

#[derive(Debug, Args)]
pub struct EditArgs {
    /// Data directory of the local store.
    #[arg(long)]
    pub data_dir: String,

    /// Book id to open.
    #[arg(long)]
    pub book: String,

    /// Chapter id to open (default: most recently edited).
    #[arg(long)]
    pub chapter: Option<String>,

    /// YAML (or JSON) list of edit steps to replay.
    #[arg(long)]
    pub script: String,

    /// Title settle delay; overrides CHAPTERSYNC_TITLE_SETTLE_MS.
    #[arg(long)]
    pub title_settle_ms: Option<u64>,

    /// Content settle delay; overrides CHAPTERSYNC_CONTENT_SETTLE_MS.
    #[arg(long)]
    pub content_settle_ms: Option<u64>,

    /// `flush` or `discard`; overrides CHAPTERSYNC_SWITCH_POLICY.
    #[arg(long)]
    pub switch_policy: Option<String>,

    /// Address probed over TCP for the online/offline indicator.
    #[arg(long)]
    pub probe_addr: Option<SocketAddr>,
}

#[derive(Debug, Args)]
pub struct MetricsArgs {
    /// Body file, plain text or structured JSON (default: stdin).
    #[arg(long)]
    pub file: Option<String>,
}
