use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    chaptersync::logging::init().context("init logging")?;

    let cli = chaptersync::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        chaptersync::cli::Command::Book {
            command: chaptersync::cli::BookCommand::Init(args),
        } => {
            chaptersync::book::init(args).await.context("book init")?;
        }
        chaptersync::cli::Command::Book {
            command: chaptersync::cli::BookCommand::Show(args),
        } => {
            chaptersync::book::show(args).await.context("book show")?;
        }
        chaptersync::cli::Command::Edit(args) => {
            chaptersync::script::run(args).await.context("edit")?;
        }
        chaptersync::cli::Command::Metrics(args) => {
            chaptersync::metrics::run(args).context("metrics")?;
        }
    }

    Ok(())
}
