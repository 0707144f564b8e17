use anyhow::Context as _;

const DEFAULT_DIRECTIVE: &str = "info";

/// `RUST_LOG` wins; `info` applies when it is unset or invalid.
pub fn init() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(DEFAULT_DIRECTIVE))
        .with_context(|| format!("build log filter from {DEFAULT_DIRECTIVE:?}"))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow::anyhow!("initialize tracing subscriber: {err}"))?;

    Ok(())
}
