use anyhow::Context as _;

/// Installs the stderr subscriber. `RUST_LOG` wins; otherwise `verbose` picks debug over info.
pub fn init(verbose: bool) -> anyhow::Result<()> {
    let default_directive = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(default_directive))
        .context("build log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow::anyhow!("initialize tracing subscriber: {err}"))?;

    Ok(())
}
