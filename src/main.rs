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
    let cli = chaptersplit::cli::Cli::parse();
    chaptersplit::logging::init(cli.verbose).context("init logging")?;
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        chaptersplit::cli::Command::Validate(args) => {
            chaptersplit::commands::validate(args)
                .await
                .context("validate")?;
        }
        chaptersplit::cli::Command::Split(args) => {
            chaptersplit::commands::split(args).await.context("split")?;
        }
        chaptersplit::cli::Command::Embed(args) => {
            chaptersplit::commands::embed(args).await.context("embed")?;
        }
    }

    Ok(())
}
