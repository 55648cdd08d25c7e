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
    alkoteka::logging::init(alkoteka::logging::DEFAULT_DIRECTIVE).context("init logging")?;

    let cli = alkoteka::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    let report = match cli.command {
        alkoteka::cli::Command::Crawl(args) => alkoteka::crawl::run(args).await.context("crawl")?,
        alkoteka::cli::Command::Normalize(args) => {
            alkoteka::normalize::run(args).context("normalize")?
        }
    };

    let line = serde_json::to_string(&report).context("serialize run report")?;
    println!("{line}");
    Ok(())
}
