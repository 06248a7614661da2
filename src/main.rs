use anyhow::Context;
use clap::Parser;

use llm_tasks::config::Settings;
use llm_tasks::splitter::RecursiveCharacterTextSplitter;
use llm_tasks::tasks::{self, QaGenerator};

mod cli;

use cli::{Cli, Commands, Provider};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("llm-tasks error: {error:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose)?;

    let settings = Settings::from_env().context("failed to read settings from the environment")?;
    tracing::debug!(?settings, "settings loaded");

    match cli.command {
        Commands::Extract(args) => {
            let model = args.model.build(&settings, Provider::Qianfan)?;
            let info = tasks::extract(model, &args.text)
                .await
                .context("extraction failed")?;
            println!("{}", info.to_pretty_json()?);
        }
        Commands::Segment(args) => {
            let model = args.model.build(&settings, Provider::Qianfan)?;
            let text = tasks::segment(model, &args.text)
                .await
                .context("segmentation failed")?;
            println!("{text}");
        }
        Commands::QaGen(args) => {
            let splitter = RecursiveCharacterTextSplitter::new(args.chunk_size, args.chunk_overlap)
                .context("invalid chunking options")?;
            let model = args.model.build(&settings, Provider::Moonshot)?;
            let summary = QaGenerator::new(model, splitter)
                .with_progress(!cli.quiet)
                .run(&args.input, &args.output)
                .await
                .with_context(|| format!("QA generation from {} failed", args.input.display()))?;
            if !cli.quiet {
                eprintln!(
                    "wrote {} record(s) from {} chunk(s) to {} ({} malformed, {} QA pairs)",
                    summary.written,
                    summary.chunks,
                    args.output.display(),
                    summary.malformed,
                    summary.pairs
                );
            }
        }
    }
    Ok(())
}

fn init_tracing(quiet: bool, verbose: bool) -> anyhow::Result<()> {
    let level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_env("LLM_TASKS_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}
