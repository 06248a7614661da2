use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};

use llm_tasks::backend::qianfan::DEFAULT_ENDPOINT;
use llm_tasks::backend::GenerationOptions;
use llm_tasks::config::Settings;
use llm_tasks::model::{ChatModel, DEFAULT_MOONSHOT_MODEL, DEFAULT_QIANFAN_MODEL};
use llm_tasks::splitter::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use llm_tasks::tasks::{extraction, segmentation};

/// Top-level CLI parser for the `llm-tasks` binary.
#[derive(Debug, Parser)]
#[command(
    name = "llm-tasks",
    version,
    about = "Field extraction, POS segmentation and QA dataset generation with hosted LLMs"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Quiet mode (errors only, no progress bar)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Verbose mode (debug logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Extract person/action/object/date from a sentence and print JSON
    Extract(ExtractArgs),
    /// Segment text into words with part-of-speech tags
    Segment(SegmentArgs),
    /// Generate instruction/input/output pairs from a document
    QaGen(QaGenArgs),
}

#[derive(Debug, Args)]
pub struct ExtractArgs {
    /// Text to analyse
    #[arg(short, long, default_value = extraction::SAMPLE_TEXT)]
    pub text: String,

    #[command(flatten)]
    pub model: ModelArgs,
}

#[derive(Debug, Args)]
pub struct SegmentArgs {
    /// Text to segment
    #[arg(short, long, default_value = segmentation::SAMPLE_TEXT)]
    pub text: String,

    #[command(flatten)]
    pub model: ModelArgs,
}

#[derive(Debug, Args)]
pub struct QaGenArgs {
    /// Plain-text or markdown document to read
    #[arg(short, long)]
    pub input: PathBuf,

    /// Dataset file; records are appended
    #[arg(short, long, default_value = "dataset.json")]
    pub output: PathBuf,

    /// Maximum chunk length in characters
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Characters carried over between consecutive chunks
    #[arg(long, default_value_t = DEFAULT_CHUNK_OVERLAP)]
    pub chunk_overlap: usize,

    #[command(flatten)]
    pub model: ModelArgs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Provider {
    /// Baidu Qianfan (QIANFAN_AK / QIANFAN_SK)
    Qianfan,
    /// Moonshot, OpenAI-compatible (MOONSHOT_API_KEY)
    Moonshot,
}

/// Provider and sampling flags shared by every task.
#[derive(Debug, Clone, Args)]
pub struct ModelArgs {
    /// Model provider; each task has its own default
    #[arg(long, value_enum)]
    pub provider: Option<Provider>,

    /// Model name (Yi-34B-Chat for Qianfan, moonshot-v1-128k for Moonshot)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Qianfan chat endpoint
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Wait for the whole reply instead of streaming it
    #[arg(long)]
    pub no_stream: bool,

    /// Sampling temperature
    #[arg(long)]
    pub temperature: Option<f64>,

    /// Nucleus sampling probability mass
    #[arg(long)]
    pub top_p: Option<f64>,

    /// Cap on generated tokens
    #[arg(long)]
    pub max_tokens: Option<u32>,
}

impl ModelArgs {
    /// Build the chat model, falling back to `default` when no provider was
    /// given on the command line.
    pub fn build(&self, settings: &Settings, default: Provider) -> anyhow::Result<Arc<ChatModel>> {
        let provider = self.provider.unwrap_or(default);
        let mut builder = match provider {
            Provider::Qianfan => ChatModel::qianfan(
                settings,
                self.model.as_deref().unwrap_or(DEFAULT_QIANFAN_MODEL),
                self.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT),
            )?,
            Provider::Moonshot => {
                if self.endpoint.is_some() {
                    tracing::warn!("--endpoint only applies to Qianfan; ignoring it");
                }
                ChatModel::moonshot(settings, self.model.as_deref().unwrap_or(DEFAULT_MOONSHOT_MODEL))?
            }
        };
        if self.no_stream {
            builder = builder.streaming(false);
        }
        let mut options = GenerationOptions::default();
        if let Some(temperature) = self.temperature {
            options = options.with_temperature(temperature);
        }
        if let Some(top_p) = self.top_p {
            options = options.with_top_p(top_p);
        }
        if let Some(max_tokens) = self.max_tokens {
            options = options.with_max_tokens(max_tokens);
        }
        builder = builder.options(options);
        let model = builder
            .build()
            .with_context(|| format!("failed to build {provider:?} chat model"))?;
        tracing::debug!(?model, "chat model ready");
        Ok(Arc::new(model))
    }
}
