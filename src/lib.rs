//! # LLM Tasks
//!
//! Prompt-driven language tasks over hosted chat models.
//!
//! Each task is a [`Chain`]: a [`PromptTemplate`] rendered with the caller's
//! text, sent through a [`ChatModel`], and read back by an
//! [`OutputParser`](output_parser::OutputParser).
//!
//! - **Extraction** ([`tasks::extraction`]): pull `person`, `action`,
//!   `object` and `date` out of a sentence.
//! - **Segmentation** ([`tasks::segmentation`]): word segmentation with
//!   part-of-speech tags, returned as the model wrote it.
//! - **QA generation** ([`tasks::qa`]): split a document into overlapping
//!   chunks and append instruction/input/output pairs for each chunk to a
//!   dataset file.
//!
//! Two providers are supported: Baidu Qianfan (AK/SK token exchange) and any
//! OpenAI-compatible endpoint such as Moonshot.
//!
//! ## Quick Start
//!
//! ```no_run
//! use llm_tasks::{config::Settings, model::ChatModel, tasks};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::from_env()?;
//!     let model = ChatModel::qianfan(&settings, "Yi-34B-Chat", "eb-instant")?.build()?;
//!
//!     let info = tasks::extract(Arc::new(model), "张华在2023年5月获得了诺贝尔奖").await?;
//!     println!("{}", info.to_pretty_json()?);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod chain;
pub mod config;
pub mod error;
pub mod loader;
pub mod model;
pub mod output_parser;
pub mod prompt;
pub mod splitter;
pub mod tasks;

pub use backend::{BackoffConfig, MockBackend, OpenAiBackend, QianfanBackend};
pub use chain::Chain;
pub use config::Settings;
pub use error::{Result, TaskError};
pub use loader::{load_text, Document, DocumentMetadata};
pub use model::{ChatModel, ChatModelBuilder};
pub use prompt::{PromptTemplate, PromptVars};
pub use splitter::RecursiveCharacterTextSplitter;
