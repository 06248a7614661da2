//! Instruction-tuning dataset generation.
//!
//! A document is split into chunks and each chunk is sent to the model with
//! a prompt asking for question/answer pairs in JSON. Every reply is appended
//! to the output file as pretty-printed JSON followed by `",\n"`, flushed
//! immediately, so a long run that dies halfway still leaves usable data.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::Role;
use crate::chain::Chain;
use crate::error::{Result, TaskError};
use crate::loader::{self, Document};
use crate::model::ChatModel;
use crate::output_parser::{JsonOutputParser, OutputParser};
use crate::prompt::{PromptTemplate, PromptVars};
use crate::splitter::RecursiveCharacterTextSplitter;

/// System turn describing the study-and-summarize task.
pub const QA_SYSTEM_PROMPT: &str = r#"  
<Context></Context> 标记中是一段文本，学习和分析它，并整理学习成果：  
- 提出问题并给出每个问题的答案。  
- 答案需详细完整，尽可能保留原文描述。  
- 答案可以包含普通文字、链接、代码、表格、公示、媒体链接等 Markdown 元素。  
- 最多提出 30 个问题。  
"#;

/// Human turn; `{text}` receives the chunk. Doubled braces render as literal
/// JSON braces.
pub const QA_HUMAN_PROMPT: &str = r#"  
请按以下格式整理学习成果:
[
  {{
    "instruction": "人类指令/问题（必填）",
    "input": "人类输入（选填）",
    "output": "模型回答（必填）"
  }}
]
下面的填充是示例:  
[
  {{
    "instruction": "识别并解释给定列表中的两个科学理论：细胞理论和日心说。",
    "input": "",
    "output": "细胞理论是生物科学的一个理论，它认为所有生命体都是由微小的基本单元——细胞所构成。这是生物学的一个基础理论，认为细胞是所有生物的基本结构和功能单位，所有的生物都是由一个或多个细胞组成，细胞只能通过细胞分裂产生新的细胞。"
  }},
  {{
    "instruction": "输入三支篮球队的名称并生成一个适当的口号。",
    "input": "输入：俄克拉荷马城雷霆队，芝加哥公牛队，布鲁克林网队。",
    "output": "输出： 雷霆，公牛和网队：各显神通，角逐群雄!"
  }},  
  {{
    "instruction": "请根据以下文章构建一个需要回答的问题。",
    "input": "",
    "output": "我不好意思，您没有提供任何信息或文章来供我根据它构建问题。 请提供相应的文章或信息，以便我能够帮助您构建问题。"
  }}
]  

我们开始吧!  

<Context>  
{text}  
<Context/>
"#;

/// One instruction-tuning example.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaPair {
    pub instruction: String,
    #[serde(default)]
    pub input: String,
    pub output: String,
}

/// The pairs produced for one chunk.
///
/// Deserializes from either `{"qas": [...]}` or a bare array of pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "QaPairsRepr")]
pub struct QaPairs {
    pub qas: Vec<QaPair>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QaPairsRepr {
    Wrapped { qas: Vec<QaPair> },
    Bare(Vec<QaPair>),
}

impl From<QaPairsRepr> for QaPairs {
    fn from(repr: QaPairsRepr) -> Self {
        match repr {
            QaPairsRepr::Wrapped { qas } | QaPairsRepr::Bare(qas) => QaPairs { qas },
        }
    }
}

impl QaPairs {
    pub fn from_value(value: &Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }
}

/// Counters reported at the end of [`QaGenerator::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Chunks the document was split into.
    pub chunks: usize,
    /// Records appended to the output file.
    pub written: usize,
    /// Records written as a raw string because the reply was not JSON in
    /// the QA pair shape.
    pub malformed: usize,
    /// QA pairs across all records that matched the pair schema.
    pub pairs: usize,
}

/// What came back for one chunk.
enum Reply {
    Parsed { value: Value, pairs: usize },
    Malformed(String),
}

/// Splits documents and turns each chunk into QA pairs.
pub struct QaGenerator {
    chain: Chain<JsonOutputParser>,
    splitter: RecursiveCharacterTextSplitter,
    show_progress: bool,
}

impl QaGenerator {
    pub fn new(model: Arc<ChatModel>, splitter: RecursiveCharacterTextSplitter) -> Self {
        Self {
            chain: Chain::new("qa-pairs", qa_prompt(), model, JsonOutputParser),
            splitter,
            show_progress: true,
        }
    }

    /// Draw a progress bar on stderr during [`run`](Self::run).
    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.show_progress = enabled;
        self
    }

    /// Ask for QA pairs for one chunk and parse the JSON reply.
    pub async fn generate_for_chunk(&self, text: &str) -> Result<Value> {
        self.chain.invoke(&PromptVars::from(("text", text))).await
    }

    /// JSON that parses but is not a set of QA pairs is kept as raw text, so
    /// a stray fragment never stands in for the reply.
    async fn reply_for_chunk(&self, text: &str) -> Result<Reply> {
        let raw = self.chain.invoke_raw(&PromptVars::from(("text", text))).await?;
        let value = match self.chain.parser().parse(&raw) {
            Ok(value) => value,
            Err(TaskError::Parse { .. }) => return Ok(Reply::Malformed(raw)),
            Err(err) => return Err(err),
        };
        match QaPairs::from_value(&value) {
            Ok(pairs) => Ok(Reply::Parsed {
                value,
                pairs: pairs.qas.len(),
            }),
            Err(err) => {
                tracing::debug!(error = %err, "reply does not match the QA pair shape");
                Ok(Reply::Malformed(raw))
            }
        }
    }

    /// Load `input`, split it, and append one record per chunk to `output`.
    ///
    /// The output file is opened in append mode and created if missing.
    /// Replies that are not QA pair JSON are still written, verbatim as a
    /// JSON string, and counted in [`RunSummary::malformed`]. Model or
    /// transport errors stop the run; records already written stay on disk.
    pub async fn run(&self, input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<RunSummary> {
        let (input, output) = (input.as_ref(), output.as_ref());
        let chunks = loader::load_and_split(input, &self.splitter)?;
        tracing::info!(
            input = %input.display(),
            chunks = chunks.len(),
            output = %output.display(),
            "generating QA pairs"
        );

        let mut file = OpenOptions::new().create(true).append(true).open(output)?;
        self.write_records(&chunks, &mut file).await
    }

    /// Process `chunks` in order, writing each record to `sink` as it arrives.
    pub async fn write_records<W: Write>(&self, chunks: &[Document], sink: &mut W) -> Result<RunSummary> {
        let mut summary = RunSummary {
            chunks: chunks.len(),
            ..Default::default()
        };
        let bar = self.progress_bar(chunks.len() as u64);

        for (idx, chunk) in chunks.iter().enumerate() {
            tracing::info!(chunk = idx + 1, total = chunks.len(), "processing document chunk");
            tracing::debug!(chars = chunk.char_len(), content = %chunk.page_content, "chunk content");

            let record = match self.reply_for_chunk(&chunk.page_content).await {
                Ok(Reply::Parsed { value, pairs }) => {
                    summary.pairs += pairs;
                    value
                }
                Ok(Reply::Malformed(raw)) => {
                    tracing::warn!(chunk = idx + 1, "model reply is not QA pair JSON; writing raw text");
                    summary.malformed += 1;
                    Value::String(raw)
                }
                Err(err) => {
                    bar.abandon_with_message(format!("failed at chunk {}", idx + 1));
                    return Err(err);
                }
            };
            tracing::info!(chunk = idx + 1, response = %record, "model response");

            let mut line = serde_json::to_string_pretty(&record)?;
            line.push_str(",\n");
            sink.write_all(line.as_bytes())?;
            sink.flush()?;
            summary.written += 1;
            bar.inc(1);
        }

        bar.finish_with_message("done");
        tracing::info!(
            written = summary.written,
            malformed = summary.malformed,
            pairs = summary.pairs,
            "QA generation finished"
        );
        Ok(summary)
    }

    fn progress_bar(&self, total: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::with_template("{wide_bar:.cyan/blue} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar
    }
}

/// System and human turns for QA generation.
pub fn qa_prompt() -> PromptTemplate {
    PromptTemplate::from_messages([(Role::System, QA_SYSTEM_PROMPT), (Role::User, QA_HUMAN_PROMPT)])
}
