//! Word segmentation with part-of-speech tags.

use std::sync::Arc;

use crate::chain::Chain;
use crate::error::Result;
use crate::model::ChatModel;
use crate::output_parser::StrOutputParser;
use crate::prompt::{PromptTemplate, PromptVars};

pub const SEGMENTATION_PROMPT: &str =
    "Segment the following text and provide POS tags for each word: {text}";

pub const SAMPLE_TEXT: &str = "我爱自然语言处理";

pub fn segmentation_chain(model: Arc<ChatModel>) -> Chain<StrOutputParser> {
    Chain::new(
        "segmentation",
        PromptTemplate::from_template(SEGMENTATION_PROMPT),
        model,
        StrOutputParser,
    )
}

/// Return the model's segmentation of `text` as-is.
pub async fn segment(model: Arc<ChatModel>, text: &str) -> Result<String> {
    segmentation_chain(model)
        .invoke(&PromptVars::from(("text", text)))
        .await
}
