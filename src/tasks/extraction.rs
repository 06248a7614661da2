//! Key-information extraction.
//!
//! The model is asked in free form for the key facts of a sentence; the reply
//! is then read line by line for `person`, `action`, `object` and `date`
//! labels. Anything the model leaves out becomes `"Unknown"`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::chain::Chain;
use crate::error::Result;
use crate::model::ChatModel;
use crate::output_parser::OutputParser;
use crate::prompt::{PromptTemplate, PromptVars};

pub const EXTRACTION_PROMPT: &str = "Extract the key information from the following text: {text}";

/// Sample input used when the caller gives none.
pub const SAMPLE_TEXT: &str = "张华在2023年5月获得了诺贝尔奖";

const UNKNOWN: &str = "Unknown";

/// Who did what to what, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedInfo {
    pub person: String,
    pub action: String,
    pub object: String,
    pub date: String,
}

impl Default for ExtractedInfo {
    fn default() -> Self {
        Self {
            person: UNKNOWN.to_string(),
            action: UNKNOWN.to_string(),
            object: UNKNOWN.to_string(),
            date: UNKNOWN.to_string(),
        }
    }
}

impl ExtractedInfo {
    /// Two-space indented JSON.
    pub fn to_pretty_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Read labeled fields out of free-form model text.
///
/// Each line is checked for the labels `person`, `action`, `object` and
/// `date` in that order; the first label contained in the line claims it.
/// The value is the text between the line's first and second `:`. A labeled
/// line without any `:` clears the field. Later lines win.
///
/// ```
/// use llm_tasks::tasks::extraction::parse_labeled_fields;
///
/// let info = parse_labeled_fields("person: 张华\ndate: 2023年5月");
/// assert_eq!(info.person, "张华");
/// assert_eq!(info.action, "Unknown");
/// assert_eq!(info.date, "2023年5月");
/// ```
pub fn parse_labeled_fields(text: &str) -> ExtractedInfo {
    let mut person: Option<&str> = None;
    let mut action: Option<&str> = None;
    let mut object: Option<&str> = None;
    let mut date: Option<&str> = None;

    for line in text.split('\n') {
        let slot = if line.contains("person") {
            &mut person
        } else if line.contains("action") {
            &mut action
        } else if line.contains("object") {
            &mut object
        } else if line.contains("date") {
            &mut date
        } else {
            continue;
        };
        *slot = line.split(':').nth(1).map(str::trim);
    }

    let or_unknown = |value: Option<&str>| match value {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => UNKNOWN.to_string(),
    };
    ExtractedInfo {
        person: or_unknown(person),
        action: or_unknown(action),
        object: or_unknown(object),
        date: or_unknown(date),
    }
}

/// [`OutputParser`] wrapper around [`parse_labeled_fields`]. Never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractedInfoParser;

impl OutputParser for ExtractedInfoParser {
    type Output = ExtractedInfo;

    fn parse(&self, text: &str) -> Result<ExtractedInfo> {
        Ok(parse_labeled_fields(text))
    }
}

pub fn extraction_chain(model: Arc<ChatModel>) -> Chain<ExtractedInfoParser> {
    Chain::new(
        "extraction",
        PromptTemplate::from_template(EXTRACTION_PROMPT),
        model,
        ExtractedInfoParser,
    )
}

/// Ask the model for the key facts in `text`.
pub async fn extract(model: Arc<ChatModel>, text: &str) -> Result<ExtractedInfo> {
    let chain = extraction_chain(model);
    let raw = chain.invoke_raw(&PromptVars::from(("text", text))).await?;
    tracing::debug!(reply = %raw, "raw extraction reply");
    chain.parser().parse(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use pretty_assertions::assert_eq;

    #[test]
    fn full_reply_fills_every_field() {
        let reply = "person: 张华\naction: 获得\nobject: 诺贝尔奖\ndate: 2023年5月";
        assert_eq!(
            parse_labeled_fields(reply),
            ExtractedInfo {
                person: "张华".into(),
                action: "获得".into(),
                object: "诺贝尔奖".into(),
                date: "2023年5月".into(),
            }
        );
    }

    #[test]
    fn empty_reply_is_all_unknown() {
        assert_eq!(parse_labeled_fields(""), ExtractedInfo::default());
    }

    #[test]
    fn value_stops_at_second_colon() {
        let info = parse_labeled_fields("date: 2023-05-01 10:30");
        assert_eq!(info.date, "2023-05-01 10");
    }

    #[test]
    fn label_without_colon_clears_field() {
        let info = parse_labeled_fields("person: 张华\nthe person is unknown");
        assert_eq!(info.person, "Unknown");
    }

    #[test]
    fn empty_value_is_unknown() {
        assert_eq!(parse_labeled_fields("action:   ").action, "Unknown");
    }

    #[test]
    fn first_label_in_check_order_wins() {
        // "person" is checked before "date", so this line sets person only.
        let info = parse_labeled_fields("person date: 张华");
        assert_eq!(info.person, "张华");
        assert_eq!(info.date, "Unknown");
    }

    #[test]
    fn labels_are_case_sensitive() {
        let info = parse_labeled_fields("Person: 张华\n- **object**: 诺贝尔奖");
        assert_eq!(info.person, "Unknown");
        assert_eq!(info.object, "诺贝尔奖");
    }

    #[test]
    fn full_width_colon_is_not_a_separator() {
        assert_eq!(parse_labeled_fields("person：张华").person, "Unknown");
    }

    #[test]
    fn pretty_json_uses_two_space_indent() {
        let json = ExtractedInfo::default().to_pretty_json().unwrap();
        assert_eq!(
            json,
            "{\n  \"person\": \"Unknown\",\n  \"action\": \"Unknown\",\n  \"object\": \"Unknown\",\n  \"date\": \"Unknown\"\n}"
        );
    }

    #[tokio::test]
    async fn extract_sends_prompt_and_parses_reply() {
        let mock = Arc::new(MockBackend::fixed("person: 张华\naction: 获得了\nobject: 诺贝尔奖"));
        let model = Arc::new(
            ChatModel::builder("http://unused", "m")
                .backend(mock.clone())
                .build()
                .unwrap(),
        );

        let info = extract(model, SAMPLE_TEXT).await.unwrap();
        assert_eq!(info.person, "张华");
        assert_eq!(info.date, "Unknown");
        assert_eq!(
            mock.requests()[0].messages[0].content,
            "Extract the key information from the following text: 张华在2023年5月获得了诺贝尔奖"
        );
    }
}
