//! JSON extraction from model replies.
//!
//! Models wrap JSON in prose, fence it in markdown, prefix it with a
//! `<think>` block, or stop mid-array when they run out of tokens.
//! [`JsonOutputParser`] tries, in order:
//!
//! 1. the whole reply (after stripping think blocks);
//! 2. the body of a ```` ```json ```` fence (or the first fence);
//! 3. every region opened by a `[` or `{`, longest first. A balanced opener
//!    contributes its balanced region; one that never closes contributes
//!    everything after it, for replies cut off mid-structure.
//!
//! Longest-first keeps a short aside such as a `[1]` citation from winning
//! over the payload that follows it. Each candidate that fails to parse is
//! passed through [`repair_json`] before moving on.

use serde_json::Value;

use crate::error::{truncate, Result, TaskError};
use crate::output_parser::extract::{bracketed_at, fenced_block, strip_think_tags};
use crate::output_parser::repair::repair_json;
use crate::output_parser::OutputParser;

/// Parses a reply into a [`serde_json::Value`].
///
/// ```
/// use llm_tasks::output_parser::{JsonOutputParser, OutputParser};
///
/// let reply = "<think>ok</think>Here:\n```json\n[{\"instruction\": \"q\"}]\n```";
/// let value = JsonOutputParser.parse(reply).unwrap();
/// assert_eq!(value[0]["instruction"], "q");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonOutputParser;

impl OutputParser for JsonOutputParser {
    type Output = Value;

    fn parse(&self, text: &str) -> Result<Value> {
        let cleaned = strip_think_tags(text);
        let cleaned = cleaned.trim();
        if cleaned.is_empty() {
            return Err(TaskError::Parse {
                expected: "JSON",
                text: "<empty reply>".to_string(),
            });
        }

        for candidate in candidates(cleaned) {
            if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                return Ok(value);
            }
            if let Some(repaired) = repair_json(candidate) {
                if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
                    tracing::debug!(chars = candidate.chars().count(), "repaired malformed JSON");
                    return Ok(value);
                }
            }
        }

        Err(TaskError::Parse {
            expected: "JSON",
            text: truncate(cleaned, 200),
        })
    }
}

/// Regions of `text` worth trying, in order.
fn candidates(text: &str) -> Vec<&str> {
    let mut out = vec![text];
    if let Some(block) = fenced_block(text, "json") {
        out.push(block);
    }

    let scope = out.last().copied().unwrap_or(text);
    let mut regions: Vec<&str> = scope
        .char_indices()
        .filter_map(|(start, ch)| {
            let tail = &scope[start..];
            match ch {
                '[' => Some(bracketed_at(tail, '[', ']').unwrap_or(tail)),
                '{' => Some(bracketed_at(tail, '{', '}').unwrap_or(tail)),
                _ => None,
            }
        })
        .collect();
    // Stable: equal lengths keep their position order.
    regions.sort_by_key(|region| std::cmp::Reverse(region.len()));
    for region in regions {
        if !out.contains(&region) {
            out.push(region);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn parses_plain_json() {
        let value = JsonOutputParser.parse(r#"{"a": 1}"#).unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn parses_prose_wrapped_array() {
        let reply = r#"好的，结果如下：[{"instruction": "问", "input": "", "output": "答"}] 希望有帮助"#;
        let value = JsonOutputParser.parse(reply).unwrap();
        assert_eq!(value, json!([{"instruction": "问", "input": "", "output": "答"}]));
    }

    #[test]
    fn outer_object_wins_over_inner_array() {
        let reply = r#"Answer: {"qas": [{"instruction": "q", "output": "a"}]}"#;
        let value = JsonOutputParser.parse(reply).unwrap();
        assert!(value.get("qas").is_some());
    }

    #[test]
    fn citation_before_payload_does_not_win() {
        let reply = r#"根据原文[1]整理如下：[{"instruction": "q1", "input": "", "output": "a1"}, {"instruction": "q2", "input": "", "output": "a2"}]"#;
        let value = JsonOutputParser.parse(reply).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 2);
        assert_eq!(value[1]["instruction"], "q2");
    }

    #[test]
    fn citation_before_truncated_payload_is_repaired() {
        let reply = r#"见[2]：[{"instruction": "q1", "output": "a1"}, {"instruction": "q2", "output": "a"#;
        let value = JsonOutputParser.parse(reply).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 2);
        assert_eq!(value[0]["output"], "a1");
    }

    #[test]
    fn fenced_block_with_think_prefix() {
        let reply = "<think>draft [1]</think>\n```json\n{\"ok\": true}\n```";
        assert_eq!(JsonOutputParser.parse(reply).unwrap(), json!({"ok": true}));
    }

    #[test]
    fn repairs_truncated_reply() {
        let reply = "```json\n[{\"instruction\": \"q1\", \"output\": \"a1\"}, {\"instruction\": \"q2\", \"output\": \"a";
        let value = JsonOutputParser.parse(reply).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 2);
        assert_eq!(value[1]["output"], "a");
    }

    #[test]
    fn repairs_trailing_comma_inside_prose() {
        let reply = r#"Sure! [{"instruction": "q", "output": "a"},] Done."#;
        let value = JsonOutputParser.parse(reply).unwrap();
        assert_eq!(value, json!([{"instruction": "q", "output": "a"}]));
    }

    #[test]
    fn prose_is_a_parse_error() {
        let err = JsonOutputParser.parse("I could not find any questions.").unwrap_err();
        assert!(matches!(err, TaskError::Parse { expected: "JSON", .. }));
    }

    #[test]
    fn empty_reply_is_a_parse_error() {
        let err = JsonOutputParser.parse("<think>...</think>  ").unwrap_err();
        assert!(matches!(err, TaskError::Parse { .. }));
    }
}
