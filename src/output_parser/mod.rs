//! Output parsers turn raw model text into task values.
//!
//! | Parser | Output |
//! |--------|--------|
//! | [`StrOutputParser`] | the reply text, unchanged |
//! | [`JsonOutputParser`] | a `serde_json::Value` recovered from fenced, prose-wrapped or slightly broken JSON |
//! | [`ExtractedInfoParser`](crate::tasks::extraction::ExtractedInfoParser) | labeled `person`/`action`/`object`/`date` fields |

pub mod extract;
pub mod json;
pub mod repair;

pub use extract::{bracketed_at, fenced_block, strip_think_tags};
pub use json::JsonOutputParser;
pub use repair::repair_json;

use crate::error::Result;

/// Converts model text into a typed value.
pub trait OutputParser: Send + Sync {
    type Output;

    fn parse(&self, text: &str) -> Result<Self::Output>;
}

/// Passes the model text through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrOutputParser;

impl OutputParser for StrOutputParser {
    type Output = String;

    fn parse(&self, text: &str) -> Result<String> {
        Ok(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn str_parser_is_identity() {
        let text = "  我/r 爱/v 自然语言处理/n\n";
        assert_eq!(StrOutputParser.parse(text).unwrap(), text);
    }

    #[test]
    fn str_parser_accepts_empty_text() {
        assert_eq!(StrOutputParser.parse("").unwrap(), "");
    }
}
