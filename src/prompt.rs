//! Chat prompt templates.
//!
//! A [`PromptTemplate`] is an ordered list of `(role, template)` pairs.
//! Templates use `{name}` placeholders filled from [`PromptVars`]; `{{` and
//! `}}` render as literal braces, so JSON examples can be embedded directly.

use crate::backend::{ChatMessage, Role};
use crate::error::{Result, TaskError};
use std::collections::HashMap;

/// Values substituted into `{name}` placeholders.
#[derive(Debug, Clone, Default)]
pub struct PromptVars {
    data: HashMap<String, String>,
}

impl PromptVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(|s| s.as_str())
    }
}

/// Shorthand for the common single-variable case.
impl From<(&str, &str)> for PromptVars {
    fn from((key, value): (&str, &str)) -> Self {
        PromptVars::new().insert(key, value)
    }
}

/// One piece of a parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Var(String),
}

#[derive(Debug, Clone)]
struct MessageTemplate {
    role: Role,
    segments: Vec<Segment>,
}

/// Ordered chat message templates.
///
/// ```
/// use llm_tasks::prompt::{PromptTemplate, PromptVars};
///
/// let prompt = PromptTemplate::from_template("Output {{\"k\": \"{text}\"}}");
/// let messages = prompt.format_messages(&PromptVars::new().insert("text", "v")).unwrap();
/// assert_eq!(messages[0].content, r#"Output {"k": "v"}"#);
/// ```
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    messages: Vec<MessageTemplate>,
}

impl PromptTemplate {
    /// A single user message.
    pub fn from_template(template: &str) -> Self {
        Self::from_messages([(Role::User, template)])
    }

    pub fn from_messages<'a>(messages: impl IntoIterator<Item = (Role, &'a str)>) -> Self {
        Self {
            messages: messages
                .into_iter()
                .map(|(role, template)| MessageTemplate {
                    role,
                    segments: parse_segments(template),
                })
                .collect(),
        }
    }

    /// Placeholder names in order of first appearance.
    pub fn input_variables(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for message in &self.messages {
            for segment in &message.segments {
                if let Segment::Var(name) = segment {
                    if !names.contains(&name.as_str()) {
                        names.push(name);
                    }
                }
            }
        }
        names
    }

    /// Render every message. Fails on the first placeholder without a value.
    pub fn format_messages(&self, vars: &PromptVars) -> Result<Vec<ChatMessage>> {
        self.messages
            .iter()
            .map(|m| {
                let mut content = String::new();
                for segment in &m.segments {
                    match segment {
                        Segment::Literal(text) => content.push_str(text),
                        Segment::Var(name) => content.push_str(
                            vars.get(name)
                                .ok_or_else(|| TaskError::MissingVariable(name.clone()))?,
                        ),
                    }
                }
                Ok(ChatMessage::new(m.role, content))
            })
            .collect()
    }
}

/// Split a template into literal text and `{name}` placeholders.
///
/// A `{` that does not open a well-formed placeholder (identifier characters
/// followed by `}`) is kept as literal text.
fn parse_segments(template: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = template;

    while let Some(ch) = rest.chars().next() {
        if rest.starts_with("{{") {
            literal.push('{');
            rest = &rest[2..];
        } else if rest.starts_with("}}") {
            literal.push('}');
            rest = &rest[2..];
        } else if ch == '{' {
            match placeholder_name(&rest[1..]) {
                Some(name) => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Var(name.to_string()));
                    rest = &rest[name.len() + 2..];
                }
                None => {
                    literal.push('{');
                    rest = &rest[1..];
                }
            }
        } else {
            literal.push(ch);
            rest = &rest[ch.len_utf8()..];
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    segments
}

fn placeholder_name(after_brace: &str) -> Option<&str> {
    let end = after_brace.find('}')?;
    let name = &after_brace[..end];
    let valid = !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_');
    valid.then_some(name)
}
