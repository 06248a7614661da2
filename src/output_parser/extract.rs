//! Locating the payload inside chatty model output.

/// Remove `<think>...</think>` and `<thinking>...</thinking>` blocks.
///
/// An unclosed block swallows the rest of the text.
///
/// ```
/// use llm_tasks::output_parser::strip_think_tags;
///
/// assert_eq!(strip_think_tags("<think>hmm</think>[1]"), "[1]");
/// assert_eq!(strip_think_tags("[1]<thinking>cut"), "[1]");
/// ```
pub fn strip_think_tags(text: &str) -> String {
    let once = strip_tag(text, "<think>", "</think>");
    strip_tag(&once, "<thinking>", "</thinking>")
}

fn strip_tag(text: &str, open: &str, close: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(open) {
        out.push_str(&rest[..start]);
        match rest[start..].find(close) {
            Some(end) => rest = &rest[start + end + close.len()..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

/// Body of the first fenced code block, preferring one tagged `lang`.
///
/// ```
/// use llm_tasks::output_parser::fenced_block;
///
/// let text = "Result:\n```json\n[{\"a\": 1}]\n```\nDone.";
/// assert_eq!(fenced_block(text, "json"), Some("[{\"a\": 1}]"));
/// ```
pub fn fenced_block<'a>(text: &'a str, lang: &str) -> Option<&'a str> {
    let blocks = fenced_blocks(text);
    blocks
        .iter()
        .find(|(tag, _)| tag.eq_ignore_ascii_case(lang))
        .or_else(|| blocks.first())
        .map(|(_, body)| *body)
}

/// All complete ``` fenced blocks as `(language tag, trimmed body)`.
fn fenced_blocks(text: &str) -> Vec<(&str, &str)> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        let Some(line_end) = after.find('\n') else {
            break;
        };
        let tag = after[..line_end].trim();
        let body_start = &after[line_end + 1..];
        let Some(close) = body_start.find("```") else {
            break;
        };
        blocks.push((tag, body_start[..close].trim()));
        rest = &body_start[close + 3..];
    }
    blocks
}

/// The balanced region opened by the first character of `text`, skipping
/// delimiters inside JSON strings. `None` when `text` does not start with
/// `open` or never closes it.
///
/// ```
/// use llm_tasks::output_parser::bracketed_at;
///
/// let text = r#"[{"instruction": "a]b"}] enjoy"#;
/// assert_eq!(bracketed_at(text, '[', ']'), Some(r#"[{"instruction": "a]b"}]"#));
/// ```
pub fn bracketed_at(text: &str, open: char, close: char) -> Option<&str> {
    if !text.starts_with(open) {
        return None;
    }
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        if ch == '"' {
            in_string = true;
        } else if ch == open {
            depth += 1;
        } else if ch == close {
            depth -= 1;
            if depth == 0 {
                return Some(&text[..i + ch.len_utf8()]);
            }
        }
    }
    None
}
