//! Best-effort repair of almost-JSON.
//!
//! Long generations commonly end mid-array when the model hits its token
//! limit, and Chinese answers often carry raw newlines inside string values.
//! A single scan fixes:
//!
//! - raw control characters inside strings (escaped);
//! - trailing commas before `}` or `]` (removed);
//! - unterminated strings and unclosed brackets at end of input (closed).

use serde_json::Value;

/// Repair `broken` and return the fixed text if it then parses.
///
/// Returns `None` when the input is already valid or cannot be rescued.
///
/// ```
/// use llm_tasks::output_parser::repair_json;
///
/// assert_eq!(repair_json(r#"[{"a": 1},]"#).as_deref(), Some(r#"[{"a": 1}]"#));
/// assert_eq!(repair_json(r#"[{"a": "cut"#).as_deref(), Some(r#"[{"a": "cut"}]"#));
/// assert_eq!(repair_json("[1]"), None);
/// ```
pub fn repair_json(broken: &str) -> Option<String> {
    if serde_json::from_str::<Value>(broken).is_ok() {
        return None;
    }
    let repaired = scan(broken.trim());
    serde_json::from_str::<Value>(&repaired).ok().map(|_| repaired)
}

fn scan(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 8);
    let mut closers: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for ch in input.chars() {
        if in_string {
            if escaped {
                escaped = false;
                out.push(ch);
                continue;
            }
            match ch {
                '\\' => {
                    escaped = true;
                    out.push(ch);
                }
                '"' => {
                    in_string = false;
                    out.push(ch);
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
                c => out.push(c),
            }
            continue;
        }

        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            }
            '{' => {
                closers.push('}');
                out.push(ch);
            }
            '[' => {
                closers.push(']');
                out.push(ch);
            }
            '}' | ']' => {
                drop_trailing_comma(&mut out);
                if closers.last() == Some(&ch) {
                    closers.pop();
                }
                out.push(ch);
            }
            c => out.push(c),
        }
    }

    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    }
    while let Some(closer) = closers.pop() {
        drop_trailing_comma(&mut out);
        if closer == '}' {
            drop_dangling_key(&mut out);
        }
        out.push(closer);
    }
    out
}

/// Remove a `,` (and trailing whitespace) at the end of `out`.
fn drop_trailing_comma(out: &mut String) {
    let trimmed_len = out.trim_end().len();
    if out[..trimmed_len].ends_with(',') {
        out.truncate(trimmed_len - 1);
    }
}

/// A truncated object may end in `"key":` or a bare `"key"` with no value;
/// drop the incomplete pair.
fn drop_dangling_key(out: &mut String) {
    let trimmed_len = out.trim_end().len();
    let head = &out[..trimmed_len];
    let key_end = match head.strip_suffix(':') {
        Some(before_colon) => before_colon.trim_end(),
        None => head,
    };
    if !key_end.ends_with('"') {
        return;
    }
    let Some(open) = opening_quote(&key_end[..key_end.len() - 1]) else {
        return;
    };
    let is_key = head.ends_with(':')
        || matches!(out[..open].trim_end().chars().last(), Some(',') | Some('{'));
    if is_key {
        out.truncate(open);
        drop_trailing_comma(out);
    }
}

/// Byte index of the last unescaped `"` in `s`.
fn opening_quote(s: &str) -> Option<usize> {
    s.char_indices()
        .rev()
        .find(|(i, c)| *c == '"' && !s[..*i].ends_with('\\'))
        .map(|(i, _)| i)
}
