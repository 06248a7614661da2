//! Recursive character text splitting.
//!
//! [`RecursiveCharacterTextSplitter`] tries a list of separators from coarse
//! to fine (`"\n\n"`, `"\n"`, `" "`, `""`). Text is split on the first
//! separator it contains; small pieces are merged greedily into chunks of at
//! most `chunk_size` characters, carrying up to `chunk_overlap` characters
//! into the next chunk. Pieces that are still too long are split again with
//! the remaining separators. The empty separator splits into characters.
//!
//! Lengths are measured in characters, not bytes.

use crate::error::{Result, TaskError};
use crate::loader::{Document, DocumentMetadata};

pub const DEFAULT_CHUNK_SIZE: usize = 2048;
pub const DEFAULT_CHUNK_OVERLAP: usize = 128;
pub const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Splits long text into overlapping chunks.
///
/// ```
/// use llm_tasks::splitter::RecursiveCharacterTextSplitter;
///
/// let splitter = RecursiveCharacterTextSplitter::new(10, 4).unwrap();
/// let chunks = splitter.split_text("one two three four five");
/// assert_eq!(chunks, vec!["one two", "two three", "four five"]);
/// ```
#[derive(Debug, Clone)]
pub struct RecursiveCharacterTextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
    keep_separator: bool,
}

impl Default for RecursiveCharacterTextSplitter {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
            keep_separator: true,
        }
    }
}

impl RecursiveCharacterTextSplitter {
    /// Fails when `chunk_size` is zero or `chunk_overlap` exceeds it.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(TaskError::InvalidConfig("chunk size must be positive".into()));
        }
        if chunk_overlap > chunk_size {
            return Err(TaskError::InvalidConfig(format!(
                "chunk overlap ({chunk_overlap}) is larger than chunk size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            ..Self::default()
        })
    }

    pub fn with_separators<S: Into<String>>(mut self, separators: impl IntoIterator<Item = S>) -> Self {
        self.separators = separators.into_iter().map(Into::into).collect();
        self
    }

    /// Keep each separator at the start of the piece that follows it
    /// (default), or drop separators and rejoin pieces with them.
    pub fn with_keep_separator(mut self, keep: bool) -> Self {
        self.keep_separator = keep;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split `text` into trimmed, non-empty chunks.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        let separators: Vec<&str> = self.separators.iter().map(String::as_str).collect();
        self.split_recursive(text, &separators)
    }

    /// Split every document, recording chunk index and character offset.
    pub fn split_documents(&self, documents: &[Document]) -> Vec<Document> {
        let mut out = Vec::new();
        for doc in documents {
            let text = &doc.page_content;
            let mut search_from = 0usize;
            for (index, chunk) in self.split_text(text).into_iter().enumerate() {
                let start_index = text[search_from..].find(chunk.as_str()).map(|found| {
                    let byte_start = search_from + found;
                    search_from = byte_start + chunk.chars().next().map_or(0, char::len_utf8);
                    text[..byte_start].chars().count()
                });
                out.push(Document {
                    page_content: chunk,
                    metadata: DocumentMetadata {
                        source: doc.metadata.source.clone(),
                        chunk_index: Some(index),
                        start_index,
                    },
                });
            }
        }
        tracing::debug!(documents = documents.len(), chunks = out.len(), "split documents");
        out
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let mut separator = separators.last().copied().unwrap_or("");
        let mut remaining: &[&str] = &[];
        for (i, &sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                separator = sep;
                break;
            }
            if text.contains(sep) {
                separator = sep;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let joiner = if self.keep_separator { "" } else { separator };
        let mut chunks = Vec::new();
        let mut small: Vec<&str> = Vec::new();

        for piece in split_on(text, separator, self.keep_separator) {
            if char_len(piece) < self.chunk_size {
                small.push(piece);
                continue;
            }
            if !small.is_empty() {
                chunks.extend(self.merge(&small, joiner));
                small.clear();
            }
            if remaining.is_empty() {
                chunks.push(piece.trim().to_string());
            } else {
                chunks.extend(self.split_recursive(piece, remaining));
            }
        }
        if !small.is_empty() {
            chunks.extend(self.merge(&small, joiner));
        }
        chunks.retain(|c| !c.is_empty());
        chunks
    }

    /// Greedily pack `pieces` into chunks, keeping a tail of at most
    /// `chunk_overlap` characters as the start of the next chunk.
    fn merge(&self, pieces: &[&str], joiner: &str) -> Vec<String> {
        let joiner_len = char_len(joiner);
        let mut chunks = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            let gap = |current: &[&str]| if current.is_empty() { 0 } else { joiner_len };
            if total + len + gap(&current) > self.chunk_size {
                if total > self.chunk_size {
                    tracing::warn!(
                        chars = total,
                        chunk_size = self.chunk_size,
                        "created a chunk longer than the chunk size"
                    );
                }
                if !current.is_empty() {
                    push_joined(&mut chunks, &current, joiner);
                    while total > self.chunk_overlap
                        || (total > 0 && total + len + gap(&current) > self.chunk_size)
                    {
                        if current.is_empty() {
                            break;
                        }
                        let dropped = current.remove(0);
                        total -= char_len(dropped) + gap(&current);
                    }
                }
            }
            total += len + gap(&current);
            current.push(piece);
        }
        push_joined(&mut chunks, &current, joiner);
        chunks
    }
}

fn push_joined(chunks: &mut Vec<String>, pieces: &[&str], joiner: &str) {
    let joined = pieces.join(joiner);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

/// Split on `separator`; with `keep`, each separator stays attached to the
/// start of the piece after it. Empty pieces are dropped.
fn split_on<'a>(text: &'a str, separator: &str, keep: bool) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }
    if !keep {
        return text.split(separator).filter(|s| !s.is_empty()).collect();
    }
    let mut pieces = Vec::new();
    let mut start = 0;
    for (at, _) in text.match_indices(separator) {
        pieces.push(&text[start..at]);
        start = at;
    }
    pieces.push(&text[start..]);
    pieces.retain(|p| !p.is_empty());
    pieces
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
