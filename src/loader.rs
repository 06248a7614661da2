//! Plain-text document loading.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::splitter::RecursiveCharacterTextSplitter;

/// Where a piece of text came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Path of the source file as given by the caller.
    pub source: String,
    /// Zero-based chunk index; `None` for an unsplit document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
    /// Character offset of the chunk in the source text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_index: Option<usize>,
}

/// A unit of text handed to a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub page_content: String,
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn new(page_content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            page_content: page_content.into(),
            metadata: DocumentMetadata {
                source: source.into(),
                ..Default::default()
            },
        }
    }

    /// Length of the content in characters.
    pub fn char_len(&self) -> usize {
        self.page_content.chars().count()
    }
}

/// Read `path` into a single [`Document`].
///
/// Invalid UTF-8 sequences are replaced with U+FFFD rather than failing, so
/// text exported from legacy encodings still produces chunks.
pub fn load_text(path: impl AsRef<Path>) -> Result<Document> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let content = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            tracing::warn!(path = %path.display(), "input is not valid UTF-8; decoding lossily");
            String::from_utf8_lossy(err.as_bytes()).into_owned()
        }
    };
    tracing::debug!(path = %path.display(), chars = content.chars().count(), "loaded document");
    Ok(Document::new(content, path.display().to_string()))
}

/// Load `path` and split it into chunk documents.
pub fn load_and_split(
    path: impl AsRef<Path>,
    splitter: &RecursiveCharacterTextSplitter,
) -> Result<Vec<Document>> {
    let document = load_text(path)?;
    Ok(splitter.split_documents(std::slice::from_ref(&document)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use std::io::Write;

    #[test]
    fn loads_utf8_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "细胞理论\n\n日心说").unwrap();

        let doc = load_text(file.path()).unwrap();
        assert_eq!(doc.page_content, "细胞理论\n\n日心说");
        assert_eq!(doc.char_len(), 9);
        assert_eq!(doc.metadata.source, file.path().display().to_string());
        assert_eq!(doc.metadata.chunk_index, None);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"ok \xff\xfe end").unwrap();

        let doc = load_text(file.path()).unwrap();
        assert!(doc.page_content.starts_with("ok "));
        assert!(doc.page_content.ends_with(" end"));
        assert!(doc.page_content.contains('\u{FFFD}'));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_text(dir.path().join("absent.txt")).unwrap_err();
        assert!(matches!(err, TaskError::Io(_)));
    }

    #[test]
    fn load_and_split_numbers_chunks() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "aaaa\n\nbbbb\n\ncccc").unwrap();

        let splitter = RecursiveCharacterTextSplitter::new(5, 0).unwrap();
        let chunks = load_and_split(file.path(), &splitter).unwrap();
        let contents: Vec<&str> = chunks.iter().map(|c| c.page_content.as_str()).collect();
        assert_eq!(contents, vec!["aaaa", "bbbb", "cccc"]);
        assert_eq!(chunks[2].metadata.chunk_index, Some(2));
        assert_eq!(chunks[1].metadata.start_index, Some(6));
    }

    #[test]
    fn metadata_omits_unset_chunk_fields() {
        let doc = Document::new("x", "a.txt");
        let json = serde_json::to_string(&doc).unwrap();
        assert_eq!(json, r#"{"page_content":"x","metadata":{"source":"a.txt"}}"#);
    }
}
