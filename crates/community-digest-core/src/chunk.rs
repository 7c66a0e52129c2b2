//! Deterministic paragraph-boundary chunker.
//!
//! Splits a document's text into [`Chunk`]s no longer than a character
//! budget derived from `max_tokens` (4 chars ≈ 1 token). Paragraphs
//! (`\n\n`-separated) are packed greedily; a paragraph that alone exceeds
//! the budget is hard-split at the last newline or space before the limit.
//!
//! Chunk ids are UUIDv5 values of `(document_id, index)`, so chunking the
//! same document twice yields the same ids. The vector store relies on this
//! to turn a repeated write into an overwrite.
//!
//! ```rust
//! use community_digest_core::chunk::chunk_text;
//!
//! let a = chunk_text("doc-1", "Hello.\n\nWorld.", 256);
//! let b = chunk_text("doc-1", "Hello.\n\nWorld.", 256);
//! assert_eq!(a.len(), 1);
//! assert_eq!(a[0].id, b[0].id);
//! ```

use sha2::{Digest, Sha256};

use crate::models::{stable_id, Chunk};

const CHARS_PER_TOKEN: usize = 4;

/// Split `text` into chunks with contiguous indices starting at 0.
///
/// Always returns at least one chunk, even for empty input.
pub fn chunk_text(document_id: &str, text: &str, max_tokens: usize) -> Vec<Chunk> {
    let mut chunker = Chunker::new(document_id, max_tokens.max(1) * CHARS_PER_TOKEN);

    for paragraph in text.split("\n\n").map(str::trim) {
        if paragraph.is_empty() {
            continue;
        }
        if paragraph.len() > chunker.max_chars {
            chunker.flush();
            chunker.hard_split(paragraph);
        } else {
            chunker.push_paragraph(paragraph);
        }
    }
    chunker.finish(text.trim())
}

struct Chunker<'a> {
    document_id: &'a str,
    max_chars: usize,
    buf: String,
    out: Vec<Chunk>,
}

impl<'a> Chunker<'a> {
    fn new(document_id: &'a str, max_chars: usize) -> Self {
        Self {
            document_id,
            max_chars,
            buf: String::new(),
            out: Vec::new(),
        }
    }

    fn push_paragraph(&mut self, paragraph: &str) {
        if !self.buf.is_empty() && self.buf.len() + 2 + paragraph.len() > self.max_chars {
            self.flush();
        }
        if !self.buf.is_empty() {
            self.buf.push_str("\n\n");
        }
        self.buf.push_str(paragraph);
    }

    fn hard_split(&mut self, mut rest: &str) {
        while !rest.is_empty() {
            let cut = split_point(rest, self.max_chars);
            let piece = rest[..cut].trim();
            if !piece.is_empty() {
                self.emit(piece);
            }
            rest = &rest[cut..];
        }
    }

    fn flush(&mut self) {
        if !self.buf.is_empty() {
            let text = std::mem::take(&mut self.buf);
            self.emit(&text);
        }
    }

    fn emit(&mut self, text: &str) {
        let index = self.out.len() as i64;
        self.out.push(make_chunk(self.document_id, index, text));
    }

    fn finish(mut self, fallback: &str) -> Vec<Chunk> {
        self.flush();
        if self.out.is_empty() {
            self.emit(fallback);
        }
        self.out
    }
}

/// Byte offset at which to cut `s` so the head fits in `max_chars`.
///
/// Prefers the position just after the last newline or space, never cuts
/// inside a UTF-8 sequence, and always makes progress.
fn split_point(s: &str, max_chars: usize) -> usize {
    if s.len() <= max_chars {
        return s.len();
    }
    let mut limit = max_chars;
    while limit > 0 && !s.is_char_boundary(limit) {
        limit -= 1;
    }
    if limit == 0 {
        return s.chars().next().map(char::len_utf8).unwrap_or(s.len());
    }
    s[..limit]
        .rfind(['\n', ' '])
        .map(|pos| pos + 1)
        .unwrap_or(limit)
}

fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    Chunk {
        id: stable_id(&[document_id, &index.to_string()]),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash: hash_text(text),
    }
}

/// Hex SHA-256 of a chunk's text.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
