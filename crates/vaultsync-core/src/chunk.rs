//! Token-bounded chunker.
//!
//! Packs a normalized document body into [`Chunk`]s of at most
//! `max_tokens` tokens, counted with a [`TokenCounter`].
//!
//! # Algorithm
//!
//! 1. Split the body on blank lines (`\n\n`) and skip empty paragraphs.
//! 2. Append each paragraph to the current buffer, joined by a blank
//!    line, while the joined text stays within budget. Otherwise flush the
//!    buffer and start a new one with the paragraph.
//! 3. A paragraph that alone exceeds the budget flushes the buffer and is
//!    split into sentences (terminated by `.`, `!`, `?`), which are packed
//!    the same way, joined by a space. A sentence that alone exceeds the
//!    budget is packed word by word. Whatever is left stays in the buffer
//!    for the next paragraph.
//! 4. Flush the final buffer.
//!
//! Only a single word longer than the budget can produce an oversized
//! chunk. Joining chunk contents reproduces the body up to whitespace.
//!
//! # Example
//!
//! ```rust
//! use vaultsync_core::chunk::chunk_document;
//! use vaultsync_core::normalize::normalize;
//! use vaultsync_core::tokenize::TokenCounter;
//!
//! let counter = TokenCounter::approximate();
//! let doc = normalize("a.md", "Hello world.\n\nSecond paragraph.", &counter).unwrap();
//! let chunks = chunk_document(&doc, 500, &counter);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].index, 0);
//! ```

use serde_json::Value;

use crate::models::{Chunk, Document, Metadata};
use crate::tokenize::TokenCounter;

/// Split a document body into chunks of at most `max_tokens` tokens.
///
/// An empty body yields no chunks. `max_tokens` of zero is treated as one.
pub fn chunk_document(doc: &Document, max_tokens: usize, counter: &TokenCounter) -> Vec<Chunk> {
    let pieces = pack_text(&doc.body, max_tokens.max(1), counter);
    let metadata = chunk_metadata(doc);

    pieces
        .into_iter()
        .enumerate()
        .map(|(index, content)| Chunk {
            path: doc.path.clone(),
            title: doc.title.clone(),
            index,
            content,
            metadata: metadata.clone(),
        })
        .collect()
}

/// Front matter overlaid with the document's derived fields.
///
/// `tags`, `links`, `created_at` and `modified_at` always take the derived
/// value, even when the front matter has a key of the same name.
fn chunk_metadata(doc: &Document) -> Metadata {
    let mut metadata = doc.metadata.clone();
    metadata.insert("tags".into(), string_array(&doc.tags));
    metadata.insert("links".into(), string_array(&doc.links));
    metadata.insert(
        "created_at".into(),
        doc.created_at
            .map(|dt| Value::String(dt.to_rfc3339()))
            .unwrap_or(Value::Null),
    );
    metadata.insert(
        "modified_at".into(),
        doc.modified_at
            .map(|dt| Value::String(dt.to_rfc3339()))
            .unwrap_or(Value::Null),
    );
    metadata
}

fn string_array(items: &[String]) -> Value {
    Value::Array(items.iter().cloned().map(Value::String).collect())
}

/// Greedy packing of `text` into token-bounded pieces.
pub fn pack_text(text: &str, max_tokens: usize, counter: &TokenCounter) -> Vec<String> {
    let mut packer = Packer::new(max_tokens, counter);

    for para in text.split("\n\n") {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }

        if counter.count(para) > max_tokens {
            packer.flush();
            for sentence in split_sentences(para) {
                if counter.count(sentence) > max_tokens {
                    for word in sentence.split_whitespace() {
                        packer.push(word, " ");
                    }
                } else {
                    packer.push(sentence, " ");
                }
            }
        } else {
            packer.push(para, "\n\n");
        }
    }

    packer.finish()
}

struct Packer<'a> {
    max_tokens: usize,
    counter: &'a TokenCounter,
    buf: String,
    out: Vec<String>,
}

impl<'a> Packer<'a> {
    fn new(max_tokens: usize, counter: &'a TokenCounter) -> Self {
        Self {
            max_tokens,
            counter,
            buf: String::new(),
            out: Vec::new(),
        }
    }

    /// Append `unit` to the buffer, flushing first if the joined text
    /// would exceed the budget.
    fn push(&mut self, unit: &str, sep: &str) {
        if self.buf.is_empty() {
            self.buf.push_str(unit);
            return;
        }
        let joined = format!("{}{}{}", self.buf, sep, unit);
        if self.counter.count(&joined) > self.max_tokens {
            self.flush();
            self.buf.push_str(unit);
        } else {
            self.buf = joined;
        }
    }

    fn flush(&mut self) {
        if !self.buf.trim().is_empty() {
            self.out.push(std::mem::take(&mut self.buf));
        } else {
            self.buf.clear();
        }
    }

    fn finish(mut self) -> Vec<String> {
        self.flush();
        self.out
    }
}

/// Split on runs of `.`, `!`, `?`, keeping the terminators.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !is_terminator(c) {
            continue;
        }
        let mut end = i + c.len_utf8();
        while let Some(&(j, next)) = chars.peek() {
            if !is_terminator(next) {
                break;
            }
            end = j + next.len_utf8();
            chars.next();
        }
        let sentence = text[start..end].trim();
        if !sentence.is_empty() {
            sentences.push(sentence);
        }
        start = end;
    }

    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;

    fn counter() -> TokenCounter {
        TokenCounter::approximate()
    }

    fn doc(body: &str) -> Document {
        normalize("notes/a.md", body, &counter()).unwrap()
    }

    fn squash(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    #[test]
    fn small_text_single_chunk() {
        let chunks = chunk_document(&doc("Hello, world!"), 500, &counter());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].content, "Hello, world!");
        assert_eq!(chunks[0].path, "notes/a.md");
        assert_eq!(chunks[0].title, "a");
    }

    #[test]
    fn empty_body_yields_no_chunks() {
        assert!(chunk_document(&doc(""), 500, &counter()).is_empty());
        assert!(chunk_document(&doc("\n\n  \n\n"), 500, &counter()).is_empty());
    }

    #[test]
    fn paragraphs_are_packed_together() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = chunk_document(&doc(text), 500, &counter());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, text);
    }

    #[test]
    fn paragraphs_split_when_budget_exceeded() {
        let text = "This is paragraph one.\n\nThis is paragraph two.\n\nThis is paragraph three.";
        let chunks = chunk_document(&doc(text), 6, &counter());
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
        }
    }

    #[test]
    fn long_paragraph_of_words_splits() {
        let body = vec!["word"; 300].join(" ");
        let chunks = chunk_document(&doc(&body), 10, &counter());
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(!c.content.trim().is_empty());
            assert!(counter().count(&c.content) <= 10);
        }
    }

    #[test]
    fn long_paragraph_splits_on_sentences() {
        let body = "Alpha beta gamma. Delta epsilon zeta! Eta theta iota? Kappa lambda mu.";
        let chunks = pack_text(body, 5, &counter());
        assert!(chunks.len() > 1);
        assert_eq!(chunks[0], "Alpha beta gamma.");
        assert!(chunks.iter().all(|c| counter().count(c) <= 5));
    }

    #[test]
    fn sentence_remainder_carries_into_next_paragraph() {
        let body = "One two three four. Five six.\n\nSeven.";
        let chunks = pack_text(body, 5, &counter());
        assert_eq!(chunks, vec!["One two three four.", "Five six.\n\nSeven."]);
    }

    #[test]
    fn budget_respected_except_for_single_words() {
        let body = format!(
            "Short intro.\n\n{}\n\n{}. Tail sentence here.",
            "supercalifragilisticexpialidocious",
            vec!["lorem ipsum dolor sit amet"; 20].join(", ")
        );
        let chunks = chunk_document(&doc(&body), 8, &counter());
        for c in &chunks {
            let tokens = counter().count(&c.content);
            assert!(
                tokens <= 8 || !c.content.contains(char::is_whitespace),
                "oversized chunk: {:?}",
                c.content
            );
        }
    }

    #[test]
    fn chunks_reconstruct_body() {
        let body = "# Title\n\nFirst paragraph with several words. Another sentence here!\n\n\
                    Second paragraph? Yes indeed.\n\nThird.";
        let d = doc(body);
        for max in [3, 5, 10, 500] {
            let chunks = chunk_document(&d, max, &counter());
            let joined: String = chunks.iter().map(|c| c.content.as_str()).collect();
            assert_eq!(squash(&joined), squash(&d.body), "max_tokens {max}");
        }
    }

    #[test]
    fn indices_contiguous() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_document(&doc(&text), 10, &counter());
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i, "index mismatch at position {}", i);
        }
    }

    #[test]
    fn multibyte_text() {
        let text = "┌──────────────────┐ │ Hello world │ └──────────────────┘ ünïcödé. Ça va?";
        let chunks = chunk_document(&doc(text), 3, &counter());
        assert!(!chunks.is_empty());
        let joined: String = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(squash(&joined), squash(text));
    }

    #[test]
    fn deterministic() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let a = chunk_document(&doc(text), 2, &counter());
        let b = chunk_document(&doc(text), 2, &counter());
        assert_eq!(a, b);
    }

    #[test]
    fn metadata_seeded_keys_win() {
        let raw = "---\ntags: [x]\nlinks: overwritten\ncreated: 2024-01-15\nauthor: me\n---\nBody [[Link]]";
        let chunks = chunk_document(&doc(raw), 500, &counter());
        let meta = &chunks[0].metadata;
        assert_eq!(meta["tags"], serde_json::json!(["x"]));
        assert_eq!(meta["links"], serde_json::json!(["Link"]));
        assert_eq!(meta["created_at"], "2024-01-15T00:00:00+00:00");
        assert_eq!(meta["modified_at"], Value::Null);
        assert_eq!(meta["author"], "me");
        assert_eq!(chunks[0].tags(), vec!["x"]);
    }

    #[test]
    fn sentence_splitting_keeps_terminators() {
        assert_eq!(
            split_sentences("Hi there. How are you?! Fine"),
            vec!["Hi there.", "How are you?!", "Fine"]
        );
        assert!(split_sentences("   ").is_empty());
    }
}
