//! Chunk building
//!
//! The engine only depends on [`ChunkBuilder`]. [`ParagraphChunker`] is the
//! default: it packs paragraphs into chunks up to a character budget and
//! hard-splits paragraphs that are larger than the budget on their own.
//! Each chunk carries a context line built from the prefix tokens, the
//! document title and the nearest heading.

use crate::storage::ChunkDraft;
use sha2::{Digest, Sha256};

/// Default character budget per chunk
pub const DEFAULT_MAX_CHUNK_CHARS: usize = 2000;

/// Input handed to a chunk builder
#[derive(Debug, Clone, Copy)]
pub struct ChunkInput<'a> {
    pub content: &'a str,
    pub path: &'a str,
    pub title: &'a str,
    /// Tokens prepended to each chunk's context line, e.g. `[host]`
    pub prefix: &'a [String],
}

/// Splits a document into chunk drafts
pub trait ChunkBuilder: Send + Sync {
    fn build(&self, input: &ChunkInput<'_>) -> Vec<ChunkDraft>;
}

/// Paragraph-boundary chunker
#[derive(Debug, Clone)]
pub struct ParagraphChunker {
    max_chars: usize,
}

impl ParagraphChunker {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
        }
    }
}

impl Default for ParagraphChunker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHUNK_CHARS)
    }
}

/// Byte span of one block of text within the content
#[derive(Debug, Clone, Copy)]
struct Span {
    start: usize,
    end: usize,
}

impl ChunkBuilder for ParagraphChunker {
    fn build(&self, input: &ChunkInput<'_>) -> Vec<ChunkDraft> {
        let content = input.content;
        let mut spans: Vec<(Span, Option<String>)> = Vec::new();
        let mut heading: Option<String> = None;
        let mut current: Option<Span> = None;
        let mut current_heading: Option<String> = None;

        for para in paragraphs(content) {
            let text = &content[para.start..para.end];
            if let Some(h) = heading_text(text) {
                heading = Some(h);
            }

            let len = para.end - para.start;
            if len > self.max_chars {
                if let Some(span) = current.take() {
                    spans.push((span, current_heading.take()));
                }
                for piece in hard_split(content, para, self.max_chars) {
                    spans.push((piece, heading.clone()));
                }
                continue;
            }

            current = match current {
                Some(span) if para.end - span.start > self.max_chars => {
                    spans.push((span, current_heading.take()));
                    current_heading = heading.clone();
                    Some(para)
                }
                Some(span) => Some(Span {
                    start: span.start,
                    end: para.end,
                }),
                None => {
                    current_heading = heading.clone();
                    Some(para)
                }
            };
        }
        if let Some(span) = current {
            spans.push((span, current_heading));
        }

        spans
            .into_iter()
            .enumerate()
            .map(|(ordinal, (span, heading))| {
                let body = &content[span.start..span.end];
                let text = match context_line(input, heading.as_deref()) {
                    Some(context) => format!("{}\n\n{}", context, body),
                    None => body.to_string(),
                };
                ChunkDraft {
                    ordinal: ordinal as u32,
                    hash: hex::encode(Sha256::digest(text.as_bytes())),
                    text,
                    char_start: content[..span.start].chars().count(),
                    char_end: content[..span.end].chars().count(),
                    heading,
                }
            })
            .collect()
    }
}

/// Splits content on blank lines, returning trimmed byte spans
fn paragraphs(content: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut offset = 0;

    for part in content.split("\n\n") {
        let leading = part.len() - part.trim_start().len();
        let trimmed = part.trim();
        if !trimmed.is_empty() {
            let start = offset + leading;
            spans.push(Span {
                start,
                end: start + trimmed.len(),
            });
        }
        offset += part.len() + 2;
    }

    spans
}

/// Splits an oversized paragraph at newline or space boundaries
fn hard_split(content: &str, para: Span, max_chars: usize) -> Vec<Span> {
    let mut pieces = Vec::new();
    let mut start = para.start;

    while start < para.end {
        let remaining = &content[start..para.end];
        if remaining.len() <= max_chars {
            pieces.push(Span {
                start,
                end: para.end,
            });
            break;
        }

        let mut cut = max_chars;
        while !remaining.is_char_boundary(cut) {
            cut -= 1;
        }
        let window = &remaining[..cut];
        let split = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&pos| pos > 0)
            .unwrap_or(cut);
        // A single multibyte char wider than the budget still has to advance
        let split = if split == 0 {
            remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len())
        } else {
            split
        };

        let piece = &remaining[..split];
        let trimmed_end = start + piece.trim_end().len();
        if trimmed_end > start {
            pieces.push(Span {
                start,
                end: trimmed_end,
            });
        }
        start += split;
        start += content[start..para.end].len() - content[start..para.end].trim_start().len();
    }

    pieces
}

fn heading_text(paragraph: &str) -> Option<String> {
    let first = paragraph.lines().next()?.trim();
    if !first.starts_with('#') {
        return None;
    }
    let text = first.trim_start_matches('#').trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn context_line(input: &ChunkInput<'_>, heading: Option<&str>) -> Option<String> {
    let mut parts: Vec<String> = input.prefix.iter().map(|p| format!("[{}]", p)).collect();

    let mut trail = Vec::new();
    if !input.title.is_empty() {
        trail.push(input.title);
    }
    if let Some(h) = heading.filter(|h| *h != input.title) {
        trail.push(h);
    }
    if !trail.is_empty() {
        parts.push(trail.join(" > "));
    }

    (!parts.is_empty()).then(|| parts.join(" "))
}
