//! Paragraph-boundary text chunker.
//!
//! Splits ingested text into [`Chunk`]s of at most `max_chars` characters.
//! Paragraphs (separated by blank lines) are packed together while they
//! fit; a paragraph longer than the limit is hard-split at the last newline
//! or space before the limit. Lengths count Unicode scalar values, so cuts
//! never land inside a multibyte character.
//!
//! Positions run contiguously from 0 across all records passed in one call,
//! which the sync coordinator makes once per source file.

use crate::models::{Chunk, IngestedText};

/// Chunks every record, numbering positions per source file.
pub fn chunk_records(records: &[IngestedText], max_chars: usize) -> Vec<Chunk> {
    let mut chunks: Vec<Chunk> = Vec::new();
    for record in records {
        let start = chunks
            .iter()
            .rev()
            .find(|c| c.source == record.source)
            .map(|c| c.position + 1)
            .unwrap_or(0);
        for (offset, text) in split_text(&record.text, max_chars).into_iter().enumerate() {
            chunks.push(Chunk {
                text,
                source: record.source.clone(),
                position: start + offset,
            });
        }
    }
    chunks
}

/// Splits text into pieces of at most `max_chars` characters.
/// Blank input yields no pieces.
pub fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut pieces = Vec::new();
    let mut current_buf = String::new();
    let mut current_len = 0usize;

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }
        let para_len = trimmed.chars().count();

        // If adding this paragraph would exceed max, flush current buffer
        let would_be = if current_buf.is_empty() {
            para_len
        } else {
            current_len + 2 + para_len // +2 for \n\n separator
        };

        if would_be > max_chars && !current_buf.is_empty() {
            pieces.push(std::mem::take(&mut current_buf));
            current_len = 0;
        }

        if para_len > max_chars {
            hard_split(trimmed, max_chars, &mut pieces);
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
                current_len += 2;
            }
            current_buf.push_str(trimmed);
            current_len += para_len;
        }
    }

    if !current_buf.is_empty() {
        pieces.push(current_buf);
    }

    pieces
}

fn hard_split(paragraph: &str, max_chars: usize, pieces: &mut Vec<String>) {
    let mut remaining = paragraph;
    while !remaining.is_empty() {
        // Byte offset of the max_chars-th character, or the whole remainder
        let limit = remaining
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(remaining.len());

        let cut = if limit < remaining.len() {
            remaining[..limit]
                .rfind('\n')
                .or_else(|| remaining[..limit].rfind(' '))
                .map(|pos| pos + 1)
                .unwrap_or(limit)
        } else {
            limit
        };

        let piece = remaining[..cut].trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        remaining = remaining[cut..].trim_start();
    }
}
