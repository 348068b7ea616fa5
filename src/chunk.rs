//! Overlapping character-window chunker.
//!
//! Splits page text into chunks of at most `chunk_size` characters, with
//! consecutive chunks sharing exactly `overlap` characters so information
//! at a boundary is never lost. Breaks prefer whitespace when one exists
//! inside the window; otherwise the split is mid-word at the hard limit.
//!
//! Each chunk receives a v4 UUID, a SHA-256 hash of its text for staleness
//! detection, the source filename, and the page range it spans. Chunk
//! boundaries are a pure function of the input text and parameters.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{Chunk, Page};

/// Separator inserted between pages when concatenating a document's text.
const PAGE_SEPARATOR: &str = "\n\n";

/// Split a document's pages into overlapping chunks tagged with `source`.
///
/// Returns chunks with contiguous indices starting at 0. A document whose
/// extracted text is empty (e.g. a scanned PDF) yields no chunks.
pub fn chunk_pages(pages: &[Page], source: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    assert!(overlap < chunk_size, "overlap must be < chunk_size");

    // Concatenate pages, remembering each page's character range so chunks
    // can be attributed back to the pages they span.
    let mut text: Vec<char> = Vec::new();
    let mut page_ends: Vec<(usize, usize)> = Vec::new(); // (end offset, page index)

    for (i, page) in pages.iter().enumerate() {
        if i > 0 {
            text.extend(PAGE_SEPARATOR.chars());
        }
        text.extend(page.text.chars());
        page_ends.push((text.len(), page.index));
    }

    if text.iter().all(|c| c.is_whitespace()) {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut chunk_index: i64 = 0;

    loop {
        let hard_end = (start + chunk_size).min(text.len());

        // Prefer the last whitespace inside the window, but only if breaking
        // there still advances past the overlap region of this chunk.
        let end = if hard_end < text.len() {
            text[start..hard_end]
                .iter()
                .rposition(|c| c.is_whitespace())
                .map(|pos| start + pos + 1)
                .filter(|&e| e > start + overlap)
                .unwrap_or(hard_end)
        } else {
            hard_end
        };

        let chunk_text: String = text[start..end].iter().collect();
        let pages_span = page_span(&page_ends, start, end);
        chunks.push(make_chunk(source, chunk_index, &chunk_text, pages_span));
        chunk_index += 1;

        if end >= text.len() {
            break;
        }
        start = end - overlap;
    }

    chunks
}

/// Inclusive page range covered by the character range `[start, end)`.
fn page_span(page_ends: &[(usize, usize)], start: usize, end: usize) -> (usize, usize) {
    let page_of = |offset: usize| {
        page_ends
            .iter()
            .find(|(page_end, _)| offset < *page_end)
            .map(|(_, index)| *index)
            .unwrap_or_else(|| page_ends.last().map(|(_, i)| *i).unwrap_or(0))
    };
    (page_of(start), page_of(end.saturating_sub(1)))
}

fn make_chunk(source: &str, index: i64, text: &str, pages: (usize, usize)) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        source: source.to_string(),
        chunk_index: index,
        text: text.to_string(),
        pages,
        hash,
    }
}
