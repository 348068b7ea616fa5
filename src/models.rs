//! Core data models used throughout docchat.
//!
//! These types represent the pages, chunks, and answers that flow through
//! the ingestion and question-answering pipeline.

use serde::Serialize;
use std::collections::HashSet;

/// One page of text extracted from an uploaded PDF.
#[derive(Debug, Clone)]
pub struct Page {
    /// Zero-based page index within the source document.
    pub index: usize,
    /// Extracted text with NUL characters stripped.
    pub text: String,
}

/// A bounded text span with provenance, the unit of embedding and retrieval.
///
/// Chunks are immutable once created. Consecutive chunks from the same
/// source share an overlap region so information at chunk boundaries is
/// not lost.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    /// Filename of the uploaded document this chunk came from.
    pub source: String,
    /// Position of this chunk within its source document.
    pub chunk_index: i64,
    pub text: String,
    /// Inclusive page range `(first, last)` the chunk text spans.
    pub pages: (usize, usize),
    /// SHA-256 of the chunk text.
    pub hash: String,
}

/// A chunk returned from the vector index, nearest-first.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub source: String,
    pub text: String,
    /// Cosine similarity to the query vector (higher is closer).
    pub score: f32,
}

/// One completed question/answer exchange within a session.
#[derive(Debug, Clone)]
pub struct Turn {
    pub question: String,
    pub answer: String,
}

/// A grounded answer plus the deduplicated set of source filenames
/// that contributed retrieved context.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub sources: HashSet<String>,
}
