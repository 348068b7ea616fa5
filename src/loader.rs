//! PDF document loading.
//!
//! Parses an uploaded PDF into page-level text units. Extracted text has
//! NUL characters stripped before it reaches the chunker: SQLite text
//! columns and model APIs mishandle embedded NULs.

use std::path::Path;

use crate::models::Page;

/// Failure to read or parse an uploaded document. Surfaced to the caller
/// as a client error, distinct from internal faults.
#[derive(Debug)]
pub enum LoadError {
    InvalidPdf(String),
    Io(String),
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::InvalidPdf(e) => write!(f, "PDF parsing failed: {}", e),
            LoadError::Io(e) => write!(f, "could not read file: {}", e),
        }
    }
}

impl std::error::Error for LoadError {}

/// Load a PDF from disk and return its pages plus the total page count.
pub fn load_pdf(path: &Path) -> Result<(Vec<Page>, usize), LoadError> {
    let bytes = std::fs::read(path).map_err(|e| LoadError::Io(e.to_string()))?;
    load_pdf_bytes(&bytes)
}

/// Parse PDF bytes into ordered [`Page`]s.
///
/// Page indices are contiguous from 0. Re-running on the same bytes yields
/// identical page text.
pub fn load_pdf_bytes(bytes: &[u8]) -> Result<(Vec<Page>, usize), LoadError> {
    let page_texts = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| LoadError::InvalidPdf(e.to_string()))?;

    let num_pages = page_texts.len();
    let pages: Vec<Page> = page_texts
        .into_iter()
        .enumerate()
        .map(|(index, text)| Page {
            index,
            text: strip_nul(&text),
        })
        .collect();

    Ok((pages, num_pages))
}

/// Remove NUL characters from extracted text.
fn strip_nul(text: &str) -> String {
    if text.contains('\0') {
        text.replace('\0', "")
    } else {
        text.to_string()
    }
}
