//! End-to-end pipeline tests against the library API.
//!
//! Model capabilities are replaced with deterministic fakes so these
//! tests run offline: the embedder maps marker words to fixed vector
//! components, the chat model returns canned completions.

use anyhow::Result;
use async_trait::async_trait;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use docchat::chunk::chunk_pages;
use docchat::config::Config;
use docchat::embedding::Embedder;
use docchat::history::SessionStore;
use docchat::index::VectorIndex;
use docchat::llm::{ChatMessage, ChatModel};
use docchat::loader::load_pdf_bytes;
use docchat::models::Page;
use docchat::rag::RagService;

struct FakeEmbedder;

impl FakeEmbedder {
    fn vector_for(text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        vec![
            lower.matches("alpha").count() as f32,
            lower.matches("beta").count() as f32,
            lower.matches("gamma").count() as f32,
            1.0,
        ]
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
    }

    fn model_name(&self) -> &str {
        "fake-embedder"
    }

    fn dims(&self) -> usize {
        4
    }
}

struct FakeChat {
    calls: AtomicUsize,
    reply: String,
}

impl FakeChat {
    fn new(reply: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            reply: reply.to_string(),
        }
    }
}

#[async_trait]
impl ChatModel for FakeChat {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }
}

fn page(text: &str) -> Page {
    Page {
        index: 0,
        text: text.to_string(),
    }
}

/// Minimal valid PDF with one page per phrase, built with correct xref
/// byte offsets so pdf-extract can parse it.
///
/// Object layout: 1 catalog, 2 page tree, 3 shared font, then a
/// page/content object pair per phrase.
fn minimal_pdf(pages: &[&str]) -> Vec<u8> {
    let n = pages.len();
    let mut out = Vec::new();
    let mut offsets = Vec::with_capacity(3 + 2 * n);
    out.extend_from_slice(b"%PDF-1.4\n");

    offsets.push(out.len());
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");

    offsets.push(out.len());
    let kids: Vec<String> = (0..n).map(|i| format!("{} 0 R", 4 + 2 * i)).collect();
    out.extend_from_slice(
        format!(
            "2 0 obj << /Type /Pages /Kids [{}] /Count {} >> endobj\n",
            kids.join(" "),
            n
        )
        .as_bytes(),
    );

    offsets.push(out.len());
    out.extend_from_slice(
        b"3 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );

    for (i, phrase) in pages.iter().enumerate() {
        let page_obj = 4 + 2 * i;
        let content_obj = page_obj + 1;
        offsets.push(out.len());
        out.extend_from_slice(
            format!(
                "{} 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents {} 0 R /Resources << /Font << /F1 3 0 R >> >> >> endobj\n",
                page_obj, content_obj
            )
            .as_bytes(),
        );
        let stream = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET\n", phrase);
        offsets.push(out.len());
        out.extend_from_slice(
            format!(
                "{} 0 obj << /Length {} >> stream\n{}endstream endobj\n",
                content_obj,
                stream.len(),
                stream
            )
            .as_bytes(),
        );
    }

    let size = offsets.len() + 1;
    let xref_start = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", size).as_bytes());
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in &offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer << /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            size, xref_start
        )
        .as_bytes(),
    );
    out
}

#[test]
fn single_page_pdf_extracts_text() {
    let bytes = minimal_pdf(&["retrieval test phrase"]);
    let (pages, num_pages) = load_pdf_bytes(&bytes).unwrap();
    assert_eq!(num_pages, 1);
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].index, 0);
    assert!(pages[0].text.contains("retrieval test phrase"));
}

#[test]
fn three_page_pdf_splits_into_three_pages() {
    let bytes = minimal_pdf(&["first page alpha", "second page beta", "third page gamma"]);
    let (pages, num_pages) = load_pdf_bytes(&bytes).unwrap();
    assert_eq!(num_pages, 3);
    assert_eq!(pages.len(), 3);
    for (i, marker) in ["alpha", "beta", "gamma"].iter().enumerate() {
        assert_eq!(pages[i].index, i);
        assert!(pages[i].text.contains(marker));
    }
    // Page boundaries hold: no page carries a neighbor's text.
    assert!(!pages[0].text.contains("beta"));
    assert!(!pages[2].text.contains("first"));
}

#[test]
fn loading_is_deterministic() {
    let bytes = minimal_pdf(&["same bytes", "same text"]);
    let (a, _) = load_pdf_bytes(&bytes).unwrap();
    let (b, _) = load_pdf_bytes(&bytes).unwrap();
    assert_eq!(a.len(), b.len());
    for (pa, pb) in a.iter().zip(b.iter()) {
        assert_eq!(pa.text, pb.text);
    }
}

#[tokio::test]
async fn search_results_survive_reopen_in_the_same_order() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("index.sqlite");
    let embedder = FakeEmbedder;

    let index = VectorIndex::open(&db_path).await.unwrap();
    let chunks = chunk_pages(
        &[page("alpha one. beta two. gamma three. alpha four.")],
        "doc1.pdf",
        40,
        8,
    );
    index.insert(&chunks, &embedder, 64).await.unwrap();

    let query = FakeEmbedder::vector_for("alpha");
    let before: Vec<String> = index
        .search(&query, 5)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.text)
        .collect();
    assert!(!before.is_empty());
    drop(index);

    // Reopen from the persisted database file.
    let reopened = VectorIndex::open(&db_path).await.unwrap();
    let after: Vec<String> = reopened
        .search(&query, 5)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.text)
        .collect();

    assert_eq!(before, after);
}

#[tokio::test]
async fn concurrent_inserts_lose_nothing() {
    let tmp = TempDir::new().unwrap();
    let index = Arc::new(
        VectorIndex::open(&tmp.path().join("index.sqlite"))
            .await
            .unwrap(),
    );

    let doc1 = chunk_pages(&[page(&"alpha text ".repeat(40))], "doc1.pdf", 100, 20);
    let doc2 = chunk_pages(&[page(&"beta text ".repeat(40))], "doc2.pdf", 100, 20);
    let expected = (doc1.len() + doc2.len()) as u64;

    let i1 = index.clone();
    let i2 = index.clone();
    let t1 = tokio::spawn(async move { i1.insert(&doc1, &FakeEmbedder, 64).await });
    let t2 = tokio::spawn(async move { i2.insert(&doc2, &FakeEmbedder, 64).await });
    t1.await.unwrap().unwrap();
    t2.await.unwrap().unwrap();

    assert_eq!(index.len().await.unwrap(), expected);

    // Both documents are retrievable.
    let hits = index
        .search(&FakeEmbedder::vector_for("alpha beta"), 50)
        .await
        .unwrap();
    assert!(hits.iter().any(|c| c.source == "doc1.pdf"));
    assert!(hits.iter().any(|c| c.source == "doc2.pdf"));
}

#[tokio::test]
async fn upload_then_ask_then_follow_up() {
    let tmp = TempDir::new().unwrap();
    let index = VectorIndex::open(&tmp.path().join("index.sqlite"))
        .await
        .unwrap();
    let llm = Arc::new(FakeChat::new("The document discusses alpha. [doc1.pdf]"));
    let service = RagService::new(
        Config::default(),
        Arc::new(index),
        Arc::new(FakeEmbedder),
        llm.clone(),
    );
    let sessions = SessionStore::new();

    // Upload: write a real (minimal) three-page PDF and ingest it.
    let pdf_path = tmp.path().join("doc1.pdf");
    let mut f = std::fs::File::create(&pdf_path).unwrap();
    f.write_all(&minimal_pdf(&[
        "alpha is the subject of this document",
        "alpha appears again on the second page",
        "the third page closes out alpha",
    ]))
    .unwrap();

    let report = service.add_document(&pdf_path, "doc1.pdf").await.unwrap();
    assert_eq!(report.num_pages, 3);
    assert!(report.num_chunks >= 1);

    // First question, empty history.
    let history = sessions.get("s1");
    assert!(history.is_empty());
    let answer = service
        .answer_query("What is alpha?", &history)
        .await
        .unwrap();
    assert!(answer.sources.contains("doc1.pdf"));
    assert_eq!(answer.sources.len(), 1);
    sessions.append("s1", "What is alpha?".to_string(), answer.answer.clone());
    assert_eq!(llm.calls.load(Ordering::SeqCst), 1);

    // Follow-up with history: reformulation plus synthesis.
    let history = sessions.get("s1");
    assert_eq!(history.len(), 1);
    let follow_up = service
        .answer_query("What else does it say?", &history)
        .await
        .unwrap();
    assert!(!follow_up.answer.is_empty());
    assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn query_before_any_upload_is_a_client_error() {
    let tmp = TempDir::new().unwrap();
    let index = VectorIndex::open(&tmp.path().join("index.sqlite"))
        .await
        .unwrap();
    let llm = Arc::new(FakeChat::new("unused"));
    let service = RagService::new(
        Config::default(),
        Arc::new(index),
        Arc::new(FakeEmbedder),
        llm.clone(),
    );

    let err = service.answer_query("anything?", &[]).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Knowledge base is empty. Please upload a document first."
    );
    assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
}
