//! The retrieval-augmented answering pipeline.
//!
//! [`RagService`] ties the components together. Write path:
//! load → chunk → embed → index. Read path: reformulate → embed →
//! similarity search → grounded synthesis with source citations.
//!
//! The service holds one [`Embedder`] used for both ingestion and
//! queries (the two sides must share an embedding space) and never
//! touches session history itself; the caller appends the turn after a
//! successful answer.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::chunk::chunk_pages;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::index::{IndexError, VectorIndex};
use crate::llm::{ChatMessage, ChatModel};
use crate::loader::{self, LoadError};
use crate::models::{Answer, RetrievedChunk, Turn};
use crate::reformulate::reformulate;

const QA_PROMPT: &str = "You are an assistant for question-answering tasks. \
Use the following pieces of retrieved context to answer the question. \
If you don't know the answer, just say that you don't know. \
Use three sentences maximum and keep the answer concise. \
Always cite the source filename in your answer.";

/// Failure while answering a query. Checked by the caller before any
/// expensive model call is made.
#[derive(Debug)]
pub enum QueryError {
    /// No document has ever been indexed.
    EmptyIndex,
    /// The embedding or text-generation capability failed.
    Capability(anyhow::Error),
    /// The vector index could not be read.
    Storage(anyhow::Error),
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryError::EmptyIndex => {
                write!(f, "Knowledge base is empty. Please upload a document first.")
            }
            QueryError::Capability(e) => write!(f, "model call failed: {}", e),
            QueryError::Storage(e) => write!(f, "index storage error: {}", e),
        }
    }
}

impl std::error::Error for QueryError {}

/// Failure while ingesting an uploaded document.
#[derive(Debug)]
pub enum IngestError {
    /// The upload is not a readable PDF; a client error.
    Load(LoadError),
    /// Embedding or persistence failed.
    Internal(anyhow::Error),
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestError::Load(e) => write!(f, "{}", e),
            IngestError::Internal(e) => write!(f, "ingestion failed: {}", e),
        }
    }
}

impl std::error::Error for IngestError {}

/// Summary of one successful document ingestion.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub filename: String,
    pub num_pages: usize,
    pub num_chunks: usize,
}

pub struct RagService {
    config: Config,
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn ChatModel>,
}

impl RagService {
    pub fn new(
        config: Config,
        index: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            config,
            index,
            embedder,
            llm,
        }
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    /// Ingest a PDF from disk under the given display filename:
    /// parse into pages, chunk, embed, and persist to the vector index.
    ///
    /// Uploading the same filename twice appends a second copy of its
    /// chunks; there is no deduplication or replacement.
    pub async fn add_document(
        &self,
        path: &Path,
        filename: &str,
    ) -> Result<IngestReport, IngestError> {
        let (pages, num_pages) = loader::load_pdf(path).map_err(IngestError::Load)?;

        let chunks = chunk_pages(
            &pages,
            filename,
            self.config.chunking.chunk_size,
            self.config.chunking.overlap,
        );

        let num_chunks = self
            .index
            .insert(&chunks, self.embedder.as_ref(), self.config.embedding.batch_size)
            .await
            .map_err(IngestError::Internal)?;

        info!(
            filename = %filename,
            num_pages, num_chunks, "document added to knowledge base"
        );

        Ok(IngestReport {
            filename: filename.to_string(),
            num_pages,
            num_chunks,
        })
    }

    /// Answer a question from the indexed documents, using `history` to
    /// resolve conversational references.
    ///
    /// The empty-index precondition is checked before any model call so
    /// a query against an empty knowledge base fails fast and cheap.
    /// The caller is responsible for appending the resulting turn to the
    /// session history.
    pub async fn answer_query(
        &self,
        query: &str,
        history: &[Turn],
    ) -> Result<Answer, QueryError> {
        if self
            .index
            .is_empty()
            .await
            .map_err(QueryError::Storage)?
        {
            return Err(QueryError::EmptyIndex);
        }

        let standalone = reformulate(self.llm.as_ref(), history, query)
            .await
            .map_err(QueryError::Capability)?;

        let query_vec = self
            .embedder
            .embed_query(&standalone)
            .await
            .map_err(QueryError::Capability)?;

        let retrieved = match self
            .index
            .search(&query_vec, self.config.retrieval.top_k)
            .await
        {
            Ok(chunks) => chunks,
            Err(IndexError::Empty) => return Err(QueryError::EmptyIndex),
            Err(IndexError::Storage(e)) => return Err(QueryError::Storage(e)),
        };

        let messages = build_qa_messages(&retrieved, history, query);
        let answer = self
            .llm
            .complete(&messages)
            .await
            .map_err(QueryError::Capability)?;

        let sources: HashSet<String> = retrieved.into_iter().map(|c| c.source).collect();

        info!(
            query = %query,
            standalone = %standalone,
            sources = sources.len(),
            "answered query"
        );

        Ok(Answer { answer, sources })
    }
}

/// Grounded synthesis prompt: retrieved context (with source tags) in the
/// system message, then the chat history, then the original question.
fn build_qa_messages(
    retrieved: &[RetrievedChunk],
    history: &[Turn],
    question: &str,
) -> Vec<ChatMessage> {
    let context = retrieved
        .iter()
        .map(|c| format!("[source: {}]\n{}", c.source, c.text))
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut messages = Vec::with_capacity(history.len() * 2 + 2);
    messages.push(ChatMessage::system(format!(
        "{}\n\n<context>\n{}\n</context>",
        QA_PROMPT, context
    )));
    for turn in history {
        messages.push(ChatMessage::user(turn.question.clone()));
        messages.push(ChatMessage::assistant(turn.answer.clone()));
    }
    messages.push(ChatMessage::user(question.to_string()));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    use crate::models::Page;

    /// Deterministic embedder: counts occurrences of three marker words,
    /// so queries about "alpha" land nearest chunks that mention it.
    struct FakeEmbedder {
        calls: AtomicUsize,
    }

    impl FakeEmbedder {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }

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
            self.calls.fetch_add(1, Ordering::SeqCst);
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

    fn test_config() -> Config {
        let mut config = Config::default();
        config.chunking.chunk_size = 200;
        config.chunking.overlap = 40;
        config
    }

    async fn service_with(
        tmp: &TempDir,
        embedder: Arc<FakeEmbedder>,
        llm: Arc<FakeChat>,
    ) -> RagService {
        let index = VectorIndex::open(&tmp.path().join("index.sqlite"))
            .await
            .unwrap();
        RagService::new(test_config(), Arc::new(index), embedder, llm)
    }

    async fn index_text(service: &RagService, filename: &str, text: &str) {
        let pages = vec![Page {
            index: 0,
            text: text.to_string(),
        }];
        let chunks = chunk_pages(&pages, filename, 200, 40);
        service
            .index
            .insert(&chunks, service.embedder.as_ref(), 64)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn empty_index_fails_fast_without_model_calls() {
        let tmp = TempDir::new().unwrap();
        let embedder = Arc::new(FakeEmbedder::new());
        let llm = Arc::new(FakeChat::new("unused"));
        let service = service_with(&tmp, embedder.clone(), llm.clone()).await;

        let err = service.answer_query("What is alpha?", &[]).await.unwrap_err();
        assert!(matches!(err, QueryError::EmptyIndex));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn answers_cite_the_matching_source() {
        let tmp = TempDir::new().unwrap();
        let embedder = Arc::new(FakeEmbedder::new());
        let llm = Arc::new(FakeChat::new("Alpha is a protocol. [doc1.pdf]"));
        let service = service_with(&tmp, embedder.clone(), llm.clone()).await;

        index_text(&service, "doc1.pdf", "alpha alpha alpha is the subject here").await;
        index_text(&service, "doc2.pdf", "beta beta beta is discussed instead").await;

        let answer = service.answer_query("Tell me about alpha", &[]).await.unwrap();
        assert!(!answer.sources.is_empty());
        assert!(answer.sources.contains("doc1.pdf"));
        // Empty history: one synthesis call, no reformulation call.
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn follow_up_with_history_reformulates_then_synthesizes() {
        let tmp = TempDir::new().unwrap();
        let embedder = Arc::new(FakeEmbedder::new());
        let llm = Arc::new(FakeChat::new("A standalone reply about alpha."));
        let service = service_with(&tmp, embedder.clone(), llm.clone()).await;

        index_text(&service, "doc1.pdf", "alpha details alpha facts alpha notes").await;

        let history = vec![Turn {
            question: "What is alpha?".to_string(),
            answer: "A protocol.".to_string(),
        }];
        let answer = service.answer_query("What about its uses?", &history).await.unwrap();
        assert!(!answer.answer.is_empty());
        assert_eq!(llm.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retrieval_returns_at_most_top_k() {
        let tmp = TempDir::new().unwrap();
        let embedder = Arc::new(FakeEmbedder::new());
        let llm = Arc::new(FakeChat::new("ok"));
        let service = service_with(&tmp, embedder.clone(), llm).await;

        index_text(&service, "only.pdf", "gamma gamma gamma").await;

        // Index holds fewer records than top_k; search must not error.
        let answer = service.answer_query("gamma?", &[]).await.unwrap();
        assert_eq!(answer.sources.len(), 1);
    }

    #[test]
    fn qa_messages_carry_context_history_and_question() {
        let retrieved = vec![RetrievedChunk {
            source: "doc1.pdf".to_string(),
            text: "alpha context".to_string(),
            score: 0.9,
        }];
        let history = vec![Turn {
            question: "earlier q".to_string(),
            answer: "earlier a".to_string(),
        }];
        let messages = build_qa_messages(&retrieved, &history, "the question");
        assert_eq!(messages.len(), 4);
        assert!(messages[0].content.contains("[source: doc1.pdf]"));
        assert!(messages[0].content.contains("<context>"));
        assert_eq!(messages[3].content, "the question");
    }
}
