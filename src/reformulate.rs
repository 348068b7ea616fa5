//! Conversational query reformulation.
//!
//! Follow-up questions often lean on chat history ("what is its theme?").
//! Before retrieval, such a question is rewritten into a standalone one
//! the vector index can be searched with. The rewrite only resolves
//! references, never changes the question's intent, and the model is
//! explicitly forbidden from answering at this stage.

use anyhow::Result;

use crate::llm::{ChatMessage, ChatModel};
use crate::models::Turn;

const CONTEXTUALIZE_PROMPT: &str = "Given a chat history and the latest user question \
which might reference context in the chat history, formulate a standalone question \
which can be understood without the chat history. Do NOT answer the question, \
just reformulate it if needed and otherwise return it as is.";

/// Rewrite `question` into a standalone question given the chat history.
///
/// With no history the question is already standalone and is returned
/// unchanged without invoking the model.
pub async fn reformulate(
    model: &dyn ChatModel,
    history: &[Turn],
    question: &str,
) -> Result<String> {
    if history.is_empty() {
        return Ok(question.to_string());
    }

    let messages = build_messages(history, question);
    let standalone = model.complete(&messages).await?;
    Ok(standalone.trim().to_string())
}

fn build_messages(history: &[Turn], question: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() * 2 + 2);
    messages.push(ChatMessage::system(CONTEXTUALIZE_PROMPT));
    for turn in history {
        messages.push(ChatMessage::user(turn.question.clone()));
        messages.push(ChatMessage::assistant(turn.answer.clone()));
    }
    messages.push(ChatMessage::user(question.to_string()));
    messages
}
