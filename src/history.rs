//! In-process conversation history, keyed by session id.
//!
//! Sessions are created on first reference and live for the process
//! lifetime; there is no eviction and no persistence, so history is lost
//! on restart. Appends for one session serialize on that session's lock,
//! so concurrent requests cannot interleave turns; different sessions
//! never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::models::Turn;

#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Arc<Mutex<Vec<Turn>>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulated history for a session, oldest first. Unseen sessions
    /// return an empty history.
    pub fn get(&self, session_id: &str) -> Vec<Turn> {
        let sessions = self.sessions.lock().expect("session map poisoned");
        match sessions.get(session_id) {
            Some(turns) => turns.lock().expect("session poisoned").clone(),
            None => Vec::new(),
        }
    }

    /// Append one completed turn. Creates the session if unseen.
    pub fn append(&self, session_id: &str, question: String, answer: String) {
        let turns = self.session(session_id);
        let mut turns = turns.lock().expect("session poisoned");
        turns.push(Turn { question, answer });
    }

    fn session(&self, session_id: &str) -> Arc<Mutex<Vec<Turn>>> {
        let mut sessions = self.sessions.lock().expect("session map poisoned");
        sessions
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }
}
