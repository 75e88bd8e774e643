use crate::models::ActiveConsoleSession;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-chat state; lives from the first message until `SessionStore::close`.
#[derive(Debug, Default)]
pub struct ChatSession {
    pub chat_id: i64,
    /// Guest that free text is sent to while console mode is on.
    pub active_console: Option<ActiveConsoleSession>,
}

impl ChatSession {
    pub fn new(chat_id: i64) -> Self {
        Self {
            chat_id,
            active_console: None,
        }
    }
}

/// A session is locked for the whole handling of one update, so a chat's
/// updates are processed one at a time.
pub type SharedSession = Arc<tokio::sync::Mutex<ChatSession>>;

#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<i64, SharedSession>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing session for `chat_id`, or a fresh one.
    pub fn open(&self, chat_id: i64) -> SharedSession {
        self.sessions
            .lock()
            .entry(chat_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(ChatSession::new(chat_id))))
            .clone()
    }

    /// Drop the session and any console mode it held.
    pub fn close(&self, chat_id: i64) -> bool {
        self.sessions.lock().remove(&chat_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
