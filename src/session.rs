//! Conversation history per session.
//!
//! Sessions keep the last `max_history` user/assistant pairs, oldest
//! evicted first. Sessions live for the life of the process; the HTTP
//! layer only accepts ids this store created, so clients cannot grow the
//! map with arbitrary ids. Callers hold the guard from [`SessionStore::lock`] for a
//! whole query so that concurrent requests on one session append in order.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::llm::Role;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Allocate a fresh session id.
    async fn create_session(&self) -> String;

    /// Whether `session_id` was handed out by [`create_session`](SessionStore::create_session).
    async fn contains(&self, session_id: &str) -> bool;

    /// History rendered as `User: ...` / `Assistant: ...` lines, or `None`
    /// for an unknown or empty session.
    async fn get_history(&self, session_id: &str) -> Option<String>;

    async fn append_turn(&self, session_id: &str, role: Role, text: &str);

    /// Exclusive access to one session until the guard is dropped.
    async fn lock(&self, session_id: &str) -> OwnedMutexGuard<()>;
}

#[derive(Debug, Clone)]
struct Turn {
    role: Role,
    text: String,
}

#[derive(Default)]
struct Session {
    turns: VecDeque<Turn>,
    gate: Arc<Mutex<()>>,
}

/// Bounded FIFO history kept in memory.
pub struct InMemorySessionStore {
    max_history: usize,
    counter: AtomicU64,
    sessions: Mutex<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new(max_history: usize) -> Self {
        Self {
            max_history: max_history.max(1),
            counter: AtomicU64::new(0),
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

fn render(turns: &VecDeque<Turn>) -> String {
    turns
        .iter()
        .map(|t| match t.role {
            Role::User => format!("User: {}", t.text),
            Role::Assistant => format!("Assistant: {}", t.text),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create_session(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("session_{}", n);
        self.sessions
            .lock()
            .await
            .insert(id.clone(), Session::default());
        id
    }

    async fn contains(&self, session_id: &str) -> bool {
        self.sessions.lock().await.contains_key(session_id)
    }

    async fn get_history(&self, session_id: &str) -> Option<String> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(session_id)
            .filter(|s| !s.turns.is_empty())
            .map(|s| render(&s.turns))
    }

    async fn append_turn(&self, session_id: &str, role: Role, text: &str) {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.entry(session_id.to_string()).or_default();
        session.turns.push_back(Turn {
            role,
            text: text.to_string(),
        });
        while session.turns.len() > self.max_history * 2 {
            session.turns.pop_front();
        }
    }

    async fn lock(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let gate = {
            let mut sessions = self.sessions.lock().await;
            Arc::clone(&sessions.entry(session_id.to_string()).or_default().gate)
        };
        gate.lock_owned().await
    }
}
