//! In-memory mapping from conversation id to assistant thread id.
//!
//! One entry per conversation for the life of the process; nothing is evicted
//! or persisted. Two deliveries for the same conversation can interleave at
//! await points, each reading before the other writes, so the last turn to
//! finish wins the stored thread id. The store imposes no ordering of its
//! own; a single in-flight turn per conversation is an operating assumption,
//! not something enforced here.

use std::collections::HashMap;

use tokio::sync::Mutex;

#[derive(Default)]
pub struct ConversationStore {
    threads: Mutex<HashMap<String, String>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn thread_for(&self, conversation_id: &str) -> Option<String> {
        self.threads.lock().await.get(conversation_id).cloned()
    }

    pub async fn remember(&self, conversation_id: &str, thread_id: &str) {
        self.threads
            .lock()
            .await
            .insert(conversation_id.to_string(), thread_id.to_string());
    }

    /// Number of conversations seen so far, reported by the health endpoints.
    pub async fn len(&self) -> usize {
        self.threads.lock().await.len()
    }
}
