use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::store::ExpenseRecord;

/// Snapshot of today's records offered for deletion, waiting for the
/// user's 1-based pick. The snapshot is authoritative: a concurrent insert
/// must not shift what a number refers to, so the ids captured here are
/// what actually gets deleted.
#[derive(Debug, Clone)]
pub struct PendingSelection {
    pub records: Vec<ExpenseRecord>,
    pub created_at: DateTime<Utc>,
}

/// Per-conversation session state. A conversation holds at most one
/// pending selection; storing a new one supersedes the old.
#[derive(Clone, Default)]
pub struct SessionStore {
    pending: Arc<Mutex<HashMap<String, PendingSelection>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_pending(&self, conversation: &str, records: Vec<ExpenseRecord>) {
        let mut pending = self.pending.lock().await;
        pending.insert(
            conversation.to_string(),
            PendingSelection {
                records,
                created_at: Utc::now(),
            },
        );
    }

    /// Remove and return the conversation's pending selection. Taking it on
    /// every message is what clears stale selections: whatever the message
    /// turns out to mean, the old snapshot is gone.
    pub async fn take_pending(&self, conversation: &str) -> Option<PendingSelection> {
        let mut pending = self.pending.lock().await;
        pending.remove(conversation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64) -> ExpenseRecord {
        ExpenseRecord {
            id,
            name: "makan".to_string(),
            category: "Makanan".to_string(),
            amount: 100,
            created_at: String::new(),
        }
    }

    #[tokio::test]
    async fn test_take_clears_the_selection() {
        let sessions = SessionStore::new();
        sessions.set_pending("chat-a", vec![record(1)]).await;

        let taken = sessions.take_pending("chat-a").await;
        assert_eq!(taken.map(|p| p.records.len()), Some(1));
        assert!(sessions.take_pending("chat-a").await.is_none());
    }

    #[tokio::test]
    async fn test_new_selection_supersedes_old() {
        let sessions = SessionStore::new();
        sessions.set_pending("chat-a", vec![record(1)]).await;
        sessions
            .set_pending("chat-a", vec![record(2), record(3)])
            .await;

        let taken = sessions.take_pending("chat-a").await.unwrap();
        let ids: Vec<i64> = taken.records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_conversations_are_independent() {
        let sessions = SessionStore::new();
        sessions.set_pending("chat-a", vec![record(1)]).await;

        assert!(sessions.take_pending("chat-b").await.is_none());
        assert!(sessions.take_pending("chat-a").await.is_some());
    }
}
