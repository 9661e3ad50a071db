//! Conversation and message history
//!
//! Completed question/answer exchanges are appended to a conversation store.
//! The store is injected into the server at startup and shut down with it;
//! the retrieval pipeline never touches it.

pub mod database;
pub mod memory;

pub use database::SqliteStore;
pub use memory::MemoryStore;

use crate::config::{StorageBackend, StorageConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Title given to conversations created without one
pub const DEFAULT_TITLE: &str = "New conversation";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// A titled conversation owned by one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One stored question/answer exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub user_id: String,
    pub question: String,
    pub answer: String,
    pub confidence: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Message fields supplied by the caller; id and timestamp are assigned by
/// the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub conversation_id: String,
    pub user_id: String,
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Keyed conversation/message records with server-assigned timestamps
pub trait ConversationStore: Send + Sync {
    /// Create a conversation. `None` titles fall back to `DEFAULT_TITLE`.
    fn create_conversation(
        &self,
        user_id: &str,
        title: Option<&str>,
    ) -> Result<Conversation, StorageError>;

    /// A user's conversations, most recently updated first
    fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, StorageError>;

    fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, StorageError>;

    /// Change the title and bump `updated_at`
    fn rename_conversation(&self, id: &str, title: &str) -> Result<Conversation, StorageError>;

    /// Remove a conversation together with its messages
    fn delete_conversation(&self, id: &str) -> Result<(), StorageError>;

    /// Append a message. Bumps the conversation's `updated_at` when the
    /// conversation exists; messages for unknown conversations are still kept.
    fn append_message(&self, message: NewMessage) -> Result<Message, StorageError>;

    /// Messages of a conversation, oldest first
    fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, StorageError>;

    /// Release resources at server shutdown
    fn shutdown(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Open the configured backend
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn ConversationStore>, StorageError> {
    let store: Arc<dyn ConversationStore> = match config.backend {
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
        StorageBackend::Sqlite => Arc::new(SqliteStore::open(&config.database_path)?),
    };
    tracing::info!("Conversation store opened ({:?})", config.backend);
    Ok(store)
}

/// Timestamp source that never repeats or goes backwards, at microsecond
/// resolution. Keeps "most recently updated" orderings strict.
#[derive(Debug, Default)]
pub(crate) struct MonotonicClock {
    last_micros: AtomicI64,
}

impl MonotonicClock {
    pub(crate) fn starting_after(last: Option<DateTime<Utc>>) -> Self {
        Self {
            last_micros: AtomicI64::new(last.map(|t| t.timestamp_micros()).unwrap_or(0)),
        }
    }

    pub(crate) fn now(&self) -> Result<DateTime<Utc>, StorageError> {
        let now = Utc::now().timestamp_micros();
        let previous = match self.last_micros.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        }) {
            Ok(previous) | Err(previous) => previous,
        };
        let micros = now.max(previous + 1);

        DateTime::<Utc>::from_timestamp_micros(micros)
            .ok_or_else(|| StorageError::Corrupt(format!("timestamp out of range: {}", micros)))
    }
}
