//! SQLite conversation store with migrations
//!
//! Conversations and messages survive server restarts. Timestamps are stored
//! as fixed-width RFC 3339 text so they sort correctly as strings.

use crate::storage::{
    Conversation, ConversationStore, Message, MonotonicClock, NewMessage, StorageError,
    DEFAULT_TITLE,
};
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use std::path::Path;
use uuid::Uuid;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Conversation store backed by a SQLite file
pub struct SqliteStore {
    pool: DbPool,
    clock: MonotonicClock,
}

impl SqliteStore {
    /// Open (or create) the database and bring its schema up to date
    pub fn open(db_path: &Path) -> Result<Self, StorageError> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Per-connection settings; WAL is a property of the file
        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )
        });

        let pool = Pool::builder().max_size(8).build(manager)?;

        pool.get()?
            .query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;

        migrate(&pool)?;

        let last_update: Option<String> = pool.get()?.query_row(
            "SELECT MAX(updated_at) FROM conversations",
            [],
            |row| row.get(0),
        )?;
        let last_update = last_update.as_deref().map(parse_timestamp).transpose()?;

        tracing::info!("Conversation database ready at {:?}", db_path);

        Ok(Self {
            pool,
            clock: MonotonicClock::starting_after(last_update),
        })
    }

    fn conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>, StorageError> {
        Ok(self.pool.get()?)
    }
}

/// Apply every migration newer than the recorded schema version
fn migrate(pool: &DbPool) -> Result<(), StorageError> {
    let conn = pool.get()?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |row| row.get(0),
    )?;

    for (version, migration) in MIGRATIONS.iter().enumerate() {
        let version = version as i32 + 1;

        if version > current_version {
            tracing::info!("Applying migration {}", version);

            conn.execute_batch(migration)?;
            conn.execute(
                "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                params![version],
            )?;
        }
    }

    Ok(())
}

fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("bad timestamp '{}': {}", text, e)))
}

/// Raw conversation row; timestamps are parsed after the query
struct ConversationRow {
    id: String,
    user_id: String,
    title: String,
    created_at: String,
    updated_at: String,
}

impl ConversationRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }

    fn into_conversation(self) -> Result<Conversation, StorageError> {
        Ok(Conversation {
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            id: self.id,
            user_id: self.user_id,
            title: self.title,
        })
    }
}

struct MessageRow {
    id: String,
    conversation_id: String,
    user_id: String,
    question: String,
    answer: String,
    confidence: Option<f64>,
    created_at: String,
}

impl MessageRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            user_id: row.get(2)?,
            question: row.get(3)?,
            answer: row.get(4)?,
            confidence: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_message(self) -> Result<Message, StorageError> {
        Ok(Message {
            created_at: parse_timestamp(&self.created_at)?,
            id: self.id,
            conversation_id: self.conversation_id,
            user_id: self.user_id,
            question: self.question,
            answer: self.answer,
            confidence: self.confidence,
        })
    }
}

const CONVERSATION_COLUMNS: &str = "id, user_id, title, created_at, updated_at";

impl ConversationStore for SqliteStore {
    fn create_conversation(
        &self,
        user_id: &str,
        title: Option<&str>,
    ) -> Result<Conversation, StorageError> {
        let now = self.clock.now()?;
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: title.unwrap_or(DEFAULT_TITLE).to_string(),
            created_at: now,
            updated_at: now,
        };

        let stamp = format_timestamp(&now);
        self.conn()?.execute(
            "INSERT INTO conversations (id, user_id, title, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                conversation.id,
                conversation.user_id,
                conversation.title,
                stamp,
                stamp
            ],
        )?;

        Ok(conversation)
    }

    fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM conversations WHERE user_id = ?1 ORDER BY updated_at DESC",
            CONVERSATION_COLUMNS
        ))?;

        let rows = stmt
            .query_map(params![user_id], ConversationRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(ConversationRow::into_conversation).collect()
    }

    fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, StorageError> {
        let row = self
            .conn()?
            .query_row(
                &format!(
                    "SELECT {} FROM conversations WHERE id = ?1",
                    CONVERSATION_COLUMNS
                ),
                params![id],
                ConversationRow::from_row,
            )
            .optional()?;

        row.map(ConversationRow::into_conversation).transpose()
    }

    fn rename_conversation(&self, id: &str, title: &str) -> Result<Conversation, StorageError> {
        let now = self.clock.now()?;
        let updated = self.conn()?.execute(
            "UPDATE conversations SET title = ?1, updated_at = ?2 WHERE id = ?3",
            params![title, format_timestamp(&now), id],
        )?;
        if updated == 0 {
            return Err(StorageError::ConversationNotFound(id.to_string()));
        }

        self.get_conversation(id)?
            .ok_or_else(|| StorageError::ConversationNotFound(id.to_string()))
    }

    fn delete_conversation(&self, id: &str) -> Result<(), StorageError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let deleted = tx.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(StorageError::ConversationNotFound(id.to_string()));
        }
        tx.execute(
            "DELETE FROM messages WHERE conversation_id = ?1",
            params![id],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn append_message(&self, message: NewMessage) -> Result<Message, StorageError> {
        let now = self.clock.now()?;
        let stored = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: message.conversation_id,
            user_id: message.user_id,
            question: message.question,
            answer: message.answer,
            confidence: message.confidence,
            created_at: now,
        };
        let stamp = format_timestamp(&now);

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO messages (id, conversation_id, user_id, question, answer, confidence, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                stored.id,
                stored.conversation_id,
                stored.user_id,
                stored.question,
                stored.answer,
                stored.confidence,
                stamp
            ],
        )?;
        tx.execute(
            "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
            params![stamp, stored.conversation_id],
        )?;
        tx.commit()?;

        Ok(stored)
    }

    fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, user_id, question, answer, confidence, created_at
             FROM messages WHERE conversation_id = ?1 ORDER BY created_at, seq",
        )?;

        let rows = stmt
            .query_map(params![conversation_id], MessageRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(MessageRow::into_message).collect()
    }

    fn shutdown(&self) -> Result<(), StorageError> {
        self.conn()?
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        tracing::info!("Conversation database checkpointed");
        Ok(())
    }
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    CREATE TABLE conversations (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        title TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX idx_conversations_user ON conversations(user_id, updated_at);

    -- Messages may reference conversations that were never created
    CREATE TABLE messages (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        conversation_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        question TEXT NOT NULL,
        answer TEXT NOT NULL,
        confidence REAL,
        created_at TEXT NOT NULL
    );

    CREATE INDEX idx_messages_conversation ON messages(conversation_id, created_at);
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn message(conversation_id: &str, question: &str, confidence: Option<f64>) -> NewMessage {
        NewMessage {
            conversation_id: conversation_id.to_string(),
            user_id: "alice".to_string(),
            question: question.to_string(),
            answer: "Paris".to_string(),
            confidence,
        }
    }

    #[test]
    fn test_database_creation() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let _store = SqliteStore::open(&db_path).unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn test_migrations() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let store = SqliteStore::open(&db_path).unwrap();
        let conn = store.conn().unwrap();
        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM _migrations", [], |row| row.get(0))
            .unwrap();

        assert_eq!(version, MIGRATIONS.len() as i32);

        // Reopening does not reapply anything
        drop(conn);
        drop(store);
        let reopened = SqliteStore::open(&db_path).unwrap();
        let applied: i32 = reopened
            .conn()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM _migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied, MIGRATIONS.len() as i32);
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteStore::open(&temp_dir.path().join("test.db")).unwrap();

        let fk_enabled: i32 = store
            .conn()
            .unwrap()
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();

        assert_eq!(fk_enabled, 1);
    }

    #[test]
    fn test_conversation_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteStore::open(&temp_dir.path().join("test.db")).unwrap();

        let first = store.create_conversation("alice", None).unwrap();
        let second = store.create_conversation("alice", Some("Rivers")).unwrap();
        store.create_conversation("bob", None).unwrap();

        assert_eq!(first.title, DEFAULT_TITLE);
        assert_eq!(store.get_conversation(&second.id).unwrap(), Some(second.clone()));

        let listed = store.list_conversations("alice").unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);

        let renamed = store.rename_conversation(&first.id, "Capitals").unwrap();
        assert_eq!(renamed.title, "Capitals");
        assert!(renamed.updated_at > first.updated_at);
        assert_eq!(store.list_conversations("alice").unwrap()[0].id, first.id);

        store.delete_conversation(&first.id).unwrap();
        assert_eq!(store.get_conversation(&first.id).unwrap(), None);
        assert!(matches!(
            store.delete_conversation(&first.id),
            Err(StorageError::ConversationNotFound(_))
        ));
        assert!(matches!(
            store.rename_conversation(&first.id, "again"),
            Err(StorageError::ConversationNotFound(_))
        ));
    }

    #[test]
    fn test_messages() {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteStore::open(&temp_dir.path().join("test.db")).unwrap();
        let conversation = store.create_conversation("alice", None).unwrap();

        let first = store
            .append_message(message(&conversation.id, "q1", Some(11.25)))
            .unwrap();
        store
            .append_message(message(&conversation.id, "q2", None))
            .unwrap();

        let messages = store.list_messages(&conversation.id).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], first);
        assert_eq!(messages[1].question, "q2");
        assert_eq!(messages[1].confidence, None);

        let bumped = store.get_conversation(&conversation.id).unwrap().unwrap();
        assert_eq!(bumped.updated_at, messages[1].created_at);

        store.delete_conversation(&conversation.id).unwrap();
        assert!(store.list_messages(&conversation.id).unwrap().is_empty());
    }

    #[test]
    fn test_history_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let conversation = {
            let store = SqliteStore::open(&db_path).unwrap();
            let conversation = store.create_conversation("alice", Some("Kept")).unwrap();
            store.append_message(message(&conversation.id, "q", None)).unwrap();
            store.shutdown().unwrap();
            conversation
        };

        let store = SqliteStore::open(&db_path).unwrap();
        assert_eq!(store.list_conversations("alice").unwrap()[0].title, "Kept");
        assert_eq!(store.list_messages(&conversation.id).unwrap().len(), 1);

        // Timestamps keep increasing across restarts
        let newer = store.create_conversation("alice", None).unwrap();
        assert!(newer.updated_at > conversation.updated_at);
    }
}
