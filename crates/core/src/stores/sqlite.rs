use crate::error::StoreError;
use crate::models::{ChatMessage, Document, MessageRole, Session};
use crate::store::SessionStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// SQLite-backed store. The connection lives behind a mutex; every operation
/// is a short blocking call, which keeps the embedded database simple to
/// share across async tasks.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Idempotent schema setup, safe to run on every open.
    fn migrate(&self) -> Result<(), StoreError> {
        self.conn().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sessions (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                name            TEXT NOT NULL,
                current_summary TEXT,
                index_reference TEXT,
                created_at      TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS documents (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id  INTEGER NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                filename    TEXT NOT NULL,
                stored_path TEXT NOT NULL,
                checksum    TEXT NOT NULL,
                uploaded_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_documents_session ON documents(session_id);

            CREATE TABLE IF NOT EXISTS messages (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                role       TEXT NOT NULL,
                content    TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id);
            ",
        )?;
        Ok(())
    }
}

fn parse_timestamp(raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|stamp| stamp.with_timezone(&Utc))
        .map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("bad timestamp {raw}: {error}").into(),
            )
        })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        name: row.get(1)?,
        current_summary: row.get(2)?,
        index_reference: row.get(3)?,
        created_at: parse_timestamp(row.get(4)?)?,
    })
}

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: row.get(0)?,
        session_id: row.get(1)?,
        filename: row.get(2)?,
        stored_path: row.get(3)?,
        checksum: row.get(4)?,
        uploaded_at: parse_timestamp(row.get(5)?)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    let role_text: String = row.get(2)?;
    let role = MessageRole::parse(&role_text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown message role {role_text}").into(),
        )
    })?;

    Ok(ChatMessage {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role,
        content: row.get(3)?,
        created_at: parse_timestamp(row.get(4)?)?,
    })
}

fn not_found(entity: &str, id: i64) -> StoreError {
    StoreError::NotFound(format!("{entity} {id}"))
}

const SESSION_COLUMNS: &str = "id, name, current_summary, index_reference, created_at";
const DOCUMENT_COLUMNS: &str = "id, session_id, filename, stored_path, checksum, uploaded_at";
const MESSAGE_COLUMNS: &str = "id, session_id, role, content, created_at";

#[async_trait]
impl SessionStore for SqliteStore {
    async fn create_session(&self, name: &str) -> Result<Session, StoreError> {
        let created_at = Utc::now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO sessions (name, created_at) VALUES (?1, ?2)",
            params![name, created_at.to_rfc3339()],
        )?;

        Ok(Session {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            current_summary: None,
            index_reference: None,
            created_at,
        })
    }

    async fn get_session(&self, id: i64) -> Result<Session, StoreError> {
        self.conn()
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                params![id],
                session_from_row,
            )
            .map_err(|error| match error {
                rusqlite::Error::QueryReturnedNoRows => not_found("session", id),
                other => StoreError::Sqlite(other),
            })
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, StoreError> {
        let conn = self.conn();
        let mut statement = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY created_at DESC, id DESC"
        ))?;
        let sessions = statement
            .query_map([], session_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sessions)
    }

    async fn rename_session(&self, id: i64, name: &str) -> Result<Session, StoreError> {
        let updated = self.conn().execute(
            "UPDATE sessions SET name = ?1 WHERE id = ?2",
            params![name, id],
        )?;
        if updated == 0 {
            return Err(not_found("session", id));
        }
        self.get_session(id).await
    }

    async fn delete_session(&self, id: i64) -> Result<(), StoreError> {
        let deleted = self
            .conn()
            .execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(not_found("session", id));
        }
        Ok(())
    }

    async fn commit_ingestion(
        &self,
        id: i64,
        index_reference: &str,
        summary: &str,
    ) -> Result<(), StoreError> {
        let updated = self.conn().execute(
            "UPDATE sessions SET index_reference = ?1, current_summary = ?2 WHERE id = ?3",
            params![index_reference, summary, id],
        )?;
        if updated == 0 {
            return Err(not_found("session", id));
        }
        Ok(())
    }

    async fn create_document(
        &self,
        session_id: i64,
        filename: &str,
        stored_path: &str,
        checksum: &str,
    ) -> Result<Document, StoreError> {
        let uploaded_at = Utc::now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO documents (session_id, filename, stored_path, checksum, uploaded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session_id,
                filename,
                stored_path,
                checksum,
                uploaded_at.to_rfc3339()
            ],
        )?;

        Ok(Document {
            id: conn.last_insert_rowid(),
            session_id,
            filename: filename.to_string(),
            stored_path: stored_path.to_string(),
            checksum: checksum.to_string(),
            uploaded_at,
        })
    }

    async fn delete_document(&self, id: i64) -> Result<(), StoreError> {
        let deleted = self
            .conn()
            .execute("DELETE FROM documents WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(not_found("document", id));
        }
        Ok(())
    }

    async fn documents(&self, session_id: i64) -> Result<Vec<Document>, StoreError> {
        let conn = self.conn();
        let mut statement = conn.prepare(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents
             WHERE session_id = ?1 ORDER BY uploaded_at DESC, id DESC"
        ))?;
        let documents = statement
            .query_map(params![session_id], document_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(documents)
    }

    async fn record_exchange(
        &self,
        session_id: i64,
        query: &str,
        answer: &str,
    ) -> Result<(), StoreError> {
        let committed_at = Utc::now().to_rfc3339();
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO messages (session_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![session_id, MessageRole::User.as_str(), query, committed_at],
        )?;
        tx.execute(
            "INSERT INTO messages (session_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                session_id,
                MessageRole::Assistant.as_str(),
                answer,
                committed_at
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn recent_messages(
        &self,
        session_id: i64,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let conn = self.conn();
        let mut statement = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE session_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2"
        ))?;
        let mut recent = statement
            .query_map(params![session_id, limit as i64], message_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        recent.reverse();
        Ok(recent)
    }

    async fn messages(&self, session_id: i64) -> Result<Vec<ChatMessage>, StoreError> {
        let conn = self.conn();
        let mut statement = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE session_id = ?1 ORDER BY created_at ASC, id ASC"
        ))?;
        let messages = statement
            .query_map(params![session_id], message_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }
}
