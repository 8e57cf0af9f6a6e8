use crate::error::StoreError;
use crate::models::{ChatMessage, Document, Session};
use async_trait::async_trait;

/// Relational persistence seam for sessions, documents, and chat messages.
/// The store is the single source of truth for session metadata; the vector
/// index is a derived artifact.
#[async_trait]
pub trait SessionStore {
    async fn create_session(&self, name: &str) -> Result<Session, StoreError>;

    async fn get_session(&self, id: i64) -> Result<Session, StoreError>;

    /// Newest first.
    async fn list_sessions(&self) -> Result<Vec<Session>, StoreError>;

    async fn rename_session(&self, id: i64, name: &str) -> Result<Session, StoreError>;

    /// Cascades to the session's documents and messages.
    async fn delete_session(&self, id: i64) -> Result<(), StoreError>;

    /// Publishes the outcome of one ingestion: index reference and rolling
    /// summary land in a single update so a reader never sees one without
    /// the other.
    async fn commit_ingestion(
        &self,
        id: i64,
        index_reference: &str,
        summary: &str,
    ) -> Result<(), StoreError>;

    async fn create_document(
        &self,
        session_id: i64,
        filename: &str,
        stored_path: &str,
        checksum: &str,
    ) -> Result<Document, StoreError>;

    async fn delete_document(&self, id: i64) -> Result<(), StoreError>;

    /// Newest first.
    async fn documents(&self, session_id: i64) -> Result<Vec<Document>, StoreError>;

    /// Persists one chat turn as a (user, assistant) pair in a single
    /// transaction; a failure leaves neither message behind.
    async fn record_exchange(
        &self,
        session_id: i64,
        query: &str,
        answer: &str,
    ) -> Result<(), StoreError>;

    /// The most recent `limit` messages, returned oldest first.
    async fn recent_messages(
        &self,
        session_id: i64,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError>;

    /// Full history, oldest first.
    async fn messages(&self, session_id: i64) -> Result<Vec<ChatMessage>, StoreError>;
}
