use crate::answerer::{Answerer, INDEX_UNAVAILABLE_REPLY, NO_DOCUMENTS_REPLY};
use crate::chunking::split_text;
use crate::embeddings::Embedder;
use crate::error::{ChatError, IngestError};
use crate::extractor::PdfExtractor;
use crate::index::{IndexManager, DEFAULT_TOP_K};
use crate::llm::ChatModel;
use crate::models::{ChunkingConfig, Document};
use crate::storage::DocumentStorage;
use crate::store::SessionStore;
use crate::summarizer::{recent_context, Summarizer};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// How much chat history feeds the summary merge.
pub const RECENT_CONTEXT_MESSAGES: usize = 5;

/// Serializes operations that touch one session's index and summary. An
/// append-then-persist must never race a concurrent load-then-search on the
/// same session; independent sessions proceed in parallel.
struct SessionLocks {
    locks: std::sync::Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionLocks {
    fn new() -> Self {
        Self {
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn for_session(&self, session_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(session_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

/// Wires the capability objects together and runs the two session pipelines:
/// ingestion (extract, chunk, index, summarize, commit) and chat (retrieve,
/// answer, persist the message pair). All collaborators are injected at
/// construction; nothing is lazily initialized.
pub struct SessionCoordinator<S, M, E, X>
where
    S: SessionStore,
    M: ChatModel + Send + Sync,
    E: Embedder,
    X: PdfExtractor,
{
    store: S,
    extractor: X,
    index: IndexManager<E>,
    storage: DocumentStorage,
    summarizer: Summarizer<Arc<M>>,
    answerer: Answerer<Arc<M>>,
    chunking: ChunkingConfig,
    locks: SessionLocks,
}

impl<S, M, E, X> SessionCoordinator<S, M, E, X>
where
    S: SessionStore + Send + Sync,
    M: ChatModel + Send + Sync,
    E: Embedder + Send + Sync,
    X: PdfExtractor + Send + Sync,
{
    pub fn new(
        store: S,
        extractor: X,
        index: IndexManager<E>,
        storage: DocumentStorage,
        model: M,
    ) -> Self {
        let model = Arc::new(model);
        Self {
            store,
            extractor,
            index,
            storage,
            summarizer: Summarizer::new(Arc::clone(&model)),
            answerer: Answerer::new(model),
            chunking: ChunkingConfig::default(),
            locks: SessionLocks::new(),
        }
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Ingests one already-stored PDF into the session: extract, chunk,
    /// grow-and-persist the index, fold the new summary into the rolling one,
    /// then commit both session fields in a single update.
    ///
    /// Any failure aborts the whole ingestion with the session row untouched;
    /// the caller owns removing the uploaded file afterwards (see `upload`).
    pub async fn ingest(&self, session_id: i64, file_path: &Path) -> Result<(), IngestError> {
        let guard = self.locks.for_session(session_id);
        let _serialized = guard.lock().await;

        // Read under the lock: a concurrent ingest may have published the
        // session's first index reference moments ago.
        let session = self.store.get_session(session_id).await?;

        // The empty-text guard runs before any index work so a useless upload
        // can never publish an index or flip index_reference.
        let text = self.extractor.extract_text(file_path)?;
        if text.trim().is_empty() {
            return Err(IngestError::EmptyContent(format!(
                "no text extracted from {}",
                file_path.display()
            )));
        }
        let chunks = split_text(&text, &self.chunking)?;

        let (mut index, pending) = self
            .index
            .load_or_create(session.index_reference.as_deref(), &chunks)?;
        self.index.append(&mut index, pending)?;
        let location = self.index.persist(session_id, &index)?;

        let new_summary = self.summarizer.summarize_new(&text).await?;
        let history = self
            .store
            .recent_messages(session_id, RECENT_CONTEXT_MESSAGES)
            .await?;
        let merged = self
            .summarizer
            .merge(
                &new_summary,
                session.current_summary.as_deref(),
                &recent_context(&history),
            )
            .await?;

        self.store
            .commit_ingestion(session_id, &location.to_string_lossy(), &merged)
            .await?;

        info!(
            session_id,
            chunks = chunks.len(),
            index_entries = index.len(),
            "document ingested"
        );
        Ok(())
    }

    /// Upload flow: copy the source PDF into session storage, record the
    /// document, then ingest. If ingestion fails, both the stored file and
    /// the document row are removed so storage and database never disagree
    /// about what was uploaded.
    pub async fn upload(&self, session_id: i64, source: &Path) -> Result<Document, IngestError> {
        let filename = source
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| IngestError::MissingFileName(source.display().to_string()))?;

        self.store.get_session(session_id).await?;

        let bytes = fs::read(source)?;
        let stored = self.storage.store(session_id, filename, &bytes)?;
        let document = self
            .store
            .create_document(
                session_id,
                filename,
                &stored.path.to_string_lossy(),
                &stored.checksum,
            )
            .await?;

        if let Err(error) = self.ingest(session_id, &stored.path).await {
            warn!(session_id, filename, %error, "ingestion failed, rolling back upload");
            if let Err(cleanup) = self.storage.remove(&stored.path) {
                warn!(session_id, %cleanup, "stored file could not be removed");
            }
            if let Err(cleanup) = self.store.delete_document(document.id).await {
                warn!(session_id, %cleanup, "document row could not be removed");
            }
            return Err(error);
        }

        Ok(document)
    }

    /// Answers a query over the session's documents and records the
    /// (user, assistant) pair. Sessions without a usable index get a fixed
    /// guidance reply and no messages are persisted.
    pub async fn answer(&self, session_id: i64, query: &str) -> Result<String, ChatError> {
        let guard = self.locks.for_session(session_id);
        let _serialized = guard.lock().await;

        let session = self.store.get_session(session_id).await?;

        let reference = match session.index_reference {
            Some(reference) => reference,
            None => return Ok(NO_DOCUMENTS_REPLY.to_string()),
        };

        let index = match self.index.open(Path::new(&reference)) {
            Ok(index) => index,
            Err(error) => {
                warn!(session_id, %error, "session index unavailable");
                return Ok(INDEX_UNAVAILABLE_REPLY.to_string());
            }
        };

        let retrieved = self.index.search(&index, query, DEFAULT_TOP_K);
        let answer = self.answerer.answer(&retrieved, query).await?;

        self.store
            .record_exchange(session_id, query, &answer)
            .await?;

        info!(session_id, retrieved = retrieved.len(), "chat turn answered");
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::SessionCoordinator;
    use crate::answerer::{INDEX_UNAVAILABLE_REPLY, NO_DOCUMENTS_REPLY};
    use crate::embeddings::HashedNgramEmbedder;
    use crate::error::{ChatError, IngestError, StoreError};
    use crate::extractor::{write_sample_pdf, LopdfExtractor};
    use crate::index::IndexManager;
    use crate::storage::DocumentStorage;
    use crate::store::SessionStore;
    use crate::stores::SqliteStore;
    use crate::summarizer::stub::ScriptedModel;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    type TestCoordinator =
        SessionCoordinator<SqliteStore, ScriptedModel, HashedNgramEmbedder, LopdfExtractor>;

    fn coordinator(dir: &TempDir, store: SqliteStore, model: ScriptedModel) -> TestCoordinator {
        SessionCoordinator::new(
            store,
            LopdfExtractor,
            IndexManager::new(dir.path().join("indexes"), HashedNgramEmbedder::default()),
            DocumentStorage::new(dir.path().join("storage")),
            model,
        )
    }

    fn pdf(dir: &TempDir, name: &str, text: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        write_sample_pdf(&path, text);
        path
    }

    fn index_len(dir: &TempDir, session_id: i64) -> usize {
        let manager = IndexManager::new(dir.path().join("indexes"), HashedNgramEmbedder::default());
        let location = manager.location_for(session_id);
        manager.open(&location).map(|index| index.len()).unwrap_or(0)
    }

    #[tokio::test]
    async fn first_ingestion_sets_summary_and_index_reference() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open_in_memory().unwrap();
        let coordinator = coordinator(&dir, store.clone(), ScriptedModel::replying(&["doc one summary"]));
        let session = store.create_session("quarterly").await.unwrap();
        let file = pdf(&dir, "one.pdf", "Revenue for the quarter was five million dollars");

        coordinator.ingest(session.id, &file).await.unwrap();

        let updated = store.get_session(session.id).await.unwrap();
        assert_eq!(updated.current_summary.as_deref(), Some("doc one summary"));
        let reference = updated.index_reference.expect("reference set");
        assert!(Path::new(&reference).exists());
        // First upload: one summarize call, identity merge, no second call.
        assert_eq!(coordinator.summarizer.model().call_count(), 1);
    }

    #[tokio::test]
    async fn second_ingestion_appends_chunks_and_merges_summaries() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open_in_memory().unwrap();
        let coordinator = coordinator(
            &dir,
            store.clone(),
            ScriptedModel::replying(&["summary A", "summary B", "merged A and B"]),
        );
        let session = store.create_session("growing").await.unwrap();

        let file_a = pdf(&dir, "a.pdf", "Alpha project ships in March and owns the hydraulics work");
        coordinator.ingest(session.id, &file_a).await.unwrap();
        let after_first = index_len(&dir, session.id);

        let file_b = pdf(&dir, "b.pdf", "Beta initiative covers revenue forecasting next quarter");
        coordinator.ingest(session.id, &file_b).await.unwrap();

        // Each small document chunks to one segment; no re-embedding of A.
        assert_eq!(index_len(&dir, session.id), after_first + 1);

        let updated = store.get_session(session.id).await.unwrap();
        assert_eq!(updated.current_summary.as_deref(), Some("merged A and B"));
        // summarize A, summarize B, merge B into A.
        assert_eq!(coordinator.summarizer.model().call_count(), 3);
    }

    #[tokio::test]
    async fn search_spans_chunks_from_both_uploads() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open_in_memory().unwrap();
        let coordinator = coordinator(
            &dir,
            store.clone(),
            ScriptedModel::replying(&["summary A", "summary B", "merged"]),
        );
        let session = store.create_session("two docs").await.unwrap();

        coordinator
            .ingest(
                session.id,
                &pdf(&dir, "a.pdf", "Alpha project owns the hydraulics maintenance work"),
            )
            .await
            .unwrap();
        coordinator
            .ingest(
                session.id,
                &pdf(&dir, "b.pdf", "Beta initiative covers revenue forecasting models"),
            )
            .await
            .unwrap();

        let manager =
            IndexManager::new(dir.path().join("indexes"), HashedNgramEmbedder::default());
        let index = manager.open(&manager.location_for(session.id)).unwrap();

        let about_a = manager.search(&index, "hydraulics maintenance", 1);
        assert!(about_a[0].text.contains("hydraulics"));

        let about_b = manager.search(&index, "revenue forecasting", 1);
        assert!(about_b[0].text.contains("revenue"));
    }

    #[tokio::test]
    async fn empty_pdf_fails_fast_and_leaves_the_session_untouched() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open_in_memory().unwrap();
        let coordinator = coordinator(&dir, store.clone(), ScriptedModel::replying(&["unused"]));
        let session = store.create_session("empty upload").await.unwrap();
        let file = pdf(&dir, "blank.pdf", "");

        let result = coordinator.ingest(session.id, &file).await;
        assert!(matches!(result, Err(IngestError::EmptyContent(_))));

        let unchanged = store.get_session(session.id).await.unwrap();
        assert!(unchanged.current_summary.is_none());
        assert!(unchanged.index_reference.is_none());
        assert_eq!(index_len(&dir, session.id), 0);
        assert_eq!(coordinator.summarizer.model().call_count(), 0);
    }

    #[tokio::test]
    async fn ingesting_into_a_missing_session_is_not_found() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open_in_memory().unwrap();
        let coordinator = coordinator(&dir, store, ScriptedModel::replying(&["unused"]));
        let file = pdf(&dir, "orphan.pdf", "some text");

        let result = coordinator.ingest(404, &file).await;
        assert!(matches!(
            result,
            Err(IngestError::Store(StoreError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn answering_without_documents_returns_guidance_and_persists_nothing() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open_in_memory().unwrap();
        let coordinator = coordinator(&dir, store.clone(), ScriptedModel::replying(&["unused"]));
        let session = store.create_session("no docs").await.unwrap();

        let reply = coordinator
            .answer(session.id, "what is this about?")
            .await
            .unwrap();
        assert_eq!(reply, NO_DOCUMENTS_REPLY);
        assert!(store.messages(session.id).await.unwrap().is_empty());
        assert_eq!(coordinator.answerer.model().call_count(), 0);
    }

    #[tokio::test]
    async fn a_dangling_index_reference_degrades_to_the_reupload_reply() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open_in_memory().unwrap();
        let coordinator = coordinator(&dir, store.clone(), ScriptedModel::replying(&["unused"]));
        let session = store.create_session("stale").await.unwrap();
        store
            .commit_ingestion(session.id, "/nowhere/session_1.json", "old summary")
            .await
            .unwrap();

        let reply = coordinator.answer(session.id, "anything?").await.unwrap();
        assert_eq!(reply, INDEX_UNAVAILABLE_REPLY);
        assert!(store.messages(session.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn a_chat_turn_persists_the_user_assistant_pair() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open_in_memory().unwrap();
        let coordinator = coordinator(
            &dir,
            store.clone(),
            ScriptedModel::replying(&["doc summary", "revenue was five million"]),
        );
        let session = store.create_session("chatty").await.unwrap();
        let file = pdf(&dir, "doc.pdf", "Revenue for the quarter was five million dollars");
        coordinator.ingest(session.id, &file).await.unwrap();

        let answer = coordinator
            .answer(session.id, "what was revenue?")
            .await
            .unwrap();
        assert_eq!(answer, "revenue was five million");

        let messages = store.messages(session.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "what was revenue?");
        assert_eq!(messages[1].content, "revenue was five million");
    }

    #[tokio::test]
    async fn a_failing_model_persists_no_half_pair() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open_in_memory().unwrap();

        let ingesting = coordinator(&dir, store.clone(), ScriptedModel::replying(&["summary"]));
        let session = store.create_session("flaky").await.unwrap();
        let file = pdf(&dir, "doc.pdf", "Some indexed content worth retrieving");
        ingesting.ingest(session.id, &file).await.unwrap();

        let failing = coordinator(&dir, store.clone(), ScriptedModel::failing());
        let result = failing.answer(session.id, "what is in here?").await;
        assert!(matches!(result, Err(ChatError::Model(_))));
        assert!(store.messages(session.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upload_records_the_document_and_ingests_it() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open_in_memory().unwrap();
        let coordinator = coordinator(&dir, store.clone(), ScriptedModel::replying(&["summary"]));
        let session = store.create_session("uploads").await.unwrap();
        let source = pdf(&dir, "minutes.pdf", "Decisions and action items from Monday");

        let document = coordinator.upload(session.id, &source).await.unwrap();
        assert_eq!(document.filename, "minutes.pdf");
        assert!(Path::new(&document.stored_path).exists());

        let listed = store.documents(session.id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(!listed[0].checksum.is_empty());

        let updated = store.get_session(session.id).await.unwrap();
        assert!(updated.index_reference.is_some());
    }

    #[tokio::test]
    async fn failed_upload_rolls_back_storage_and_document_row() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open_in_memory().unwrap();
        let coordinator = coordinator(&dir, store.clone(), ScriptedModel::replying(&["unused"]));
        let session = store.create_session("rollback").await.unwrap();
        let source = pdf(&dir, "blank.pdf", "");

        let result = coordinator.upload(session.id, &source).await;
        assert!(matches!(result, Err(IngestError::EmptyContent(_))));

        assert!(store.documents(session.id).await.unwrap().is_empty());
        let storage_root = dir.path().join("storage");
        let leftovers = std::fs::read_dir(&storage_root)
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftovers, 0);
    }
}
