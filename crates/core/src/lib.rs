pub mod answerer;
pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod index;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod storage;
pub mod store;
pub mod stores;
pub mod summarizer;

pub use answerer::{
    classify_format, Answerer, INDEX_UNAVAILABLE_REPLY, NO_DOCUMENTS_REPLY, NO_MATCH_REPLY,
};
pub use chunking::split_text;
pub use embeddings::{Embedder, HashedNgramEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{ChatError, IndexError, IngestError, ModelError, StoreError};
pub use extractor::{LopdfExtractor, PdfExtractor};
pub use index::{IndexManager, SessionIndex, DEFAULT_TOP_K};
pub use llm::{ChatModel, GroqChatModel, ModelConfig};
pub use models::{ChatMessage, ChunkingConfig, Document, MessageRole, RetrievedChunk, Session};
pub use orchestrator::{SessionCoordinator, RECENT_CONTEXT_MESSAGES};
pub use storage::DocumentStorage;
pub use store::SessionStore;
pub use stores::SqliteStore;
pub use summarizer::{recent_context, Summarizer, SUMMARY_CHAR_BUDGET};
