use crate::error::IngestError;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub path: PathBuf,
    pub checksum: String,
}

/// Durable byte store for uploaded PDFs, keyed by session-scoped file names
/// under one root directory. Files are written once and read back by the
/// ingestion pipeline; removal exists for the cleanup-on-failure contract.
pub struct DocumentStorage {
    root: PathBuf,
}

impl DocumentStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn store(
        &self,
        session_id: i64,
        filename: &str,
        bytes: &[u8],
    ) -> Result<StoredFile, IngestError> {
        fs::create_dir_all(&self.root)?;

        let path = self.root.join(format!("session_{session_id}_{filename}"));
        fs::write(&path, bytes)?;

        let mut hasher = Sha256::new();
        hasher.update(bytes);

        Ok(StoredFile {
            path,
            checksum: format!("{:x}", hasher.finalize()),
        })
    }

    pub fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    pub fn remove(&self, path: &Path) -> Result<(), IngestError> {
        fs::remove_file(path)?;
        Ok(())
    }
}
