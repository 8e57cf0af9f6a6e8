use crate::error::IngestError;
use crate::models::ChunkingConfig;

/// Splits text into a deterministic sequence of character windows. Adjacent
/// chunks share `overlap` characters so context survives chunk boundaries.
///
/// Fails with `EmptyContent` when the trimmed input is empty: an upload that
/// produced no usable text must never reach the vector index.
pub fn split_text(text: &str, config: &ChunkingConfig) -> Result<Vec<String>, IngestError> {
    if text.trim().is_empty() {
        return Err(IngestError::EmptyContent(
            "document produced no chunkable text".to_string(),
        ));
    }

    let chunk_size = config.chunk_size.max(1);
    let overlap = config.overlap.min(chunk_size.saturating_sub(1));
    let step = chunk_size - overlap;

    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect::<String>());
        if end == chars.len() {
            break;
        }
        start += step;
    }

    if chunks.is_empty() {
        return Err(IngestError::EmptyContent(
            "chunking produced no segments".to_string(),
        ));
    }

    Ok(chunks)
}
