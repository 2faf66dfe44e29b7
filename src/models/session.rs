//! In-flight multi-part upload sessions.

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// Server-side state for one in-progress chunked upload.
///
/// Sessions live only in process memory. A restart loses them, and the
/// client must retry the upload from scratch with a fresh upload id.
#[derive(Clone, Debug)]
pub struct UploadSession {
    /// Opaque token naming this upload across chunk requests.
    pub upload_id: String,

    /// Chunk count declared when the session was created. Fixed for the
    /// session's lifetime.
    pub total_chunks: usize,

    /// One slot per chunk index. Chunks arrive in any order and are stored
    /// by index, never appended.
    pub chunks: Vec<Option<Bytes>>,

    pub file_name: String,

    pub declared_mime_type: String,

    pub created_at: DateTime<Utc>,

    /// Updated on every chunk arrival; drives the expiry sweep.
    pub last_touched_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn new(
        upload_id: String,
        total_chunks: usize,
        file_name: String,
        declared_mime_type: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            upload_id,
            total_chunks,
            chunks: vec![None; total_chunks],
            file_name,
            declared_mime_type,
            created_at: now,
            last_touched_at: now,
        }
    }

    /// Count of filled chunk slots.
    pub fn received(&self) -> usize {
        self.chunks.iter().filter(|slot| slot.is_some()).count()
    }

    /// Indices of chunks that have not arrived yet, in order.
    pub fn missing_indices(&self) -> Vec<usize> {
        self.chunks
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.is_none().then_some(index))
            .collect()
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_touched_at = now;
    }
}
