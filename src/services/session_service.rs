//! Chunk session manager — process-wide state for in-flight chunked uploads.
//!
//! Chunks for one upload arrive as independent requests, in any order, and
//! are stored by index. The session map is the only process-wide mutable
//! state in the service; it is never persisted, so a restart loses in-flight
//! sessions and the client retries from scratch.

use crate::models::session::UploadSession;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use thiserror::Error;
use tokio::sync::Mutex as SessionLock;

/// Sessions idle longer than this are swept.
pub const SESSION_TTL_SECS: i64 = 60 * 60;

/// How often the background sweep runs.
pub const SWEEP_INTERVAL_SECS: u64 = 10 * 60;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("upload session `{0}` not found")]
    SessionNotFound(String),
    #[error("upload `{upload_id}` incomplete: missing chunk indices {missing:?}")]
    IncompleteUpload {
        upload_id: String,
        missing: Vec<usize>,
    },
    #[error("chunk index {index} out of range for {total} declared chunks")]
    ChunkIndexOutOfRange { index: usize, total: usize },
    #[error("declared chunk count {given} does not match session's {expected}")]
    ChunkCountMismatch { given: usize, expected: usize },
    #[error("totalChunks must be at least 1")]
    EmptyChunkCount,
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Progress report returned after storing a chunk.
#[derive(Clone, Copy, Debug)]
pub struct ChunkProgress {
    pub received_chunks: usize,
    pub total_chunks: usize,
}

/// A fully reassembled upload, ready for the blob store.
#[derive(Clone, Debug)]
pub struct CompletedUpload {
    pub data: Bytes,
    pub file_name: String,
    pub mime_type: String,
}

/// Tracks every in-flight chunked upload in this process.
///
/// The outer map lock is held only for lookups and inserts; each session has
/// its own async lock, so handlers for the same upload id are serialized
/// while different uploads proceed independently.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<Mutex<HashMap<String, Arc<SessionLock<UploadSession>>>>>,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    fn entry(
        &self,
        upload_id: &str,
        total_chunks: usize,
        file_name: &str,
        mime_type: &str,
        now: DateTime<Utc>,
    ) -> Arc<SessionLock<UploadSession>> {
        let mut map = self.sessions.lock().expect("session map lock poisoned");
        map.entry(upload_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(upload_id, total_chunks, "created upload session");
                Arc::new(SessionLock::new(UploadSession::new(
                    upload_id.to_string(),
                    total_chunks,
                    file_name.to_string(),
                    mime_type.to_string(),
                    now,
                )))
            })
            .clone()
    }

    fn lookup(&self, upload_id: &str) -> Option<Arc<SessionLock<UploadSession>>> {
        let map = self.sessions.lock().expect("session map lock poisoned");
        map.get(upload_id).cloned()
    }

    /// Store `payload` at `chunks[chunk_index]`, creating the session on
    /// first sight of `upload_id`.
    pub async fn begin_or_continue(
        &self,
        upload_id: &str,
        chunk_index: usize,
        total_chunks: usize,
        file_name: &str,
        mime_type: &str,
        payload: Bytes,
    ) -> SessionResult<ChunkProgress> {
        if total_chunks == 0 {
            return Err(SessionError::EmptyChunkCount);
        }
        if chunk_index >= total_chunks {
            return Err(SessionError::ChunkIndexOutOfRange {
                index: chunk_index,
                total: total_chunks,
            });
        }

        let now = Utc::now();
        let slot = self.entry(upload_id, total_chunks, file_name, mime_type, now);
        let mut session = slot.lock().await;

        if session.total_chunks != total_chunks {
            return Err(SessionError::ChunkCountMismatch {
                given: total_chunks,
                expected: session.total_chunks,
            });
        }

        session.chunks[chunk_index] = Some(payload);
        session.touch(now);

        let progress = ChunkProgress {
            received_chunks: session.received(),
            total_chunks: session.total_chunks,
        };
        tracing::debug!(
            upload_id = %session.upload_id,
            chunk_index,
            received = progress.received_chunks,
            total = progress.total_chunks,
            "stored chunk"
        );
        Ok(progress)
    }

    /// Reassemble a complete session into one contiguous buffer and remove
    /// it. Fails without side effects when the session is unknown or any
    /// chunk slot is still empty.
    pub async fn finalize(&self, upload_id: &str) -> SessionResult<CompletedUpload> {
        let slot = self
            .lookup(upload_id)
            .ok_or_else(|| SessionError::SessionNotFound(upload_id.to_string()))?;
        let session = slot.lock().await;

        let missing = session.missing_indices();
        if !missing.is_empty() {
            return Err(SessionError::IncompleteUpload {
                upload_id: upload_id.to_string(),
                missing,
            });
        }

        let total: usize = session
            .chunks
            .iter()
            .flatten()
            .map(|chunk| chunk.len())
            .sum();
        let mut buffer = Vec::with_capacity(total);
        for chunk in session.chunks.iter().flatten() {
            buffer.extend_from_slice(chunk);
        }

        let completed = CompletedUpload {
            data: Bytes::from(buffer),
            file_name: session.file_name.clone(),
            mime_type: session.declared_mime_type.clone(),
        };
        let age_ms = (Utc::now() - session.created_at).num_milliseconds();
        drop(session);

        // Two racing finalize calls both reach this point with the full
        // buffer; only the one that removes the entry may commit.
        let removed = {
            let mut map = self.sessions.lock().expect("session map lock poisoned");
            map.remove(upload_id)
        };
        if removed.is_none() {
            return Err(SessionError::SessionNotFound(upload_id.to_string()));
        }

        tracing::info!(
            upload_id,
            bytes = completed.data.len(),
            age_ms,
            "session finalized"
        );
        Ok(completed)
    }

    /// Drop sessions idle past the TTL. Returns how many were removed.
    ///
    /// Housekeeping only: a client whose session disappears gets
    /// `SessionNotFound` on its next request and restarts the upload.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut map = self.sessions.lock().expect("session map lock poisoned");
        let before = map.len();
        map.retain(|upload_id, slot| match slot.try_lock() {
            Ok(session) => {
                let keep = now - session.last_touched_at < self.ttl;
                if !keep {
                    tracing::info!(%upload_id, "expiring idle upload session");
                }
                keep
            }
            // A held lock means a handler is touching the session right now.
            Err(_) => true,
        });
        before - map.len()
    }

    #[cfg(test)]
    fn session_count(&self) -> usize {
        self.sessions.lock().expect("session map lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager {
        SessionManager::new(Duration::seconds(SESSION_TTL_SECS))
    }

    fn chunk(byte: u8, len: usize) -> Bytes {
        Bytes::from(vec![byte; len])
    }

    #[tokio::test]
    async fn chunks_reassemble_in_index_order_regardless_of_arrival() {
        let mgr = manager();
        // Submit in order [1, 0, 2].
        for index in [1usize, 0, 2] {
            let progress = mgr
                .begin_or_continue("u1", index, 3, "clip.mp4", "video/mp4", chunk(index as u8, 4))
                .await
                .unwrap();
            assert_eq!(progress.total_chunks, 3);
        }

        let done = mgr.finalize("u1").await.unwrap();
        let mut expected = Vec::new();
        expected.extend_from_slice(&[0; 4]);
        expected.extend_from_slice(&[1; 4]);
        expected.extend_from_slice(&[2; 4]);
        assert_eq!(done.data.as_ref(), expected.as_slice());
        assert_eq!(done.file_name, "clip.mp4");
        assert_eq!(done.mime_type, "video/mp4");
    }

    #[tokio::test]
    async fn twelve_megabyte_file_in_five_megabyte_chunks() {
        let mgr = manager();
        let mb = 1024 * 1024;
        let sizes = [5 * mb, 5 * mb, 2 * mb];
        for index in [1usize, 0, 2] {
            mgr.begin_or_continue("u1", index, 3, "big.bin", "", chunk(index as u8, sizes[index]))
                .await
                .unwrap();
        }
        let done = mgr.finalize("u1").await.unwrap();
        assert_eq!(done.data.len(), 12 * mb);
        assert_eq!(done.data[0], 0);
        assert_eq!(done.data[5 * mb], 1);
        assert_eq!(done.data[10 * mb], 2);
    }

    #[tokio::test]
    async fn finalize_reports_missing_indices() {
        let mgr = manager();
        mgr.begin_or_continue("u1", 0, 4, "f", "", chunk(0, 8))
            .await
            .unwrap();
        mgr.begin_or_continue("u1", 2, 4, "f", "", chunk(2, 8))
            .await
            .unwrap();

        let err = mgr.finalize("u1").await.unwrap_err();
        match err {
            SessionError::IncompleteUpload { missing, .. } => {
                assert_eq!(missing, vec![1, 3]);
            }
            other => panic!("expected IncompleteUpload, got {other:?}"),
        }
        // The failed finalize must not destroy the session.
        assert_eq!(mgr.session_count(), 1);
    }

    #[tokio::test]
    async fn finalize_unknown_session_fails() {
        let mgr = manager();
        assert!(matches!(
            mgr.finalize("nope").await,
            Err(SessionError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn finalize_removes_the_session() {
        let mgr = manager();
        mgr.begin_or_continue("u1", 0, 1, "f", "", chunk(7, 16))
            .await
            .unwrap();
        mgr.finalize("u1").await.unwrap();
        assert!(matches!(
            mgr.finalize("u1").await,
            Err(SessionError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn resubmitted_chunk_overwrites_its_slot() {
        let mgr = manager();
        mgr.begin_or_continue("u1", 0, 1, "f", "", chunk(1, 4))
            .await
            .unwrap();
        let progress = mgr
            .begin_or_continue("u1", 0, 1, "f", "", chunk(9, 4))
            .await
            .unwrap();
        assert_eq!(progress.received_chunks, 1);
        let done = mgr.finalize("u1").await.unwrap();
        assert_eq!(done.data.as_ref(), &[9, 9, 9, 9]);
    }

    #[tokio::test]
    async fn out_of_range_index_and_zero_count_are_rejected() {
        let mgr = manager();
        assert!(matches!(
            mgr.begin_or_continue("u1", 3, 3, "f", "", chunk(0, 1)).await,
            Err(SessionError::ChunkIndexOutOfRange { index: 3, total: 3 })
        ));
        assert!(matches!(
            mgr.begin_or_continue("u1", 0, 0, "f", "", chunk(0, 1)).await,
            Err(SessionError::EmptyChunkCount)
        ));
    }

    #[tokio::test]
    async fn chunk_count_cannot_change_mid_session() {
        let mgr = manager();
        mgr.begin_or_continue("u1", 0, 3, "f", "", chunk(0, 1))
            .await
            .unwrap();
        assert!(matches!(
            mgr.begin_or_continue("u1", 1, 5, "f", "", chunk(1, 1)).await,
            Err(SessionError::ChunkCountMismatch {
                given: 5,
                expected: 3
            })
        ));
    }

    #[tokio::test]
    async fn sweep_removes_idle_sessions() {
        let mgr = manager();
        mgr.begin_or_continue("old", 0, 2, "f", "", chunk(0, 1))
            .await
            .unwrap();
        mgr.begin_or_continue("fresh", 0, 2, "f", "", chunk(0, 1))
            .await
            .unwrap();

        // Nothing is older than the TTL yet.
        assert_eq!(mgr.sweep_expired(Utc::now()), 0);

        // Two hours later both sessions are idle past the one-hour TTL.
        let later = Utc::now() + Duration::hours(2);
        assert_eq!(mgr.sweep_expired(later), 2);
        assert_eq!(mgr.session_count(), 0);
    }
}
