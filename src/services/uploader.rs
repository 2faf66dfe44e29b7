//! Client-side upload coordinator.
//!
//! Decides single-shot vs. chunked transfer, drives the chunk sequence
//! sequentially, and requests finalization. The wire is abstracted behind
//! [`ChunkTransport`] so the same coordinator runs against the HTTP API or
//! an in-process harness in tests.

use crate::services::blob_service::StoredAsset;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Files below this size go up in one request.
pub const SINGLE_SHOT_THRESHOLD: usize = 50 * 1024 * 1024;

/// Chunk size for files above the threshold.
pub const CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Per-request timeout for chunk and finalize calls, in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 180;

#[derive(Debug, Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self::new(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("chunk {index} of {total} failed: {reason}")]
    ChunkFailed {
        index: usize,
        total: usize,
        reason: String,
    },
    #[error("finalize failed: {0}")]
    FinalizeFailed(String),
    #[error("single-shot transfer failed: {0}")]
    TransferFailed(String),
}

/// Server acknowledgement for one stored chunk.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkAck {
    pub received_chunks: usize,
    pub total_chunks: usize,
}

/// Progress callback payload, emitted after every chunk and at finalize.
#[derive(Clone, Copy, Debug)]
pub struct UploadProgress {
    pub sent_chunks: usize,
    pub total_chunks: usize,
    pub finalized: bool,
}

/// Transport for the three upload operations.
#[async_trait]
pub trait ChunkTransport: Send + Sync {
    async fn send_chunk(
        &self,
        upload_id: &str,
        chunk_index: usize,
        total_chunks: usize,
        file_name: &str,
        payload: Bytes,
    ) -> Result<ChunkAck, TransportError>;

    async fn finalize(
        &self,
        upload_id: &str,
        file_name: &str,
        destination: Option<&str>,
    ) -> Result<StoredAsset, TransportError>;

    async fn send_whole(
        &self,
        file_name: &str,
        payload: Bytes,
        destination: Option<&str>,
    ) -> Result<StoredAsset, TransportError>;
}

/// Drives one upload at a time. No partial resume: any chunk failure aborts
/// the attempt, and a retry starts over with a fresh upload id.
pub struct UploadCoordinator<T: ChunkTransport> {
    transport: T,
    threshold: usize,
    chunk_size: usize,
}

impl<T: ChunkTransport> UploadCoordinator<T> {
    pub fn new(transport: T) -> Self {
        Self::with_limits(transport, SINGLE_SHOT_THRESHOLD, CHUNK_SIZE)
    }

    pub fn with_limits(transport: T, threshold: usize, chunk_size: usize) -> Self {
        Self {
            transport,
            threshold,
            chunk_size,
        }
    }

    pub async fn upload<F>(
        &self,
        data: Bytes,
        file_name: &str,
        destination: Option<&str>,
        mut progress: F,
    ) -> Result<StoredAsset, UploadError>
    where
        F: FnMut(UploadProgress) + Send,
    {
        if data.len() < self.threshold {
            let asset = self
                .transport
                .send_whole(file_name, data, destination)
                .await
                .map_err(|err| UploadError::TransferFailed(err.to_string()))?;
            progress(UploadProgress {
                sent_chunks: 1,
                total_chunks: 1,
                finalized: true,
            });
            return Ok(asset);
        }

        let upload_id = Uuid::new_v4().simple().to_string();
        let total_chunks = data.len().div_ceil(self.chunk_size);
        tracing::debug!(upload_id = %upload_id, total_chunks, "starting chunked upload");

        for index in 0..total_chunks {
            let start = index * self.chunk_size;
            let end = usize::min(start + self.chunk_size, data.len());
            let payload = data.slice(start..end);

            let ack = self
                .transport
                .send_chunk(&upload_id, index, total_chunks, file_name, payload)
                .await
                .map_err(|err| UploadError::ChunkFailed {
                    index,
                    total: total_chunks,
                    reason: err.to_string(),
                })?;
            tracing::trace!(
                upload_id = %upload_id,
                received = ack.received_chunks,
                total = ack.total_chunks,
                "chunk acknowledged"
            );
            progress(UploadProgress {
                sent_chunks: index + 1,
                total_chunks,
                finalized: false,
            });
        }

        let asset = self
            .transport
            .finalize(&upload_id, file_name, destination)
            .await
            .map_err(|err| UploadError::FinalizeFailed(err.to_string()))?;
        progress(UploadProgress {
            sent_chunks: total_chunks,
            total_chunks,
            finalized: true,
        });
        Ok(asset)
    }
}

/// HTTP transport against the dropstore endpoints.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct AssetEnvelope {
    data: AssetBody,
}

#[derive(Deserialize)]
struct AssetBody {
    asset_id: u64,
    download_url: String,
    name: String,
    size: u64,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    async fn read_asset(response: reqwest::Response) -> Result<StoredAsset, TransportError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::new(format!("status {status}: {body}")));
        }
        let envelope: AssetEnvelope = response
            .json()
            .await
            .map_err(|err| TransportError::new(err.to_string()))?;
        Ok(StoredAsset {
            id: envelope.data.asset_id,
            download_url: envelope.data.download_url,
            name: envelope.data.name,
            size: envelope.data.size,
        })
    }
}

#[async_trait]
impl ChunkTransport for HttpTransport {
    async fn send_chunk(
        &self,
        upload_id: &str,
        chunk_index: usize,
        total_chunks: usize,
        file_name: &str,
        payload: Bytes,
    ) -> Result<ChunkAck, TransportError> {
        let response = self
            .client
            .post(format!("{}/upload/chunk", self.base_url))
            .query(&[
                ("uploadId", upload_id),
                ("chunkIndex", &chunk_index.to_string()),
                ("totalChunks", &total_chunks.to_string()),
                ("fileName", file_name),
            ])
            .header("Content-Type", "application/octet-stream")
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::new(format!("status {status}: {body}")));
        }
        response
            .json()
            .await
            .map_err(|err| TransportError::new(err.to_string()))
    }

    async fn finalize(
        &self,
        upload_id: &str,
        file_name: &str,
        destination: Option<&str>,
    ) -> Result<StoredAsset, TransportError> {
        let response = self
            .client
            .post(format!("{}/upload/finalize", self.base_url))
            .json(&json!({
                "uploadId": upload_id,
                "fileName": file_name,
                "releaseUploadUrl": destination,
            }))
            .send()
            .await?;
        Self::read_asset(response).await
    }

    async fn send_whole(
        &self,
        file_name: &str,
        payload: Bytes,
        destination: Option<&str>,
    ) -> Result<StoredAsset, TransportError> {
        let mut request = self
            .client
            .post(format!("{}/upload", self.base_url))
            .header("X-File-Name", file_name)
            .header("Content-Type", "application/octet-stream")
            .body(payload);
        if let Some(target) = destination {
            request = request.header("X-Upload-Url", target);
        }
        Self::read_asset(request.send().await?).await
    }
}
