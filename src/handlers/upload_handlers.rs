//! HTTP handlers for the upload path: chunk arrival, finalize, and the
//! single-shot transfer.
//!
//! Both single-shot variants (raw binary with headers, JSON with a base64
//! payload) converge on the same blob-store call and catalog append as
//! finalize does.

use crate::{
    errors::AppError,
    models::record::FileRecord,
    services::{blob_service::StoredAsset, catalog_service::hash_password},
    state::AppState,
};
use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, header},
};
use base64::{Engine as _, engine::general_purpose};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

const OCTET_STREAM: &str = "application/octet-stream";

/// Query parameters carried by every chunk request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkParams {
    pub upload_id: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub file_name: String,
    pub mime_type: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResponse {
    pub success: bool,
    pub chunk_index: usize,
    pub received_chunks: usize,
    pub total_chunks: usize,
}

/// `POST /upload/chunk` — store one chunk, creating the session on first
/// sight of the upload id. The body is the raw chunk bytes.
pub async fn upload_chunk(
    State(state): State<AppState>,
    Query(params): Query<ChunkParams>,
    body: Bytes,
) -> Result<Json<ChunkResponse>, AppError> {
    let mime = params.mime_type.as_deref().unwrap_or(OCTET_STREAM);
    let progress = state
        .sessions
        .begin_or_continue(
            &params.upload_id,
            params.chunk_index,
            params.total_chunks,
            &params.file_name,
            mime,
            body,
        )
        .await?;

    Ok(Json(ChunkResponse {
        success: true,
        chunk_index: params.chunk_index,
        received_chunks: progress.received_chunks,
        total_chunks: progress.total_chunks,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest {
    pub upload_id: String,
    pub file_name: Option<String>,
    #[serde(alias = "destination")]
    pub release_upload_url: Option<String>,
    pub password: Option<String>,
}

/// `POST /upload/finalize` — reassemble the session, push the complete
/// object to the blob host, and append its catalog record.
pub async fn finalize_upload(
    State(state): State<AppState>,
    Json(req): Json<FinalizeRequest>,
) -> Result<Json<Value>, AppError> {
    let completed = state.sessions.finalize(&req.upload_id).await?;
    let file_name = req.file_name.unwrap_or(completed.file_name);

    let checksum = format!("{:x}", md5::compute(&completed.data));
    tracing::debug!(
        upload_id = %req.upload_id,
        bytes = completed.data.len(),
        %checksum,
        "reassembled upload"
    );

    let (asset, file_id) = store_and_record(
        &state,
        req.release_upload_url,
        &file_name,
        &completed.mime_type,
        req.password,
        completed.data,
    )
    .await?;

    Ok(Json(asset_response(&asset, &file_id)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleShotRequest {
    pub file_name: String,
    /// Base64-encoded payload.
    pub data: String,
    pub upload_url: Option<String>,
    pub mime_type: Option<String>,
    pub password: Option<String>,
}

/// `POST /upload` — single-shot transfer for files under the chunk
/// threshold.
///
/// Accepts either a JSON body with a base64 payload, or the raw bytes with
/// `X-Upload-Url` / `X-File-Name` / `X-Is-Base64` headers.
pub async fn upload_single(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or(OCTET_STREAM);

    let (file_name, bytes, upload_url, mime, password) =
        if content_type.starts_with("application/json") {
            let req: SingleShotRequest = serde_json::from_slice(&body)
                .map_err(|err| AppError::bad_request(format!("invalid upload body: {err}")))?;
            let decoded = general_purpose::STANDARD
                .decode(req.data.as_bytes())
                .map_err(|err| AppError::bad_request(format!("invalid base64 payload: {err}")))?;
            (
                req.file_name,
                Bytes::from(decoded),
                req.upload_url,
                req.mime_type.unwrap_or_else(|| OCTET_STREAM.to_string()),
                req.password,
            )
        } else {
            let file_name = header_value(&headers, "x-file-name")
                .ok_or_else(|| AppError::bad_request("missing X-File-Name header"))?;
            let upload_url = header_value(&headers, "x-upload-url");
            let is_base64 = header_value(&headers, "x-is-base64")
                .map(|value| value == "true" || value == "1")
                .unwrap_or(false);
            let bytes = if is_base64 {
                let decoded = general_purpose::STANDARD.decode(body.as_ref()).map_err(
                    |err| AppError::bad_request(format!("invalid base64 payload: {err}")),
                )?;
                Bytes::from(decoded)
            } else {
                body
            };
            (
                file_name,
                bytes,
                upload_url,
                content_type.to_string(),
                None,
            )
        };

    let (asset, file_id) =
        store_and_record(&state, upload_url, &file_name, &mime, password, bytes).await?;
    Ok(Json(asset_response(&asset, &file_id)))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Push a complete object to the blob host and append its catalog record.
/// Provisions a release when the caller did not name a destination.
async fn store_and_record(
    state: &AppState,
    destination: Option<String>,
    file_name: &str,
    mime_type: &str,
    password: Option<String>,
    bytes: Bytes,
) -> Result<(StoredAsset, String), AppError> {
    let (target, release) = match destination.filter(|url| !url.is_empty()) {
        Some(url) => (url, None),
        None => {
            let tag = format!("upload-{}", &Uuid::new_v4().simple().to_string()[..8]);
            let release = state.blob.create_release(&tag).await?;
            (release.upload_url.clone(), Some(release))
        }
    };

    let asset = state.blob.put_object(&target, file_name, bytes).await?;

    let file_id = Uuid::new_v4().simple().to_string();
    let record = FileRecord {
        file_id: file_id.clone(),
        file_name: file_name.to_string(),
        file_size: asset.size,
        mime_type: mime_type.to_string(),
        download_url: asset.download_url.clone(),
        release_id: release.as_ref().map(|release| release.id),
        release_tag: release.map(|release| release.tag),
        uploaded_at: Utc::now(),
        password_hash: password.map(|plain| hash_password(&plain)),
    };
    state.catalog.append_file(record).await?;

    tracing::info!(file_id = %file_id, name = %asset.name, size = asset.size, "upload recorded");
    Ok((asset, file_id))
}

fn asset_response(asset: &StoredAsset, file_id: &str) -> Value {
    json!({
        "success": true,
        "fileId": file_id,
        "data": {
            "asset_id": asset.id,
            "download_url": asset.download_url,
            "name": asset.name,
            "size": asset.size,
        }
    })
}
