//! Defines routes for the upload and catalog endpoints.
//!
//! ## Structure
//! - **Upload endpoints**
//!   - `POST /upload`          — single-shot transfer (raw or base64 JSON)
//!   - `POST /upload/chunk`    — store one chunk of a multi-part upload
//!   - `POST /upload/finalize` — reassemble, store, and catalog an upload
//!
//! - **Catalog endpoints**
//!   - `GET  /files`  — resolve a file/view/group id (query parameters)
//!   - `POST /files`  — same lookup with a JSON body
//!   - `POST /views`  — create a shareable view
//!   - `POST /groups` — create a named bundle

use crate::{
    handlers::{
        catalog_handlers::{create_group, create_view, lookup_files, lookup_files_post},
        health_handlers::{healthz, readyz},
        upload_handlers::{finalize_upload, upload_chunk, upload_single},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Largest accepted request body. Sized for a full single-shot upload plus
/// the base64 inflation of the JSON variant, well above the 5 MB chunks of
/// multi-part transfers.
const MAX_BODY_BYTES: usize = 80 * 1024 * 1024;

/// Build and return the router for all service routes.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // upload endpoints
        .route("/upload", post(upload_single))
        .route("/upload/chunk", post(upload_chunk))
        .route("/upload/finalize", post(finalize_upload))
        // catalog endpoints
        .route("/files", get(lookup_files).post(lookup_files_post))
        .route("/views", post(create_view))
        .route("/groups", post(create_group))
        // upload bodies are far larger than the 2 MB extractor default
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}
