use crate::services::{
    blob_service::BlobStore, catalog_service::CatalogService, session_service::SessionManager,
};
use std::sync::Arc;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Process-wide in-flight chunk sessions.
    pub sessions: SessionManager,

    /// The durable file/view/group catalog.
    pub catalog: CatalogService,

    /// Blob host client used for finalize and single-shot uploads.
    pub blob: Arc<dyn BlobStore>,
}
