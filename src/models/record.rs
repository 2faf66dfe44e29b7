//! Durable catalog records: completed uploads, shareable views, named groups.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One completed upload, as persisted in a catalog shard.
///
/// `file_id` is unique across all shards combined; the append path generates
/// it and never reuses one.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Unique identifier used in share links and lookups.
    pub file_id: String,

    /// Original name of the uploaded file.
    pub file_name: String,

    /// Size of the stored object in bytes.
    pub file_size: u64,

    /// Declared content type (MIME type).
    pub mime_type: String,

    /// Stable download locator returned by the blob host.
    pub download_url: String,

    /// Release the object was attached to, when one was provisioned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_id: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_tag: Option<String>,

    /// When the upload was finalized.
    pub uploaded_at: DateTime<Utc>,

    /// Hex MD5 password gate. Internal only; stripped before records are
    /// returned to callers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
}

/// Public projection of a [`FileRecord`] with internal fields removed.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub file_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    pub download_url: String,
    pub uploaded_at: DateTime<Utc>,
}

impl From<&FileRecord> for FileInfo {
    fn from(record: &FileRecord) -> Self {
        Self {
            file_id: record.file_id.clone(),
            file_name: record.file_name.clone(),
            file_size: record.file_size,
            mime_type: record.mime_type.clone(),
            download_url: record.download_url.clone(),
            uploaded_at: record.uploaded_at,
        }
    }
}

/// A short, shareable indirection over one or more file records.
///
/// Views are created once and never mutated afterwards.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ViewRecord {
    /// Server-generated short id handed out in share links.
    pub view_id: String,

    /// Files the view points at, in display order.
    pub file_ids: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,

    pub created_at: DateTime<Utc>,
}

/// Like [`ViewRecord`], but addressed by a caller-supplied id. Used for
/// multi-file password-protected bundles.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GroupRecord {
    pub group_id: String,

    pub file_ids: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,

    pub created_at: DateTime<Utc>,
}
