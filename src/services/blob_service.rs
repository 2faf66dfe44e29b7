//! Blob store adapter — whole-object uploads to the external release host.
//!
//! The adapter takes an already-complete byte buffer; all chunking happens
//! upstream of this layer. Upload targets arrive from the host API as URI
//! templates (`.../assets{?name,label}`) and must be sanitized before use.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Connect timeout in seconds.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Total upload timeout in seconds. Uploads that outlive this are failures;
/// the adapter never retries on its own.
const UPLOAD_TIMEOUT_SECS: u64 = 120;

const USER_AGENT: &str = "dropstore/0.1";

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob upload failed with status {status}: {body}")]
    UploadFailed { status: u16, body: String },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("malformed blob host response: {0}")]
    Malformed(String),
}

pub type BlobResult<T> = Result<T, BlobError>;

/// A stored object as reported by the blob host.
#[derive(Clone, Debug)]
pub struct StoredAsset {
    pub id: u64,
    pub download_url: String,
    pub name: String,
    pub size: u64,
}

/// A provisioned release that can receive asset uploads.
#[derive(Clone, Debug)]
pub struct ReleaseInfo {
    pub id: u64,
    pub tag: String,
    /// Upload target, already sanitized of template placeholders.
    pub upload_url: String,
}

/// Uploads opaque binaries and provisions upload destinations.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Create a release to attach assets to. Used when a finalize request
    /// does not name a destination of its own.
    async fn create_release(&self, tag: &str) -> BlobResult<ReleaseInfo>;

    /// Upload `bytes` as one complete object and return its locator.
    async fn put_object(
        &self,
        upload_target: &str,
        file_name: &str,
        bytes: Bytes,
    ) -> BlobResult<StoredAsset>;
}

/// Release-host client over the GitHub-style releases API.
pub struct ReleaseClient {
    client: reqwest::Client,
    api_base: String,
    repo: String,
    token: String,
}

#[derive(Deserialize)]
struct AssetResponse {
    id: u64,
    name: String,
    size: u64,
    browser_download_url: String,
}

#[derive(Deserialize)]
struct ReleaseResponse {
    id: u64,
    tag_name: String,
    upload_url: String,
}

impl ReleaseClient {
    pub fn new(
        api_base: impl Into<String>,
        repo: impl Into<String>,
        token: impl Into<String>,
    ) -> BlobResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(UPLOAD_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            api_base: api_base.into(),
            repo: repo.into(),
            token: token.into(),
        })
    }
}

#[async_trait]
impl BlobStore for ReleaseClient {
    async fn create_release(&self, tag: &str) -> BlobResult<ReleaseInfo> {
        let url = format!("{}/repos/{}/releases", self.api_base, self.repo);
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .json(&json!({ "tag_name": tag, "name": tag }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BlobError::UploadFailed {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let parsed: ReleaseResponse = response
            .json()
            .await
            .map_err(|err| BlobError::Malformed(err.to_string()))?;
        Ok(ReleaseInfo {
            id: parsed.id,
            tag: parsed.tag_name,
            upload_url: sanitize_upload_target(&parsed.upload_url),
        })
    }

    async fn put_object(
        &self,
        upload_target: &str,
        file_name: &str,
        bytes: Bytes,
    ) -> BlobResult<StoredAsset> {
        let base = sanitize_upload_target(upload_target);
        let url = format!("{}?name={}", base, urlencoding::encode(file_name));

        let length = bytes.len();
        tracing::debug!(url = %url, bytes = length, "uploading object to blob host");

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .header("Content-Type", "application/octet-stream")
            .header("Content-Length", length)
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BlobError::UploadFailed {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let parsed: AssetResponse = response
            .json()
            .await
            .map_err(|err| BlobError::Malformed(err.to_string()))?;
        Ok(StoredAsset {
            id: parsed.id,
            download_url: parsed.browser_download_url,
            name: parsed.name,
            size: parsed.size,
        })
    }
}

/// Strip URI-template placeholders from an upload target.
///
/// The host API returns upload URLs of the form
/// `https://uploads.example/repos/o/r/releases/1/assets{?name,label}`; the
/// braced sections are template syntax, not literal query parameters, and
/// must be removed before a real `name` parameter is appended.
pub fn sanitize_upload_target(target: &str) -> String {
    let mut out = String::with_capacity(target.len());
    let mut depth = 0usize;
    for ch in target.chars() {
        match ch {
            '{' => depth += 1,
            '}' if depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(ch),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_query_template_suffix() {
        let url = "https://uploads.example/repos/o/r/releases/9/assets{?name,label}";
        assert_eq!(
            sanitize_upload_target(url),
            "https://uploads.example/repos/o/r/releases/9/assets"
        );
    }

    #[test]
    fn plain_url_is_unchanged() {
        let url = "https://uploads.example/repos/o/r/releases/9/assets";
        assert_eq!(sanitize_upload_target(url), url);
    }

    #[test]
    fn strips_multiple_template_sections() {
        let url = "https://uploads.example/{owner}/releases/assets{?name}";
        assert_eq!(
            sanitize_upload_target(url),
            "https://uploads.example//releases/assets"
        );
    }

    #[test]
    fn file_names_are_url_encoded() {
        let encoded = urlencoding::encode("my file (1).mp4");
        assert_eq!(encoded, "my%20file%20%281%29.mp4");
    }
}
