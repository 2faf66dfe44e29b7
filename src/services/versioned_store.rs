//! Whole-object versioned storage with conditional writes.
//!
//! The backing service offers no transactions, partial updates, or locks:
//! every write must carry the version token obtained from the most recent
//! read, and is rejected when the object changed in between. This module
//! exposes that contract as the [`VersionedStore`] trait, with a remote
//! contents-API implementation and an in-memory compare-and-swap map used
//! by tests and local runs.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::{collections::HashMap, sync::Mutex, time::Duration};
use thiserror::Error;
use uuid::Uuid;

/// Connect timeout for the remote store, in seconds.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Total request timeout for the remote store, in seconds.
const TOTAL_TIMEOUT_SECS: u64 = 30;

const USER_AGENT: &str = "dropstore/0.1";

#[derive(Debug, Error)]
pub enum StoreError {
    /// The supplied version token no longer matches the stored object.
    #[error("version conflict writing `{0}`")]
    Conflict(String),
    #[error("store request failed with status {status}: {body}")]
    Request { status: u16, body: String },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("malformed store response for `{path}`: {reason}")]
    Malformed { path: String, reason: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// An object's content together with the version token it was read at.
#[derive(Clone, Debug, PartialEq)]
pub struct Versioned {
    pub content: String,
    pub version: String,
}

/// Whole-object reads and conditional whole-object writes.
#[async_trait]
pub trait VersionedStore: Send + Sync {
    /// Read an object. `None` when it does not exist.
    async fn get(&self, path: &str) -> StoreResult<Option<Versioned>>;

    /// Conditionally replace (or create) an object.
    ///
    /// `expected` must be the version token from the read this write is
    /// based on, or `None` to create the object. A mismatch — including
    /// creating over an object that appeared in the meantime — fails with
    /// [`StoreError::Conflict`]. Returns the new version token.
    async fn put(&self, path: &str, content: &str, expected: Option<&str>) -> StoreResult<String>;
}

/// GitHub-style repository contents API: base64 object bodies, `sha`
/// version tokens, conflicts reported as 409/422.
pub struct RemoteContentStore {
    client: reqwest::Client,
    api_base: String,
    repo: String,
    branch: String,
    token: String,
}

#[derive(Deserialize)]
struct ContentResponse {
    content: String,
    sha: String,
}

#[derive(Deserialize)]
struct WriteResponse {
    content: WrittenContent,
}

#[derive(Deserialize)]
struct WrittenContent {
    sha: String,
}

impl RemoteContentStore {
    pub fn new(
        api_base: impl Into<String>,
        repo: impl Into<String>,
        branch: impl Into<String>,
        token: impl Into<String>,
    ) -> StoreResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(TOTAL_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            api_base: api_base.into(),
            repo: repo.into(),
            branch: branch.into(),
            token: token.into(),
        })
    }

    fn object_url(&self, path: &str) -> String {
        format!("{}/repos/{}/contents/{}", self.api_base, self.repo, path)
    }
}

#[async_trait]
impl VersionedStore for RemoteContentStore {
    async fn get(&self, path: &str) -> StoreResult<Option<Versioned>> {
        let response = self
            .client
            .get(self.object_url(path))
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .query(&[("ref", self.branch.as_str())])
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Request {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let parsed: ContentResponse =
            response.json().await.map_err(|err| StoreError::Malformed {
                path: path.to_string(),
                reason: err.to_string(),
            })?;

        // The API wraps base64 content across lines.
        let raw: String = parsed.content.split_whitespace().collect();
        let bytes = general_purpose::STANDARD
            .decode(raw)
            .map_err(|err| StoreError::Malformed {
                path: path.to_string(),
                reason: format!("invalid base64 content: {err}"),
            })?;
        let content = String::from_utf8(bytes).map_err(|err| StoreError::Malformed {
            path: path.to_string(),
            reason: format!("content is not UTF-8: {err}"),
        })?;

        Ok(Some(Versioned {
            content,
            version: parsed.sha,
        }))
    }

    async fn put(&self, path: &str, content: &str, expected: Option<&str>) -> StoreResult<String> {
        let mut body = json!({
            "message": format!("update {path}"),
            "content": general_purpose::STANDARD.encode(content),
            "branch": self.branch,
        });
        if let Some(sha) = expected {
            body["sha"] = json!(sha);
        }

        let response = self
            .client
            .put(self.object_url(path))
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::CONFLICT || status == StatusCode::UNPROCESSABLE_ENTITY {
            return Err(StoreError::Conflict(path.to_string()));
        }
        if !status.is_success() {
            return Err(StoreError::Request {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let parsed: WriteResponse =
            response.json().await.map_err(|err| StoreError::Malformed {
                path: path.to_string(),
                reason: err.to_string(),
            })?;
        Ok(parsed.content.sha)
    }
}

/// In-memory compare-and-swap store.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, Versioned>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VersionedStore for MemoryStore {
    async fn get(&self, path: &str) -> StoreResult<Option<Versioned>> {
        let objects = self.objects.lock().expect("memory store lock poisoned");
        Ok(objects.get(path).cloned())
    }

    async fn put(&self, path: &str, content: &str, expected: Option<&str>) -> StoreResult<String> {
        let mut objects = self.objects.lock().expect("memory store lock poisoned");
        let matches = match (objects.get(path), expected) {
            (None, None) => true,
            (Some(existing), Some(token)) => existing.version == token,
            _ => false,
        };
        if !matches {
            return Err(StoreError::Conflict(path.to_string()));
        }

        let version = Uuid::new_v4().simple().to_string();
        objects.insert(
            path.to_string(),
            Versioned {
                content: content.to_string(),
                version: version.clone(),
            },
        );
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_read_back() {
        let store = MemoryStore::new();
        let version = store.put("meta/index.json", "{}", None).await.unwrap();
        let read = store.get("meta/index.json").await.unwrap().unwrap();
        assert_eq!(read.content, "{}");
        assert_eq!(read.version, version);
    }

    #[tokio::test]
    async fn conditional_update_with_current_token_succeeds() {
        let store = MemoryStore::new();
        let v1 = store.put("obj", "a", None).await.unwrap();
        let v2 = store.put("obj", "b", Some(&v1)).await.unwrap();
        assert_ne!(v1, v2);
        assert_eq!(store.get("obj").await.unwrap().unwrap().content, "b");
    }

    #[tokio::test]
    async fn stale_token_is_a_conflict() {
        let store = MemoryStore::new();
        let v1 = store.put("obj", "a", None).await.unwrap();
        let _v2 = store.put("obj", "b", Some(&v1)).await.unwrap();
        let err = store.put("obj", "c", Some(&v1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        // The losing write must not clobber the object.
        assert_eq!(store.get("obj").await.unwrap().unwrap().content, "b");
    }

    #[tokio::test]
    async fn create_over_existing_object_is_a_conflict() {
        let store = MemoryStore::new();
        store.put("obj", "a", None).await.unwrap();
        let err = store.put("obj", "b", None).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn missing_object_reads_as_none() {
        let store = MemoryStore::new();
        assert!(store.get("nope").await.unwrap().is_none());
    }
}
