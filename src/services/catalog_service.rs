//! Sharded, append-only file catalog over a versioned object store, plus
//! the resolver that serves share-link lookups.
//!
//! The backing store only offers whole-object conditional writes, so every
//! append is a read-version / re-apply / conditional-write transaction:
//! read the index and current shard with their version tokens, rotate to a
//! fresh shard when the current one is full, append in memory, and write
//! back with the token from the read. A rejected write means another writer
//! landed first; the whole transaction is re-run from the read, up to a
//! bounded number of attempts. This retry loop is the only thing standing
//! between two concurrent finalize calls and a silently lost append.

use crate::models::{
    record::{FileInfo, FileRecord, GroupRecord, ViewRecord},
    shard::ShardIndex,
};
use crate::services::versioned_store::{StoreError, VersionedStore};
use chrono::Utc;
use serde::{Serialize, de::DeserializeOwned};
use std::{collections::HashSet, sync::Arc, time::Duration};
use thiserror::Error;
use uuid::Uuid;

/// A shard rotates once it holds this many records...
const SHARD_MAX_RECORDS: usize = 8000;

/// ...or once its serialized form reaches this many characters.
const SHARD_MAX_CHARS: usize = 2_500_000;

/// Conditional-write attempts before giving up on an append.
const WRITE_ATTEMPTS: u32 = 3;

/// Linear backoff unit between attempts (500 ms × attempt number).
const RETRY_BACKOFF_MS: u64 = 500;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("metadata write conflict persisted after {0} attempts")]
    MetadataConflict(u32),
    #[error("no file record matches `{0}`")]
    RecordNotFound(String),
    #[error("password required")]
    PasswordRequired,
    #[error("invalid password")]
    InvalidPassword,
    #[error("group `{0}` already exists")]
    GroupAlreadyExists(String),
    #[error("view id `{0}` is already taken")]
    ViewIdTaken(String),
    #[error("catalog object `{path}` is malformed: {reason}")]
    Corrupt { path: String, reason: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Hex MD5 of a plaintext password, the form stored in records and compared
/// against the `pwd` lookup parameter.
pub fn hash_password(plain: &str) -> String {
    format!("{:x}", md5::compute(plain))
}

/// Owns every durable catalog object. No other component writes them.
#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn VersionedStore>,
    prefix: String,
    max_records: usize,
    max_chars: usize,
}

impl CatalogService {
    pub fn new(store: Arc<dyn VersionedStore>, prefix: impl Into<String>) -> Self {
        Self::with_capacity(store, prefix, SHARD_MAX_RECORDS, SHARD_MAX_CHARS)
    }

    /// Capacity override used by rotation tests.
    pub fn with_capacity(
        store: Arc<dyn VersionedStore>,
        prefix: impl Into<String>,
        max_records: usize,
        max_chars: usize,
    ) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            max_records,
            max_chars,
        }
    }

    fn index_path(&self) -> String {
        format!("{}index.json", self.prefix)
    }

    fn shard_object_path(&self, number: u32) -> String {
        format!("{}files-{}.json", self.prefix, number)
    }

    fn views_path(&self) -> String {
        format!("{}views.json", self.prefix)
    }

    fn groups_path(&self) -> String {
        format!("{}groups.json", self.prefix)
    }

    fn parse<T: DeserializeOwned>(&self, path: &str, content: &str) -> CatalogResult<T> {
        serde_json::from_str(content).map_err(|err| CatalogError::Corrupt {
            path: path.to_string(),
            reason: err.to_string(),
        })
    }

    fn encode<T: Serialize>(&self, path: &str, value: &T) -> CatalogResult<String> {
        serde_json::to_string(value).map_err(|err| CatalogError::Corrupt {
            path: path.to_string(),
            reason: err.to_string(),
        })
    }

    /// Connectivity probe for the readiness endpoint. An absent index is
    /// fine; only transport failures count.
    pub async fn ping(&self) -> CatalogResult<()> {
        self.store.get(&self.index_path()).await?;
        Ok(())
    }

    // ---- appends -----------------------------------------------------

    /// Append one record to the current shard, rotating first when full.
    ///
    /// Exhausting the retry budget is fatal for this write; the record is
    /// not persisted and the caller sees `MetadataConflict`.
    pub async fn append_file(&self, record: FileRecord) -> CatalogResult<()> {
        for attempt in 1..=WRITE_ATTEMPTS {
            match self.try_append(&record).await {
                Ok(()) => return Ok(()),
                Err(CatalogError::Store(StoreError::Conflict(path))) => {
                    tracing::warn!(
                        attempt,
                        path = %path,
                        file_id = %record.file_id,
                        "catalog write conflict, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS * attempt as u64))
                        .await;
                }
                Err(other) => return Err(other),
            }
        }
        Err(CatalogError::MetadataConflict(WRITE_ATTEMPTS))
    }

    /// One read-rotate-append-write transaction. A `Conflict` from any of
    /// the conditional writes aborts the attempt so the caller can re-run
    /// it from a fresh read.
    async fn try_append(&self, record: &FileRecord) -> CatalogResult<()> {
        let index_path = self.index_path();
        let (mut index, mut index_version) = match self.store.get(&index_path).await? {
            Some(read) => (
                self.parse::<ShardIndex>(&index_path, &read.content)?,
                Some(read.version),
            ),
            None => (ShardIndex::bootstrap(self.shard_object_path(1)), None),
        };
        if index_version.is_none() {
            let encoded = self.encode(&index_path, &index)?;
            let version = self.store.put(&index_path, &encoded, None).await?;
            index_version = Some(version);
        }

        let mut shard_path = index.current_path().to_string();
        let (mut records, mut shard_version): (Vec<FileRecord>, Option<String>) =
            match self.store.get(&shard_path).await? {
                Some(read) => (
                    self.parse(&shard_path, &read.content)?,
                    Some(read.version),
                ),
                None => (Vec::new(), None),
            };

        if self.shard_full(&shard_path, &records)? {
            let next = index.current + 1;
            shard_path = self.shard_object_path(next);
            index.shards.push(shard_path.clone());
            index.current = next;

            let encoded = self.encode(&index_path, &index)?;
            self.store
                .put(&index_path, &encoded, index_version.as_deref())
                .await?;
            let version = self.store.put(&shard_path, "[]", None).await?;
            records = Vec::new();
            shard_version = Some(version);
            tracing::info!(shard = next, "rotated catalog to a new shard");
        }

        records.push(record.clone());
        let encoded = self.encode(&shard_path, &records)?;
        self.store
            .put(&shard_path, &encoded, shard_version.as_deref())
            .await?;
        Ok(())
    }

    fn shard_full(&self, path: &str, records: &[FileRecord]) -> CatalogResult<bool> {
        if records.len() >= self.max_records {
            return Ok(true);
        }
        Ok(self.encode(path, &records)?.len() >= self.max_chars)
    }

    /// Create a shareable view over `file_ids` and return its short id.
    ///
    /// Minted ids are checked against the stored views inside the append
    /// transaction; a collision re-mints instead of shadowing the older
    /// view.
    pub async fn create_view(
        &self,
        file_ids: Vec<String>,
        password_hash: Option<String>,
    ) -> CatalogResult<String> {
        for _ in 0..WRITE_ATTEMPTS {
            let view_id = Uuid::new_v4().simple().to_string()[..8].to_string();
            match self
                .try_create_view(&view_id, file_ids.clone(), password_hash.clone())
                .await
            {
                Ok(()) => return Ok(view_id),
                Err(CatalogError::ViewIdTaken(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(CatalogError::MetadataConflict(WRITE_ATTEMPTS))
    }

    async fn try_create_view(
        &self,
        view_id: &str,
        file_ids: Vec<String>,
        password_hash: Option<String>,
    ) -> CatalogResult<()> {
        let record = ViewRecord {
            view_id: view_id.to_string(),
            file_ids,
            password_hash,
            created_at: Utc::now(),
        };
        self.append_to_list(&self.views_path(), &record, |existing: &[ViewRecord]| {
            if existing.iter().any(|view| view.view_id == view_id) {
                Err(CatalogError::ViewIdTaken(view_id.to_string()))
            } else {
                Ok(())
            }
        })
        .await
    }

    /// Create a group under a caller-supplied id. Fails when the id is
    /// already taken.
    pub async fn create_group(
        &self,
        group_id: String,
        file_ids: Vec<String>,
        password_hash: Option<String>,
    ) -> CatalogResult<()> {
        let record = GroupRecord {
            group_id: group_id.clone(),
            file_ids,
            password_hash,
            created_at: Utc::now(),
        };
        self.append_to_list(&self.groups_path(), &record, |existing: &[GroupRecord]| {
            if existing.iter().any(|g| g.group_id == group_id) {
                Err(CatalogError::GroupAlreadyExists(group_id.clone()))
            } else {
                Ok(())
            }
        })
        .await
    }

    /// Optimistic append to a flat JSON-array catalog object, with the same
    /// retry discipline as shard writes.
    async fn append_to_list<T, F>(&self, path: &str, item: &T, check: F) -> CatalogResult<()>
    where
        T: Serialize + DeserializeOwned + Clone,
        F: Fn(&[T]) -> CatalogResult<()>,
    {
        for attempt in 1..=WRITE_ATTEMPTS {
            let (mut items, version): (Vec<T>, Option<String>) =
                match self.store.get(path).await? {
                    Some(read) => (self.parse(path, &read.content)?, Some(read.version)),
                    None => (Vec::new(), None),
                };
            check(&items)?;
            items.push(item.clone());
            let encoded = self.encode(path, &items)?;
            match self.store.put(path, &encoded, version.as_deref()).await {
                Ok(_) => return Ok(()),
                Err(StoreError::Conflict(_)) => {
                    tracing::warn!(attempt, path, "catalog write conflict, retrying");
                    tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS * attempt as u64))
                        .await;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(CatalogError::MetadataConflict(WRITE_ATTEMPTS))
    }

    // ---- lookups -----------------------------------------------------

    async fn load_list<T: DeserializeOwned>(&self, path: &str) -> CatalogResult<Vec<T>> {
        match self.store.get(path).await? {
            Some(read) => self.parse(path, &read.content),
            None => Ok(Vec::new()),
        }
    }

    /// Scan every shard for the requested ids. Linear in the catalog size,
    /// which is acceptable for a read-mostly catalog with few shards.
    async fn lookup_files(&self, ids: &[String]) -> CatalogResult<Vec<FileRecord>> {
        let index_path = self.index_path();
        let index = match self.store.get(&index_path).await? {
            Some(read) => self.parse::<ShardIndex>(&index_path, &read.content)?,
            None => return Ok(Vec::new()),
        };

        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut found = Vec::new();
        for shard_path in &index.shards {
            let records: Vec<FileRecord> = self.load_list(shard_path).await?;
            found.extend(
                records
                    .into_iter()
                    .filter(|record| wanted.contains(record.file_id.as_str())),
            );
        }
        Ok(found)
    }

    /// Resolve a share-link id to its visible file records.
    ///
    /// `id` may be a single file id, a comma-separated id list, or a
    /// view/group id that indirects to an id list. Views shadow groups,
    /// which shadow plain file ids.
    ///
    /// The password gate compares `provided` (a hex hash) against the
    /// view's/group's own hash when it has one, otherwise against every
    /// hash carried by the matched files; one unsatisfied gate fails the
    /// whole lookup. Neither failure path reveals the stored hash or any
    /// record data.
    pub async fn resolve(
        &self,
        id: &str,
        provided: Option<&str>,
    ) -> CatalogResult<Vec<FileInfo>> {
        let (file_ids, gate) = self.expand_query(id).await?;

        let records = self.lookup_files(&file_ids).await?;
        if records.is_empty() {
            return Err(CatalogError::RecordNotFound(id.to_string()));
        }

        match gate {
            Some(hash) => check_gate(Some(hash.as_str()), provided)?,
            None => {
                for record in &records {
                    check_gate(record.password_hash.as_deref(), provided)?;
                }
            }
        }

        Ok(records.iter().map(FileInfo::from).collect())
    }

    /// Turn a lookup id into a concrete file-id list plus the indirection's
    /// own password gate, if any.
    async fn expand_query(&self, id: &str) -> CatalogResult<(Vec<String>, Option<String>)> {
        if id.contains(',') {
            let ids = id
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect();
            return Ok((ids, None));
        }

        let views: Vec<ViewRecord> = self.load_list(&self.views_path()).await?;
        if let Some(view) = views.into_iter().find(|view| view.view_id == id) {
            return Ok((view.file_ids, view.password_hash));
        }

        let groups: Vec<GroupRecord> = self.load_list(&self.groups_path()).await?;
        if let Some(group) = groups.into_iter().find(|group| group.group_id == id) {
            return Ok((group.file_ids, group.password_hash));
        }

        Ok((vec![id.to_string()], None))
    }
}

fn check_gate(stored: Option<&str>, provided: Option<&str>) -> CatalogResult<()> {
    match (stored, provided) {
        (None, _) => Ok(()),
        (Some(_), None) => Err(CatalogError::PasswordRequired),
        (Some(hash), Some(given)) if hash == given => Ok(()),
        (Some(_), Some(_)) => Err(CatalogError::InvalidPassword),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::versioned_store::{MemoryStore, StoreResult, Versioned};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn record(file_id: &str) -> FileRecord {
        FileRecord {
            file_id: file_id.to_string(),
            file_name: format!("{file_id}.bin"),
            file_size: 16,
            mime_type: "application/octet-stream".to_string(),
            download_url: format!("https://blobs.example/{file_id}"),
            release_id: None,
            release_tag: None,
            uploaded_at: Utc::now(),
            password_hash: None,
        }
    }

    fn protected(file_id: &str, password: &str) -> FileRecord {
        FileRecord {
            password_hash: Some(hash_password(password)),
            ..record(file_id)
        }
    }

    fn service() -> CatalogService {
        CatalogService::new(Arc::new(MemoryStore::new()), "meta/")
    }

    #[tokio::test]
    async fn append_then_resolve_single_id() {
        let catalog = service();
        catalog.append_file(record("f1")).await.unwrap();

        let files = catalog.resolve("f1", None).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_id, "f1");
        assert_eq!(files[0].file_name, "f1.bin");
    }

    #[tokio::test]
    async fn unknown_id_is_record_not_found() {
        let catalog = service();
        catalog.append_file(record("f1")).await.unwrap();
        assert!(matches!(
            catalog.resolve("missing", None).await,
            Err(CatalogError::RecordNotFound(_))
        ));
    }

    #[tokio::test]
    async fn comma_list_resolves_every_id() {
        let catalog = service();
        for id in ["a", "b", "c"] {
            catalog.append_file(record(id)).await.unwrap();
        }

        let files = catalog.resolve("a,c", None).await.unwrap();
        let ids: Vec<&str> = files.iter().map(|f| f.file_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn comma_list_enforces_every_files_gate() {
        let catalog = service();
        catalog.append_file(protected("a", "alpha")).await.unwrap();
        catalog.append_file(protected("b", "bravo")).await.unwrap();
        catalog.append_file(record("c")).await.unwrap();

        // One matching password does not unlock a differently gated file.
        let alpha = hash_password("alpha");
        assert!(matches!(
            catalog.resolve("a,b", Some(&alpha)).await,
            Err(CatalogError::InvalidPassword)
        ));
        assert!(matches!(
            catalog.resolve("a,c", None).await,
            Err(CatalogError::PasswordRequired)
        ));

        // An ungated companion never blocks a satisfied gate.
        let files = catalog.resolve("a,c", Some(&alpha)).await.unwrap();
        let ids: Vec<&str> = files.iter().map(|f| f.file_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn shard_rotation_keeps_every_record_reachable() {
        let store = Arc::new(MemoryStore::new());
        let catalog =
            CatalogService::with_capacity(store.clone(), "meta/", 3, SHARD_MAX_CHARS);

        for n in 0..4 {
            catalog.append_file(record(&format!("f{n}"))).await.unwrap();
        }

        // Exactly one rotation: shard 1 filled to capacity, shard 2 current.
        let index_read = store.get("meta/index.json").await.unwrap().unwrap();
        let index: ShardIndex = serde_json::from_str(&index_read.content).unwrap();
        assert_eq!(index.current, 2);
        assert_eq!(
            index.shards,
            vec!["meta/files-1.json".to_string(), "meta/files-2.json".to_string()]
        );

        // Records on both sides of the boundary resolve.
        for n in 0..4 {
            let files = catalog.resolve(&format!("f{n}"), None).await.unwrap();
            assert_eq!(files[0].file_id, format!("f{n}"));
        }
    }

    #[tokio::test]
    async fn rotated_shard_is_never_appended_again() {
        let store = Arc::new(MemoryStore::new());
        let catalog =
            CatalogService::with_capacity(store.clone(), "meta/", 2, SHARD_MAX_CHARS);

        for n in 0..5 {
            catalog.append_file(record(&format!("f{n}"))).await.unwrap();
        }

        let shard1 = store.get("meta/files-1.json").await.unwrap().unwrap();
        let records: Vec<FileRecord> = serde_json::from_str(&shard1.content).unwrap();
        assert_eq!(records.len(), 2);
        let ids: Vec<&str> = records.iter().map(|r| r.file_id.as_str()).collect();
        assert_eq!(ids, vec!["f0", "f1"]);
    }

    #[tokio::test]
    async fn oversized_serialized_shard_triggers_rotation() {
        let store = Arc::new(MemoryStore::new());
        // Roughly a record and a half of serialized JSON.
        let catalog = CatalogService::with_capacity(store.clone(), "meta/", SHARD_MAX_RECORDS, 250);

        for n in 0..3 {
            catalog.append_file(record(&format!("f{n}"))).await.unwrap();
        }

        let index_read = store.get("meta/index.json").await.unwrap().unwrap();
        let index: ShardIndex = serde_json::from_str(&index_read.content).unwrap();
        assert_eq!(
            index.shards,
            vec!["meta/files-1.json".to_string(), "meta/files-2.json".to_string()]
        );

        for n in 0..3 {
            let files = catalog.resolve(&format!("f{n}"), None).await.unwrap();
            assert_eq!(files[0].file_id, format!("f{n}"));
        }
    }

    #[tokio::test]
    async fn minted_view_id_collisions_are_rejected() {
        let catalog = service();
        catalog
            .try_create_view("dup00000", vec!["a".to_string()], None)
            .await
            .unwrap();

        let err = catalog
            .try_create_view("dup00000", vec!["b".to_string()], None)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::ViewIdTaken(_)));

        // The original view's membership is untouched.
        catalog.append_file(record("a")).await.unwrap();
        let files = catalog.resolve("dup00000", None).await.unwrap();
        assert_eq!(files[0].file_id, "a");
    }

    /// Store double that simulates a losing version-token race: the first
    /// shard write finds that a rival append landed in between.
    struct ContendedStore {
        inner: MemoryStore,
        raced: AtomicBool,
    }

    #[async_trait]
    impl VersionedStore for ContendedStore {
        async fn get(&self, path: &str) -> StoreResult<Option<Versioned>> {
            self.inner.get(path).await
        }

        async fn put(
            &self,
            path: &str,
            content: &str,
            expected: Option<&str>,
        ) -> StoreResult<String> {
            if path.contains("files-") && !self.raced.swap(true, Ordering::SeqCst) {
                // Rival writer appends first, invalidating our token.
                let current = self.inner.get(path).await?;
                let mut records: Vec<FileRecord> = match &current {
                    Some(read) => serde_json::from_str(&read.content).unwrap_or_default(),
                    None => Vec::new(),
                };
                records.push(record("rival"));
                self.inner
                    .put(
                        path,
                        &serde_json::to_string(&records).unwrap(),
                        current.as_ref().map(|read| read.version.as_str()),
                    )
                    .await?;
            }
            self.inner.put(path, content, expected).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_appends_both_survive_the_race() {
        let store = Arc::new(ContendedStore {
            inner: MemoryStore::new(),
            raced: AtomicBool::new(false),
        });
        let catalog = CatalogService::new(store, "meta/");

        catalog.append_file(record("ours")).await.unwrap();

        let ours = catalog.resolve("ours", None).await.unwrap();
        assert_eq!(ours[0].file_id, "ours");
        let rival = catalog.resolve("rival", None).await.unwrap();
        assert_eq!(rival[0].file_id, "rival");
    }

    /// Store double that rejects every conditional write.
    struct AlwaysConflicting;

    #[async_trait]
    impl VersionedStore for AlwaysConflicting {
        async fn get(&self, _path: &str) -> StoreResult<Option<Versioned>> {
            Ok(None)
        }

        async fn put(
            &self,
            path: &str,
            _content: &str,
            _expected: Option<&str>,
        ) -> StoreResult<String> {
            Err(StoreError::Conflict(path.to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_budget_exhaustion_is_fatal() {
        let catalog = CatalogService::new(Arc::new(AlwaysConflicting), "meta/");
        let err = catalog.append_file(record("f1")).await.unwrap_err();
        assert!(matches!(err, CatalogError::MetadataConflict(3)));
    }

    #[tokio::test]
    async fn password_gate_on_a_single_file() {
        let catalog = service();
        catalog.append_file(protected("f1", "hunter2")).await.unwrap();

        assert!(matches!(
            catalog.resolve("f1", None).await,
            Err(CatalogError::PasswordRequired)
        ));
        let wrong = hash_password("swordfish");
        assert!(matches!(
            catalog.resolve("f1", Some(&wrong)).await,
            Err(CatalogError::InvalidPassword)
        ));

        let right = hash_password("hunter2");
        let files = catalog.resolve("f1", Some(&right)).await.unwrap();
        assert_eq!(files[0].file_id, "f1");
    }

    #[tokio::test]
    async fn view_indirection_and_its_own_gate() {
        let catalog = service();
        catalog.append_file(record("a")).await.unwrap();
        catalog.append_file(record("b")).await.unwrap();

        let view_id = catalog
            .create_view(
                vec!["a".to_string(), "b".to_string()],
                Some(hash_password("open sesame")),
            )
            .await
            .unwrap();

        assert!(matches!(
            catalog.resolve(&view_id, None).await,
            Err(CatalogError::PasswordRequired)
        ));

        let hash = hash_password("open sesame");
        let files = catalog.resolve(&view_id, Some(&hash)).await.unwrap();
        assert_eq!(files.len(), 2);
    }

    #[tokio::test]
    async fn group_lookup_and_duplicate_rejection() {
        let catalog = service();
        catalog.append_file(record("a")).await.unwrap();

        catalog
            .create_group("bundle".to_string(), vec!["a".to_string()], None)
            .await
            .unwrap();
        let files = catalog.resolve("bundle", None).await.unwrap();
        assert_eq!(files[0].file_id, "a");

        let err = catalog
            .create_group("bundle".to_string(), vec!["a".to_string()], None)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::GroupAlreadyExists(_)));
    }

    #[tokio::test]
    async fn resolved_records_do_not_carry_password_hashes() {
        let catalog = service();
        catalog.append_file(protected("f1", "pw")).await.unwrap();

        let hash = hash_password("pw");
        let files = catalog.resolve("f1", Some(&hash)).await.unwrap();
        let serialized = serde_json::to_string(&files).unwrap();
        assert!(!serialized.contains("passwordHash"));
        assert!(!serialized.contains(&hash));
    }
}
