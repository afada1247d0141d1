//! Durable, atomically-replaced JSON document storage for crawl state.
//!
//! Every persistence path in the engine funnels through [`RecordStore`]:
//! documents are written to a temp file in the target directory and renamed
//! into place, so a reader never observes a partially-written document and a
//! failed write leaves the prior document intact.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use arb_core::NaturalKeyed;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "arb-storage";

/// The three document families kept per crawl target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    ProcessingState,
    ScrapedItems,
    CrossReference,
}

impl DocumentKind {
    pub fn file_name(self) -> &'static str {
        match self {
            Self::ProcessingState => "processingState.json",
            Self::ScrapedItems => "scrapedItems.json",
            Self::CrossReference => "crossReference.json",
        }
    }

    fn logical_prefix(self) -> &'static str {
        match self {
            Self::ProcessingState => "processingState",
            Self::ScrapedItems => "scrapedItems",
            Self::CrossReference => "crossReference",
        }
    }
}

/// Logical name of one persisted document: `<kind>:<targetId>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentKey {
    target_id: String,
    kind: DocumentKind,
}

impl DocumentKey {
    pub fn new(target_id: impl Into<String>, kind: DocumentKind) -> Self {
        Self {
            target_id: target_id.into(),
            kind,
        }
    }

    pub fn processing_state(target_id: impl Into<String>) -> Self {
        Self::new(target_id, DocumentKind::ProcessingState)
    }

    pub fn scraped_items(target_id: impl Into<String>) -> Self {
        Self::new(target_id, DocumentKind::ScrapedItems)
    }

    pub fn cross_reference(target_id: impl Into<String>) -> Self {
        Self::new(target_id, DocumentKind::CrossReference)
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.logical_prefix(), self.target_id)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying storage kept failing past the retry budget. The prior
    /// document, if any, is still intact.
    #[error("storage unavailable for {key}: {source}")]
    Unavailable {
        key: String,
        #[source]
        source: std::io::Error,
    },
    /// A persisted document exists but does not parse.
    #[error("malformed document {key}: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("encoding document {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Bounded exponential backoff between write retries.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

/// Counts reported by [`RecordStore::append_or_merge_by_natural_key`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub inserted: usize,
    pub updated: usize,
}

impl MergeOutcome {
    pub fn total(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Atomic whole-document store, one directory per crawl target.
#[derive(Debug, Clone)]
pub struct RecordStore {
    root: PathBuf,
    backoff: BackoffPolicy,
}

impl RecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_backoff(root: impl Into<PathBuf>, backoff: BackoffPolicy) -> Self {
        Self {
            root: root.into(),
            backoff,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn document_path(&self, key: &DocumentKey) -> PathBuf {
        self.root.join(key.target_id()).join(key.kind().file_name())
    }

    /// Load a document. A missing file is `Ok(None)`; an unparseable file is
    /// `Err(Malformed)` so the caller can apply its own recovery policy.
    pub async fn load<T: DeserializeOwned>(
        &self,
        key: &DocumentKey,
    ) -> Result<Option<T>, StoreError> {
        let path = self.document_path(key);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(StoreError::Unavailable {
                    key: key.to_string(),
                    source: err,
                })
            }
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|err| StoreError::Malformed {
                key: key.to_string(),
                source: err,
            })
    }

    /// Load a record-array document, degrading a malformed document to an
    /// empty one with a warning. Positional state must not use this; a
    /// malformed checkpoint is an inconsistency the caller has to see.
    pub async fn load_records<T: DeserializeOwned + NaturalKeyed>(
        &self,
        key: &DocumentKey,
    ) -> Result<Vec<T>, StoreError> {
        match self.load::<Vec<T>>(key).await {
            Ok(Some(records)) => Ok(records),
            Ok(None) => Ok(Vec::new()),
            Err(StoreError::Malformed { key, source }) => {
                warn!(%key, error = %source, "malformed record document, treating as empty");
                Ok(Vec::new())
            }
            Err(err) => Err(err),
        }
    }

    /// Replace a whole document atomically, retrying transient I/O failures
    /// under the configured backoff. Success is only reported after the
    /// rename into place has returned.
    pub async fn atomic_replace<T: Serialize>(
        &self,
        key: &DocumentKey,
        value: &T,
    ) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|err| StoreError::Encode {
            key: key.to_string(),
            source: err,
        })?;
        let path = self.document_path(key);

        let mut last_error: Option<std::io::Error> = None;
        for attempt in 0..=self.backoff.max_retries {
            match self.try_replace(&path, &bytes).await {
                Ok(()) => {
                    debug!(%key, bytes = bytes.len(), "document replaced");
                    return Ok(());
                }
                Err(err) => {
                    warn!(%key, attempt, error = %err, "atomic replace attempt failed");
                    last_error = Some(err);
                    if attempt < self.backoff.max_retries {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                    }
                }
            }
        }

        Err(StoreError::Unavailable {
            key: key.to_string(),
            source: last_error
                .unwrap_or_else(|| std::io::Error::other("write retries exhausted")),
        })
    }

    async fn try_replace(&self, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| std::io::Error::other("document path has no parent"))?;
        fs::create_dir_all(parent).await?;

        let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4()));
        let result = async {
            let mut file = fs::OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&temp_path)
                .await?;
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, path).await
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_file(&temp_path).await;
        }
        result
    }

    /// Merge incoming records into a record document by natural key and
    /// replace it atomically. New keys insert; existing keys merge in the
    /// incoming order, so the later observation wins within a batch.
    ///
    /// This is the sole sanctioned persistence path for deduplicated records.
    pub async fn append_or_merge_by_natural_key<T>(
        &self,
        key: &DocumentKey,
        incoming: Vec<T>,
    ) -> Result<MergeOutcome, StoreError>
    where
        T: Serialize + DeserializeOwned + NaturalKeyed,
    {
        if incoming.is_empty() {
            return Ok(MergeOutcome::default());
        }

        let mut records = self.load_records::<T>(key).await?;
        let mut index: HashMap<String, usize> = records
            .iter()
            .enumerate()
            .map(|(pos, record)| (record.natural_key().to_string(), pos))
            .collect();

        let mut outcome = MergeOutcome::default();
        for record in incoming {
            match index.get(record.natural_key()) {
                Some(&pos) => {
                    records[pos].merge_from(record);
                    outcome.updated += 1;
                }
                None => {
                    index.insert(record.natural_key().to_string(), records.len());
                    records.push(record);
                    outcome.inserted += 1;
                }
            }
        }

        self.atomic_replace(key, &records).await?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arb_core::{ProcessingState, ScrapedItemRecord};
    use chrono::Utc;
    use tempfile::tempdir;

    fn item(key: &str, title: &str) -> ScrapedItemRecord {
        ScrapedItemRecord {
            natural_key: key.to_string(),
            title: title.to_string(),
            price: Some(9.99),
            source_category_url: "https://supplier.example.com/cat/1".into(),
            extracted_at: Utc::now(),
        }
    }

    fn fast_backoff() -> BackoffPolicy {
        BackoffPolicy {
            max_retries: 1,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[test]
    fn document_key_renders_logical_name() {
        let key = DocumentKey::processing_state("supplier-a");
        assert_eq!(key.to_string(), "processingState:supplier-a");
        assert_eq!(key.kind().file_name(), "processingState.json");
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn replace_then_load_round_trips() {
        let dir = tempdir().expect("tempdir");
        let store = RecordStore::new(dir.path());
        let key = DocumentKey::processing_state("supplier-a");

        let state = ProcessingState::fresh("supplier-a");
        store.atomic_replace(&key, &state).await.expect("replace");

        let loaded: Option<ProcessingState> = store.load(&key).await.expect("load");
        assert_eq!(loaded, Some(state));
        assert!(store.document_path(&key).exists());
    }

    #[tokio::test]
    async fn missing_document_loads_as_none() {
        let dir = tempdir().expect("tempdir");
        let store = RecordStore::new(dir.path());
        let key = DocumentKey::scraped_items("supplier-a");

        let loaded: Option<Vec<ScrapedItemRecord>> = store.load(&key).await.expect("load");
        assert!(loaded.is_none());
        assert!(store
            .load_records::<ScrapedItemRecord>(&key)
            .await
            .expect("load_records")
            .is_empty());
    }

    #[tokio::test]
    async fn malformed_state_document_is_a_hard_error() {
        let dir = tempdir().expect("tempdir");
        let store = RecordStore::new(dir.path());
        let key = DocumentKey::processing_state("supplier-a");

        let path = store.document_path(&key);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{ not json").unwrap();

        let err = store
            .load::<ProcessingState>(&key)
            .await
            .expect_err("malformed must error");
        assert!(matches!(err, StoreError::Malformed { .. }));
    }

    #[tokio::test]
    async fn malformed_record_document_degrades_to_empty() {
        let dir = tempdir().expect("tempdir");
        let store = RecordStore::new(dir.path());
        let key = DocumentKey::scraped_items("supplier-a");

        let path = store.document_path(&key);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"][").unwrap();

        let records = store
            .load_records::<ScrapedItemRecord>(&key)
            .await
            .expect("degrades");
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn merge_inserts_new_keys_and_updates_existing_ones() {
        let dir = tempdir().expect("tempdir");
        let store = RecordStore::new(dir.path());
        let key = DocumentKey::scraped_items("supplier-a");

        let first = store
            .append_or_merge_by_natural_key(&key, vec![item("a", "Alpha"), item("b", "Beta")])
            .await
            .expect("first merge");
        assert_eq!(first, MergeOutcome { inserted: 2, updated: 0 });

        let second = store
            .append_or_merge_by_natural_key(&key, vec![item("b", "Beta v2"), item("c", "Gamma")])
            .await
            .expect("second merge");
        assert_eq!(second, MergeOutcome { inserted: 1, updated: 1 });

        let records = store
            .load_records::<ScrapedItemRecord>(&key)
            .await
            .expect("load");
        assert_eq!(records.len(), 3);
        let b = records.iter().find(|r| r.natural_key == "b").unwrap();
        assert_eq!(b.title, "Beta v2");
    }

    #[tokio::test]
    async fn within_batch_duplicates_resolve_last_write_wins() {
        let dir = tempdir().expect("tempdir");
        let store = RecordStore::new(dir.path());
        let key = DocumentKey::scraped_items("supplier-a");

        let outcome = store
            .append_or_merge_by_natural_key(&key, vec![item("a", "First"), item("a", "Second")])
            .await
            .expect("merge");
        assert_eq!(outcome, MergeOutcome { inserted: 1, updated: 1 });

        let records = store
            .load_records::<ScrapedItemRecord>(&key)
            .await
            .expect("load");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Second");
    }

    #[tokio::test]
    async fn unavailable_storage_fails_loudly_and_names_the_document() {
        let dir = tempdir().expect("tempdir");
        // A plain file where the store expects its root directory.
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, b"not a directory").unwrap();

        let store = RecordStore::with_backoff(&blocked, fast_backoff());
        let key = DocumentKey::processing_state("supplier-a");

        let err = store
            .atomic_replace(&key, &ProcessingState::fresh("supplier-a"))
            .await
            .expect_err("must fail");
        match err {
            StoreError::Unavailable { key, .. } => {
                assert_eq!(key, "processingState:supplier-a");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_replace_cleans_up_its_temp_files() {
        let dir = tempdir().expect("tempdir");
        let store = RecordStore::with_backoff(dir.path(), fast_backoff());
        let key = DocumentKey::processing_state("supplier-a");

        // A non-empty directory where the document file should land makes
        // every rename attempt fail.
        let path = store.document_path(&key);
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("occupied"), b"x").unwrap();

        let result = store
            .atomic_replace(&key, &ProcessingState::fresh("supplier-a"))
            .await;
        assert!(result.is_err());

        // No temp files may linger after a failed attempt.
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
