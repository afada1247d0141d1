//! Crawl checkpoint & cache coordination engine.
//!
//! One [`CrawlEngine`] per crawl target wires together the deduplicator, the
//! cache update controller, the checkpoint manager and the batch
//! synchronizer, and exposes the four-call contract the orchestrator drives:
//! `resume` once at startup, then `record_processed` and `advance` per item,
//! and `flush` at phase boundaries.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use arb_core::{
    CrawlPhase, CrawlPosition, CrossReferenceEntry, FlushEvent, FlushReason, NaturalKeyed,
    ProcessingState, RecoveryMode, ScrapedItemRecord,
};
use arb_storage::{DocumentKey, RecordStore, StoreError};
use chrono::Utc;
use serde::Deserialize;
use tokio::fs;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "arb-engine";

/// Engine configuration, read from the environment at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    /// Items between cadence-triggered flushes.
    pub cache_update_frequency: usize,
    /// Item advances between checkpoint persists.
    pub checkpoint_frequency: usize,
    /// Items between downstream report-generation opportunities.
    pub report_frequency: usize,
    pub force_flush_on_interruption: bool,
    pub flush_on_phase_boundary: bool,
    pub recovery_mode: RecoveryMode,
    pub batch_synchronization_enabled: bool,
    pub target_batch_size: usize,
    /// Bound on the best-effort flush performed on interruption.
    pub interruption_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            cache_update_frequency: 10,
            checkpoint_frequency: 10,
            report_frequency: 10,
            force_flush_on_interruption: true,
            flush_on_phase_boundary: true,
            recovery_mode: RecoveryMode::CategoryResume,
            batch_synchronization_enabled: false,
            target_batch_size: 10,
            interruption_grace: Duration::from_secs(10),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: std::env::var("ARB_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            cache_update_frequency: std::env::var("ARB_CACHE_UPDATE_FREQUENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.cache_update_frequency),
            checkpoint_frequency: std::env::var("ARB_CHECKPOINT_FREQUENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.checkpoint_frequency),
            report_frequency: std::env::var("ARB_REPORT_FREQUENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.report_frequency),
            force_flush_on_interruption: std::env::var("ARB_FORCE_FLUSH_ON_INTERRUPTION")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(defaults.force_flush_on_interruption),
            flush_on_phase_boundary: std::env::var("ARB_FLUSH_ON_PHASE_BOUNDARY")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(defaults.flush_on_phase_boundary),
            recovery_mode: std::env::var("ARB_RECOVERY_MODE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.recovery_mode),
            batch_synchronization_enabled: std::env::var("ARB_BATCH_SYNC_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(defaults.batch_synchronization_enabled),
            target_batch_size: std::env::var("ARB_TARGET_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.target_batch_size),
            interruption_grace: std::env::var("ARB_INTERRUPTION_GRACE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.interruption_grace),
        }
    }
}

/// Registry of crawl targets, loaded from `targets.yaml`.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetRegistry {
    pub targets: Vec<TargetConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    pub target_id: String,
    pub display_name: String,
    pub enabled: bool,
    #[serde(default)]
    pub category_urls: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl TargetRegistry {
    pub async fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn enabled_targets(&self) -> impl Iterator<Item = &TargetConfig> {
        self.targets.iter().filter(|t| t.enabled)
    }
}

/// One cadence forced to the common batch size by the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CadenceOverride {
    pub name: String,
    pub previous: usize,
    pub forced: usize,
}

/// Reconciles independently configured cadences into one common value when
/// synchronization is enabled, warning for every entry it overrides.
#[derive(Debug, Clone, Copy)]
pub struct BatchSynchronizer {
    pub enabled: bool,
    pub target_batch_size: usize,
}

impl BatchSynchronizer {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            enabled: config.batch_synchronization_enabled,
            target_batch_size: config.target_batch_size,
        }
    }

    pub fn reconcile(
        &self,
        cadences: BTreeMap<String, usize>,
    ) -> (BTreeMap<String, usize>, Vec<CadenceOverride>) {
        if !self.enabled {
            return (cadences, Vec::new());
        }

        let mut overrides = Vec::new();
        let reconciled = cadences
            .into_iter()
            .map(|(name, previous)| {
                if previous != self.target_batch_size {
                    warn!(
                        cadence = %name,
                        previous,
                        forced = self.target_batch_size,
                        "batch synchronization overriding cadence"
                    );
                    overrides.push(CadenceOverride {
                        name: name.clone(),
                        previous,
                        forced: self.target_batch_size,
                    });
                }
                (name, self.target_batch_size)
            })
            .collect();
        (reconciled, overrides)
    }
}

/// Classification of an incoming record against the known stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    New,
    Updated(Vec<&'static str>),
    Unchanged,
}

/// Read-only classifier over an in-memory mirror of the persisted stores.
/// Hydrated at resume, refreshed after each successful flush; never writes.
#[derive(Debug, Default)]
pub struct Deduplicator {
    known_items: HashMap<String, ScrapedItemRecord>,
    known_references: HashMap<String, CrossReferenceEntry>,
}

impl Deduplicator {
    pub fn hydrate(&mut self, items: Vec<ScrapedItemRecord>, references: Vec<CrossReferenceEntry>) {
        self.known_items = items
            .into_iter()
            .map(|r| (r.natural_key.clone(), r))
            .collect();
        self.known_references = references
            .into_iter()
            .map(|r| (r.natural_key.clone(), r))
            .collect();
    }

    pub fn classify_item(&self, record: &ScrapedItemRecord) -> Classification {
        let Some(known) = self.known_items.get(&record.natural_key) else {
            return Classification::New;
        };
        let mut fields = Vec::new();
        if known.title != record.title {
            fields.push("title");
        }
        if record.price.is_some() && known.price != record.price {
            fields.push("price");
        }
        if known.source_category_url != record.source_category_url {
            fields.push("sourceCategoryUrl");
        }
        if fields.is_empty() {
            Classification::Unchanged
        } else {
            Classification::Updated(fields)
        }
    }

    pub fn classify_reference(&self, entry: &CrossReferenceEntry) -> Classification {
        let Some(known) = self.known_references.get(&entry.natural_key) else {
            return Classification::New;
        };
        let mut fields = Vec::new();
        if known.external_id != entry.external_id {
            fields.push("externalId");
        }
        if known.match_confidence != entry.match_confidence {
            fields.push("matchConfidence");
        }
        if known.match_method != entry.match_method {
            fields.push("matchMethod");
        }
        if fields.is_empty() {
            Classification::Unchanged
        } else {
            Classification::Updated(fields)
        }
    }

    fn absorb(&mut self, items: Vec<ScrapedItemRecord>, references: Vec<CrossReferenceEntry>) {
        for item in items {
            match self.known_items.get_mut(&item.natural_key) {
                Some(known) => known.merge_from(item),
                None => {
                    self.known_items.insert(item.natural_key.clone(), item);
                }
            }
        }
        for entry in references {
            match self.known_references.get_mut(&entry.natural_key) {
                Some(known) => known.merge_from(entry),
                None => {
                    self.known_references.insert(entry.natural_key.clone(), entry);
                }
            }
        }
    }
}

/// In-memory accumulation awaiting flush. Owned exclusively by the
/// [`CacheUpdateController`]; cleared, never destroyed, on flush.
#[derive(Debug, Default)]
pub struct CacheBuffer {
    items: Vec<ScrapedItemRecord>,
    references: Vec<CrossReferenceEntry>,
}

impl CacheBuffer {
    pub fn len(&self) -> usize {
        self.items.len() + self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.references.is_empty()
    }

    fn clear(&mut self) {
        self.items.clear();
        self.references.clear();
    }
}

/// Collapse within-batch duplicates, preserving first-seen order with the
/// later observation's fields winning.
fn collapse_by_natural_key<T: NaturalKeyed>(records: Vec<T>) -> Vec<T> {
    let mut out: Vec<T> = Vec::with_capacity(records.len());
    let mut index: HashMap<String, usize> = HashMap::new();
    for record in records {
        match index.get(record.natural_key()) {
            Some(&pos) => {
                debug!(
                    natural_key = record.natural_key(),
                    "duplicate natural key within flush batch, last write wins"
                );
                out[pos].merge_from(record);
            }
            None => {
                index.insert(record.natural_key().to_string(), out.len());
                out.push(record);
            }
        }
    }
    out
}

/// Decides flush timing per processed item and performs the flush.
pub struct CacheUpdateController {
    store: RecordStore,
    items_key: DocumentKey,
    references_key: DocumentKey,
    run_id: Uuid,
    update_frequency: usize,
    processed_count: u64,
    buffer: CacheBuffer,
    dedup: Deduplicator,
}

impl CacheUpdateController {
    pub fn new(
        store: RecordStore,
        target_id: impl Into<String>,
        update_frequency: usize,
        run_id: Uuid,
    ) -> Self {
        let target_id = target_id.into();
        Self {
            items_key: DocumentKey::scraped_items(target_id.clone()),
            references_key: DocumentKey::cross_reference(target_id),
            store,
            run_id,
            update_frequency,
            processed_count: 0,
            buffer: CacheBuffer::default(),
            dedup: Deduplicator::default(),
        }
    }

    /// Load the persisted stores into the deduplicator mirror.
    pub async fn hydrate(&mut self) -> Result<()> {
        let items = self
            .store
            .load_records::<ScrapedItemRecord>(&self.items_key)
            .await
            .context("hydrating scraped item store")?;
        let references = self
            .store
            .load_records::<CrossReferenceEntry>(&self.references_key)
            .await
            .context("hydrating cross-reference store")?;
        self.dedup.hydrate(items, references);
        Ok(())
    }

    /// Buffer one processed item. Returns whether the cadence flush is due;
    /// the decision is evaluated here, per item, never per page or category.
    pub fn record_processed(&mut self, item: ScrapedItemRecord) -> bool {
        self.buffer.items.push(item);
        self.processed_count += 1;
        self.update_frequency > 0 && self.processed_count % self.update_frequency as u64 == 0
    }

    /// Buffer one confirmed match. Does not advance the item cadence.
    pub fn record_matched(&mut self, entry: CrossReferenceEntry) {
        self.buffer.references.push(entry);
    }

    pub fn processed_count(&self) -> u64 {
        self.processed_count
    }

    pub fn update_frequency(&self) -> usize {
        self.update_frequency
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear_buffer(&mut self) {
        self.buffer.clear();
    }

    /// Flush the buffer through the deduplicator into the record store.
    ///
    /// A no-op on an empty buffer. The buffer is only cleared after every
    /// store write succeeded; a failed flush keeps it intact for a later
    /// retry, which is safe because the natural-key merge is idempotent.
    pub async fn flush(&mut self, reason: FlushReason) -> Result<Option<FlushEvent>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let span = info_span!("cache_flush", run_id = %self.run_id, target_id = self.items_key.target_id(), ?reason);
        let _guard = span.enter();
        let started = Instant::now();

        let items = collapse_by_natural_key(self.buffer.items.clone());
        let references = collapse_by_natural_key(self.buffer.references.clone());

        for item in &items {
            debug!(
                natural_key = %item.natural_key,
                classification = ?self.dedup.classify_item(item),
                "flushing item"
            );
        }
        for entry in &references {
            debug!(
                natural_key = %entry.natural_key,
                classification = ?self.dedup.classify_reference(entry),
                "flushing cross-reference"
            );
        }

        let item_count = items.len() + references.len();
        self.store
            .append_or_merge_by_natural_key(&self.items_key, items.clone())
            .await
            .context("flushing scraped items")?;
        self.store
            .append_or_merge_by_natural_key(&self.references_key, references.clone())
            .await
            .context("flushing cross-references")?;

        self.dedup.absorb(items, references);
        self.buffer.clear();

        let event = FlushEvent {
            reason,
            item_count,
            timestamp: Utc::now(),
        };
        info!(
            count = item_count,
            duration_ms = started.elapsed().as_millis() as u64,
            "cache flushed"
        );
        Ok(Some(event))
    }
}

/// Maintains and persists the crawl's positional state.
pub struct CheckpointManager {
    store: RecordStore,
    state_key: DocumentKey,
    items_key: DocumentKey,
    state: ProcessingState,
    persist_frequency: usize,
    advances_total: u64,
    recovery_mode: RecoveryMode,
}

impl CheckpointManager {
    pub fn new(
        store: RecordStore,
        target_id: impl Into<String>,
        persist_frequency: usize,
        recovery_mode: RecoveryMode,
    ) -> Self {
        let target_id = target_id.into();
        Self {
            state_key: DocumentKey::processing_state(target_id.clone()),
            items_key: DocumentKey::scraped_items(target_id.clone()),
            state: ProcessingState::fresh(target_id),
            store,
            persist_frequency,
            advances_total: 0,
            recovery_mode,
        }
    }

    pub fn state(&self) -> &ProcessingState {
        &self.state
    }

    /// Load the most recent checkpoint, recovering detected inconsistencies
    /// (malformed document, orphaned checkpoint) via a persisted hard reset.
    pub async fn resume(&mut self) -> Result<ProcessingState> {
        let loaded = match self.store.load::<ProcessingState>(&self.state_key).await {
            Ok(loaded) => loaded,
            Err(StoreError::Malformed { key, source }) => {
                warn!(%key, error = %source, "checkpoint document malformed, performing hard reset");
                self.hard_reset().await?;
                return Ok(self.state.clone());
            }
            Err(err) => return Err(err).context("loading checkpoint"),
        };

        match loaded {
            None => {
                info!(target_id = self.state_key.target_id(), "no checkpoint found, starting fresh");
                self.state = ProcessingState::fresh(self.state_key.target_id());
                self.persist().await?;
            }
            Some(state) => {
                self.state = state;
                if self.state.items_extracted_total > 0 && self.scraped_store_is_empty().await? {
                    warn!(
                        target_id = self.state_key.target_id(),
                        items_extracted_total = self.state.items_extracted_total,
                        "orphaned checkpoint: scraped item store missing or empty, performing hard reset"
                    );
                    self.hard_reset().await?;
                } else {
                    self.apply_recovery_rewind();
                    self.persist().await?;
                    info!(
                        target_id = self.state_key.target_id(),
                        phase = ?self.state.phase,
                        category = self.state.current_category_index,
                        item = self.state.current_item_index_in_category,
                        recovery_mode = ?self.recovery_mode,
                        "resumed from checkpoint"
                    );
                }
            }
        }

        Ok(self.state.clone())
    }

    async fn scraped_store_is_empty(&self) -> Result<bool> {
        let items = self
            .store
            .load_records::<ScrapedItemRecord>(&self.items_key)
            .await
            .context("checking scraped item store during resume")?;
        Ok(items.is_empty())
    }

    fn apply_recovery_rewind(&mut self) {
        if self.state.phase != CrawlPhase::ExtractingItems {
            return;
        }
        match self.recovery_mode {
            RecoveryMode::CategoryResume => {
                self.state.current_subcategory_index = 0;
                self.state.current_item_index_in_category = 0;
                self.state.last_processed_item_url = None;
            }
            RecoveryMode::SubcategoryResume => {
                self.state.current_item_index_in_category = 0;
                self.state.last_processed_item_url = None;
            }
            // Reprocessing the boundary item is safe: all of its side
            // effects go through the natural-key merge.
            RecoveryMode::ItemResume => {}
        }
    }

    /// Apply one position update in item-processing order, persisting on the
    /// configured cadence.
    pub async fn advance(&mut self, position: CrawlPosition) -> Result<()> {
        if position.item_url.is_some() {
            self.state.items_extracted_total += 1;
            self.state.last_processed_item_url = position.item_url;
        }
        self.state.current_category_index = position.category_index;
        self.state.current_subcategory_index = position.subcategory_index;
        self.state.current_item_index_in_category = position.item_index_in_category;
        self.state.phase = position.phase;
        if let Some(total) = position.total_categories {
            self.state.total_categories = total;
        }
        self.state.updated_at = Utc::now();

        // Modulo over a monotone counter: the cadence window is anchored to
        // item order, so the extra persist after a flush cannot stretch it.
        self.advances_total += 1;
        if self.persist_frequency > 0 && self.advances_total % self.persist_frequency as u64 == 0 {
            self.persist().await?;
        }
        Ok(())
    }

    /// Called after every successful flush: bump the batch number and persist
    /// so the stored position never runs ahead of the stored records by more
    /// than one cadence window.
    pub async fn note_flush(&mut self) -> Result<()> {
        self.state.current_batch_number += 1;
        self.persist().await
    }

    pub async fn complete(&mut self) -> Result<()> {
        self.state.phase = CrawlPhase::Completed;
        self.state.updated_at = Utc::now();
        self.persist().await
    }

    /// Operator-requested fresh crawl, or recovery from a detected
    /// inconsistency. Progress markers reset; the batch number survives.
    pub async fn hard_reset(&mut self) -> Result<()> {
        self.state.hard_reset();
        self.persist().await
    }

    async fn persist(&mut self) -> Result<()> {
        self.store
            .atomic_replace(&self.state_key, &self.state)
            .await
            .context("persisting checkpoint")
    }
}

/// Per-target facade over the engine components.
pub struct CrawlEngine {
    config: EngineConfig,
    target_id: String,
    run_id: Uuid,
    controller: CacheUpdateController,
    checkpoint: CheckpointManager,
    report_frequency: usize,
    items_since_report: usize,
}

impl CrawlEngine {
    pub fn new(config: EngineConfig, target_id: impl Into<String>) -> Self {
        let target_id = target_id.into();
        let run_id = Uuid::new_v4();
        let store = RecordStore::new(&config.data_dir);

        let synchronizer = BatchSynchronizer::from_config(&config);
        let mut cadences = BTreeMap::new();
        cadences.insert("flush".to_string(), config.cache_update_frequency);
        cadences.insert("checkpoint".to_string(), config.checkpoint_frequency);
        cadences.insert("report".to_string(), config.report_frequency);
        let (cadences, _overrides) = synchronizer.reconcile(cadences);

        let flush_frequency = cadences
            .get("flush")
            .copied()
            .unwrap_or(config.cache_update_frequency);
        let checkpoint_frequency = cadences
            .get("checkpoint")
            .copied()
            .unwrap_or(config.checkpoint_frequency);
        let report_frequency = cadences
            .get("report")
            .copied()
            .unwrap_or(config.report_frequency);

        Self {
            controller: CacheUpdateController::new(
                store.clone(),
                target_id.clone(),
                flush_frequency,
                run_id,
            ),
            checkpoint: CheckpointManager::new(
                store,
                target_id.clone(),
                checkpoint_frequency,
                config.recovery_mode,
            ),
            config,
            target_id,
            run_id,
            report_frequency,
            items_since_report: 0,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> &ProcessingState {
        self.checkpoint.state()
    }

    pub fn cache_update_frequency(&self) -> usize {
        self.controller.update_frequency()
    }

    pub fn processed_count(&self) -> u64 {
        self.controller.processed_count()
    }

    pub fn buffered_len(&self) -> usize {
        self.controller.buffered_len()
    }

    /// Must be called once before any other call.
    pub async fn resume(&mut self) -> Result<ProcessingState> {
        let state = self.checkpoint.resume().await?;
        self.controller.hydrate().await?;
        info!(
            run_id = %self.run_id,
            target_id = %self.target_id,
            phase = ?state.phase,
            "crawl engine resumed"
        );
        Ok(state)
    }

    /// Buffer one extracted item, flushing if the cadence came due.
    pub async fn record_processed(
        &mut self,
        item: ScrapedItemRecord,
    ) -> Result<Option<FlushEvent>> {
        let due = self.controller.record_processed(item);
        self.items_since_report += 1;
        if due {
            self.flush(FlushReason::CadenceReached).await
        } else {
            Ok(None)
        }
    }

    /// Buffer one confirmed cross-reference match.
    pub fn record_matched(&mut self, entry: CrossReferenceEntry) {
        self.controller.record_matched(entry);
    }

    /// Apply the orchestrator's position update for the step just completed.
    pub async fn advance(&mut self, position: CrawlPosition) -> Result<()> {
        self.checkpoint.advance(position).await
    }

    pub async fn flush(&mut self, reason: FlushReason) -> Result<Option<FlushEvent>> {
        let event = self.controller.flush(reason).await?;
        if event.is_some() {
            self.checkpoint.note_flush().await?;
        }
        Ok(event)
    }

    /// Category-boundary hook; honors `flush_on_phase_boundary`.
    pub async fn phase_boundary(&mut self) -> Result<Option<FlushEvent>> {
        if !self.config.flush_on_phase_boundary {
            return Ok(None);
        }
        self.flush(FlushReason::PhaseBoundary).await
    }

    /// Whether the downstream reporter's cadence came due. Consuming: the
    /// report counter restarts once this returns true.
    pub fn report_due(&mut self) -> bool {
        if self.report_frequency > 0 && self.items_since_report >= self.report_frequency {
            self.items_since_report = 0;
            true
        } else {
            false
        }
    }

    /// End-of-run: force the final flush and mark the target completed.
    pub async fn finish(&mut self) -> Result<Option<FlushEvent>> {
        let event = self.flush(FlushReason::ForcedByCaller).await?;
        self.checkpoint.complete().await?;
        Ok(event)
    }

    /// Best-effort forced flush on a termination request, bounded by the
    /// configured grace period. On timeout the caller may exit; the next
    /// `resume` recovers through orphaned-checkpoint detection.
    pub async fn handle_interruption(&mut self) -> Result<Option<FlushEvent>> {
        if !self.config.force_flush_on_interruption {
            warn!(target_id = %self.target_id, "interruption received, forced flush disabled");
            return Ok(None);
        }
        let grace = self.config.interruption_grace;
        match tokio::time::timeout(grace, self.flush(FlushReason::InterruptionSignal)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    target_id = %self.target_id,
                    grace_secs = grace.as_secs(),
                    "forced flush exceeded grace period, exiting without it"
                );
                Ok(None)
            }
        }
    }

    /// Operator-requested fresh crawl: drop buffered records and reset the
    /// checkpoint to its defaults. Persisted records are kept; re-observing
    /// them merges in place.
    pub async fn hard_reset(&mut self) -> Result<ProcessingState> {
        self.controller.clear_buffer();
        self.checkpoint.hard_reset().await?;
        Ok(self.checkpoint.state().clone())
    }
}

/// Wait for the external termination signal (Ctrl-C).
pub async fn wait_for_interruption() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
