//! Core domain model for the supplier crawl checkpoint & cache engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "arb-core";

/// Where a crawl target currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CrawlPhase {
    DiscoveringCategories,
    ExtractingItems,
    CrossReferencing,
    Completed,
}

/// Granularity at which an interrupted crawl restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMode {
    CategoryResume,
    SubcategoryResume,
    ItemResume,
}

impl std::str::FromStr for RecoveryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "category_resume" => Ok(Self::CategoryResume),
            "subcategory_resume" => Ok(Self::SubcategoryResume),
            "item_resume" => Ok(Self::ItemResume),
            other => Err(format!("unknown recovery mode: {other}")),
        }
    }
}

/// Persisted positional state for one crawl target.
///
/// `current_item_index_in_category` is only meaningful while the phase is
/// `ExtractingItems`; `current_batch_number` strictly increases across the
/// whole life of the target, including resumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingState {
    pub target_id: String,
    pub current_category_index: usize,
    pub current_subcategory_index: usize,
    pub current_item_index_in_category: usize,
    pub current_batch_number: u64,
    pub total_categories: usize,
    pub phase: CrawlPhase,
    pub last_processed_item_url: Option<String>,
    pub items_extracted_total: u64,
    pub updated_at: DateTime<Utc>,
}

impl ProcessingState {
    pub fn fresh(target_id: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            current_category_index: 0,
            current_subcategory_index: 0,
            current_item_index_in_category: 0,
            current_batch_number: 0,
            total_categories: 0,
            phase: CrawlPhase::DiscoveringCategories,
            last_processed_item_url: None,
            items_extracted_total: 0,
            updated_at: Utc::now(),
        }
    }

    /// Reinitialize every progress marker while keeping the target identity.
    /// The batch number is kept so it stays strictly increasing.
    pub fn hard_reset(&mut self) {
        let target_id = std::mem::take(&mut self.target_id);
        let batch_number = self.current_batch_number;
        *self = Self::fresh(target_id);
        self.current_batch_number = batch_number;
    }
}

/// Position reported by the orchestrator after each processed step.
///
/// `item_url` is set when a concrete item was just processed; phase-only
/// transitions (e.g. category discovery finishing) leave it `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlPosition {
    pub category_index: usize,
    pub subcategory_index: usize,
    pub item_index_in_category: usize,
    pub item_url: Option<String>,
    pub phase: CrawlPhase,
    pub total_categories: Option<usize>,
}

/// One distinct product discovered at the supplier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapedItemRecord {
    pub natural_key: String,
    pub title: String,
    pub price: Option<f64>,
    pub source_category_url: String,
    pub extracted_at: DateTime<Utc>,
}

/// How a cross-reference match was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchMethod {
    ExactKey,
    FuzzyText,
}

/// Confirmed match between a scraped item and a marketplace listing.
/// At most one entry exists per natural key per target; later matches
/// update the entry in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossReferenceEntry {
    pub natural_key: String,
    pub external_id: String,
    pub match_confidence: f64,
    pub match_method: MatchMethod,
    pub created_at: DateTime<Utc>,
}

/// Why a flush was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FlushReason {
    CadenceReached,
    InterruptionSignal,
    PhaseBoundary,
    ForcedByCaller,
}

/// Transient description of one completed flush. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushEvent {
    pub reason: FlushReason,
    pub item_count: usize,
    pub timestamp: DateTime<Utc>,
}

/// Records addressable and mergeable by a stable natural key.
///
/// `merge_from` implements the store's update-in-place rule: fields present
/// in the incoming record overwrite, optional fields only overwrite when set.
pub trait NaturalKeyed {
    fn natural_key(&self) -> &str;
    fn merge_from(&mut self, incoming: Self);
}

impl NaturalKeyed for ScrapedItemRecord {
    fn natural_key(&self) -> &str {
        &self.natural_key
    }

    fn merge_from(&mut self, incoming: Self) {
        self.title = incoming.title;
        self.source_category_url = incoming.source_category_url;
        if incoming.price.is_some() {
            self.price = incoming.price;
        }
        // Most recent scrape is authoritative.
        self.extracted_at = incoming.extracted_at;
    }
}

impl NaturalKeyed for CrossReferenceEntry {
    fn natural_key(&self) -> &str {
        &self.natural_key
    }

    fn merge_from(&mut self, incoming: Self) {
        self.external_id = incoming.external_id;
        self.match_confidence = incoming.match_confidence;
        self.match_method = incoming.match_method;
        // created_at marks the first confirmed match and is kept.
    }
}

/// Natural key for a scraped item: the barcode when one exists, otherwise
/// the canonicalized listing URL.
pub fn canonical_item_key(barcode: Option<&str>, url: &str) -> String {
    match barcode.map(str::trim) {
        Some(code) if !code.is_empty() => code.to_string(),
        _ => canonicalize_url(url),
    }
}

/// Canonicalize a listing URL so re-observations of the same page produce
/// the same key: scheme and host lowercased, default ports, fragments and
/// trailing slashes stripped. Query strings are kept (they can carry the
/// listing id on some suppliers).
pub fn canonicalize_url(url: &str) -> String {
    let trimmed = url.trim();
    let without_fragment = trimmed.split('#').next().unwrap_or(trimmed);

    let (scheme, rest) = match without_fragment.split_once("://") {
        Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
        None => return without_fragment.trim_end_matches('/').to_string(),
    };

    let (authority, path) = match rest.split_once('/') {
        Some((authority, path)) => (authority, format!("/{path}")),
        None => (rest, String::new()),
    };

    let mut authority = authority.to_ascii_lowercase();
    let default_port = match scheme.as_str() {
        "http" => ":80",
        "https" => ":443",
        _ => "",
    };
    if !default_port.is_empty() && authority.ends_with(default_port) {
        authority.truncate(authority.len() - default_port.len());
    }

    let path = path.trim_end_matches('/');
    format!("{scheme}://{authority}{path}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).single().unwrap()
    }

    #[test]
    fn url_canonicalization_is_stable_across_cosmetic_variants() {
        let variants = [
            "HTTPS://Supplier.example.COM/catalog/item-42/",
            "https://supplier.example.com:443/catalog/item-42",
            "https://supplier.example.com/catalog/item-42#reviews",
        ];
        for variant in variants {
            assert_eq!(
                canonicalize_url(variant),
                "https://supplier.example.com/catalog/item-42"
            );
        }
    }

    #[test]
    fn barcode_wins_over_url_as_natural_key() {
        let key = canonical_item_key(Some(" 4006381333931 "), "https://supplier.example.com/x");
        assert_eq!(key, "4006381333931");

        let key = canonical_item_key(Some("  "), "https://supplier.example.com/x/");
        assert_eq!(key, "https://supplier.example.com/x");
    }

    #[test]
    fn scraped_item_merge_keeps_known_price_when_incoming_has_none() {
        let mut existing = ScrapedItemRecord {
            natural_key: "k".into(),
            title: "Old title".into(),
            price: Some(12.5),
            source_category_url: "https://supplier.example.com/cat/1".into(),
            extracted_at: ts(9),
        };
        existing.merge_from(ScrapedItemRecord {
            natural_key: "k".into(),
            title: "New title".into(),
            price: None,
            source_category_url: "https://supplier.example.com/cat/2".into(),
            extracted_at: ts(10),
        });

        assert_eq!(existing.title, "New title");
        assert_eq!(existing.price, Some(12.5));
        assert_eq!(existing.extracted_at, ts(10));
    }

    #[test]
    fn cross_reference_merge_preserves_first_match_time() {
        let mut existing = CrossReferenceEntry {
            natural_key: "k".into(),
            external_id: "B000".into(),
            match_confidence: 0.8,
            match_method: MatchMethod::FuzzyText,
            created_at: ts(9),
        };
        existing.merge_from(CrossReferenceEntry {
            natural_key: "k".into(),
            external_id: "B001".into(),
            match_confidence: 1.0,
            match_method: MatchMethod::ExactKey,
            created_at: ts(10),
        });

        assert_eq!(existing.external_id, "B001");
        assert_eq!(existing.match_method, MatchMethod::ExactKey);
        assert_eq!(existing.created_at, ts(9));
    }

    #[test]
    fn hard_reset_returns_to_defaults_but_keeps_batch_number() {
        let mut state = ProcessingState::fresh("supplier-a");
        state.current_category_index = 3;
        state.current_item_index_in_category = 17;
        state.current_batch_number = 9;
        state.items_extracted_total = 250;
        state.phase = CrawlPhase::ExtractingItems;
        state.last_processed_item_url = Some("https://supplier.example.com/p/1".into());

        state.hard_reset();

        assert_eq!(state.target_id, "supplier-a");
        assert_eq!(state.current_category_index, 0);
        assert_eq!(state.current_item_index_in_category, 0);
        assert_eq!(state.items_extracted_total, 0);
        assert_eq!(state.phase, CrawlPhase::DiscoveringCategories);
        assert_eq!(state.last_processed_item_url, None);
        assert_eq!(state.current_batch_number, 9);
    }

    #[test]
    fn processing_state_serializes_with_camel_case_field_names() {
        let state = ProcessingState::fresh("supplier-a");
        let json = serde_json::to_value(&state).unwrap();
        assert!(json.get("targetId").is_some());
        assert!(json.get("currentItemIndexInCategory").is_some());
        assert_eq!(json["phase"], "discoveringCategories");
    }
}
