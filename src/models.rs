//! Data models for extracted events and the aggregated run output.
//!
//! - [`EventRecord`]: one event listing as produced by an extractor
//! - [`EventDigest`]: the ordered collection written at the end of a run
//! - [`SourceFailure`]: a per-source (or per-URL) failure noted during the run
//! - [`EventSchema`]: the target schema handed to extractors

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single event listing.
///
/// Every text field defaults to an empty string so partially extracted
/// records still serialize with a stable shape. Fields an extractor returns
/// beyond the known ones are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EventRecord {
    /// Identifier of the configured source this record came from.
    pub source: String,
    /// Absolute URL of the event detail page.
    pub url: String,
    pub title: String,
    pub description: String,
    /// Venue name and/or address.
    pub location: String,
    pub price: String,
    /// Best-effort capacity status ("Sold out", "Few tickets left", ...).
    pub capacity: String,
    /// Date/time exactly as shown on the page.
    pub date_text: String,
    /// ISO-8601 start with the configured UTC offset, minutes precision.
    pub start_datetime: String,
    /// How the detail page was fetched during enrichment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch_method: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl EventRecord {
    pub fn new(source: &str, url: &str) -> Self {
        Self {
            source: source.to_string(),
            url: url.to_string(),
            ..Default::default()
        }
    }

    /// Fill the fields that are empty in `self` from `patch`.
    ///
    /// Non-empty fields are never overwritten. Extra fields from `patch` are
    /// added when `self` does not already carry them.
    pub fn merge_missing(&self, patch: &EventRecord) -> EventRecord {
        fn pick(base: &str, patch: &str) -> String {
            if base.trim().is_empty() && !patch.trim().is_empty() {
                patch.to_string()
            } else {
                base.to_string()
            }
        }

        let mut extra = self.extra.clone();
        for (k, v) in &patch.extra {
            extra.entry(k.clone()).or_insert_with(|| v.clone());
        }

        EventRecord {
            source: pick(&self.source, &patch.source),
            url: pick(&self.url, &patch.url),
            title: pick(&self.title, &patch.title),
            description: pick(&self.description, &patch.description),
            location: pick(&self.location, &patch.location),
            price: pick(&self.price, &patch.price),
            capacity: pick(&self.capacity, &patch.capacity),
            date_text: pick(&self.date_text, &patch.date_text),
            start_datetime: pick(&self.start_datetime, &patch.start_datetime),
            fetch_method: self.fetch_method.clone().or_else(|| patch.fetch_method.clone()),
            extra,
        }
    }

    /// Key used when deduplicating across sources.
    ///
    /// The URL when there is one, otherwise source + title + date text.
    pub fn dedupe_key(&self) -> String {
        let url = self.url.trim();
        if !url.is_empty() {
            url.to_string()
        } else {
            format!("{}|{}|{}", self.source, self.title.trim(), self.date_text.trim())
        }
    }
}

/// The stage of the pipeline a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Config,
    Render,
    Extract,
    Enrich,
}

/// A failure noted during the run. Never fatal to the run itself.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SourceFailure {
    pub source: String,
    pub stage: FailureStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub reason: String,
}

impl SourceFailure {
    pub fn new(source: &str, stage: FailureStage, reason: impl ToString) -> Self {
        Self {
            source: source.to_string(),
            stage,
            url: None,
            reason: reason.to_string(),
        }
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = Some(url.to_string());
        self
    }
}

/// Everything a run produces, written once after all sources finish.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct EventDigest {
    /// RFC 3339 timestamp of when the digest was assembled.
    pub generated_at: String,
    /// Events in source-configuration order.
    pub events: Vec<EventRecord>,
    pub failures: Vec<SourceFailure>,
}

/// One field of the target schema.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaField {
    pub name: &'static str,
    pub description: &'static str,
}

/// Target schema handed to extractors.
///
/// The card extractor fills the fields it has selectors for; the model
/// extractor is prompted with the full list.
#[derive(Debug, Clone, PartialEq)]
pub struct EventSchema {
    pub fields: Vec<SchemaField>,
}

impl Default for EventSchema {
    fn default() -> Self {
        let f = |name, description| SchemaField { name, description };
        Self {
            fields: vec![
                f("title", "event title"),
                f("url", "absolute link to the event page"),
                f("date_text", "date and time as written on the page"),
                f(
                    "start_datetime",
                    "start as ISO 8601 (YYYY-MM-DD HH:MM), relative dates resolved",
                ),
                f("location", "venue name and address"),
                f("price", "ticket price as shown, empty if free or unknown"),
                f(
                    "capacity",
                    "availability such as 'Sold out' or 'Few tickets left', empty if unknown",
                ),
                f("description", "short description if present"),
            ],
        }
    }
}
