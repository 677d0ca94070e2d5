//! Detail-page enrichment.
//!
//! Listing cards rarely carry everything. When enabled, each record with an
//! http(s) URL has its detail page fetched and parsed, and the fields still
//! empty on the record are filled from it. Fields already present are never
//! overwritten.
//!
//! # Fetching
//!
//! A cached copy wins when cache reads are on. Otherwise a plain HTTP
//! request comes first. When it fails, or the page turns out to be an
//! unrendered app shell (little visible text), the URL is rendered through a
//! [`Renderer`] session instead.
//!
//! # Resuming
//!
//! Enriched records are collected in an [`EnrichCheckpoint`] that is written
//! to disk every few records. A resumed run reuses those records instead of
//! fetching their pages again.
//!
//! # Parsing layers
//!
//! 1. schema.org `Event` microdata
//! 2. `og:title` / `description` meta tags
//! 3. visible HTML (`h1`, `time`, description, venue and price containers)
//! 4. capacity keywords in the page text

use crate::api::Backoff;
use crate::cache::{CacheKind, HtmlCache, url_digest};
use crate::error::RenderError;
use crate::extract::finalize_dates;
use crate::fields::capacity_status;
use crate::models::{EventRecord, FailureStage, SourceFailure};
use crate::outputs::json::write_json;
use crate::renderer::{RenderSession, Renderer, SessionOptions};
use crate::utils::{first_non_empty, strip_text, truncate_for_log};
use chrono::{FixedOffset, NaiveDate};
use once_cell::sync::Lazy;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::error::Error;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration as StdDuration, Instant};
use tokio::fs;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};
use url::Url;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

pub const METHOD_CACHE: &str = "cache";
pub const METHOD_REQUESTS: &str = "requests";
pub const METHOD_RENDERER: &str = "renderer";

/// Longest description kept from a detail page, in characters.
const MAX_DESCRIPTION_CHARS: usize = 1500;

fn css(s: &str) -> Selector {
    Selector::parse(s).unwrap()
}

static EVENT_SCOPE: Lazy<Selector> =
    Lazy::new(|| css("[itemscope][itemtype*='schema.org/'][itemtype$='Event']"));
static PROP_NAME: Lazy<Selector> = Lazy::new(|| css("[itemprop='name']"));
static PROP_START: Lazy<Selector> = Lazy::new(|| css("[itemprop='startDate']"));
static PROP_DESCRIPTION: Lazy<Selector> = Lazy::new(|| css("[itemprop='description']"));
static PROP_LOCATION: Lazy<Selector> = Lazy::new(|| css("[itemprop='location']"));
static PROP_ADDRESS: Lazy<Selector> = Lazy::new(|| css("[itemprop='address']"));
static PROP_OFFERS: Lazy<Selector> = Lazy::new(|| css("[itemprop='offers']"));
static PROP_PRICE: Lazy<Selector> = Lazy::new(|| css("[itemprop='price']"));

static META_OG_TITLE: Lazy<Selector> = Lazy::new(|| css("meta[property='og:title']"));
static META_TITLE: Lazy<Selector> = Lazy::new(|| css("meta[name='title']"));
static META_DESCRIPTION: Lazy<Selector> = Lazy::new(|| css("meta[name='description']"));
static META_OG_DESCRIPTION: Lazy<Selector> = Lazy::new(|| css("meta[property='og:description']"));

static H1: Lazy<Selector> = Lazy::new(|| css("h1"));
static TITLE: Lazy<Selector> = Lazy::new(|| css("title"));
static TIME: Lazy<Selector> = Lazy::new(|| css("time"));

static DATE_BLOCKS: Lazy<Vec<Selector>> =
    Lazy::new(|| ["[data-testid='event-date']", ".event-details__data"].map(css).to_vec());

static DESCRIPTION_BLOCKS: Lazy<Vec<Selector>> = Lazy::new(|| {
    [
        "[data-testid='event-description']",
        ".event-description",
        ".event__description",
        ".structured-content",
        "section[aria-label*='Description']",
        "article",
        "main",
    ]
    .map(css)
    .to_vec()
});

static VENUE_BLOCKS: Lazy<Vec<Selector>> = Lazy::new(|| {
    [
        "[data-testid='venue']",
        "[data-testid='location']",
        "[data-testid='event-location']",
        ".event__venue",
        ".event-venue",
        ".location-info__address",
        "a[href*='maps']",
    ]
    .map(css)
    .to_vec()
});

static PRICE_BLOCKS: Lazy<Vec<Selector>> = Lazy::new(|| {
    [
        "[data-testid='ticket-price']",
        "[data-testid='event-price']",
        "[data-testid='price']",
        ".event__ticket",
        ".conversion-bar__panel-info",
        ".price",
    ]
    .map(css)
    .to_vec()
});

/// Fetches a detail page over plain HTTP.
pub trait FetchHtml {
    async fn fetch_html(&self, url: &str) -> Result<String, Box<dyn Error>>;
}

/// `reqwest` fetcher with a desktop user agent and polite, jittered pacing.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    /// Pause taken before every attempt.
    pacing: Backoff,
}

impl HttpFetcher {
    /// 25 s timeout, 2 retries, 300-900 ms before each attempt.
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .timeout(StdDuration::from_secs(25))
            .build()?;
        Ok(Self {
            client,
            pacing: Backoff {
                max_retries: 2,
                base_delay: StdDuration::from_millis(300),
                max_delay: StdDuration::from_millis(300),
                max_jitter_ms: 600,
            },
        })
    }

    async fn attempt(&self, url: &str) -> Result<String, reqwest::Error> {
        self.client.get(url).send().await?.error_for_status()?.text().await
    }
}

impl FetchHtml for HttpFetcher {
    #[instrument(level = "debug", skip(self))]
    async fn fetch_html(&self, url: &str) -> Result<String, Box<dyn Error>> {
        let mut attempt = 0usize;
        loop {
            sleep(self.pacing.delay_for(1)).await;
            match self.attempt(url).await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    attempt += 1;
                    if attempt > self.pacing.max_retries {
                        return Err(e.into());
                    }
                    debug!(attempt, error = %e, "Detail fetch failed; retrying");
                }
            }
        }
    }
}

/// Knobs for one enrichment pass.
#[derive(Debug, Clone)]
pub struct EnrichOptions {
    /// Pages with this much visible text or less are treated as app shells.
    pub min_visible_chars: usize,
    pub render_timeout_ms: u64,
    pub offset: FixedOffset,
    pub today: NaiveDate,
    pub cache: Option<HtmlCache>,
    /// Fetched pages are dumped here as `detail_<source>_<sha256(url)>.html`.
    pub dump_dir: Option<PathBuf>,
}

/// Records after enrichment plus the URLs that could not be fetched.
#[derive(Debug, Default)]
pub struct EnrichReport {
    pub records: Vec<EventRecord>,
    pub failures: Vec<SourceFailure>,
}

/// Detail pages enriched so far, keyed by URL and saved as a JSON array.
#[derive(Debug)]
pub struct EnrichCheckpoint {
    path: PathBuf,
    /// Save after this many new records; 0 saves only on [`flush`](Self::flush).
    every: usize,
    records: Vec<EventRecord>,
    index: HashMap<String, usize>,
    unsaved: usize,
}

impl EnrichCheckpoint {
    pub fn new(path: impl Into<PathBuf>, every: usize) -> Self {
        Self {
            path: path.into(),
            every,
            records: Vec::new(),
            index: HashMap::new(),
            unsaved: 0,
        }
    }

    /// Start from the records an earlier run saved at `path`.
    ///
    /// A missing or unreadable checkpoint starts empty.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub async fn resume(path: PathBuf, every: usize) -> Self {
        let mut checkpoint = Self::new(path, every);
        match fs::read_to_string(&checkpoint.path).await {
            Ok(text) => match serde_json::from_str::<Vec<EventRecord>>(&text) {
                Ok(records) => {
                    records.into_iter().for_each(|r| checkpoint.insert(r));
                    info!(records = checkpoint.records.len(), "Loaded enrichment checkpoint");
                }
                Err(e) => warn!(error = %e, "Checkpoint is not a record list; starting fresh"),
            },
            Err(e) if e.kind() == ErrorKind::NotFound => info!("No checkpoint yet; starting fresh"),
            Err(e) => warn!(error = %e, "Could not read checkpoint; starting fresh"),
        }
        checkpoint
    }

    fn insert(&mut self, record: EventRecord) {
        match self.index.get(&record.url) {
            Some(&i) => self.records[i] = record,
            None => {
                self.index.insert(record.url.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }

    pub fn get(&self, url: &str) -> Option<&EventRecord> {
        self.index.get(url).map(|&i| &self.records[i])
    }

    /// Remember an enriched record, saving once `every` records are pending.
    pub async fn record(&mut self, record: &EventRecord) {
        self.insert(record.clone());
        self.unsaved += 1;
        if self.every > 0 && self.unsaved >= self.every {
            self.save().await;
        }
    }

    /// Save pending records, if any.
    pub async fn flush(&mut self) {
        if self.unsaved > 0 {
            self.save().await;
        }
    }

    async fn save(&mut self) {
        match write_json(self.records.as_slice(), &self.path).await {
            Ok(()) => {
                info!(
                    path = %self.path.display(),
                    records = self.records.len(),
                    "Checkpoint saved"
                );
                self.unsaved = 0;
            }
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to save checkpoint"),
        }
    }
}

/// Page text outside `<script>`, `<style>`, `<noscript>`, `<template>` and `<title>`.
pub fn visible_text(document: &Html) -> String {
    let parts: Vec<&str> = document
        .root_element()
        .descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let parent = node.parent()?.value().as_element()?.name();
            match parent {
                "script" | "style" | "noscript" | "template" | "title" => None,
                _ => Some(&**text),
            }
        })
        .collect();
    strip_text(&parts.join(" "))
}

fn text_of(el: ElementRef<'_>) -> String {
    strip_text(&el.text().collect::<Vec<_>>().join(" "))
}

fn first_match_text(document: &Html, selectors: &[Selector]) -> String {
    selectors
        .iter()
        .filter_map(|s| document.select(s).next())
        .map(text_of)
        .find(|t| !t.is_empty())
        .unwrap_or_default()
}

fn meta_content(document: &Html, selector: &Selector) -> String {
    document
        .select(selector)
        .next()
        .and_then(|m| m.value().attr("content"))
        .map(strip_text)
        .unwrap_or_default()
}

fn truncate_chars(s: String, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s,
    }
}

fn is_scope(el: ElementRef<'_>) -> bool {
    el.value().attr("itemscope").is_some()
}

/// Whether the closest enclosing item of `el` is `scope`.
fn belongs_to(el: ElementRef<'_>, scope: ElementRef<'_>) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| is_scope(*a))
        .is_some_and(|a| a.id() == scope.id())
}

/// The first `selector` match that belongs to `scope` itself, not to a nested item.
fn own_prop<'a>(scope: ElementRef<'a>, selector: &Selector) -> Option<ElementRef<'a>> {
    if !is_scope(scope) {
        return scope.select(selector).next();
    }
    scope
        .select(selector)
        .find(|el| belongs_to(*el, scope))
}

/// A microdata value: `content`, then `datetime`, then text.
fn prop_value(el: ElementRef<'_>) -> String {
    el.value()
        .attr("content")
        .or_else(|| el.value().attr("datetime"))
        .map(strip_text)
        .unwrap_or_else(|| text_of(el))
}

fn microdata_layer(document: &Html) -> EventRecord {
    let Some(event) = document.select(&EVENT_SCOPE).next() else {
        return EventRecord::default();
    };
    let value = |scope: ElementRef<'_>, sel: &Selector| {
        own_prop(scope, sel).map(prop_value).unwrap_or_default()
    };

    let location = match own_prop(event, &PROP_LOCATION) {
        Some(place) if is_scope(place) => {
            let venue = value(place, &PROP_NAME);
            let address = value(place, &PROP_ADDRESS);
            [venue, address]
                .into_iter()
                .filter(|p| !p.is_empty())
                .collect::<Vec<_>>()
                .join(", ")
        }
        Some(place) => prop_value(place),
        None => String::new(),
    };
    let price = own_prop(event, &PROP_OFFERS)
        .map(|offer| value(offer, &PROP_PRICE))
        .unwrap_or_default();

    EventRecord {
        title: value(event, &PROP_NAME),
        start_datetime: value(event, &PROP_START),
        description: value(event, &PROP_DESCRIPTION),
        location,
        price,
        ..Default::default()
    }
}

fn meta_layer(document: &Html) -> EventRecord {
    EventRecord {
        title: first_non_empty([
            meta_content(document, &META_OG_TITLE).as_str(),
            meta_content(document, &META_TITLE).as_str(),
        ]),
        description: first_non_empty([
            meta_content(document, &META_DESCRIPTION).as_str(),
            meta_content(document, &META_OG_DESCRIPTION).as_str(),
        ]),
        ..Default::default()
    }
}

fn visible_layer(document: &Html, page_text: &str) -> EventRecord {
    let time = document.select(&TIME).next();
    EventRecord {
        title: first_non_empty([
            document.select(&H1).next().map(text_of).unwrap_or_default().as_str(),
            document.select(&TITLE).next().map(text_of).unwrap_or_default().as_str(),
        ]),
        start_datetime: time
            .and_then(|t| t.value().attr("datetime"))
            .map(strip_text)
            .unwrap_or_default(),
        date_text: first_non_empty([
            time.map(text_of).unwrap_or_default().as_str(),
            first_match_text(document, &DATE_BLOCKS).as_str(),
        ]),
        description: truncate_chars(
            first_match_text(document, &DESCRIPTION_BLOCKS),
            MAX_DESCRIPTION_CHARS,
        ),
        location: first_match_text(document, &VENUE_BLOCKS),
        price: first_match_text(document, &PRICE_BLOCKS),
        capacity: capacity_status(page_text),
        ..Default::default()
    }
}

/// Parse a detail page into a patch record, earlier layers taking precedence.
pub fn parse_detail(html: &str) -> EventRecord {
    let document = Html::parse_document(html);
    let page_text = visible_text(&document);
    microdata_layer(&document)
        .merge_missing(&meta_layer(&document))
        .merge_missing(&visible_layer(&document, &page_text))
}

async fn render_detail<R: Renderer>(
    renderer: &R,
    url: &str,
    timeout_ms: u64,
) -> Result<String, RenderError> {
    let options = SessionOptions {
        wait_selector: Some("body".to_string()),
        timeout_ms,
    };
    let mut session = renderer.new_session(&options).await?;
    let html = session.open(url).await;
    if let Err(e) = session.close().await {
        warn!(url, error = %e, "Failed to close detail session");
    }
    html
}

async fn store(opts: &EnrichOptions, url: &str, html: &str) {
    if let Some(cache) = &opts.cache {
        cache.put(url, CacheKind::Detail, html).await;
    }
}

/// Fetch a detail page, returning its HTML and how it was fetched.
async fn fetch_detail<F, R>(
    fetcher: &F,
    renderer: &R,
    url: &str,
    opts: &EnrichOptions,
) -> Result<(String, &'static str), String>
where
    F: FetchHtml,
    R: Renderer,
{
    if let Some(cache) = &opts.cache {
        if let Some(html) = cache.get(url, CacheKind::Detail).await {
            return Ok((html, METHOD_CACHE));
        }
    }

    let fetched = match fetcher.fetch_html(url).await {
        Ok(html) => {
            let text_len = visible_text(&Html::parse_document(&html)).chars().count();
            if text_len > opts.min_visible_chars {
                store(opts, url, &html).await;
                return Ok((html, METHOD_REQUESTS));
            }
            debug!(url, text_len, "Detail page looks like an app shell; rendering");
            Some(html)
        }
        Err(e) => {
            warn!(url, error = %e, "Detail fetch failed; rendering");
            None
        }
    };

    match render_detail(renderer, url, opts.render_timeout_ms).await {
        Ok(html) => {
            store(opts, url, &html).await;
            Ok((html, METHOD_RENDERER))
        }
        Err(e) => match fetched {
            Some(html) => {
                warn!(url, error = %e, "Detail render failed; keeping the thin HTTP page");
                Ok((html, METHOD_REQUESTS))
            }
            None => Err(e.to_string()),
        },
    }
}

pub fn detail_dump_path(dir: &Path, source: &str, url: &str) -> PathBuf {
    dir.join(format!("detail_{source}_{}.html", url_digest(url)))
}

/// Dump a fetched detail page for selector tuning. Failures are logged.
async fn dump_detail(dir: &Path, source: &str, url: &str, html: &str) {
    let path = detail_dump_path(dir, source, url);
    if let Err(e) = fs::create_dir_all(dir).await {
        warn!(dir = %dir.display(), error = %e, "Failed to create HTML dump directory");
        return;
    }
    match fs::write(&path, html).await {
        Ok(()) => debug!(path = %path.display(), bytes = html.len(), "Saved detail HTML"),
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to save detail HTML"),
    }
}

fn is_http(url: &str) -> bool {
    Url::parse(url)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}

/// Enrich `records` in order. Records without an http(s) URL pass through.
///
/// Records already in `checkpoint` are filled from it without a fetch; newly
/// enriched ones are added to it.
#[instrument(level = "info", skip_all, fields(records = records.len()))]
pub async fn enrich_records<F, R>(
    records: Vec<EventRecord>,
    fetcher: &F,
    renderer: &R,
    opts: &EnrichOptions,
    mut checkpoint: Option<&mut EnrichCheckpoint>,
) -> EnrichReport
where
    F: FetchHtml,
    R: Renderer,
{
    let t0 = Instant::now();
    let mut report = EnrichReport::default();
    let mut reused = 0usize;

    for record in records {
        if !is_http(&record.url) {
            report.records.push(record);
            continue;
        }

        if let Some(done) = checkpoint.as_deref().and_then(|c| c.get(&record.url)) {
            debug!(url = %record.url, "Reusing checkpointed enrichment");
            report.records.push(record.merge_missing(done));
            reused += 1;
            continue;
        }

        match fetch_detail(fetcher, renderer, &record.url, opts).await {
            Ok((html, method)) => {
                if let Some(dir) = &opts.dump_dir {
                    dump_detail(dir, &record.source, &record.url, &html).await;
                }
                let mut merged = record.merge_missing(&parse_detail(&html));
                merged.fetch_method = Some(method.to_string());
                let merged = finalize_dates(merged, opts.offset, opts.today);
                if let Some(c) = checkpoint.as_deref_mut() {
                    c.record(&merged).await;
                }
                report.records.push(merged);
            }
            Err(reason) => {
                warn!(
                    url = %record.url,
                    reason = %truncate_for_log(&reason, 200),
                    "Detail enrichment failed"
                );
                let failure = SourceFailure::new(&record.source, FailureStage::Enrich, reason)
                    .with_url(&record.url);
                report.failures.push(failure);
                report.records.push(record);
            }
        }
    }

    info!(
        records = report.records.len(),
        reused,
        failed = report.failures.len(),
        elapsed_ms = t0.elapsed().as_millis() as u64,
        "Enrichment finished"
    );
    report
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves canned bodies by URL; unknown URLs fail.
    #[derive(Debug, Default)]
    pub struct ScriptedFetcher {
        pub pages: HashMap<String, String>,
        pub requested: Mutex<Vec<String>>,
    }

    impl ScriptedFetcher {
        pub fn with_page(mut self, url: &str, html: &str) -> Self {
            self.pages.insert(url.to_string(), html.to_string());
            self
        }
    }

    impl FetchHtml for ScriptedFetcher {
        async fn fetch_html(&self, url: &str) -> Result<String, Box<dyn Error>> {
            self.requested.lock().unwrap().push(url.to_string());
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| format!("HTTP 404 for {url}").into())
        }
    }
}
