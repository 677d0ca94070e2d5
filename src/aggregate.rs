//! Run orchestration across all configured sources.
//!
//! Sources run one after another in configuration order:
//!
//! 1. every selected source is validated into a [`CrawlPlan`] up front;
//!    invalid ones are skipped with a `config` failure
//! 2. each valid source is crawled through the [`Renderer`]
//! 3. every captured page is handed to the [`Extractor`]
//! 4. records are optionally enriched from their detail pages, sharing one
//!    checkpoint across the run
//! 5. all records are concatenated, optionally deduplicated, and returned as
//!    one [`EventDigest`]
//!
//! A failing source never stops the run. Records extracted from pages that
//! were captured before a render failure are kept.

use crate::config::{CrawlPlan, RunConfig, Settings};
use crate::crawl::crawl_source;
use crate::enrich::{EnrichCheckpoint, EnrichOptions, FetchHtml, enrich_records};
use crate::error::{ConfigError, ExtractError};
use crate::extract::{ExtractTarget, Extractor};
use crate::fields::offset_hours;
use crate::models::{EventDigest, EventRecord, EventSchema, FailureStage, SourceFailure};
use crate::renderer::Renderer;
use chrono::{NaiveDate, SecondsFormat, Utc};
use itertools::Itertools;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info, instrument, warn};
use url::Url;

/// Visible text at or below this many characters marks an unrendered detail page.
const MIN_VISIBLE_CHARS: usize = 200;

/// Everything a run needs besides the configuration.
pub struct Aggregator<'a, R, E, F> {
    pub renderer: &'a R,
    pub extractor: &'a E,
    pub fetcher: &'a F,
    pub schema: EventSchema,
    /// Reference date for relative and year-less dates.
    pub today: NaiveDate,
    pub enrich: bool,
}

/// What one source contributed.
#[derive(Debug, Default)]
struct SourceResult {
    records: Vec<EventRecord>,
    failures: Vec<SourceFailure>,
}

fn config_failure(e: &ConfigError) -> SourceFailure {
    SourceFailure::new(e.source_id().unwrap_or("<config>"), FailureStage::Config, e)
}

impl<'a, R, E, F> Aggregator<'a, R, E, F>
where
    R: Renderer,
    E: Extractor,
    F: FetchHtml,
{
    /// Run the sources named in `names` (all enabled sources when empty).
    #[instrument(level = "info", skip_all, fields(sources = config.sources.len()))]
    pub async fn run(&self, config: &RunConfig, names: &[String]) -> EventDigest {
        let t0 = Instant::now();
        let settings = &config.settings;
        let (selected, unknown) = config.select(names);

        let mut failures: Vec<SourceFailure> = Vec::new();
        for e in &unknown {
            error!(error = %e, "Skipping requested source");
            failures.push(config_failure(e));
        }

        // Validate everything before the first browser session opens.
        let plans: Vec<CrawlPlan> = selected
            .iter()
            .filter_map(|source| match source.plan(settings) {
                Ok(plan) => Some(plan),
                Err(e) => {
                    error!(error = %e, "Skipping misconfigured source");
                    failures.push(config_failure(&e));
                    None
                }
            })
            .collect();
        info!(valid = plans.len(), skipped = selected.len() - plans.len(), "Validated sources");

        let mut checkpoint = match (self.enrich, settings.resume) {
            (false, _) => None,
            (true, false) => Some(EnrichCheckpoint::new(
                &settings.checkpoint_file,
                settings.checkpoint_every,
            )),
            (true, true) => Some(
                EnrichCheckpoint::resume(
                    PathBuf::from(&settings.checkpoint_file),
                    settings.checkpoint_every,
                )
                .await,
            ),
        };

        let mut events: Vec<EventRecord> = Vec::new();
        for plan in &plans {
            let result = self.run_source(plan, settings, checkpoint.as_mut()).await;
            events.extend(result.records);
            failures.extend(result.failures);
        }

        if let Some(checkpoint) = checkpoint.as_mut() {
            checkpoint.flush().await;
        }

        if settings.dedupe {
            let before = events.len();
            events = events.into_iter().unique_by(EventRecord::dedupe_key).collect();
            info!(before, after = events.len(), "Deduplicated events");
        }

        info!(
            events = events.len(),
            failures = failures.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Run complete"
        );

        EventDigest {
            generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            events,
            failures,
        }
    }

    #[instrument(level = "info", skip_all, fields(source = %plan.source_id))]
    async fn run_source(
        &self,
        plan: &CrawlPlan,
        settings: &Settings,
        checkpoint: Option<&mut EnrichCheckpoint>,
    ) -> SourceResult {
        let t0 = Instant::now();
        let source = plan.source_id.as_str();
        let offset = offset_hours(settings.timezone_offset_hours);
        let mut result = SourceResult::default();

        let outcome = crawl_source(self.renderer, plan).await;
        if let Some(e) = &outcome.error {
            let url = e.url().unwrap_or(plan.base_url.as_str());
            result
                .failures
                .push(SourceFailure::new(source, FailureStage::Render, e).with_url(url));
        }

        let mut extract_errors = 0usize;
        for page in &outcome.pages {
            let page_url = Url::parse(&page.url).unwrap_or_else(|_| plan.base_url.clone());
            let target = ExtractTarget {
                source_id: source,
                page_url: &page_url,
                schema: &self.schema,
                cards: &plan.cards,
                offset,
                today: self.today,
            };
            match self.extractor.extract(&page.html, &target).await {
                Ok(records) => result.records.extend(records),
                Err(e) => {
                    extract_errors += 1;
                    warn!(page = %page.url, error = %e, "Extraction failed for page");
                    result.failures.push(
                        SourceFailure::new(source, FailureStage::Extract, e).with_url(&page.url),
                    );
                }
            }
        }

        if !outcome.pages.is_empty() && extract_errors == 0 && result.records.is_empty() {
            let e = ExtractError::Empty {
                pages: outcome.pages.len(),
            };
            warn!(error = %e, "Source produced no records");
            result.failures.push(SourceFailure::new(source, FailureStage::Extract, e));
        }

        if self.enrich && !result.records.is_empty() {
            let opts = EnrichOptions {
                min_visible_chars: MIN_VISIBLE_CHARS,
                render_timeout_ms: settings.render_timeout_ms,
                offset,
                today: self.today,
                cache: plan.cache.clone(),
                dump_dir: plan.detail_dump_dir.clone(),
            };
            let records = std::mem::take(&mut result.records);
            let report =
                enrich_records(records, self.fetcher, self.renderer, &opts, checkpoint).await;
            result.records = report.records;
            result.failures.extend(report.failures);
        }

        info!(
            pages = outcome.pages.len(),
            records = result.records.len(),
            failures = result.failures.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Source finished"
        );
        result
    }
}
