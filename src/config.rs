//! Run configuration: a YAML file of settings and source definitions.
//!
//! The file is read once at startup, CLI overrides are folded in, and the
//! resulting [`RunConfig`] is passed down by reference. Sources are kept in
//! their loose, as-written form ([`SourceConfig`]) and validated one by one
//! into a typed [`CrawlPlan`] so a single bad source never rejects the file.
//!
//! ```yaml
//! settings:
//!   output: data/events.json
//!   scroll_pause_ms: 1200
//! sources:
//!   - id: peatix
//!     base_url: https://peatix.com/search?p=1
//!     strategy: paged
//!     page_param: p
//!     stop_mode: until_empty
//!     item_selector: .event-card
//!   - id: fever
//!     base_url: https://feverup.com/en/singapore/things-to-do
//!     strategy: infinite_scroll
//!     item_selector: '[data-testid^="fv-plan-card"]'
//!     no_growth_limit: 3
//! ```

use crate::cache::HtmlCache;
use crate::cli::Cli;
use crate::error::ConfigError;
use crate::fields::MAX_OFFSET_HOURS;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{instrument, warn};
use url::Url;

/// Run-wide defaults. Every field can be omitted from the YAML file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Where the aggregated JSON is written.
    pub output: String,
    /// Navigation timeout for every page load.
    pub render_timeout_ms: u64,
    /// Selector awaited after navigation when a source sets none.
    pub wait_selector: String,
    pub scroll_pause_ms: u64,
    /// Page cap for `fixed_count` sources that set none.
    pub default_max_pages: u32,
    /// Page cap for `until_empty` sources that set none.
    pub safety_max_pages: u32,
    /// Scroll count for fixed infinite-scroll sources that set none.
    pub default_scroll_count: u32,
    pub no_growth_limit: u32,
    /// Hard bound on scroll rounds in adaptive mode.
    pub max_scrolls: u32,
    pub html_dump_dir: String,
    /// Offset applied to timestamps without one, in hours east of UTC.
    pub timezone_offset_hours: i32,
    pub dedupe: bool,
    pub headless: bool,
    /// Dump rendered HTML for every source.
    pub save_html: bool,
    /// Replaces every paged source's page cap when set.
    pub max_pages_override: Option<u32>,
    /// HTML beyond this many characters is cut before it reaches the model.
    pub llm_max_input_chars: usize,
    /// Directory holding cached listing and detail HTML.
    pub cache_dir: String,
    /// Serve pages from the cache when an entry exists.
    pub use_cache: bool,
    /// Store every rendered or fetched page in the cache.
    pub write_cache: bool,
    /// Enriched records so far, rewritten every `checkpoint_every` records.
    pub checkpoint_file: String,
    pub checkpoint_every: usize,
    /// Reuse the enrichment checkpoint instead of refetching detail pages.
    pub resume: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output: "data/events.json".to_string(),
            render_timeout_ms: 20_000,
            wait_selector: "body".to_string(),
            scroll_pause_ms: 1_200,
            default_max_pages: 2,
            safety_max_pages: 50,
            default_scroll_count: 2,
            no_growth_limit: 3,
            max_scrolls: 30,
            html_dump_dir: "data/html_dumps".to_string(),
            timezone_offset_hours: 8,
            dedupe: true,
            headless: true,
            save_html: false,
            max_pages_override: None,
            llm_max_input_chars: 60_000,
            cache_dir: "data/cache".to_string(),
            use_cache: false,
            write_cache: false,
            checkpoint_file: "data/enrich_checkpoint.json".to_string(),
            checkpoint_every: 50,
            resume: false,
        }
    }
}

impl Settings {
    /// Reject settings that no source could run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(-MAX_OFFSET_HOURS..=MAX_OFFSET_HOURS).contains(&self.timezone_offset_hours) {
            return Err(ConfigError::Setting {
                field: "timezone_offset_hours",
                reason: format!(
                    "{} is outside -{MAX_OFFSET_HOURS}..={MAX_OFFSET_HOURS}",
                    self.timezone_offset_hours
                ),
            });
        }
        Ok(())
    }

    /// The page cache for this run, when reading or writing is on.
    pub fn html_cache(&self) -> Option<HtmlCache> {
        (self.use_cache || self.write_cache)
            .then(|| HtmlCache::new(&self.cache_dir, self.use_cache, self.write_cache))
    }
}

/// CSS selectors used by the card extractor for one source.
///
/// With `item` set, each matching element is one event card and the other
/// selectors are evaluated inside it. Without it, event links are discovered
/// through `link_selectors` across the whole page.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct CardSelectors {
    pub item: Option<String>,
    pub link: Option<String>,
    pub title: Option<String>,
    pub date: Option<String>,
    pub location: Option<String>,
    pub price: Option<String>,
    pub link_selectors: Vec<String>,
    /// Only keep links whose absolute URL contains this fragment.
    pub url_contains: Option<String>,
}

/// A source exactly as written in the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub base_url: Option<String>,
    pub strategy: Option<String>,
    pub wait_selector: Option<String>,
    pub item_selector: Option<String>,
    // paged
    pub page_param: Option<String>,
    pub start_page: Option<u32>,
    pub max_pages: Option<u32>,
    pub stop_mode: Option<String>,
    // infinite scroll
    pub scroll_mode: Option<String>,
    pub scroll_count: Option<u32>,
    pub no_growth_limit: Option<u32>,
    pub max_scrolls: Option<u32>,
    pub scroll_pause_ms: Option<u64>,
    // debug
    #[serde(default)]
    pub save_html: bool,
    pub html_output_file: Option<String>,
    #[serde(default)]
    pub cards: CardSelectors,
}

fn enabled_by_default() -> bool {
    true
}

/// When a paged crawl stops.
#[derive(Debug, Clone, PartialEq)]
pub enum StopMode {
    /// Render exactly `max_pages` pages.
    FixedCount,
    /// Stop at the first page where the selector matches nothing.
    UntilEmpty { item_selector: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PagedPlan {
    pub page_param: String,
    pub start_page: u32,
    pub max_pages: u32,
    pub stop: StopMode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScrollMode {
    Fixed {
        count: u32,
    },
    Adaptive {
        item_selector: String,
        no_growth_limit: u32,
        max_scrolls: u32,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScrollPlan {
    pub mode: ScrollMode,
    pub pause: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    Paged(PagedPlan),
    InfiniteScroll(ScrollPlan),
}

/// A validated, typed crawl plan for one source.
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlPlan {
    pub source_id: String,
    pub base_url: Url,
    pub wait_selector: Option<String>,
    pub render_timeout_ms: u64,
    pub strategy: Strategy,
    /// Where rendered HTML is dumped, when enabled.
    pub html_output: Option<PathBuf>,
    /// Where fetched detail pages are dumped, when enabled.
    pub detail_dump_dir: Option<PathBuf>,
    pub cache: Option<HtmlCache>,
    pub cards: CardSelectors,
}

/// Normalize `until-empty` / `Until_Empty` to `until_empty`.
fn normalize_keyword(s: &str) -> String {
    s.trim().to_ascii_lowercase().replace('-', "_")
}

fn non_empty(s: &Option<String>) -> Option<String> {
    s.as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl SourceConfig {
    /// Validate this source against the run settings.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Missing`] when a field required by the chosen strategy
    /// is absent, [`ConfigError::Invalid`] when a value cannot be used.
    pub fn plan(&self, settings: &Settings) -> Result<CrawlPlan, ConfigError> {
        let missing = |field| ConfigError::Missing {
            source_id: self.id.clone(),
            field,
        };
        let invalid = |reason: String| ConfigError::Invalid {
            source_id: self.id.clone(),
            reason,
        };

        let raw_url = non_empty(&self.base_url).ok_or_else(|| missing("base_url"))?;
        let base_url = Url::parse(&raw_url).map_err(|e| invalid(format!("base_url: {e}")))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(invalid(format!("base_url must be http(s), got {raw_url}")));
        }

        let strategy_name = non_empty(&self.strategy).ok_or_else(|| missing("strategy"))?;
        let item_selector = non_empty(&self.item_selector);

        let strategy = match normalize_keyword(&strategy_name).as_str() {
            "paged" => {
                let page_param = non_empty(&self.page_param).ok_or_else(|| missing("page_param"))?;
                let cap = settings.max_pages_override.or(self.max_pages);

                let stop_name = self
                    .stop_mode
                    .as_deref()
                    .map(normalize_keyword)
                    .unwrap_or_else(|| "fixed_count".to_string());

                let (stop, max_pages) = match stop_name.as_str() {
                    "fixed_count" => (
                        StopMode::FixedCount,
                        cap.unwrap_or(settings.default_max_pages),
                    ),
                    "until_empty" => {
                        if item_selector.is_none() && cap.is_none() {
                            warn!(
                                source = %self.id,
                                cap = settings.safety_max_pages,
                                "until_empty without item_selector or max_pages; using safety cap"
                            );
                        }
                        (
                            StopMode::UntilEmpty {
                                item_selector: item_selector.clone(),
                            },
                            cap.unwrap_or(settings.safety_max_pages),
                        )
                    }
                    other => return Err(invalid(format!("unknown stop_mode `{other}`"))),
                };

                if max_pages == 0 {
                    return Err(invalid("max_pages must be at least 1".to_string()));
                }

                Strategy::Paged(PagedPlan {
                    page_param,
                    start_page: self.start_page.unwrap_or(1),
                    max_pages,
                    stop,
                })
            }
            "infinite_scroll" => {
                let mode_name = self
                    .scroll_mode
                    .as_deref()
                    .map(normalize_keyword)
                    .unwrap_or_else(|| {
                        let inferred = if item_selector.is_some() { "adaptive" } else { "fixed" };
                        inferred.to_string()
                    });

                let mode = match mode_name.as_str() {
                    "fixed" => ScrollMode::Fixed {
                        count: self.scroll_count.unwrap_or(settings.default_scroll_count),
                    },
                    "adaptive" => {
                        let item_selector = item_selector
                            .clone()
                            .ok_or_else(|| missing("item_selector"))?;
                        let no_growth_limit =
                            self.no_growth_limit.unwrap_or(settings.no_growth_limit);
                        let max_scrolls = self.max_scrolls.unwrap_or(settings.max_scrolls);
                        if no_growth_limit == 0 {
                            return Err(invalid("no_growth_limit must be at least 1".to_string()));
                        }
                        if max_scrolls == 0 {
                            return Err(invalid("max_scrolls must be at least 1".to_string()));
                        }
                        ScrollMode::Adaptive {
                            item_selector,
                            no_growth_limit,
                            max_scrolls,
                        }
                    }
                    other => return Err(invalid(format!("unknown scroll_mode `{other}`"))),
                };

                Strategy::InfiniteScroll(ScrollPlan {
                    mode,
                    pause: Duration::from_millis(
                        self.scroll_pause_ms.unwrap_or(settings.scroll_pause_ms),
                    ),
                })
            }
            other => return Err(invalid(format!("unknown strategy `{other}`"))),
        };

        let save_html = self.save_html || settings.save_html;
        let dump_dir = PathBuf::from(&settings.html_dump_dir);
        let html_output = save_html.then(|| match non_empty(&self.html_output_file) {
            Some(path) => PathBuf::from(path),
            None => dump_dir.join(format!("listing_{}.html", self.id)),
        });

        let wait_selector = non_empty(&self.wait_selector).or_else(|| {
            let fallback = settings.wait_selector.trim();
            (!fallback.is_empty()).then(|| fallback.to_string())
        });

        Ok(CrawlPlan {
            source_id: self.id.clone(),
            base_url,
            wait_selector,
            render_timeout_ms: settings.render_timeout_ms,
            strategy,
            html_output,
            detail_dump_dir: save_html.then_some(dump_dir),
            cache: settings.html_cache(),
            cards: self.cards.clone(),
        })
    }
}

/// The immutable configuration of one run.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl RunConfig {
    /// Parse and check a run file. Per-source problems are left to [`SourceConfig::plan`].
    pub fn from_yaml_str(yaml: &str, path: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;
        config.settings.validate()?;
        Ok(config)
    }

    #[instrument(level = "info", skip_all, fields(%path))]
    pub async fn load(path: &str) -> Result<Self, ConfigError> {
        let yaml = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_string(),
                source,
            })?;
        let config = Self::from_yaml_str(&yaml, path)?;
        tracing::info!(sources = config.sources.len(), "Loaded run configuration");
        Ok(config)
    }

    /// Fold command-line overrides into the file settings.
    pub fn with_cli(mut self, cli: &Cli) -> Self {
        if let Some(output) = &cli.output {
            self.settings.output = output.clone();
        }
        if cli.max_pages.is_some() {
            self.settings.max_pages_override = cli.max_pages;
        }
        if cli.save_html {
            self.settings.save_html = true;
        }
        if cli.no_dedupe {
            self.settings.dedupe = false;
        }
        if cli.headed {
            self.settings.headless = false;
        }
        if cli.use_cache {
            self.settings.use_cache = true;
        }
        if cli.no_cache {
            self.settings.use_cache = false;
        }
        if cli.resume {
            self.settings.resume = true;
        }
        self
    }

    /// Sources to run, in configuration order.
    ///
    /// An empty `names` list selects every enabled source. Otherwise the named
    /// sources are selected regardless of `enabled`; names that match nothing
    /// come back as [`ConfigError::UnknownSource`].
    pub fn select(&self, names: &[String]) -> (Vec<&SourceConfig>, Vec<ConfigError>) {
        if names.is_empty() {
            return (self.sources.iter().filter(|s| s.enabled).collect(), Vec::new());
        }

        let selected = self
            .sources
            .iter()
            .filter(|s| names.iter().any(|n| n == &s.id))
            .collect();
        let unknown = names
            .iter()
            .filter(|n| !self.sources.iter().any(|s| &s.id == *n))
            .map(|n| ConfigError::UnknownSource(n.clone()))
            .collect();
        (selected, unknown)
    }
}
