//! Crawl controller: drives one render session per source and decides when
//! the listing has been fully captured.
//!
//! # Paged listings
//!
//! Pages are rendered one after another by rewriting the page query
//! parameter. `fixed_count` renders exactly `max_pages` pages. `until_empty`
//! counts the item selector after each page and stops on the first page with
//! no matches; that page is rendered but dropped. `max_pages` bounds both.
//!
//! # Infinite-scroll listings
//!
//! The base URL is opened once. Fixed mode scrolls exactly N times. Adaptive
//! mode counts the item selector after every scroll and stops once the count
//! has failed to grow for `no_growth_limit` consecutive rounds, or when
//! `max_scrolls` is reached. The final DOM is captured once.
//!
//! Render failures end the crawl early but whatever pages were already
//! captured are returned with the error.
//!
//! # Cache
//!
//! With a page cache configured, every rendered page (or final scrolled DOM)
//! is stored by URL. When cache reads are on, a cached page replaces its
//! render and items are counted in the cached HTML instead of the browser.

use crate::cache::{CacheKind, HtmlCache};
use crate::config::{CrawlPlan, PagedPlan, ScrollMode, ScrollPlan, StopMode, Strategy};
use crate::error::RenderError;
use crate::renderer::{RenderSession, Renderer, SessionOptions, page_url};
use scraper::{Html, Selector};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

/// HTML captured from one page or scroll session.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPage {
    pub url: String,
    pub html: String,
    /// Item selector matches at capture time, when counted.
    pub items: Option<usize>,
    /// Served from the page cache instead of the browser.
    pub cached: bool,
}

/// Mutable per-source crawl state. Never outlives the source.
#[derive(Debug, Default)]
pub struct CrawlState {
    /// Page number of the next page to render.
    pub page: u32,
    pub page_renders: u32,
    pub scroll_rounds: u32,
    pub last_count: Option<usize>,
    pub no_growth: u32,
    pub pages: Vec<RenderedPage>,
}

impl CrawlState {
    /// Record the item count seen after a scroll round.
    ///
    /// The first observation and any strictly larger count reset the
    /// no-growth counter; anything else, including a failed count, bumps it.
    pub fn observe(&mut self, count: Option<usize>) {
        match (count, self.last_count) {
            (Some(_), None) => self.no_growth = 0,
            (Some(n), Some(prev)) if n > prev => self.no_growth = 0,
            _ => self.no_growth += 1,
        }
        if count.is_some() {
            self.last_count = count;
        }
    }
}

/// What a crawl produced.
#[derive(Debug, Default)]
pub struct CrawlOutcome {
    pub pages: Vec<RenderedPage>,
    pub page_renders: u32,
    pub scroll_rounds: u32,
    /// Set when the crawl stopped on a render failure.
    pub error: Option<RenderError>,
}

/// Crawl one source to completion.
///
/// The session is closed on every path, including failure.
#[instrument(level = "info", skip_all, fields(source = %plan.source_id))]
pub async fn crawl_source<R: Renderer>(renderer: &R, plan: &CrawlPlan) -> CrawlOutcome {
    let options = SessionOptions {
        wait_selector: plan.wait_selector.clone(),
        timeout_ms: plan.render_timeout_ms,
    };

    let mut session = match renderer.new_session(&options).await {
        Ok(session) => session,
        Err(e) => {
            warn!(error = %e, "Could not open render session");
            return CrawlOutcome {
                error: Some(e),
                ..Default::default()
            };
        }
    };

    let mut state = CrawlState::default();
    let result = match &plan.strategy {
        Strategy::Paged(paged) => crawl_paged(&mut session, plan, paged, &mut state).await,
        Strategy::InfiniteScroll(scroll) => {
            crawl_scroll(&mut session, plan, scroll, &mut state).await
        }
    };

    if let Err(e) = session.close().await {
        warn!(error = %e, "Failed to close render session");
    }

    let outcome = CrawlOutcome {
        pages: state.pages,
        page_renders: state.page_renders,
        scroll_rounds: state.scroll_rounds,
        error: result.err(),
    };

    if let Some(path) = &plan.html_output {
        save_html(path, &outcome.pages).await;
    }

    match &outcome.error {
        None => info!(
            pages = outcome.pages.len(),
            renders = outcome.page_renders,
            scrolls = outcome.scroll_rounds,
            "Crawl complete"
        ),
        Some(e) => warn!(
            pages = outcome.pages.len(),
            renders = outcome.page_renders,
            scrolls = outcome.scroll_rounds,
            error = %e,
            "Crawl aborted"
        ),
    }
    outcome
}

async fn crawl_paged<S: RenderSession>(
    session: &mut S,
    plan: &CrawlPlan,
    paged: &PagedPlan,
    state: &mut CrawlState,
) -> Result<(), RenderError> {
    state.page = paged.start_page;
    if paged.max_pages == 0 {
        return Ok(());
    }
    let last_page = paged.start_page.saturating_add(paged.max_pages - 1);

    while state.page <= last_page {
        let url = page_url(&plan.base_url, &paged.page_param, state.page);
        let (html, cached) = match cache_get(plan.cache.as_ref(), url.as_str()).await {
            Some(html) => (html, true),
            None => {
                let html = session
                    .paginate(&plan.base_url, &paged.page_param, state.page)
                    .await?;
                state.page_renders += 1;
                cache_put(plan.cache.as_ref(), url.as_str(), &html).await;
                (html, false)
            }
        };

        let items = match &paged.stop {
            StopMode::UntilEmpty {
                item_selector: Some(selector),
            } => {
                let n = if cached {
                    count_in_html(&html, selector)?
                } else {
                    session.count_matches(selector).await?
                };
                if n == 0 {
                    info!(page = state.page, cached, "Page has no items; stopping");
                    return Ok(());
                }
                Some(n)
            }
            _ => None,
        };

        debug!(page = state.page, ?items, cached, bytes = html.len(), "Captured page");
        state.pages.push(RenderedPage {
            url: url.to_string(),
            html,
            items,
            cached,
        });

        if state.page == u32::MAX {
            break;
        }
        state.page += 1;
    }

    info!(pages = state.pages.len(), "Reached page cap");
    Ok(())
}

async fn crawl_scroll<S: RenderSession>(
    session: &mut S,
    plan: &CrawlPlan,
    scroll: &ScrollPlan,
    state: &mut CrawlState,
) -> Result<(), RenderError> {
    let url = plan.base_url.as_str();
    if let Some(html) = cache_get(plan.cache.as_ref(), url).await {
        let items = match &scroll.mode {
            ScrollMode::Adaptive { item_selector, .. } => count_in_html(&html, item_selector).ok(),
            ScrollMode::Fixed { .. } => None,
        };
        info!(?items, "Using cached listing; skipping scroll");
        state.pages.push(RenderedPage {
            url: url.to_string(),
            html,
            items,
            cached: true,
        });
        return Ok(());
    }

    session.open(url).await?;
    state.page_renders += 1;

    let rounds = scroll_rounds(session, scroll, state).await;

    // Keep whatever loaded before a failed round.
    match session.content().await {
        Ok(html) => {
            if rounds.is_ok() {
                cache_put(plan.cache.as_ref(), url, &html).await;
            }
            state.pages.push(RenderedPage {
                url: url.to_string(),
                html,
                items: state.last_count,
                cached: false,
            });
        }
        Err(e) if rounds.is_ok() => return Err(e),
        Err(e) => warn!(error = %e, "Could not capture DOM after failed scroll"),
    }
    rounds
}

async fn cache_get(cache: Option<&HtmlCache>, url: &str) -> Option<String> {
    match cache {
        Some(cache) => cache.get(url, CacheKind::Listing).await,
        None => None,
    }
}

async fn cache_put(cache: Option<&HtmlCache>, url: &str, html: &str) {
    if let Some(cache) = cache {
        cache.put(url, CacheKind::Listing, html).await;
    }
}

/// Count `selector` matches in already-captured HTML.
fn count_in_html(html: &str, selector: &str) -> Result<usize, RenderError> {
    let selector = Selector::parse(selector)
        .map_err(|e| RenderError::Script(format!("invalid selector `{selector}`: {e}")))?;
    Ok(Html::parse_document(html).select(&selector).count())
}

async fn scroll_rounds<S: RenderSession>(
    session: &mut S,
    scroll: &ScrollPlan,
    state: &mut CrawlState,
) -> Result<(), RenderError> {
    match &scroll.mode {
        ScrollMode::Fixed { count } => {
            for _ in 0..*count {
                session.scroll().await?;
                state.scroll_rounds += 1;
                sleep(scroll.pause).await;
            }
            info!(scrolls = state.scroll_rounds, "Fixed scroll complete");
        }
        ScrollMode::Adaptive {
            item_selector,
            no_growth_limit,
            max_scrolls,
        } => loop {
            if state.scroll_rounds >= *max_scrolls {
                info!(scrolls = state.scroll_rounds, "Reached scroll safety cap");
                break;
            }

            session.scroll().await?;
            state.scroll_rounds += 1;
            sleep(scroll.pause).await;

            let count = match session.count_matches(item_selector).await {
                Ok(n) => Some(n),
                Err(e) => {
                    warn!(
                        error = %e,
                        round = state.scroll_rounds,
                        "Item count failed; treating as no growth"
                    );
                    None
                }
            };
            state.observe(count);
            debug!(
                round = state.scroll_rounds,
                ?count,
                no_growth = state.no_growth,
                "Scroll round"
            );

            if state.no_growth >= *no_growth_limit {
                info!(
                    scrolls = state.scroll_rounds,
                    items = ?state.last_count,
                    "Item count stopped growing"
                );
                break;
            }
        },
    }
    Ok(())
}

/// `events.html` -> `events_page_2.html`
fn numbered_path(path: &Path, n: usize) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("listing");
    let name = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}_page_{n}.{ext}"),
        None => format!("{stem}_page_{n}"),
    };
    path.with_file_name(name)
}

/// Dump rendered HTML for inspection. Failures are logged, never returned.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
async fn save_html(path: &Path, pages: &[RenderedPage]) {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = fs::create_dir_all(parent).await {
            warn!(error = %e, "Failed to create HTML dump directory");
            return;
        }
    }

    for (i, page) in pages.iter().enumerate() {
        let target = if pages.len() == 1 {
            path.to_path_buf()
        } else {
            numbered_path(path, i + 1)
        };
        match fs::write(&target, &page.html).await {
            Ok(()) => {
                info!(path = %target.display(), bytes = page.html.len(), "Saved rendered HTML")
            }
            Err(e) => warn!(path = %target.display(), error = %e, "Failed to save rendered HTML"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CardSelectors;
    use crate::renderer::scripted::{ScriptedRenderer, ScriptedSite};
    use std::time::Duration;
    use url::Url;

    fn plan(url: &str, strategy: Strategy) -> CrawlPlan {
        CrawlPlan {
            source_id: "test".to_string(),
            base_url: Url::parse(url).unwrap(),
            wait_selector: None,
            render_timeout_ms: 1_000,
            strategy,
            html_output: None,
            detail_dump_dir: None,
            cache: None,
            cards: CardSelectors::default(),
        }
    }

    fn paged(max_pages: u32, stop: StopMode) -> Strategy {
        Strategy::Paged(PagedPlan {
            page_param: "page".to_string(),
            start_page: 1,
            max_pages,
            stop,
        })
    }

    fn until_empty() -> StopMode {
        StopMode::UntilEmpty {
            item_selector: Some(".card".to_string()),
        }
    }

    fn adaptive(limit: u32, max_scrolls: u32) -> Strategy {
        Strategy::InfiniteScroll(ScrollPlan {
            mode: ScrollMode::Adaptive {
                item_selector: ".card".to_string(),
                no_growth_limit: limit,
                max_scrolls,
            },
            pause: Duration::ZERO,
        })
    }

    fn site(pages: Vec<usize>, scroll_counts: Vec<usize>) -> ScriptedSite {
        ScriptedSite {
            pages,
            scroll_counts,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_fixed_count_renders_exactly_cap_pages() {
        for cap in [1u32, 2, 5] {
            let renderer = ScriptedRenderer::default()
                .with_site("a.test", site(vec![10, 0, 0, 0, 0], vec![]));
            let plan = plan("https://a.test/list?page=1", paged(cap, StopMode::FixedCount));
            let outcome = crawl_source(&renderer, &plan).await;

            assert!(outcome.error.is_none());
            assert_eq!(renderer.opened().len(), cap as usize);
            assert_eq!(outcome.page_renders, cap);
            assert_eq!(outcome.pages.len(), cap as usize);
            assert!(renderer.sessions_balanced());
        }
    }

    #[tokio::test]
    async fn test_fixed_count_walks_page_numbers_from_start_page() {
        let renderer = ScriptedRenderer::default().with_site("a.test", site(vec![3], vec![]));
        let strategy = Strategy::Paged(PagedPlan {
            page_param: "p".to_string(),
            start_page: 4,
            max_pages: 3,
            stop: StopMode::FixedCount,
        });
        crawl_source(&renderer, &plan("https://a.test/search?q=x&p=1", strategy)).await;

        assert_eq!(
            renderer.opened(),
            vec![
                "https://a.test/search?q=x&p=4",
                "https://a.test/search?q=x&p=5",
                "https://a.test/search?q=x&p=6",
            ]
        );
    }

    #[tokio::test]
    async fn test_until_empty_stops_on_first_empty_page_and_drops_it() {
        let renderer = ScriptedRenderer::default()
            .with_site("a.test", site(vec![10, 10, 0, 7, 7], vec![]));
        let outcome =
            crawl_source(&renderer, &plan("https://a.test/", paged(50, until_empty()))).await;

        assert!(outcome.error.is_none());
        assert_eq!(renderer.opened().len(), 3);
        assert_eq!(outcome.page_renders, 3);
        assert_eq!(outcome.pages.len(), 2);
        assert!(outcome.pages.iter().all(|p| p.items == Some(10)));
        assert!(outcome.pages[1].url.ends_with("page=2"));
    }

    #[tokio::test]
    async fn test_until_empty_never_exceeds_cap() {
        let renderer = ScriptedRenderer::default().with_site("a.test", site(vec![5], vec![]));
        let outcome =
            crawl_source(&renderer, &plan("https://a.test/", paged(4, until_empty()))).await;

        assert_eq!(renderer.opened().len(), 4);
        assert_eq!(outcome.pages.len(), 4);
    }

    #[tokio::test]
    async fn test_until_empty_without_selector_runs_to_cap() {
        let renderer = ScriptedRenderer::default().with_site("a.test", site(vec![0], vec![]));
        let stop = StopMode::UntilEmpty { item_selector: None };
        let outcome = crawl_source(&renderer, &plan("https://a.test/", paged(3, stop))).await;

        assert_eq!(renderer.opened().len(), 3);
        assert_eq!(outcome.pages.len(), 3);
    }

    #[tokio::test]
    async fn test_adaptive_stops_after_two_flat_rounds() {
        let renderer = ScriptedRenderer::default()
            .with_site("s.test", site(vec![0], vec![5, 8, 8, 8, 8, 8]));
        let outcome = crawl_source(&renderer, &plan("https://s.test/feed", adaptive(2, 30))).await;

        assert!(outcome.error.is_none());
        assert_eq!(renderer.scrolls(), 4);
        assert_eq!(outcome.scroll_rounds, 4);
        assert_eq!(outcome.pages.len(), 1);
        assert_eq!(outcome.pages[0].items, Some(8));
        assert_eq!(renderer.opened().len(), 1);
    }

    #[tokio::test]
    async fn test_adaptive_respects_safety_cap_while_growing() {
        let counts: Vec<usize> = (1..=100).collect();
        let renderer = ScriptedRenderer::default().with_site("s.test", site(vec![0], counts));
        let outcome = crawl_source(&renderer, &plan("https://s.test/", adaptive(3, 6))).await;

        assert_eq!(renderer.scrolls(), 6);
        assert_eq!(outcome.pages[0].items, Some(6));
    }

    #[tokio::test]
    async fn test_adaptive_zero_items_is_no_growth() {
        let renderer =
            ScriptedRenderer::default().with_site("s.test", site(vec![0], vec![0, 0, 0]));
        let outcome = crawl_source(&renderer, &plan("https://s.test/", adaptive(2, 10))).await;

        assert!(outcome.error.is_none());
        assert_eq!(renderer.scrolls(), 3);
        assert_eq!(outcome.pages[0].items, Some(0));
    }

    #[tokio::test]
    async fn test_adaptive_plateau_bound_holds_for_many_sequences() {
        let sequences: Vec<Vec<usize>> = vec![
            vec![1, 2, 3, 3, 3, 3],
            vec![4, 4, 4, 4],
            vec![2, 5, 9, 12, 12, 12, 12, 12],
            vec![1, 1, 2, 2, 3, 3, 3, 3, 3],
        ];
        for limit in 1..=3u32 {
            for seq in &sequences {
                let max_scrolls = 20;
                let renderer =
                    ScriptedRenderer::default().with_site("s.test", site(vec![0], seq.clone()));
                let plan = plan("https://s.test/", adaptive(limit, max_scrolls));
                crawl_source(&renderer, &plan).await;
                let scrolls = renderer.scrolls();

                // The final plateau starts at the first round holding the max value.
                let max = *seq.iter().max().unwrap();
                let plateau_start = seq.iter().position(|&c| c == max).unwrap() + 1;
                assert!(
                    scrolls <= plateau_start + limit as usize,
                    "seq {seq:?} limit {limit}: {scrolls} scrolls"
                );
                assert!(scrolls <= max_scrolls as usize);
            }
        }
    }

    #[tokio::test]
    async fn test_fixed_scroll_ignores_growth() {
        for (count, growth) in [(3u32, vec![1, 1, 1]), (3, vec![1, 2, 3]), (0, vec![5])] {
            let renderer = ScriptedRenderer::default().with_site("s.test", site(vec![0], growth));
            let strategy = Strategy::InfiniteScroll(ScrollPlan {
                mode: ScrollMode::Fixed { count },
                pause: Duration::ZERO,
            });
            let outcome = crawl_source(&renderer, &plan("https://s.test/", strategy)).await;

            assert_eq!(renderer.scrolls(), count as usize);
            assert_eq!(renderer.log.lock().unwrap().counts, 0);
            assert_eq!(outcome.pages.len(), 1);
        }
    }

    #[tokio::test]
    async fn test_render_failure_keeps_earlier_pages_and_closes_session() {
        let renderer = ScriptedRenderer::default().with_site(
            "a.test",
            ScriptedSite {
                pages: vec![4, 4, 4],
                fail_on_open: Some(2),
                ..Default::default()
            },
        );
        let plan = plan("https://a.test/", paged(3, StopMode::FixedCount));
        let outcome = crawl_source(&renderer, &plan).await;

        assert!(matches!(outcome.error, Some(RenderError::Navigation { .. })));
        assert_eq!(outcome.pages.len(), 1);
        assert!(renderer.sessions_balanced());
    }

    #[tokio::test]
    async fn test_scroll_failure_still_captures_dom() {
        let renderer = ScriptedRenderer::default().with_site(
            "s.test",
            ScriptedSite {
                scroll_counts: vec![3, 6, 9],
                fail_on_scroll: Some(3),
                ..Default::default()
            },
        );
        let outcome = crawl_source(&renderer, &plan("https://s.test/", adaptive(2, 10))).await;

        assert!(matches!(outcome.error, Some(RenderError::Script(_))));
        assert_eq!(outcome.pages.len(), 1);
        assert_eq!(outcome.pages[0].items, Some(6));
        assert!(renderer.sessions_balanced());
    }

    #[tokio::test]
    async fn test_session_launch_failure_is_reported() {
        let renderer = ScriptedRenderer {
            fail_new_session: true,
            ..Default::default()
        };
        let plan = plan("https://a.test/", paged(2, StopMode::FixedCount));
        let outcome = crawl_source(&renderer, &plan).await;

        assert!(matches!(outcome.error, Some(RenderError::Launch(_))));
        assert!(outcome.pages.is_empty());
        assert!(renderer.opened().is_empty());
    }

    #[tokio::test]
    async fn test_save_html_writes_dump_without_touching_pages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dumps").join("listing_test.html");

        let renderer = ScriptedRenderer::default().with_site("s.test", site(vec![2], vec![]));
        let mut p = plan(
            "https://s.test/",
            Strategy::InfiniteScroll(ScrollPlan {
                mode: ScrollMode::Fixed { count: 1 },
                pause: Duration::ZERO,
            }),
        );
        p.html_output = Some(path.clone());
        let outcome = crawl_source(&renderer, &p).await;

        let saved = std::fs::read_to_string(&path).unwrap();
        assert_eq!(saved, outcome.pages[0].html);
    }

    #[tokio::test]
    async fn test_save_html_numbers_multiple_pages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("listing_paged.html");

        let renderer = ScriptedRenderer::default().with_site("a.test", site(vec![1, 2], vec![]));
        let mut p = plan("https://a.test/", paged(2, StopMode::FixedCount));
        p.html_output = Some(path.clone());
        crawl_source(&renderer, &p).await;

        assert!(dir.path().join("listing_paged_page_1.html").exists());
        assert!(dir.path().join("listing_paged_page_2.html").exists());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_paged_cache_written_then_replayed_without_browser() {
        let dir = tempfile::tempdir().unwrap();
        let site_pages = site(vec![10, 10, 0], vec![]);

        let renderer = ScriptedRenderer::default().with_site("a.test", site_pages.clone());
        let mut p = plan("https://a.test/", paged(50, until_empty()));
        p.cache = Some(HtmlCache::new(dir.path(), false, true));
        let first = crawl_source(&renderer, &p).await;
        assert_eq!(first.page_renders, 3);
        assert!(first.pages.iter().all(|page| !page.cached));

        let replay = ScriptedRenderer::default().with_site("a.test", site_pages);
        p.cache = Some(HtmlCache::new(dir.path(), true, false));
        let second = crawl_source(&replay, &p).await;

        assert!(second.error.is_none());
        assert!(replay.opened().is_empty());
        assert_eq!(second.page_renders, 0);
        assert_eq!(second.pages.len(), 2);
        assert!(second.pages.iter().all(|page| page.cached && page.items == Some(10)));
        assert_eq!(
            second.pages.iter().map(|page| &page.html).collect::<Vec<_>>(),
            first.pages.iter().map(|page| &page.html).collect::<Vec<_>>()
        );
        assert!(replay.sessions_balanced());
    }

    #[tokio::test]
    async fn test_scroll_cache_hit_skips_scrolling() {
        let dir = tempfile::tempdir().unwrap();
        let url = "https://s.test/feed";
        let cache = HtmlCache::new(dir.path(), true, true);
        let cached_html = crate::renderer::scripted::listing_html("s.test", 1, 7);
        cache.put(url, CacheKind::Listing, &cached_html).await;

        let renderer = ScriptedRenderer::default().with_site("s.test", site(vec![0], vec![5, 8]));
        let mut p = plan(url, adaptive(2, 30));
        p.cache = Some(cache);
        let outcome = crawl_source(&renderer, &p).await;

        assert!(outcome.error.is_none());
        assert_eq!(renderer.scrolls(), 0);
        assert!(renderer.opened().is_empty());
        assert_eq!(outcome.pages.len(), 1);
        assert_eq!(outcome.pages[0].items, Some(7));
        assert_eq!(outcome.pages[0].html, cached_html);
    }

    #[tokio::test]
    async fn test_failed_scroll_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let url = "https://s.test/";
        let cache = HtmlCache::new(dir.path(), true, true);
        let renderer = ScriptedRenderer::default().with_site(
            "s.test",
            ScriptedSite {
                scroll_counts: vec![3, 6],
                fail_on_scroll: Some(2),
                ..Default::default()
            },
        );
        let mut p = plan(url, adaptive(2, 10));
        p.cache = Some(cache.clone());
        let outcome = crawl_source(&renderer, &p).await;

        assert!(outcome.error.is_some());
        assert_eq!(outcome.pages.len(), 1);
        assert_eq!(cache.get(url, CacheKind::Listing).await, None);
    }

    #[test]
    fn test_count_in_html() {
        let html = crate::renderer::scripted::listing_html("a.test", 1, 3);
        assert_eq!(count_in_html(&html, ".card").unwrap(), 3);
        assert_eq!(count_in_html(&html, ".missing").unwrap(), 0);
        assert!(matches!(count_in_html(&html, "[[bad"), Err(RenderError::Script(_))));
    }

    #[test]
    fn test_observe_counter_transitions() {
        let mut state = CrawlState::default();
        let steps = [
            (Some(5), 0),
            (Some(8), 0),
            (Some(8), 1),
            (None, 2),
            (Some(7), 3),
            (Some(9), 0),
        ];
        for (count, expected) in steps {
            state.observe(count);
            assert_eq!(state.no_growth, expected, "after {count:?}");
        }
        assert_eq!(state.last_count, Some(9));
    }
}
