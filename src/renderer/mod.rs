//! Browser rendering capability.
//!
//! The crawl controller only talks to the [`Renderer`] and [`RenderSession`]
//! traits. A session is one browser page scoped to a single source: it is
//! created when the source starts and closed when it finishes, whether the
//! crawl succeeded or not.
//!
//! [`chromium`] provides the production implementation on top of
//! `chromiumoxide`.

pub mod chromium;

use crate::error::RenderError;
use url::Url;

/// Per-session navigation options.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// Selector awaited after each navigation. A timeout here is not an error.
    pub wait_selector: Option<String>,
    pub timeout_ms: u64,
}

/// A browser engine able to hand out isolated sessions.
pub trait Renderer {
    type Session: RenderSession;

    /// Open a fresh page for one source.
    async fn new_session(&self, options: &SessionOptions) -> Result<Self::Session, RenderError>;
}

/// One browser page driven by the crawl controller.
pub trait RenderSession {
    /// Navigate to `url` and return the rendered HTML.
    async fn open(&mut self, url: &str) -> Result<String, RenderError>;

    /// Navigate to page `page` of a paginated listing.
    async fn paginate(
        &mut self,
        base_url: &Url,
        page_param: &str,
        page: u32,
    ) -> Result<String, RenderError> {
        let url = page_url(base_url, page_param, page);
        self.open(url.as_str()).await
    }

    /// Scroll to the bottom of the current document.
    async fn scroll(&mut self) -> Result<(), RenderError>;

    /// Number of elements currently matching `selector`.
    async fn count_matches(&mut self, selector: &str) -> Result<usize, RenderError>;

    /// The current DOM serialized as HTML.
    async fn content(&mut self) -> Result<String, RenderError>;

    /// Release the page.
    async fn close(self) -> Result<(), RenderError>;
}

/// Set `page_param` to `page` on `base_url`.
///
/// An existing parameter keeps its position in the query string; otherwise
/// it is appended. All other parameters are preserved.
pub fn page_url(base_url: &Url, page_param: &str, page: u32) -> Url {
    let page_value = page.to_string();
    let mut replaced = false;
    let mut pairs: Vec<(String, String)> = Vec::new();

    for (k, v) in base_url.query_pairs() {
        if k == page_param {
            if !replaced {
                pairs.push((k.into_owned(), page_value.clone()));
                replaced = true;
            }
        } else {
            pairs.push((k.into_owned(), v.into_owned()));
        }
    }
    if !replaced {
        pairs.push((page_param.to_string(), page_value));
    }

    let mut url = base_url.clone();
    url.query_pairs_mut().clear().extend_pairs(pairs);
    url
}

/// A deterministic renderer for tests.
///
/// Sites are keyed by host. Paged listings return `pages[n]` items on the
/// n-th navigation; after scrolling, the item count follows `scroll_counts`.
#[cfg(test)]
pub mod scripted {
    use super::*;
    use std::collections::HashMap;
    use std::fmt::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, Default)]
    pub struct ScriptedSite {
        /// Items rendered on each successive navigation.
        pub pages: Vec<usize>,
        /// Items present after each successive scroll.
        pub scroll_counts: Vec<usize>,
        /// Fail the n-th navigation (1-based).
        pub fail_on_open: Option<usize>,
        /// Fail the n-th scroll (1-based).
        pub fail_on_scroll: Option<usize>,
    }

    #[derive(Debug, Default)]
    pub struct CallLog {
        pub opened: Vec<String>,
        pub scrolls: usize,
        pub counts: usize,
        pub sessions: usize,
        pub closed: usize,
    }

    #[derive(Debug, Default, Clone)]
    pub struct ScriptedRenderer {
        pub sites: HashMap<String, ScriptedSite>,
        pub log: Arc<Mutex<CallLog>>,
        pub fail_new_session: bool,
    }

    impl ScriptedRenderer {
        pub fn with_site(mut self, host: &str, site: ScriptedSite) -> Self {
            self.sites.insert(host.to_string(), site);
            self
        }

        pub fn opened(&self) -> Vec<String> {
            self.log.lock().unwrap().opened.clone()
        }

        pub fn scrolls(&self) -> usize {
            self.log.lock().unwrap().scrolls
        }

        pub fn sessions_balanced(&self) -> bool {
            let log = self.log.lock().unwrap();
            log.sessions == log.closed
        }
    }

    pub struct ScriptedSession {
        sites: HashMap<String, ScriptedSite>,
        log: Arc<Mutex<CallLog>>,
        host: Option<String>,
        opens: usize,
        scrolls: usize,
        items: usize,
    }

    /// Cards linking to `/event/<host>-<nav>-<i>`.
    pub fn listing_html(host: &str, nav: usize, items: usize) -> String {
        let mut html = String::from("<html><body><ul class=\"events\">");
        for i in 0..items {
            write!(
                html,
                "<li class=\"card\">\
                 <a class=\"card__link\" href=\"/event/{host}-{nav}-{i}\">Event {i}</a>\
                 <span class=\"card__date\">Sat 1 Mar</span></li>"
            )
            .unwrap();
        }
        html.push_str("</ul></body></html>");
        html
    }

    impl ScriptedSession {
        fn site(&self) -> ScriptedSite {
            self.host
                .as_ref()
                .and_then(|h| self.sites.get(h))
                .cloned()
                .unwrap_or_default()
        }

        fn html(&self) -> String {
            listing_html(self.host.as_deref().unwrap_or(""), self.opens, self.items)
        }
    }

    impl Renderer for ScriptedRenderer {
        type Session = ScriptedSession;

        async fn new_session(
            &self,
            _options: &SessionOptions,
        ) -> Result<ScriptedSession, RenderError> {
            if self.fail_new_session {
                return Err(RenderError::Launch("scripted launch failure".to_string()));
            }
            self.log.lock().unwrap().sessions += 1;
            Ok(ScriptedSession {
                sites: self.sites.clone(),
                log: Arc::clone(&self.log),
                host: None,
                opens: 0,
                scrolls: 0,
                items: 0,
            })
        }
    }

    impl RenderSession for ScriptedSession {
        async fn open(&mut self, url: &str) -> Result<String, RenderError> {
            let parsed = Url::parse(url).map_err(|e| RenderError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
            self.host = parsed.host_str().map(str::to_string);
            self.opens += 1;
            self.scrolls = 0;
            self.log.lock().unwrap().opened.push(url.to_string());

            let site = self.site();
            if site.fail_on_open == Some(self.opens) {
                return Err(RenderError::Navigation {
                    url: url.to_string(),
                    reason: "scripted navigation failure".to_string(),
                });
            }
            self.items = site
                .pages
                .get(self.opens - 1)
                .or(site.pages.last())
                .copied()
                .unwrap_or(0);
            Ok(self.html())
        }

        async fn scroll(&mut self) -> Result<(), RenderError> {
            self.scrolls += 1;
            self.log.lock().unwrap().scrolls += 1;

            let site = self.site();
            if site.fail_on_scroll == Some(self.scrolls) {
                return Err(RenderError::Script("scripted scroll failure".to_string()));
            }
            if let Some(n) = site
                .scroll_counts
                .get(self.scrolls - 1)
                .or(site.scroll_counts.last())
            {
                self.items = *n;
            }
            Ok(())
        }

        async fn count_matches(&mut self, _selector: &str) -> Result<usize, RenderError> {
            self.log.lock().unwrap().counts += 1;
            Ok(self.items)
        }

        async fn content(&mut self) -> Result<String, RenderError> {
            Ok(self.html())
        }

        async fn close(self) -> Result<(), RenderError> {
            self.log.lock().unwrap().closed += 1;
            Ok(())
        }
    }
}
