//! On-disk HTML cache for listing and detail pages.
//!
//! Every page is stored as `<dir>/<kind>_<sha256(url)>.html`. Reading and
//! writing are switched separately: a run can refresh the cache without
//! trusting it (`--no-cache`), or replay it without a browser round-trip
//! (`--use-cache`).
//!
//! Cache problems are never fatal. A read error is a miss and a write error
//! is logged.

use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, warn};

/// Which crawl stage a cached page belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    Listing,
    Detail,
}

impl CacheKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheKind::Listing => "listing",
            CacheKind::Detail => "detail",
        }
    }
}

/// Hex SHA-256 of `url`, used to name cache and dump files.
pub fn url_digest(url: &str) -> String {
    hex::encode(Sha256::digest(url.as_bytes()))
}

#[derive(Debug, Clone, PartialEq)]
pub struct HtmlCache {
    dir: PathBuf,
    read: bool,
    write: bool,
}

impl HtmlCache {
    pub fn new(dir: impl Into<PathBuf>, read: bool, write: bool) -> Self {
        Self {
            dir: dir.into(),
            read,
            write,
        }
    }

    pub fn path_for(&self, url: &str, kind: CacheKind) -> PathBuf {
        let name = format!("{}_{}.html", kind.as_str(), url_digest(url));
        self.dir.join(name)
    }

    /// The cached HTML for `url`, when reading is enabled and an entry exists.
    pub async fn get(&self, url: &str, kind: CacheKind) -> Option<String> {
        if !self.read {
            return None;
        }
        let path = self.path_for(url, kind);
        match fs::read_to_string(&path).await {
            Ok(html) => {
                debug!(url, kind = kind.as_str(), path = %path.display(), "Cache hit");
                Some(html)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!(url, path = %path.display(), error = %e, "Unreadable cache entry; ignoring");
                None
            }
        }
    }

    /// Store `html` for `url` when writing is enabled.
    pub async fn put(&self, url: &str, kind: CacheKind, html: &str) {
        if !self.write {
            return;
        }
        if let Err(e) = fs::create_dir_all(&self.dir).await {
            warn!(dir = %self.dir.display(), error = %e, "Failed to create cache directory");
            return;
        }
        let path = self.path_for(url, kind);
        if let Err(e) = fs::write(&path, html).await {
            warn!(url, path = %path.display(), error = %e, "Failed to write cache entry");
        }
    }
}
