//! Error kinds raised while crawling and extracting a source.
//!
//! Each enum maps to one stage of the pipeline. Render and extraction
//! failures stay scoped to the source that raised them; the aggregator
//! converts them into [`SourceFailure`](crate::models::SourceFailure)
//! entries instead of aborting the run.

use thiserror::Error;

/// Failures coming out of the browser renderer.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("navigation to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("script evaluation failed: {0}")]
    Script(String),
}

impl RenderError {
    /// The URL being rendered when the error happened, if known.
    pub fn url(&self) -> Option<&str> {
        match self {
            RenderError::Navigation { url, .. } | RenderError::Timeout { url, .. } => Some(url),
            _ => None,
        }
    }
}

/// Failures coming out of an extractor backend.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid selector `{selector}`: {reason}")]
    Selector { selector: String, reason: String },

    #[error("model request failed: {0}")]
    Model(String),

    #[error("model returned non-conforming JSON: {0}")]
    Schema(String),

    #[error("no event records found in {pages} page(s)")]
    Empty { pages: usize },
}

/// Problems with the run configuration.
///
/// `Missing` and `Invalid` are per-source: the aggregator skips the source
/// and keeps going. `Setting`, `Io` and `Parse` concern the config file as a
/// whole.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("source `{source_id}` is missing required field `{field}`")]
    Missing { source_id: String, field: &'static str },

    #[error("source `{source_id}` is invalid: {reason}")]
    Invalid { source_id: String, reason: String },

    #[error("unknown source `{0}`")]
    UnknownSource(String),

    #[error("setting `{field}` is invalid: {reason}")]
    Setting { field: &'static str, reason: String },

    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

impl ConfigError {
    /// The source this error concerns, when it concerns a single source.
    pub fn source_id(&self) -> Option<&str> {
        match self {
            ConfigError::Missing { source_id, .. } | ConfigError::Invalid { source_id, .. } => {
                Some(source_id)
            }
            ConfigError::UnknownSource(id) => Some(id),
            ConfigError::Setting { .. } | ConfigError::Io { .. } | ConfigError::Parse { .. } => {
                None
            }
        }
    }
}
