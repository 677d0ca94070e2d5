//! Command-line interface definitions for event_sweep.
//!
//! Every flag overrides the matching `settings` entry of the YAML config for
//! this run only. The config path can also come from `EVENT_SWEEP_CONFIG`.

use clap::{Parser, ValueEnum};

/// Which backend turns rendered listing HTML into event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExtractorKind {
    /// Per-source CSS selectors
    Cards,
    /// Schema-prompted extraction through an OpenAI-compatible model
    Llm,
}

/// Crawl event listing sites and write one JSON digest.
///
/// # Examples
///
/// ```sh
/// # Every enabled source, card extraction
/// event_sweep -c sources.yaml
///
/// # Two sources, three pages each, with detail-page enrichment
/// event_sweep -c sources.yaml --sources peatix,luma --max-pages 3 --enrich
///
/// # Model extraction with a visible browser
/// event_sweep -c sources.yaml --extractor llm --headed
///
/// # Replay cached pages and pick up an interrupted enrichment
/// event_sweep -c sources.yaml --use-cache --enrich --resume
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the sources YAML file
    #[arg(short, long, env = "EVENT_SWEEP_CONFIG")]
    pub config: String,

    /// Output JSON path (overrides `settings.output`)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Only run these sources, comma-separated (ignores `enabled`)
    #[arg(long, value_delimiter = ',')]
    pub sources: Vec<String>,

    /// Page cap for every paged source
    #[arg(long)]
    pub max_pages: Option<u32>,

    /// Dump rendered listing HTML for every source
    #[arg(long)]
    pub save_html: bool,

    /// Fetch detail pages to fill missing fields
    #[arg(long)]
    pub enrich: bool,

    /// Extraction backend
    #[arg(long, value_enum, default_value_t = ExtractorKind::Cards)]
    pub extractor: ExtractorKind,

    /// Keep duplicate events across sources
    #[arg(long)]
    pub no_dedupe: bool,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,

    /// Serve listing and detail pages from the HTML cache when present
    #[arg(long)]
    pub use_cache: bool,

    /// Never read the HTML cache (it is still written when enabled)
    #[arg(long, conflicts_with = "use_cache")]
    pub no_cache: bool,

    /// Reuse detail pages enriched by an earlier run's checkpoint
    #[arg(long)]
    pub resume: bool,

    /// Model config for `--extractor llm` (defaults to the awful_aj config dir)
    #[arg(long)]
    pub llm_config: Option<String>,

    /// Chat template name for `--extractor llm`
    #[arg(long, default_value = "event_extractor")]
    pub llm_template: String,
}

impl Cli {
    /// Requested source ids with blanks removed.
    pub fn source_names(&self) -> Vec<String> {
        self.sources
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["event_sweep", "--config", "sources.yaml"]);

        assert_eq!(cli.config, "sources.yaml");
        assert!(cli.output.is_none());
        assert!(cli.sources.is_empty());
        assert!(cli.max_pages.is_none());
        assert!(!cli.save_html);
        assert!(!cli.enrich);
        assert_eq!(cli.extractor, ExtractorKind::Cards);
        assert!(!cli.no_dedupe);
        assert!(!cli.headed);
        assert!(!cli.use_cache);
        assert!(!cli.no_cache);
        assert!(!cli.resume);
        assert_eq!(cli.llm_template, "event_extractor");
    }

    #[test]
    fn test_cli_short_flags() {
        let cli = Cli::parse_from([
            "event_sweep",
            "-c",
            "/etc/sweep.yaml",
            "-o",
            "/tmp/events.json",
        ]);

        assert_eq!(cli.config, "/etc/sweep.yaml");
        assert_eq!(cli.output.as_deref(), Some("/tmp/events.json"));
    }

    #[test]
    fn test_cli_all_flags() {
        let cli = Cli::parse_from([
            "event_sweep",
            "-c",
            "sources.yaml",
            "--sources",
            "peatix, luma,,fever",
            "--max-pages",
            "3",
            "--save-html",
            "--enrich",
            "--extractor",
            "llm",
            "--no-dedupe",
            "--headed",
            "--use-cache",
            "--resume",
            "--llm-config",
            "/tmp/aj.yaml",
            "--llm-template",
            "custom",
        ]);

        assert_eq!(cli.source_names(), vec!["peatix", "luma", "fever"]);
        assert_eq!(cli.max_pages, Some(3));
        assert!(cli.save_html);
        assert!(cli.enrich);
        assert_eq!(cli.extractor, ExtractorKind::Llm);
        assert!(cli.no_dedupe);
        assert!(cli.headed);
        assert!(cli.use_cache);
        assert!(cli.resume);
        assert_eq!(cli.llm_config.as_deref(), Some("/tmp/aj.yaml"));
        assert_eq!(cli.llm_template, "custom");
    }

    #[test]
    fn test_cli_rejects_unknown_extractor() {
        let result = Cli::try_parse_from(["event_sweep", "-c", "s.yaml", "--extractor", "regex"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_cache_flags_conflict() {
        let result =
            Cli::try_parse_from(["event_sweep", "-c", "s.yaml", "--use-cache", "--no-cache"]);
        assert!(result.is_err());

        let cli = Cli::parse_from(["event_sweep", "-c", "s.yaml", "--no-cache"]);
        assert!(cli.no_cache);
    }
}
