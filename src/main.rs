//! # event_sweep
//!
//! Crawls JavaScript-rendered event listing sites, extracts structured event
//! records from the rendered pages and writes them to one JSON digest.
//!
//! ## Features
//!
//! - Renders listings in headless Chromium, so client-side apps work
//! - Paged sources: fixed page count, or until the first empty page
//! - Infinite-scroll sources: fixed scroll count, or until the item count
//!   stops growing
//! - Card extraction through per-source CSS selectors, or schema-prompted
//!   extraction through an OpenAI-compatible model
//! - Optional detail-page enrichment (plain HTTP first, browser fallback)
//! - One failing source never stops the run; failures land in the digest
//!
//! ## Usage
//!
//! ```sh
//! event_sweep -c sources.yaml
//! event_sweep -c sources.yaml --sources peatix,luma --enrich -o data/events.json
//! ```
//!
//! ## Architecture
//!
//! 1. **Configuration**: YAML sources validated into typed crawl plans
//! 2. **Crawling**: one browser session per source, pages or scroll rounds
//! 3. **Extraction**: each captured page becomes event records
//! 4. **Enrichment**: optional detail-page fetch fills empty fields
//! 5. **Output**: records merged, deduplicated and written as JSON

use awful_aj::{config as aj_config, config_dir, template};
use chrono::Utc;
use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod aggregate;
mod api;
mod cache;
mod cli;
mod config;
mod crawl;
mod enrich;
mod error;
mod extract;
mod fields;
mod models;
mod outputs;
mod renderer;
mod utils;

use aggregate::Aggregator;
use cli::{Cli, ExtractorKind};
use config::{RunConfig, Settings};
use enrich::HttpFetcher;
use extract::cards::CardExtractor;
use extract::llm::LlmExtractor;
use extract::AnyExtractor;
use models::EventSchema;
use outputs::json;
use renderer::chromium::ChromiumRenderer;
use utils::ensure_writable_parent;

/// Load the model config and chat template for the model extractor.
#[instrument(level = "info", skip_all, fields(template = %args.llm_template))]
async fn load_llm_extractor(
    args: &Cli,
    settings: &Settings,
) -> Result<LlmExtractor, Box<dyn Error>> {
    let template = template::load_template(&args.llm_template).await?;
    info!(template = %args.llm_template, "Loaded template");

    let config_path = match &args.llm_config {
        Some(path) => path.clone(),
        None => config_dir()?.join("config.yaml").to_string_lossy().into_owned(),
    };
    let model_config = aj_config::load_config(&config_path)?;
    info!(%config_path, "Loaded model configuration");

    Ok(LlmExtractor::new(model_config, template, settings.llm_max_input_chars))
}

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("event_sweep starting up");

    // Parse CLI
    let args = Cli::parse();
    debug!(
        config = %args.config,
        sources = ?args.sources,
        extractor = ?args.extractor,
        "Parsed CLI arguments"
    );

    let run_config = RunConfig::load(&args.config).await?.with_cli(&args);
    let settings = &run_config.settings;
    let output = PathBuf::from(&settings.output);

    // Early check: fail before any browser work if the output can't be written
    if let Err(e) = ensure_writable_parent(&output).await {
        error!(
            path = %output.display(),
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let extractor = match args.extractor {
        ExtractorKind::Cards => AnyExtractor::Cards(CardExtractor),
        ExtractorKind::Llm => AnyExtractor::Llm(load_llm_extractor(&args, settings).await?),
    };
    let fetcher = HttpFetcher::new()?;
    let renderer = ChromiumRenderer::launch(settings.headless, settings.render_timeout_ms).await?;

    let today = Utc::now()
        .with_timezone(&fields::offset_hours(settings.timezone_offset_hours))
        .date_naive();
    let aggregator = Aggregator {
        renderer: &renderer,
        extractor: &extractor,
        fetcher: &fetcher,
        schema: EventSchema::default(),
        today,
        enrich: args.enrich,
    };
    let digest = aggregator.run(&run_config, &args.source_names()).await;

    renderer.shutdown().await;

    if let Err(e) = json::write_digest(&digest, &output).await {
        error!(path = %output.display(), error = %e, "Failed to write event digest");
        return Err(e);
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        events = digest.events.len(),
        failures = digest.failures.len(),
        "Execution complete"
    );

    Ok(())
}
