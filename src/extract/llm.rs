//! Schema-prompted extraction through an OpenAI-compatible model.
//!
//! The rendered HTML is condensed (scripts, styles and inline SVG removed,
//! whitespace collapsed), truncated to the configured character budget and
//! embedded in a prompt that lists the schema fields. The reply must be JSON:
//! a bare array of objects, an object wrapping such an array, or a single
//! object. A reply cut off mid-JSON is asked for once more.

use super::{ExtractTarget, Extractor, finalize};
use crate::api::{AskAsync, AskFnWrapper, Backoff, ask_with_backoff};
use crate::error::ExtractError;
use crate::models::EventRecord;
use crate::utils::{looks_truncated, truncate_for_log};
use awful_aj::{config::AwfulJadeConfig, template::ChatTemplate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt;
use tracing::{debug, instrument, warn};

static NOISE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?is)<script\b.*?</script>|<style\b.*?</style>|<svg\b.*?</svg>",
        r"|<noscript\b.*?</noscript>|<!--.*?-->"
    ))
    .unwrap()
});

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\s*(.*?)\s*```$").unwrap());

/// Keys whose array value is taken as the record list when the reply is an object.
const WRAPPER_KEYS: &[&str] = &["events", "results", "items", "data"];

/// Maximum number of times a truncated reply is asked for.
const TRUNCATION_RETRIES: usize = 1;

pub struct LlmExtractor {
    config: AwfulJadeConfig,
    template: ChatTemplate,
    max_input_chars: usize,
    backoff: Backoff,
}

impl fmt::Debug for LlmExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmExtractor")
            .field("max_input_chars", &self.max_input_chars)
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl LlmExtractor {
    pub fn new(config: AwfulJadeConfig, template: ChatTemplate, max_input_chars: usize) -> Self {
        Self {
            config,
            template,
            max_input_chars,
            backoff: Backoff::model(),
        }
    }
}

/// One model request with the extractor's retry schedule.
impl AskAsync for LlmExtractor {
    type Response = String;

    async fn ask(&self, text: &str) -> Result<String, Box<dyn Error>> {
        let client = AskFnWrapper {
            config: &self.config,
            template: &self.template,
        };
        ask_with_backoff(&client, text, self.backoff).await
    }
}

impl Extractor for LlmExtractor {
    async fn extract(
        &self,
        html: &str,
        target: &ExtractTarget<'_>,
    ) -> Result<Vec<EventRecord>, ExtractError> {
        let prompt = build_prompt(html, target, self.max_input_chars);
        extract_with(self, &prompt, target).await
    }
}

/// Remove markup that carries no listing content and collapse whitespace.
pub fn condense_html(html: &str) -> String {
    let stripped = NOISE.replace_all(html, " ");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Build the extraction prompt for one page.
pub fn build_prompt(html: &str, target: &ExtractTarget<'_>, max_input_chars: usize) -> String {
    let fields = target
        .schema
        .fields
        .iter()
        .map(|f| format!("- \"{}\": {}", f.name, f.description))
        .collect::<Vec<_>>()
        .join("\n");
    let page = condense_html(html);
    let page = truncate_chars(&page, max_input_chars);

    format!(
        "Extract every event listed on this page.\n\
         Return ONLY a JSON array of objects with these keys:\n\
         {fields}\n\
         \n\
         Rules:\n\
         - Use an empty string for anything not shown on the page; never invent values.\n\
         - Resolve relative links against {page_url}.\n\
         - Today is {today}; resolve relative dates (\"tomorrow\", \"this Saturday\") from it.\n\
         - Write start_datetime as YYYY-MM-DD HH:MM in UTC{offset}.\n\
         - No commentary, no markdown fences.\n\
         \n\
         HTML:\n\
         {page}",
        page_url = target.page_url,
        today = target.today.format("%Y-%m-%d"),
        offset = target.offset,
    )
}

fn unfence(raw: &str) -> &str {
    let raw = raw.trim();
    CODE_FENCE
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(raw)
}

/// Stringify scalar values of known fields so `"price": 25` still deserializes.
fn coerce_known_fields(mut obj: Map<String, Value>) -> Map<String, Value> {
    const KNOWN: &[&str] = &[
        "source",
        "url",
        "title",
        "description",
        "location",
        "venue",
        "price",
        "capacity",
        "date_text",
        "date",
        "start_datetime",
    ];
    for key in KNOWN {
        match obj.get(*key) {
            Some(Value::Null) => {
                obj.remove(*key);
            }
            Some(Value::Number(n)) => {
                let s = n.to_string();
                obj.insert(key.to_string(), Value::String(s));
            }
            Some(Value::Bool(b)) => {
                let s = b.to_string();
                obj.insert(key.to_string(), Value::String(s));
            }
            _ => {}
        }
    }
    obj
}

fn record_from(obj: Map<String, Value>) -> Option<EventRecord> {
    let mut obj = coerce_known_fields(obj);
    // Common synonyms models reach for.
    for (alias, field) in [("venue", "location"), ("date", "date_text")] {
        if !obj.contains_key(field) {
            if let Some(v) = obj.remove(alias) {
                obj.insert(field.to_string(), v);
            }
        }
    }
    match serde_json::from_value::<EventRecord>(Value::Object(obj)) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(error = %e, "Dropping record that does not fit the event schema");
            None
        }
    }
}

/// Parse a model reply into records.
///
/// Non-object array elements are skipped. An empty reply is a JSON error.
pub fn parse_records(raw: &str) -> Result<Vec<EventRecord>, serde_json::Error> {
    let value: Value = serde_json::from_str(unfence(raw))?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => match WRAPPER_KEYS
            .iter()
            .find(|k| matches!(obj.get(**k), Some(Value::Array(_))))
        {
            Some(key) => match obj.remove(*key) {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            },
            None => vec![Value::Object(obj)],
        },
        other => {
            warn!(kind = ?other, "Model reply is neither an array nor an object");
            Vec::new()
        }
    };

    Ok(items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(obj) => record_from(obj),
            _ => None,
        })
        .collect())
}

/// Ask `client` for the records on one page and finalize them.
#[instrument(
    level = "info",
    skip_all,
    fields(source = %target.source_id, page = %target.page_url)
)]
pub async fn extract_with<A>(
    client: &A,
    prompt: &str,
    target: &ExtractTarget<'_>,
) -> Result<Vec<EventRecord>, ExtractError>
where
    A: AskAsync<Response = String>,
{
    let mut truncated_replies = 0usize;
    loop {
        let raw = client
            .ask(prompt)
            .await
            .map_err(|e| ExtractError::Model(e.to_string()))?;

        match parse_records(&raw) {
            Ok(records) => {
                debug!(count = records.len(), "Model extraction parsed");
                return Ok(records.into_iter().map(|r| finalize(r, target)).collect());
            }
            Err(e) if looks_truncated(&e) && truncated_replies < TRUNCATION_RETRIES => {
                truncated_replies += 1;
                warn!(
                    error = %e,
                    reply = %truncate_for_log(&raw, 200),
                    "Model reply looks truncated; asking again"
                );
            }
            Err(e) => {
                return Err(ExtractError::Schema(format!(
                    "{e}; reply: {}",
                    truncate_for_log(&raw, 200)
                )));
            }
        }
    }
}
