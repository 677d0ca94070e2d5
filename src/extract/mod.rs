//! Field extraction: rendered HTML in, [`EventRecord`]s out.
//!
//! Two backends implement [`Extractor`]:
//!
//! | Backend | Module | How |
//! |---------|--------|-----|
//! | Cards | [`cards`] | CSS selectors configured per source |
//! | Model | [`llm`] | Schema prompt sent to an OpenAI-compatible model |
//!
//! Both hand their raw records to [`finalize`], which stamps the source and
//! normalizes dates the same way regardless of backend.

pub mod cards;
pub mod llm;

use crate::config::CardSelectors;
use crate::error::ExtractError;
use crate::fields::{normalize_datetime, parse_date_text};
use crate::models::{EventRecord, EventSchema};
use crate::utils::strip_text;
use chrono::{FixedOffset, NaiveDate};
use url::Url;

/// Everything an extractor needs to know besides the HTML.
#[derive(Debug, Clone)]
pub struct ExtractTarget<'a> {
    pub source_id: &'a str,
    /// URL the HTML was rendered from; relative links resolve against it.
    pub page_url: &'a Url,
    pub schema: &'a EventSchema,
    pub cards: &'a CardSelectors,
    pub offset: FixedOffset,
    /// Reference date for relative and year-less dates.
    pub today: NaiveDate,
}

pub trait Extractor {
    /// Extract event records from one rendered page.
    async fn extract(
        &self,
        html: &str,
        target: &ExtractTarget<'_>,
    ) -> Result<Vec<EventRecord>, ExtractError>;
}

/// Extractor chosen at startup.
pub enum AnyExtractor {
    Cards(cards::CardExtractor),
    Llm(llm::LlmExtractor),
}

impl Extractor for AnyExtractor {
    async fn extract(
        &self,
        html: &str,
        target: &ExtractTarget<'_>,
    ) -> Result<Vec<EventRecord>, ExtractError> {
        match self {
            AnyExtractor::Cards(x) => x.extract(html, target).await,
            AnyExtractor::Llm(x) => x.extract(html, target).await,
        }
    }
}

/// Common cleanup applied to every extracted record.
///
/// - `source` is set to the target source
/// - text fields are whitespace-collapsed
/// - `start_datetime` is normalized, or derived from `date_text` when empty
pub fn finalize(mut record: EventRecord, target: &ExtractTarget<'_>) -> EventRecord {
    record.source = target.source_id.to_string();
    for field in [
        &mut record.url,
        &mut record.title,
        &mut record.description,
        &mut record.location,
        &mut record.price,
        &mut record.capacity,
        &mut record.date_text,
        &mut record.start_datetime,
    ] {
        *field = strip_text(field);
    }

    finalize_dates(record, target.offset, target.today)
}

/// Normalize `start_datetime`, or derive it from `date_text` when empty.
///
/// A start that cannot be parsed is left as written.
pub fn finalize_dates(
    mut record: EventRecord,
    offset: FixedOffset,
    today: NaiveDate,
) -> EventRecord {
    if !record.start_datetime.trim().is_empty() {
        if let Some(iso) = normalize_datetime(&record.start_datetime, offset)
            .or_else(|| parse_date_text(&record.start_datetime, offset, today))
        {
            record.start_datetime = iso;
        }
    } else if !record.date_text.trim().is_empty() {
        record.start_datetime =
            parse_date_text(&record.date_text, offset, today).unwrap_or_default();
    }
    record
}

#[cfg(test)]
pub mod testing {
    //! A scripted extractor for aggregator tests.

    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Fails for listed sources, otherwise delegates to the card extractor.
    #[derive(Default, Clone)]
    pub struct ScriptedExtractor {
        pub fail_sources: Vec<String>,
        pub calls: Arc<Mutex<HashMap<String, usize>>>,
    }

    impl ScriptedExtractor {
        pub fn calls_for(&self, source: &str) -> usize {
            self.calls.lock().unwrap().get(source).copied().unwrap_or(0)
        }
    }

    impl Extractor for ScriptedExtractor {
        async fn extract(
            &self,
            html: &str,
            target: &ExtractTarget<'_>,
        ) -> Result<Vec<EventRecord>, ExtractError> {
            *self
                .calls
                .lock()
                .unwrap()
                .entry(target.source_id.to_string())
                .or_default() += 1;
            if self.fail_sources.iter().any(|s| s == target.source_id) {
                return Err(ExtractError::Model("scripted extractor failure".to_string()));
            }
            cards::CardExtractor.extract(html, target).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target<'a>(
        url: &'a Url,
        schema: &'a EventSchema,
        cards: &'a CardSelectors,
    ) -> ExtractTarget<'a> {
        ExtractTarget {
            source_id: "peatix",
            page_url: url,
            schema,
            cards,
            offset: crate::fields::offset_hours(8),
            today: NaiveDate::from_ymd_opt(2026, 10, 17).unwrap(),
        }
    }

    #[test]
    fn test_finalize_sets_source_and_cleans_text() {
        let url = Url::parse("https://peatix.com/").unwrap();
        let (schema, cards) = (EventSchema::default(), CardSelectors::default());
        let record = EventRecord {
            source: "model said something else".to_string(),
            title: "  Jazz \n Night ".to_string(),
            ..Default::default()
        };
        let out = finalize(record, &target(&url, &schema, &cards));
        assert_eq!(out.source, "peatix");
        assert_eq!(out.title, "Jazz Night");
        assert_eq!(out.start_datetime, "");
    }

    #[test]
    fn test_finalize_normalizes_and_derives_start() {
        let url = Url::parse("https://peatix.com/").unwrap();
        let (schema, cards) = (EventSchema::default(), CardSelectors::default());
        let t = target(&url, &schema, &cards);

        let given = EventRecord {
            start_datetime: "2026-11-01 19:00".to_string(),
            ..Default::default()
        };
        assert_eq!(finalize(given, &t).start_datetime, "2026-11-01T19:00+08:00");

        let derived = EventRecord {
            date_text: "Sun, 1 Nov 2026, 7:00 PM".to_string(),
            ..Default::default()
        };
        assert_eq!(finalize(derived, &t).start_datetime, "2026-11-01T19:00+08:00");

        let unparseable = EventRecord {
            start_datetime: "sometime soon".to_string(),
            ..Default::default()
        };
        assert_eq!(finalize(unparseable, &t).start_datetime, "sometime soon");
    }
}
