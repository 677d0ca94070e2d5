//! Selector-driven card extraction.
//!
//! With a card root selector, every matching element becomes one record and
//! the per-field selectors are evaluated inside it. Without one, the page is
//! scanned for event links (`link_selectors`, default `a[href]`) and each
//! unique link becomes a record titled with its text.

use super::{ExtractTarget, Extractor, finalize};
use crate::error::ExtractError;
use crate::fields::capacity_status;
use crate::models::EventRecord;
use crate::utils::{absolutize_http, first_non_empty, strip_text};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use tracing::{debug, instrument};

const DEFAULT_LINK: &str = "a[href]";
const HEADINGS: &str = "h1, h2, h3, h4";

#[derive(Debug, Default, Clone, Copy)]
pub struct CardExtractor;

impl Extractor for CardExtractor {
    async fn extract(
        &self,
        html: &str,
        target: &ExtractTarget<'_>,
    ) -> Result<Vec<EventRecord>, ExtractError> {
        extract_cards(html, target)
    }
}

fn selector(css: &str) -> Result<Selector, ExtractError> {
    Selector::parse(css).map_err(|e| ExtractError::Selector {
        selector: css.to_string(),
        reason: e.to_string(),
    })
}

fn optional_selector(css: &Option<String>) -> Result<Option<Selector>, ExtractError> {
    css.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(selector)
        .transpose()
}

fn text_of(el: ElementRef<'_>) -> String {
    strip_text(&el.text().collect::<Vec<_>>().join(" "))
}

fn first_text(card: ElementRef<'_>, sel: &Option<Selector>) -> String {
    sel.as_ref()
        .and_then(|s| card.select(s).next())
        .map(text_of)
        .unwrap_or_default()
}

/// Extract records from `html` using the target's card selectors.
#[instrument(
    level = "debug",
    skip_all,
    fields(source = %target.source_id, page = %target.page_url)
)]
pub fn extract_cards(
    html: &str,
    target: &ExtractTarget<'_>,
) -> Result<Vec<EventRecord>, ExtractError> {
    let document = Html::parse_document(html);
    let records = match &target.cards.item {
        Some(item) if !item.trim().is_empty() => from_cards(&document, item, target)?,
        _ => from_links(&document, target)?,
    };
    debug!(count = records.len(), "Extracted cards");
    Ok(records)
}

fn keep_url(url: &str, target: &ExtractTarget<'_>) -> bool {
    match target.cards.url_contains.as_deref().map(str::trim) {
        Some(fragment) if !fragment.is_empty() => url.contains(fragment),
        _ => true,
    }
}

fn from_cards(
    document: &Html,
    item: &str,
    target: &ExtractTarget<'_>,
) -> Result<Vec<EventRecord>, ExtractError> {
    let cards = &target.cards;
    let item_sel = selector(item)?;
    let link_css = cards.link.as_deref().filter(|s| !s.trim().is_empty());
    let link_sel = selector(link_css.unwrap_or(DEFAULT_LINK))?;
    let title_sel = optional_selector(&cards.title)?;
    let date_sel = optional_selector(&cards.date)?;
    let location_sel = optional_selector(&cards.location)?;
    let price_sel = optional_selector(&cards.price)?;
    let heading_sel = selector(HEADINGS)?;
    let time_sel = selector("time")?;

    let mut seen = HashSet::new();
    let mut records = Vec::new();

    for card in document.select(&item_sel) {
        // The card itself may be the link.
        let link = if card.value().name() == "a" && card.value().attr("href").is_some() {
            Some(card)
        } else {
            card.select(&link_sel).next()
        };
        let url = link
            .and_then(|a| a.value().attr("href"))
            .and_then(|href| absolutize_http(target.page_url, href))
            .map(|u| u.to_string())
            .unwrap_or_default();

        if !url.is_empty() && (!keep_url(&url, target) || !seen.insert(url.clone())) {
            continue;
        }

        let title = first_non_empty([
            first_text(card, &title_sel).as_str(),
            card.select(&heading_sel).next().map(text_of).unwrap_or_default().as_str(),
            link.map(text_of).unwrap_or_default().as_str(),
        ]);
        if url.is_empty() && title.is_empty() {
            continue;
        }

        let time_el = card.select(&time_sel).next();
        let date_text = first_non_empty([
            first_text(card, &date_sel).as_str(),
            time_el.map(text_of).unwrap_or_default().as_str(),
        ]);
        let start_datetime = time_el
            .and_then(|t| t.value().attr("datetime"))
            .map(str::to_string)
            .unwrap_or_default();

        let record = EventRecord {
            title,
            date_text,
            start_datetime,
            location: first_text(card, &location_sel),
            price: first_text(card, &price_sel),
            capacity: capacity_status(&text_of(card)),
            ..EventRecord::new(target.source_id, &url)
        };
        records.push(finalize(record, target));
    }
    Ok(records)
}

fn from_links(
    document: &Html,
    target: &ExtractTarget<'_>,
) -> Result<Vec<EventRecord>, ExtractError> {
    let css: Vec<&str> = if target.cards.link_selectors.is_empty() {
        vec![DEFAULT_LINK]
    } else {
        target.cards.link_selectors.iter().map(String::as_str).collect()
    };

    let mut seen = HashSet::new();
    let mut records = Vec::new();

    for css in css {
        let sel = selector(css)?;
        for a in document.select(&sel) {
            let Some(url) = a
                .value()
                .attr("href")
                .and_then(|href| absolutize_http(target.page_url, href))
                .map(|u| u.to_string())
            else {
                continue;
            };
            if !keep_url(&url, target) || !seen.insert(url.clone()) {
                continue;
            }
            let record = EventRecord {
                title: text_of(a),
                ..EventRecord::new(target.source_id, &url)
            };
            records.push(finalize(record, target));
        }
    }
    Ok(records)
}
