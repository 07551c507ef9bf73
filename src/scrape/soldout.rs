use anyhow::{Result, anyhow};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::debug;

use crate::cli::config::SoldoutSelectors;

/// A sold-out notice row from the admin listing
#[derive(Debug, Clone)]
pub struct SoldoutRow {
    /// Free-text notice title, usually carrying the code in brackets
    pub title: String,

    /// Explicit code cell, when the listing provides one
    pub code_field: Option<String>,

    /// When the notice was raised
    pub raised_at: DateTime<Utc>,
}

/// Bracketed product code inside a notice title, e.g. "[CH1234] out of stock"
fn title_code_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\[\]]+)\]").expect("invalid code regex"))
}

/// Parse the sold-out rows newer than the cutoff from a listing snapshot.
///
/// Rows whose date cell cannot be parsed are skipped; the cutoff filter is
/// strict (extracted date must be later than the last run).
pub fn parse_soldout_rows(
    html: &str,
    selectors: &SoldoutSelectors,
    since: DateTime<Utc>,
) -> Result<Vec<SoldoutRow>> {
    let doc = Html::parse_document(html);
    let row_sel = parse_selector(&selectors.row)?;
    let title_sel = parse_selector(&selectors.title_cell)?;
    let date_sel = parse_selector(&selectors.date_cell)?;

    let mut rows = Vec::new();

    for row in doc.select(&row_sel) {
        let title = row
            .select(&title_sel)
            .next()
            .map(|cell| cell.text().collect::<String>().trim().to_string())
            .unwrap_or_default();

        let date_text = row
            .select(&date_sel)
            .next()
            .map(|cell| cell.text().collect::<String>().trim().to_string())
            .unwrap_or_default();

        let Some(raised_at) = parse_listing_date(&date_text) else {
            debug!("Skipping sold-out row with unparseable date '{}'", date_text);
            continue;
        };

        if raised_at <= since {
            continue;
        }

        // Some listing revisions carry the code as a data attribute on the
        // title cell; absence is normal
        let code_field = row
            .select(&title_sel)
            .next()
            .and_then(|cell| cell.value().attr("data-code"))
            .map(|code| code.trim().to_string())
            .filter(|code| !code.is_empty());

        rows.push(SoldoutRow {
            title,
            code_field,
            raised_at,
        });
    }

    Ok(rows)
}

/// Whether the next-page affordance is present in the snapshot
pub fn has_next_page(html: &str, selectors: &SoldoutSelectors) -> Result<bool> {
    let doc = Html::parse_document(html);
    let next_sel = parse_selector(&selectors.next_page)?;

    Ok(doc.select(&next_sel).next().is_some())
}

/// Extract the distinct product codes from heterogeneous sold-out rows.
///
/// A row's code comes from its explicit code field when present, otherwise
/// from the bracketed fragment of its title. Duplicates collapse; the
/// first-seen order is preserved.
pub fn extract_product_codes(rows: &[SoldoutRow]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut codes = Vec::new();

    for row in rows {
        let code = match &row.code_field {
            Some(code) => Some(code.clone()),
            None => title_code_regex()
                .captures(&row.title)
                .map(|caps| caps[1].trim().to_string()),
        };

        let Some(code) = code else {
            debug!("Sold-out row without a recoverable code: '{}'", row.title);
            continue;
        };

        if seen.insert(code.clone()) {
            codes.push(code);
        }
    }

    codes
}

/// Dates in the listing appear either with or without a time component
fn parse_listing_date(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(datetime) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
        return Some(datetime.and_utc());
    }
    if let Ok(datetime) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M") {
        return Some(datetime.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }

    None
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| anyhow!("invalid selector '{}': {}", selector, e))
}
