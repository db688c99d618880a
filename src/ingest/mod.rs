// src/ingest/mod.rs
pub mod http;
pub mod providers;
pub mod types;

use chrono::{DateTime, NaiveDate, Utc};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;
use regex::Regex;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

use crate::config::{FilterField, SourceConfig};
use crate::item::Item;

/// One-time metrics registration (so series show up on any installed recorder).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "digest_items_parsed_total",
            "Items parsed from fetched sources."
        );
        describe_counter!(
            "digest_items_new_total",
            "Items that passed the dedup gate."
        );
        describe_counter!(
            "digest_items_duplicate_total",
            "Items dropped because their link was already seen."
        );
        describe_counter!(
            "digest_items_filtered_total",
            "Items dropped by a source keyword filter."
        );
        describe_counter!(
            "digest_fetch_errors_total",
            "Source fetch/parse failures."
        );
        describe_counter!(
            "digest_not_modified_total",
            "Conditional fetches answered with 304."
        );
        describe_histogram!("digest_parse_ms", "Source parse time in milliseconds.");
        describe_gauge!("digest_last_run_ts", "Unix ts when the last run finished.");
    });
}

/// Normalize text: strip tags, decode entities, collapse whitespace, trim.
pub fn normalize_text(s: &str) -> String {
    // 1) Strip HTML tags
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[a-z!][^>]*>").unwrap());
    let out = re_tags.replace_all(s, " ");

    // 2) HTML entity decode
    let out = html_escape::decode_html_entities(&out).to_string();

    // 3) Collapse whitespace (incl. decoded &nbsp;)
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"[\s\u{00A0}]+").unwrap());
    re_ws.replace_all(&out, " ").trim().to_string()
}

/// Whole-word, case-insensitive keyword match on the configured field(s).
pub fn matches_keyword(item: &Item, keyword: &str, field: FilterField) -> bool {
    let pattern = format!(r"(?i)\b{}\b", regex::escape(keyword));
    let Ok(re) = Regex::new(&pattern) else {
        return true;
    };
    match field {
        FilterField::Title => re.is_match(&item.title),
        FilterField::Description => re.is_match(&item.description),
        FilterField::Both => re.is_match(&item.title) || re.is_match(&item.description),
    }
}

/// Apply the source's keyword filter, if any. Returns (kept, filtered count).
pub fn apply_keyword_filter(source: &SourceConfig, items: Vec<Item>) -> (Vec<Item>, usize) {
    let Some(keyword) = source.filter_keyword.as_deref() else {
        return (items, 0);
    };
    let before = items.len();
    let kept: Vec<Item> = items
        .into_iter()
        .filter(|it| matches_keyword(it, keyword, source.filter_field))
        .collect();
    let filtered = before - kept.len();
    (kept, filtered)
}

/// Parse the date formats seen in feeds and on pages. Date-only values are
/// taken as midnight UTC.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = OffsetDateTime::parse(s, &Rfc2822) {
        return DateTime::from_timestamp(dt.unix_timestamp(), 0);
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    const DATE_FORMATS: [&str; 6] = [
        "%Y-%m-%d",
        "%B %d, %Y",
        "%b %d, %Y",
        "%d %B %Y",
        "%d %b %Y",
        "%Y/%m/%d",
    ];
    DATE_FORMATS.iter().find_map(|fmt| {
        NaiveDate::parse_from_str(s, fmt)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
    })
}
