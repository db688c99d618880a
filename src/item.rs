// src/item.rs
//! Normalized item record shared by every source kind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Max description length kept on an item (chars, marker included).
pub const DESCRIPTION_CAP: usize = 300;
const TRUNCATION_MARKER: &str = "...";

/// One discovered article/post/changelog entry.
///
/// `link` is the identity: two items with the same link are the same item,
/// whatever the other fields say.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    pub title: String,
    pub link: String,
    pub description: String,
    pub published: Option<DateTime<Utc>>,
    /// Stable source id (config key), e.g. "openai".
    pub source: String,
    /// Display name of the source, e.g. "OpenAI".
    pub source_name: String,
}

impl Item {
    /// Build an item with trimmed fields and a capped description.
    pub fn new(
        source: &str,
        source_name: &str,
        title: &str,
        link: &str,
        description: &str,
        published: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            title: title.trim().to_string(),
            link: link.trim().to_string(),
            description: cap_chars(description.trim(), DESCRIPTION_CAP),
            published,
            source: source.to_string(),
            source_name: source_name.to_string(),
        }
    }

    pub fn id(&self) -> &str {
        &self.link
    }
}

/// Cap `s` at `max` chars; longer strings end with "..." and stay within `max`.
pub fn cap_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let keep = max.saturating_sub(TRUNCATION_MARKER.len());
    let mut out: String = s.chars().take(keep).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}

/// Delivery order: newest first, undated items last. Stable for equal keys.
pub fn sort_for_delivery(items: &mut [Item]) {
    items.sort_by(|a, b| match (a.published, b.published) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}
