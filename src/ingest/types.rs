// src/ingest/types.rs
use anyhow::Result;

use crate::config::SourceConfig;
use crate::item::Item;
use crate::state::Validators;

/// Result of one successful fetch. Failures travel as `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Server confirmed nothing changed since the cached validators.
    NotModified,
    /// Content downloaded and parsed. `validators` holds whatever fresh
    /// tokens the server sent (empty strings when none).
    Fetched {
        items: Vec<Item>,
        validators: Validators,
    },
}

/// One kind of source reader (feed, page, test double).
#[async_trait::async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Fetch `url` for `source`. `cached` is empty when there is nothing to
    /// revalidate against; fetchers that don't do conditional requests ignore it.
    async fn fetch(
        &self,
        source: &SourceConfig,
        url: &str,
        cached: &Validators,
    ) -> Result<FetchOutcome>;

    fn name(&self) -> &'static str;

    /// Whether this fetcher uses and returns validators.
    fn conditional(&self) -> bool {
        false
    }
}
