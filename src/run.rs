// src/run.rs
//! One run: load state, fetch every source in table order, gate new items,
//! persist, deliver.

use anyhow::Result;
use chrono::Utc;
use metrics::{counter, gauge};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::{Settings, SourceConfig, SourceKind};
use crate::dedup;
use crate::ingest::http::client_from_settings;
use crate::ingest::providers::{FeedFetcher, PageFetcher};
use crate::ingest::types::{FetchOutcome, SourceFetcher};
use crate::ingest::{apply_keyword_filter, ensure_metrics_described};
use crate::item::{sort_for_delivery, Item};
use crate::notify::Notifier;
use crate::state::{source_key, StateStore, Validators, DEFAULT_MAX_SEEN_PER_SOURCE};

/// Fetcher per source kind.
pub struct Fetchers {
    feed: Box<dyn SourceFetcher>,
    page: Box<dyn SourceFetcher>,
}

impl Fetchers {
    pub fn new(feed: Box<dyn SourceFetcher>, page: Box<dyn SourceFetcher>) -> Self {
        Self { feed, page }
    }

    /// Real HTTP fetchers sharing one client.
    pub fn http(settings: &Settings) -> Result<Self> {
        let client = client_from_settings(settings)?;
        Ok(Self::new(
            Box::new(FeedFetcher::new(client.clone())),
            Box::new(PageFetcher::new(client)),
        ))
    }

    pub fn for_kind(&self, kind: SourceKind) -> &dyn SourceFetcher {
        match kind {
            SourceKind::Feed => self.feed.as_ref(),
            SourceKind::Page => self.page.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub max_seen_per_source: usize,
    /// Pause between two consecutive fetches. Zero disables it.
    pub request_delay: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_seen_per_source: DEFAULT_MAX_SEEN_PER_SOURCE,
            request_delay: Duration::ZERO,
        }
    }
}

impl From<&Settings> for RunOptions {
    fn from(s: &Settings) -> Self {
        Self {
            max_seen_per_source: s.max_seen_per_source,
            request_delay: s.request_delay,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Delivery {
    /// Nothing new; the notifier was not called.
    #[default]
    Skipped,
    Delivered,
    Failed,
}

/// Outcome of one run. Fetch counters are per source URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub new_items: usize,
    pub feed_items: usize,
    pub page_items: usize,
    pub sources_fetched: usize,
    pub sources_not_modified: usize,
    pub sources_failed: usize,
    pub duplicates: usize,
    pub filtered: usize,
    pub evicted: usize,
    pub state_saved: bool,
    pub notification: Delivery,
}

impl RunReport {
    /// A run fails only when new items were found and could not be delivered.
    /// Fetch failures and a failed save are logged but do not fail the run.
    pub fn is_success(&self) -> bool {
        self.notification != Delivery::Failed
    }
}

pub struct RunCoordinator {
    sources: Vec<SourceConfig>,
    fetchers: Fetchers,
    notifier: Box<dyn Notifier>,
    opts: RunOptions,
}

impl RunCoordinator {
    pub fn new(
        sources: Vec<SourceConfig>,
        fetchers: Fetchers,
        notifier: Box<dyn Notifier>,
        opts: RunOptions,
    ) -> Self {
        Self {
            sources,
            fetchers,
            notifier,
            opts,
        }
    }

    pub fn sources(&self) -> &[SourceConfig] {
        &self.sources
    }

    /// Load the state file at `state_path` and run against it.
    pub async fn run(&self, state_path: &Path) -> RunReport {
        let mut store = StateStore::load(state_path);
        self.run_with_store(&mut store).await
    }

    pub async fn run_with_store(&self, store: &mut StateStore) -> RunReport {
        ensure_metrics_described();
        let mut report = RunReport::default();

        let mut new_items = self.collect(store, &mut report).await;
        report.new_items = new_items.len();

        report.evicted = store.prune(self.opts.max_seen_per_source);
        report.state_saved = store.save();
        if !report.state_saved {
            // items are already marked seen in memory only
            error!(
                path = %store.path().display(),
                new = report.new_items,
                "state not persisted; these items may be delivered again next run"
            );
        }

        sort_for_delivery(&mut new_items);
        report.notification = self.deliver(&new_items).await;

        gauge!("digest_last_run_ts").set(Utc::now().timestamp() as f64);
        info!(
            new = report.new_items,
            feed_items = report.feed_items,
            page_items = report.page_items,
            fetched = report.sources_fetched,
            not_modified = report.sources_not_modified,
            failed = report.sources_failed,
            duplicates = report.duplicates,
            filtered = report.filtered,
            evicted = report.evicted,
            state_saved = report.state_saved,
            notification = ?report.notification,
            "run finished"
        );
        report
    }

    async fn collect(&self, store: &mut StateStore, report: &mut RunReport) -> Vec<Item> {
        let mut new_items = Vec::new();
        let mut attempts = 0usize;

        for source in &self.sources {
            let fetcher = self.fetchers.for_kind(source.kind);
            for url in &source.urls {
                if attempts > 0 && !self.opts.request_delay.is_zero() {
                    tokio::time::sleep(self.opts.request_delay).await;
                }
                attempts += 1;

                let key = source_key(&source.id, url);
                let cached = if fetcher.conditional() {
                    store.get_validator(&key)
                } else {
                    Validators::default()
                };

                match fetcher.fetch(source, url, &cached).await {
                    Ok(FetchOutcome::NotModified) => {
                        report.sources_not_modified += 1;
                        counter!("digest_not_modified_total").increment(1);
                        info!(source = %source.id, %url, "not modified since last check");
                    }
                    Ok(FetchOutcome::Fetched { items, validators }) => {
                        report.sources_fetched += 1;
                        if fetcher.conditional() {
                            store.set_validator(&key, &validators.etag, &validators.last_modified);
                        }

                        let parsed = items.len();
                        let (kept, filtered) = apply_keyword_filter(source, items);
                        let (fresh, dup) = dedup::filter_new(store, &source.id, kept);

                        report.filtered += filtered;
                        report.duplicates += dup;
                        match source.kind {
                            SourceKind::Feed => report.feed_items += fresh.len(),
                            SourceKind::Page => report.page_items += fresh.len(),
                        }
                        counter!("digest_items_filtered_total").increment(filtered as u64);
                        counter!("digest_items_duplicate_total").increment(dup as u64);
                        counter!("digest_items_new_total", "kind" => source.kind.as_str())
                            .increment(fresh.len() as u64);

                        debug!(
                            source = %source.id,
                            %url,
                            fetcher = fetcher.name(),
                            parsed,
                            filtered,
                            duplicates = dup,
                            new = fresh.len(),
                            "source processed"
                        );
                        new_items.extend(fresh);
                    }
                    Err(e) => {
                        report.sources_failed += 1;
                        counter!("digest_fetch_errors_total", "kind" => source.kind.as_str())
                            .increment(1);
                        warn!(source = %source.id, %url, "fetch failed: {e:#}");
                    }
                }
            }
        }

        if attempts > 0 && report.sources_failed == attempts {
            warn!(attempts, "every source fetch failed");
        }
        new_items
    }

    async fn deliver(&self, items: &[Item]) -> Delivery {
        if items.is_empty() {
            info!("no new items; skipping notification");
            return Delivery::Skipped;
        }

        if self.notifier.send_digest(items).await {
            return Delivery::Delivered;
        }

        error!(items = items.len(), "digest delivery failed");
        let message = format!(
            "Failed to deliver {} new item{}",
            items.len(),
            if items.len() == 1 { "" } else { "s" }
        );
        if !self.notifier.send_error(&message).await {
            debug!("error notification also failed");
        }
        Delivery::Failed
    }
}
