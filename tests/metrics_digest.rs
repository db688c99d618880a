// tests/metrics_digest.rs
#![cfg(feature = "strict-metrics")]
use async_trait::async_trait;
use metrics_exporter_prometheus::PrometheusBuilder;

use news_digest::config::SourceConfig;
use news_digest::ingest::providers::feed::parse_feed;
use news_digest::ingest::types::{FetchOutcome, SourceFetcher};
use news_digest::state::{StateStore, Validators};
use news_digest::{Fetchers, Item, Notifier, RunCoordinator, RunOptions};

const RSS_XML: &str = include_str!("fixtures/rss.xml");

struct FixtureFetcher;

#[async_trait]
impl SourceFetcher for FixtureFetcher {
    async fn fetch(
        &self,
        source: &SourceConfig,
        _url: &str,
        _cached: &Validators,
    ) -> anyhow::Result<FetchOutcome> {
        Ok(FetchOutcome::Fetched {
            items: parse_feed(source, RSS_XML)?,
            validators: Validators::default(),
        })
    }

    fn name(&self) -> &'static str {
        "fixture"
    }
}

struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn send_digest(&self, _items: &[Item]) -> bool {
        true
    }
    async fn send_error(&self, _message: &str) -> bool {
        true
    }
}

#[tokio::test]
async fn metrics_exposed_after_run() {
    // Install a local recorder for the test
    let handle = PrometheusBuilder::new().install_recorder().expect("recorder");

    let c = RunCoordinator::new(
        vec![SourceConfig::feed("example", "Example", "https://blog.example.com/rss")],
        Fetchers::new(Box::new(FixtureFetcher), Box::new(FixtureFetcher)),
        Box::new(NullNotifier),
        RunOptions::default(),
    );
    let dir = tempfile::tempdir().unwrap();
    let mut store = StateStore::load(dir.path().join("state.json"));
    let report = c.run_with_store(&mut store).await;
    assert_eq!(report.new_items, 3);
    assert_eq!(report.duplicates, 1);

    let out = handle.render();
    for needle in [
        "digest_items_parsed_total",
        "digest_items_new_total",
        "digest_items_duplicate_total",
        "digest_parse_ms",
        "digest_last_run_ts",
    ] {
        assert!(out.contains(needle), "missing series {needle}");
    }
}
