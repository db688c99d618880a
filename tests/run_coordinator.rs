// tests/run_coordinator.rs
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use news_digest::config::{FilterField, Selectors, SourceConfig};
use news_digest::ingest::types::{FetchOutcome, SourceFetcher};
use news_digest::state::{source_key, StateStore, Validators};
use news_digest::{Delivery, Fetchers, Item, Notifier, RunCoordinator, RunOptions};

/// Scripted responses per url; records the validators it was called with.
#[derive(Clone, Default)]
struct MockFetcher {
    responses: Arc<Mutex<HashMap<String, Script>>>,
    calls: Arc<Mutex<Vec<(String, Validators)>>>,
    conditional: bool,
}

#[derive(Clone)]
enum Script {
    Items(Vec<&'static str>, Validators),
    NotModified,
    Fail,
}

impl MockFetcher {
    fn conditional() -> Self {
        Self {
            conditional: true,
            ..Self::default()
        }
    }

    fn script(&self, url: &str, script: Script) {
        self.responses.lock().unwrap().insert(url.to_string(), script);
    }

    fn calls(&self) -> Vec<(String, Validators)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceFetcher for MockFetcher {
    async fn fetch(
        &self,
        source: &SourceConfig,
        url: &str,
        cached: &Validators,
    ) -> Result<FetchOutcome> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), cached.clone()));
        let script = self.responses.lock().unwrap().get(url).cloned();
        match script {
            Some(Script::Items(links, validators)) => Ok(FetchOutcome::Fetched {
                items: links
                    .into_iter()
                    .map(|l| Item::new(&source.id, &source.name, &format!("title {l}"), l, "", None))
                    .collect(),
                validators,
            }),
            Some(Script::NotModified) => Ok(FetchOutcome::NotModified),
            Some(Script::Fail) | None => bail!("connection refused"),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }

    fn conditional(&self) -> bool {
        self.conditional
    }
}

#[derive(Clone, Default)]
struct MockNotifier {
    digests: Arc<Mutex<Vec<Vec<Item>>>>,
    errors: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send_digest(&self, items: &[Item]) -> bool {
        self.digests.lock().unwrap().push(items.to_vec());
        !self.fail
    }

    async fn send_error(&self, message: &str) -> bool {
        self.errors.lock().unwrap().push(message.to_string());
        false
    }
}

fn coordinator(
    sources: Vec<SourceConfig>,
    feed: &MockFetcher,
    page: &MockFetcher,
    notifier: &MockNotifier,
) -> RunCoordinator {
    RunCoordinator::new(
        sources,
        Fetchers::new(Box::new(feed.clone()), Box::new(page.clone())),
        Box::new(notifier.clone()),
        RunOptions::default(),
    )
}

fn store() -> (tempfile::TempDir, StateStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::load(dir.path().join("state.json"));
    (dir, store)
}

#[tokio::test]
async fn empty_batch_skips_notification_and_succeeds() {
    let feed = MockFetcher::conditional();
    feed.script("https://a/feed", Script::Items(vec![], Validators::default()));
    let page = MockFetcher::default();
    let notifier = MockNotifier::default();
    let (_dir, mut st) = store();

    let c = coordinator(vec![SourceConfig::feed("a", "A", "https://a/feed")], &feed, &page, &notifier);
    let report = c.run_with_store(&mut st).await;

    assert_eq!(report.new_items, 0);
    assert_eq!(report.notification, Delivery::Skipped);
    assert!(report.is_success());
    assert!(report.state_saved);
    assert!(notifier.digests.lock().unwrap().is_empty());
    assert!(notifier.errors.lock().unwrap().is_empty());
}

#[tokio::test]
async fn not_modified_keeps_cached_validator_and_yields_nothing() {
    let url = "https://a/feed";
    let feed = MockFetcher::conditional();
    feed.script(url, Script::NotModified);
    let page = MockFetcher::default();
    let notifier = MockNotifier::default();
    let (_dir, mut st) = store();
    st.set_validator(&source_key("a", url), "v1", "");

    let c = coordinator(vec![SourceConfig::feed("a", "A", url)], &feed, &page, &notifier);
    let report = c.run_with_store(&mut st).await;

    assert_eq!(report.sources_not_modified, 1);
    assert_eq!(report.new_items, 0);
    assert_eq!(st.get_validator(&source_key("a", url)).etag, "v1");
    // the cached etag was offered to the fetcher
    assert_eq!(feed.calls()[0].1.etag, "v1");
    assert!(notifier.digests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn fresh_validators_replace_cached_ones() {
    let url = "https://a/feed";
    let feed = MockFetcher::conditional();
    feed.script(url, Script::Items(vec!["http://x/1"], Validators::new("v2", "")));
    let page = MockFetcher::default();
    let notifier = MockNotifier::default();
    let (_dir, mut st) = store();
    st.set_validator(&source_key("a", url), "v1", "Sat, 06 Sep 2025 09:00:00 GMT");

    let c = coordinator(vec![SourceConfig::feed("a", "A", url)], &feed, &page, &notifier);
    c.run_with_store(&mut st).await;

    let v = st.get_validator(&source_key("a", url));
    assert_eq!(v.etag, "v2");
    assert_eq!(v.last_modified, "Sat, 06 Sep 2025 09:00:00 GMT");
}

#[tokio::test]
async fn sources_are_independent_namespaces() {
    let feed = MockFetcher::conditional();
    feed.script(
        "https://a/feed",
        Script::Items(vec!["http://x/1", "http://x/2"], Validators::default()),
    );
    feed.script("https://b/feed", Script::Items(vec!["http://x/2"], Validators::default()));
    let page = MockFetcher::default();
    let notifier = MockNotifier::default();
    let (_dir, mut st) = store();

    let c = coordinator(
        vec![
            SourceConfig::feed("a", "A", "https://a/feed"),
            SourceConfig::feed("b", "B", "https://b/feed"),
        ],
        &feed,
        &page,
        &notifier,
    );
    let report = c.run_with_store(&mut st).await;

    assert_eq!(report.new_items, 3);
    assert_eq!(report.notification, Delivery::Delivered);
    let digests = notifier.digests.lock().unwrap();
    assert_eq!(digests.len(), 1);
    let pairs: Vec<_> = digests[0]
        .iter()
        .map(|i| (i.source.as_str(), i.link.as_str()))
        .collect();
    assert_eq!(
        pairs,
        vec![("a", "http://x/1"), ("a", "http://x/2"), ("b", "http://x/2")]
    );
    assert!(st.is_seen("a", "http://x/2"));
    assert!(st.is_seen("b", "http://x/2"));
}

#[tokio::test]
async fn duplicate_inside_one_fetch_is_delivered_once() {
    let feed = MockFetcher::conditional();
    feed.script(
        "https://a/feed",
        Script::Items(vec!["http://x/1", "http://x/1"], Validators::default()),
    );
    let page = MockFetcher::default();
    let notifier = MockNotifier::default();
    let (_dir, mut st) = store();

    let c = coordinator(vec![SourceConfig::feed("a", "A", "https://a/feed")], &feed, &page, &notifier);
    let report = c.run_with_store(&mut st).await;

    assert_eq!(report.new_items, 1);
    assert_eq!(report.duplicates, 1);
    assert_eq!(st.seen_entries("a"), vec!["http://x/1"]);
}

#[tokio::test]
async fn failed_source_does_not_stop_the_others() {
    let feed = MockFetcher::conditional();
    feed.script("https://a/feed", Script::Fail);
    feed.script("https://b/feed", Script::Items(vec!["http://b/1"], Validators::default()));
    let page = MockFetcher::default();
    let notifier = MockNotifier::default();
    let (_dir, mut st) = store();

    let c = coordinator(
        vec![
            SourceConfig::feed("a", "A", "https://a/feed"),
            SourceConfig::feed("b", "B", "https://b/feed"),
        ],
        &feed,
        &page,
        &notifier,
    );
    let report = c.run_with_store(&mut st).await;

    assert_eq!(report.sources_failed, 1);
    assert_eq!(report.sources_fetched, 1);
    assert_eq!(report.new_items, 1);
    assert!(report.is_success());
}

#[tokio::test]
async fn delivery_failure_fails_the_run_and_reports_the_error() {
    let feed = MockFetcher::conditional();
    feed.script("https://a/feed", Script::Items(vec!["http://a/1"], Validators::default()));
    let page = MockFetcher::default();
    let notifier = MockNotifier {
        fail: true,
        ..MockNotifier::default()
    };
    let (_dir, mut st) = store();

    let c = coordinator(vec![SourceConfig::feed("a", "A", "https://a/feed")], &feed, &page, &notifier);
    let report = c.run_with_store(&mut st).await;

    assert_eq!(report.notification, Delivery::Failed);
    assert!(!report.is_success());
    // the secondary failure of send_error is swallowed
    let errors = notifier.errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("1 new item"));
    // state was still persisted before delivery
    assert!(report.state_saved);
}

#[tokio::test]
async fn page_sources_use_the_page_fetcher_without_validators() {
    let url = "https://p/news";
    let feed = MockFetcher::conditional();
    let page = MockFetcher::default();
    page.script(url, Script::Items(vec!["https://p/news/1"], Validators::new("ignored", "")));
    let notifier = MockNotifier::default();
    let (_dir, mut st) = store();
    st.set_validator(&source_key("p", url), "stale", "");

    let c = coordinator(
        vec![SourceConfig::page("p", "P", url, Selectors::default())],
        &feed,
        &page,
        &notifier,
    );
    let report = c.run_with_store(&mut st).await;

    assert!(feed.calls().is_empty());
    assert!(page.calls()[0].1.is_empty());
    assert_eq!(report.page_items, 1);
    assert_eq!(report.feed_items, 0);
    // unconditional fetchers leave the cache alone
    assert_eq!(st.get_validator(&source_key("p", url)).etag, "stale");
}

#[tokio::test]
async fn keyword_filter_runs_before_the_gate() {
    let feed = MockFetcher::conditional();
    feed.script(
        "https://g/feed",
        Script::Items(vec!["http://g/ai-news", "http://g/maps"], Validators::default()),
    );
    let page = MockFetcher::default();
    let notifier = MockNotifier::default();
    let (_dir, mut st) = store();

    // titles are "title <link>", so whole-word "ai" only matches the first
    let source = SourceConfig::feed("g", "G", "https://g/feed").with_keyword("ai", FilterField::Title);
    let c = coordinator(vec![source], &feed, &page, &notifier);
    let report = c.run_with_store(&mut st).await;

    assert_eq!(report.filtered, 1);
    assert_eq!(report.new_items, 1);
    // filtered items are not marked seen
    assert!(!st.is_seen("g", "http://g/maps"));
}

#[tokio::test]
async fn second_run_against_saved_state_finds_nothing_new() {
    let feed = MockFetcher::conditional();
    feed.script("https://a/feed", Script::Items(vec!["http://a/1"], Validators::default()));
    let page = MockFetcher::default();
    let notifier = MockNotifier::default();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    let c = coordinator(vec![SourceConfig::feed("a", "A", "https://a/feed")], &feed, &page, &notifier);
    assert_eq!(c.run(&path).await.new_items, 1);
    let second = c.run(&path).await;
    assert_eq!(second.new_items, 0);
    assert_eq!(second.notification, Delivery::Skipped);
    assert_eq!(notifier.digests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn unsaved_state_still_delivers_and_succeeds() {
    let feed = MockFetcher::conditional();
    feed.script("https://a/feed", Script::Items(vec!["http://a/1"], Validators::default()));
    let page = MockFetcher::default();
    let notifier = MockNotifier::default();

    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "not a directory").unwrap();
    let mut st = StateStore::load(blocker.join("state.json"));
    let before = st.last_checked();

    let c = coordinator(vec![SourceConfig::feed("a", "A", "https://a/feed")], &feed, &page, &notifier);
    let report = c.run_with_store(&mut st).await;

    assert!(!report.state_saved);
    assert_eq!(report.notification, Delivery::Delivered);
    assert!(report.is_success());
    assert_eq!(st.last_checked(), before);
    assert_eq!(notifier.digests.lock().unwrap()[0].len(), 1);
    // still marked seen in memory for the rest of the process
    assert!(st.is_seen("a", "http://a/1"));
}
