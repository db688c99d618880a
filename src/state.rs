// src/state.rs
//! Persistent run-to-run memory: per-source seen-sets plus cached HTTP
//! validators (ETag / Last-Modified) for conditional feed fetches.
//!
//! The store is loaded once at the start of a run, mutated in memory, and
//! written once at the end. Loading and saving never fail the caller: a
//! missing or unreadable file yields an empty store, and a failed save is
//! logged and reported as `false`.
//!
//! On-disk layout (JSON):
//! ```json
//! {
//!   "last_checked": "2025-09-06T09:00:00.000000Z",
//!   "seen_entries": { "openai": ["https://openai.com/news/a", "..."] },
//!   "etags": { "openai https://openai.com/news/rss.xml": "\"abc\"" },
//!   "last_modified": { "openai https://openai.com/news/rss.xml": "Sat, 06 Sep 2025 09:00:00 GMT" }
//! }
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

pub const DEFAULT_STATE_PATH: &str = "state.json";
pub const DEFAULT_MAX_SEEN_PER_SOURCE: usize = 200;

/// Never valid inside a serialized URL, and rejected in source ids at config load.
const SOURCE_KEY_SEPARATOR: char = ' ';

/// Composite validator key for one (source, url) pair.
pub fn source_key(source_id: &str, url: &str) -> String {
    format!("{source_id}{SOURCE_KEY_SEPARATOR}{url}")
}

/// Cached conditional-fetch tokens. Empty string = "no cached value".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validators {
    pub etag: String,
    pub last_modified: String,
}

impl Validators {
    pub fn new(etag: impl Into<String>, last_modified: impl Into<String>) -> Self {
        Self {
            etag: etag.into(),
            last_modified: last_modified.into(),
        }
    }

    /// True when neither token is cached, i.e. the fetch must be unconditional.
    pub fn is_empty(&self) -> bool {
        self.etag.is_empty() && self.last_modified.is_empty()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    last_checked: Option<String>,
    #[serde(default)]
    seen_entries: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    etags: BTreeMap<String, String>,
    #[serde(default)]
    last_modified: BTreeMap<String, String>,
}

/// Insertion-ordered ids with an O(1) membership index kept in sync.
#[derive(Debug, Default, Clone)]
struct SeenSet {
    order: VecDeque<String>,
    index: HashSet<String>,
}

impl SeenSet {
    /// Rebuild from a persisted list; later duplicates are dropped.
    fn from_ids(ids: Vec<String>) -> Self {
        let mut set = Self::default();
        for id in ids {
            set.insert(id);
        }
        set
    }

    fn contains(&self, id: &str) -> bool {
        self.index.contains(id)
    }

    fn insert(&mut self, id: String) -> bool {
        if self.index.contains(&id) {
            return false;
        }
        self.index.insert(id.clone());
        self.order.push_back(id);
        true
    }

    /// Drop the oldest ids until at most `max` remain. Returns how many went.
    fn prune(&mut self, max: usize) -> usize {
        let excess = self.order.len().saturating_sub(max);
        for id in self.order.drain(..excess) {
            self.index.remove(&id);
        }
        excess
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    last_checked: Option<DateTime<Utc>>,
    seen: HashMap<String, SeenSet>,
    etags: HashMap<String, String>,
    last_modified: HashMap<String, String>,
}

impl StateStore {
    /// Empty store bound to `path`; nothing is read.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_checked: None,
            seen: HashMap::new(),
            etags: HashMap::new(),
            last_modified: HashMap::new(),
        }
    }

    /// Read the snapshot at `path`. Missing or unparsable files give an empty
    /// store and a warning; this never returns an error.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match read_snapshot(&path) {
            Ok(Some(snap)) => {
                let store = Self::from_snapshot(path, snap);
                debug!(
                    path = %store.path.display(),
                    sources = store.seen.len(),
                    validators = store.etags.len() + store.last_modified.len(),
                    "state loaded"
                );
                store
            }
            Ok(None) => {
                warn!(path = %path.display(), "no state file; starting with empty state");
                Self::empty(path)
            }
            Err(e) => {
                warn!(path = %path.display(), "could not load state, starting with empty state: {e:#}");
                Self::empty(path)
            }
        }
    }

    fn from_snapshot(path: PathBuf, snap: Snapshot) -> Self {
        let last_checked = snap
            .last_checked
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));
        let seen = snap
            .seen_entries
            .into_iter()
            .map(|(source, ids)| (source, SeenSet::from_ids(ids)))
            .collect();
        Self {
            path,
            last_checked,
            seen,
            etags: snap.etags.into_iter().collect(),
            last_modified: snap.last_modified.into_iter().collect(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Time of the last successful save, if any.
    pub fn last_checked(&self) -> Option<DateTime<Utc>> {
        self.last_checked
    }

    /// Unknown sources behave as empty sets.
    pub fn is_seen(&self, source_id: &str, item_id: &str) -> bool {
        self.seen
            .get(source_id)
            .is_some_and(|set| set.contains(item_id))
    }

    /// Append `item_id` to the source's seen-set unless already present.
    /// Returns true when the id was newly recorded.
    pub fn mark_seen(&mut self, source_id: &str, item_id: &str) -> bool {
        if self.is_seen(source_id, item_id) {
            return false;
        }
        self.seen
            .entry(source_id.to_string())
            .or_default()
            .insert(item_id.to_string())
    }

    /// Seen ids for a source, oldest first.
    pub fn seen_entries(&self, source_id: &str) -> Vec<&str> {
        self.seen
            .get(source_id)
            .map(|set| set.order.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn seen_count(&self, source_id: &str) -> usize {
        self.seen.get(source_id).map_or(0, SeenSet::len)
    }

    /// Cached validators for `key`; empty strings when nothing is cached.
    pub fn get_validator(&self, key: &str) -> Validators {
        Validators {
            etag: self.etags.get(key).cloned().unwrap_or_default(),
            last_modified: self.last_modified.get(key).cloned().unwrap_or_default(),
        }
    }

    /// Overwrite the cached tokens that are non-empty; an empty argument
    /// leaves the existing value in place.
    pub fn set_validator(&mut self, key: &str, etag: &str, last_modified: &str) {
        if !etag.is_empty() {
            self.etags.insert(key.to_string(), etag.to_string());
        }
        if !last_modified.is_empty() {
            self.last_modified
                .insert(key.to_string(), last_modified.to_string());
        }
    }

    /// Keep only the `max_per_source` most recently added ids per source.
    /// Returns the total number of evicted ids.
    pub fn prune(&mut self, max_per_source: usize) -> usize {
        let mut evicted = 0;
        for (source, set) in self.seen.iter_mut() {
            let n = set.prune(max_per_source);
            if n > 0 {
                debug!(source = %source, evicted = n, kept = set.len(), "pruned seen entries");
            }
            evicted += n;
        }
        evicted
    }

    /// Stamp `last_checked` and write the snapshot via temp file + rename.
    /// Failures are logged and reported as `false`.
    pub fn save(&mut self) -> bool {
        let previous = self.last_checked.replace(Utc::now());
        match self.write_snapshot() {
            Ok(()) => {
                debug!(path = %self.path.display(), "state saved");
                true
            }
            Err(e) => {
                warn!(path = %self.path.display(), "could not save state: {e:#}");
                self.last_checked = previous;
                false
            }
        }
    }

    fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            last_checked: self
                .last_checked
                .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Micros, true)),
            seen_entries: self
                .seen
                .iter()
                .map(|(source, set)| (source.clone(), set.order.iter().cloned().collect()))
                .collect(),
            etags: self
                .etags
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            last_modified: self
                .last_modified
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    fn write_snapshot(&self) -> Result<()> {
        let bytes =
            serde_json::to_vec_pretty(&self.to_snapshot()).context("serializing state")?;

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating state dir {}", dir.display()))?;

        let mut tmp = NamedTempFile::new_in(&dir)
            .with_context(|| format!("creating temp file in {}", dir.display()))?;
        tmp.write_all(&bytes).context("writing temp state")?;
        tmp.flush().context("flushing temp state")?;
        tmp.as_file_mut().sync_all().context("syncing temp state")?;
        tmp.persist(&self.path)
            .map_err(|e| e.error)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

fn read_snapshot(path: &Path) -> Result<Option<Snapshot>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let snap: Snapshot = serde_json::from_str(&content)
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(snap))
}
