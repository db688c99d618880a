// src/config/sources.rs
//! Source table: which feeds/pages to poll and how to read them.

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_SOURCES_CONFIG_PATH: &str = "SOURCES_CONFIG_PATH";
pub const DEFAULT_SOURCES_CONFIG_PATH: &str = "config/sources.toml";

/// Articles read per page source unless `max_items` says otherwise.
pub const DEFAULT_PAGE_MAX_ITEMS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// RSS/Atom feed; supports conditional fetch.
    #[serde(alias = "rss")]
    Feed,
    /// HTML page read with CSS selectors.
    #[serde(alias = "web")]
    Page,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Feed => "feed",
            SourceKind::Page => "page",
        }
    }
}

/// Which item fields `filter_keyword` is matched against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterField {
    Title,
    Description,
    #[default]
    Both,
}

fn default_article_selector() -> String {
    "article".to_string()
}
fn default_title_selector() -> String {
    "h2, h3".to_string()
}
fn default_link_selector() -> String {
    "a".to_string()
}
fn default_description_selector() -> String {
    "p".to_string()
}
fn default_date_selector() -> String {
    "time".to_string()
}
fn default_max_items() -> usize {
    DEFAULT_PAGE_MAX_ITEMS
}

/// CSS selector lists for page sources. Each value may be a comma-separated
/// list; alternatives are tried left to right.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Selectors {
    #[serde(default = "default_article_selector")]
    pub article: String,
    #[serde(default = "default_title_selector")]
    pub title: String,
    #[serde(default = "default_link_selector")]
    pub link: String,
    #[serde(default = "default_description_selector")]
    pub description: String,
    #[serde(default = "default_date_selector")]
    pub date: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            article: default_article_selector(),
            title: default_title_selector(),
            link: default_link_selector(),
            description: default_description_selector(),
            date: default_date_selector(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Stable key used in state (seen-sets, validator keys).
    pub id: String,
    /// Display name used in the digest.
    pub name: String,
    pub kind: SourceKind,
    pub urls: Vec<String>,
    #[serde(default)]
    pub filter_keyword: Option<String>,
    #[serde(default)]
    pub filter_field: FilterField,
    #[serde(default)]
    pub selectors: Selectors,
    #[serde(default = "default_max_items")]
    pub max_items: usize,
}

impl SourceConfig {
    pub fn feed(id: &str, name: &str, url: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            kind: SourceKind::Feed,
            urls: vec![url.to_string()],
            filter_keyword: None,
            filter_field: FilterField::default(),
            selectors: Selectors::default(),
            max_items: DEFAULT_PAGE_MAX_ITEMS,
        }
    }

    pub fn page(id: &str, name: &str, url: &str, selectors: Selectors) -> Self {
        Self {
            kind: SourceKind::Page,
            selectors,
            ..Self::feed(id, name, url)
        }
    }

    pub fn with_keyword(mut self, keyword: &str, field: FilterField) -> Self {
        self.filter_keyword = Some(keyword.to_string());
        self.filter_field = field;
        self
    }
}

#[derive(Debug, Deserialize)]
struct SourcesFile {
    #[serde(default)]
    sources: Vec<SourceConfig>,
}

/// Parse and validate a TOML source table.
pub fn parse_sources(s: &str) -> Result<Vec<SourceConfig>> {
    let file: SourcesFile = toml::from_str(s).context("parsing source table")?;
    let sources = clean(file.sources);
    validate(&sources)?;
    Ok(sources)
}

/// Load the source table from an explicit path.
pub fn load_sources_from(path: &Path) -> Result<Vec<SourceConfig>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading source table from {}", path.display()))?;
    parse_sources(&content).with_context(|| format!("in {}", path.display()))
}

/// Load the source table using env var + fallbacks:
/// 1) $SOURCES_CONFIG_PATH (must exist)
/// 2) config/sources.toml
/// 3) built-in table
pub fn load_sources_default() -> Result<Vec<SourceConfig>> {
    if let Ok(p) = std::env::var(ENV_SOURCES_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_sources_from(&pb);
        } else {
            return Err(anyhow!(
                "{ENV_SOURCES_CONFIG_PATH} points to non-existent path {}",
                pb.display()
            ));
        }
    }
    let default_p = PathBuf::from(DEFAULT_SOURCES_CONFIG_PATH);
    if default_p.exists() {
        return load_sources_from(&default_p);
    }
    Ok(builtin_sources())
}

fn clean(sources: Vec<SourceConfig>) -> Vec<SourceConfig> {
    sources
        .into_iter()
        .map(|mut s| {
            s.id = s.id.trim().to_string();
            s.name = s.name.trim().to_string();
            s.urls = s
                .urls
                .into_iter()
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty())
                .collect();
            s.filter_keyword = s
                .filter_keyword
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty());
            if s.name.is_empty() {
                s.name = s.id.clone();
            }
            s
        })
        .collect()
}

/// Ids must be unique, non-empty and whitespace-free (they are half of the
/// composite validator key); every URL must be absolute http(s).
pub fn validate(sources: &[SourceConfig]) -> Result<()> {
    let mut ids = HashSet::new();
    for s in sources {
        if s.id.is_empty() {
            bail!("source with empty id");
        }
        if s.id.chars().any(char::is_whitespace) {
            bail!("source id {:?} contains whitespace", s.id);
        }
        if !ids.insert(s.id.as_str()) {
            bail!("duplicate source id {:?}", s.id);
        }
        if s.urls.is_empty() {
            bail!("source {:?} has no urls", s.id);
        }
        for u in &s.urls {
            let parsed =
                url::Url::parse(u).with_context(|| format!("source {:?}: bad url {u:?}", s.id))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                bail!("source {:?}: url {u:?} is not http(s)", s.id);
            }
        }
    }
    Ok(())
}

/// Table used when no config file is present.
pub fn builtin_sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig::feed("openai", "OpenAI", "https://openai.com/news/rss.xml"),
        SourceConfig::feed("google", "Google AI", "https://blog.google/rss/")
            .with_keyword("ai", FilterField::Both),
        SourceConfig::feed("cohere", "Cohere", "https://txt.cohere.com/rss/"),
        SourceConfig::feed("qwen", "Alibaba (Qwen)", "https://qwenlm.github.io/feed.xml"),
        SourceConfig::feed(
            "meta_research",
            "Meta AI Research",
            "https://research.facebook.com/feed/",
        ),
    ]
}
