// src/ingest/providers/feed.rs
//! RSS 2.0 / RSS 1.0 / Atom reader with conditional GET.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use metrics::{counter, histogram};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use reqwest::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::StatusCode;

use crate::config::SourceConfig;
use crate::ingest::http::header_string;
use crate::ingest::types::{FetchOutcome, SourceFetcher};
use crate::ingest::{normalize_text, parse_date};
use crate::item::Item;
use crate::state::Validators;

const UNTITLED: &str = "No title";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    /// rss/channel/item
    Rss,
    /// rdf:RDF/item
    Rdf,
    /// feed/entry
    Atom,
}

/// Root element decides the dialect.
fn detect_dialect(xml: &str) -> Result<Dialect> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event().context("reading feed root")? {
            Event::Start(e) | Event::Empty(e) => {
                let name = e.local_name();
                return match name.as_ref() {
                    b"rss" => Ok(Dialect::Rss),
                    b"RDF" => Ok(Dialect::Rdf),
                    b"feed" => Ok(Dialect::Atom),
                    other => bail!(
                        "unrecognized feed root <{}>",
                        String::from_utf8_lossy(other)
                    ),
                };
            }
            Event::Eof => bail!("empty feed document"),
            _ => {}
        }
    }
}

/// Entry child that carries text we keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Link,
    Guid,
    Description,
    Content,
    Published,
    Updated,
    Ignored,
}

impl Dialect {
    fn is_entry(self, e: &BytesStart<'_>) -> bool {
        match self {
            Dialect::Rss | Dialect::Rdf => e.name().as_ref() == b"item",
            Dialect::Atom => e.local_name().as_ref() == b"entry",
        }
    }

    /// RSS children are matched on the qualified name so `atom:link` or
    /// `media:title` never shadow the plain elements.
    fn field(self, e: &BytesStart<'_>) -> Field {
        match self {
            Dialect::Rss | Dialect::Rdf => match e.name().as_ref() {
                b"title" => Field::Title,
                b"link" => Field::Link,
                b"guid" => Field::Guid,
                b"description" => Field::Description,
                b"content:encoded" => Field::Content,
                b"pubDate" => Field::Published,
                b"dc:date" => Field::Updated,
                _ => Field::Ignored,
            },
            Dialect::Atom => match e.local_name().as_ref() {
                b"title" => Field::Title,
                b"id" => Field::Guid,
                b"summary" => Field::Description,
                b"content" => Field::Content,
                b"published" => Field::Published,
                b"updated" => Field::Updated,
                _ => Field::Ignored,
            },
        }
    }
}

#[derive(Debug)]
struct AtomLink {
    href: String,
    rel: Option<String>,
}

/// Raw text collected for one item/entry.
#[derive(Debug, Default)]
struct EntryBuilder {
    title: String,
    link: String,
    guid: String,
    description: String,
    content: String,
    published: String,
    updated: String,
    links: Vec<AtomLink>,
}

impl EntryBuilder {
    fn slot(&mut self, field: Field) -> Option<&mut String> {
        match field {
            Field::Title => Some(&mut self.title),
            Field::Link => Some(&mut self.link),
            Field::Guid => Some(&mut self.guid),
            Field::Description => Some(&mut self.description),
            Field::Content => Some(&mut self.content),
            Field::Published => Some(&mut self.published),
            Field::Updated => Some(&mut self.updated),
            Field::Ignored => None,
        }
    }

    /// First occurrence of a field wins.
    fn open(&mut self, field: Field) -> Field {
        match self.slot(field) {
            Some(s) if s.trim().is_empty() => {
                s.clear();
                field
            }
            _ => Field::Ignored,
        }
    }

    fn push(&mut self, field: Field, text: &str) {
        if let Some(s) = self.slot(field) {
            s.push_str(text);
        }
    }

    fn record_atom_link(&mut self, e: &BytesStart<'_>) {
        if e.local_name().as_ref() != b"link" {
            return;
        }
        let mut href = None;
        let mut rel = None;
        for attr in e.attributes().flatten() {
            let value = decode_entities(&attr.value);
            match attr.key.local_name().as_ref() {
                b"href" => href = Some(value),
                b"rel" => rel = Some(value),
                _ => {}
            }
        }
        if let Some(href) = href.filter(|h| !h.trim().is_empty()) {
            self.links.push(AtomLink { href, rel });
        }
    }

    /// rel="alternate" (or no rel) wins; otherwise the first href.
    fn best_link(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
            .or_else(|| self.links.first())
            .map(|l| l.href.as_str())
    }

    fn build(&self, source: &SourceConfig, dialect: Dialect) -> Option<Item> {
        let own_link = match dialect {
            Dialect::Atom => self.best_link(),
            Dialect::Rss | Dialect::Rdf => non_empty(&self.link),
        };
        let link = own_link.or_else(|| non_empty(&self.guid).filter(|g| is_http_url(g)))?;
        let title = non_empty(&self.title)
            .map(normalize_text)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| UNTITLED.to_string());
        let description = non_empty(&self.description)
            .or_else(|| non_empty(&self.content))
            .map(normalize_text)
            .unwrap_or_default();
        let published = non_empty(&self.published)
            .and_then(parse_date)
            .or_else(|| non_empty(&self.updated).and_then(parse_date));
        Some(Item::new(
            &source.id,
            &source.name,
            &title,
            link,
            &description,
            published,
        ))
    }
}

fn is_http_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

fn non_empty(s: &str) -> Option<&str> {
    Some(s.trim()).filter(|v| !v.is_empty())
}

/// Decode XML and HTML named entities alike; feeds use both.
fn decode_entities(raw: &[u8]) -> String {
    html_escape::decode_html_entities(&String::from_utf8_lossy(raw)).into_owned()
}

/// Walk the document and collect every item/entry. Markup nested inside a
/// field (Atom xhtml content, stray HTML) contributes its text only. A syntax
/// error after at least one complete entry keeps what was read.
fn read_entries(xml: &str, dialect: Dialect) -> Result<Vec<EntryBuilder>> {
    let mut reader = Reader::from_str(xml);
    let mut entries = Vec::new();
    let mut depth = 0usize;
    // (depth of the entry element, collected text)
    let mut current: Option<(usize, EntryBuilder)> = None;
    // (depth of the field element, field)
    let mut field: Option<(usize, Field)> = None;

    loop {
        let event = match reader.read_event() {
            Ok(ev) => ev,
            Err(e) if !entries.is_empty() => {
                tracing::warn!(kept = entries.len(), "feed xml broken after some entries: {e}");
                break;
            }
            Err(e) => return Err(e).context("reading feed xml"),
        };

        match event {
            Event::Start(e) => {
                depth += 1;
                if let Some((entry_depth, b)) = current.as_mut() {
                    if let Some((_, f)) = field {
                        b.push(f, " ");
                    } else if depth == *entry_depth + 1 {
                        if dialect == Dialect::Atom {
                            b.record_atom_link(&e);
                        }
                        let f = b.open(dialect.field(&e));
                        field = Some((depth, f));
                    }
                } else if dialect.is_entry(&e) {
                    current = Some((depth, EntryBuilder::default()));
                }
            }
            Event::Empty(e) => {
                if let Some((entry_depth, b)) = current.as_mut() {
                    if field.is_none() && depth == *entry_depth && dialect == Dialect::Atom {
                        b.record_atom_link(&e);
                    }
                }
            }
            Event::End(_) => {
                match field {
                    Some((d, _)) if d == depth => field = None,
                    Some((_, f)) => {
                        if let Some((_, b)) = current.as_mut() {
                            b.push(f, " ");
                        }
                    }
                    None => {}
                }
                if current.as_ref().is_some_and(|(d, _)| *d == depth) {
                    if let Some((_, b)) = current.take() {
                        entries.push(b);
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Event::Text(t) => {
                if let (Some((_, b)), Some((_, f))) = (current.as_mut(), field) {
                    b.push(f, &decode_entities(&t));
                }
            }
            Event::CData(c) => {
                if let (Some((_, b)), Some((_, f))) = (current.as_mut(), field) {
                    b.push(f, &String::from_utf8_lossy(&c));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(entries)
}

/// Parse a feed document into items, in document order. Entries without a
/// usable link are skipped.
pub fn parse_feed(source: &SourceConfig, xml: &str) -> Result<Vec<Item>> {
    let t0 = std::time::Instant::now();
    let xml = xml.trim_start_matches('\u{feff}');

    let dialect = detect_dialect(xml)?;
    let entries = read_entries(xml, dialect)?;

    let mut items = Vec::with_capacity(entries.len());
    for entry in &entries {
        match entry.build(source, dialect) {
            Some(item) => items.push(item),
            None => tracing::debug!(source = %source.id, "skipping feed entry without link"),
        }
    }

    let ms = t0.elapsed().as_secs_f64() * 1_000.0;
    histogram!("digest_parse_ms").record(ms);
    counter!("digest_items_parsed_total").increment(items.len() as u64);
    Ok(items)
}

pub struct FeedFetcher {
    client: reqwest::Client,
}

impl FeedFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SourceFetcher for FeedFetcher {
    async fn fetch(
        &self,
        source: &SourceConfig,
        url: &str,
        cached: &Validators,
    ) -> Result<FetchOutcome> {
        tracing::debug!(source = %source.id, %url, conditional = !cached.is_empty(), "fetching feed");

        let mut request = self.client.get(url);
        if !cached.etag.is_empty() {
            request = request.header(IF_NONE_MATCH, cached.etag.as_str());
        }
        if !cached.last_modified.is_empty() {
            request = request.header(IF_MODIFIED_SINCE, cached.last_modified.as_str());
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("feed http get {url}"))?;
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED {
            return Ok(FetchOutcome::NotModified);
        }
        if !status.is_success() {
            bail!("HTTP {status} when fetching {url}");
        }

        let validators = Validators::new(
            header_string(response.headers(), ETAG),
            header_string(response.headers(), LAST_MODIFIED),
        );
        let body = response.text().await.context("feed http .text()")?;
        let items = parse_feed(source, &body)?;

        Ok(FetchOutcome::Fetched { items, validators })
    }

    fn name(&self) -> &'static str {
        "feed"
    }

    fn conditional(&self) -> bool {
        true
    }
}
