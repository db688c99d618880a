// src/ingest/providers/page.rs
//! HTML page reader driven by per-source CSS selectors.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use metrics::{counter, histogram};
use reqwest::header::ACCEPT;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::config::{Selectors, SourceConfig};
use crate::ingest::types::{FetchOutcome, SourceFetcher};
use crate::ingest::{normalize_text, parse_date};
use crate::item::Item;
use crate::state::Validators;

const NO_DESCRIPTION: &str = "No description available";

/// Comma-separated selector list, kept as separate alternatives so the
/// left-most one that matches wins.
struct SelectorList(Vec<Selector>);

impl SelectorList {
    fn parse(list: &str) -> Result<Self> {
        let mut out = Vec::new();
        for part in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let sel = Selector::parse(part)
                .map_err(|e| anyhow!("invalid selector {part:?}: {e:?}"))?;
            out.push(sel);
        }
        if out.is_empty() {
            bail!("empty selector list {list:?}");
        }
        Ok(Self(out))
    }

    fn first_match<'a, 's>(&'s self, el: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> + 's
    where
        'a: 's,
    {
        self.0.iter().filter_map(move |sel| el.select(sel).next())
    }
}

struct CompiledSelectors {
    title: SelectorList,
    link: SelectorList,
    description: SelectorList,
    date: SelectorList,
}

impl CompiledSelectors {
    fn compile(s: &Selectors) -> Result<Self> {
        Ok(Self {
            title: SelectorList::parse(&s.title).context("title selector")?,
            link: SelectorList::parse(&s.link).context("link selector")?,
            description: SelectorList::parse(&s.description).context("description selector")?,
            date: SelectorList::parse(&s.date).context("date selector")?,
        })
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    normalize_text(&el.text().collect::<Vec<_>>().join(" "))
}

fn extract_text(el: ElementRef<'_>, list: &SelectorList) -> Option<String> {
    list.first_match(el)
        .map(element_text)
        .find(|t| !t.is_empty())
}

/// Empty and fragment-only hrefs point back at the listing itself.
fn usable_href(href: &str) -> Option<&str> {
    let href = href.trim();
    (!href.is_empty() && !href.starts_with('#')).then_some(href)
}

fn extract_link(el: ElementRef<'_>, list: &SelectorList, base: &Url) -> Option<String> {
    let href = list
        .0
        .iter()
        .flat_map(|sel| el.select(sel))
        .find_map(|found| found.value().attr("href").and_then(usable_href))
        // the article element itself may be the anchor
        .or_else(|| el.value().attr("href").and_then(usable_href))?;
    base.join(href).ok().map(|u| u.to_string())
}

fn extract_date(el: ElementRef<'_>, list: &SelectorList) -> Option<chrono::DateTime<chrono::Utc>> {
    list.first_match(el).find_map(|found| {
        found
            .value()
            .attr("datetime")
            .and_then(parse_date)
            .or_else(|| parse_date(&element_text(found)))
    })
}

/// Extract items from a listing page. Zero article matches is an error.
pub fn parse_page(source: &SourceConfig, page_url: &str, html: &str) -> Result<Vec<Item>> {
    let t0 = std::time::Instant::now();
    let base = Url::parse(page_url).with_context(|| format!("bad page url {page_url}"))?;
    let article_sel = Selector::parse(&source.selectors.article).map_err(|e| {
        anyhow!(
            "invalid article selector {:?}: {e:?}",
            source.selectors.article
        )
    })?;
    let selectors = CompiledSelectors::compile(&source.selectors)?;

    let doc = Html::parse_document(html);
    let articles: Vec<ElementRef<'_>> = doc.select(&article_sel).collect();
    if articles.is_empty() {
        bail!(
            "no articles found with selector {:?}",
            source.selectors.article
        );
    }
    tracing::debug!(source = %source.id, found = articles.len(), "article elements");

    let mut out = Vec::new();
    for el in articles.into_iter().take(source.max_items) {
        let Some(title) = extract_text(el, &selectors.title) else {
            continue;
        };
        let Some(link) = extract_link(el, &selectors.link, &base) else {
            continue;
        };
        let description = extract_text(el, &selectors.description)
            .unwrap_or_else(|| NO_DESCRIPTION.to_string());
        let published = extract_date(el, &selectors.date);

        out.push(Item::new(
            &source.id,
            &source.name,
            &title,
            &link,
            &description,
            published,
        ));
    }

    let ms = t0.elapsed().as_secs_f64() * 1_000.0;
    histogram!("digest_parse_ms").record(ms);
    counter!("digest_items_parsed_total").increment(out.len() as u64);
    Ok(out)
}

/// Unconditional page fetcher; validators are neither sent nor returned.
pub struct PageFetcher {
    client: reqwest::Client,
}

impl PageFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SourceFetcher for PageFetcher {
    async fn fetch(
        &self,
        source: &SourceConfig,
        url: &str,
        _cached: &Validators,
    ) -> Result<FetchOutcome> {
        tracing::debug!(source = %source.id, %url, "fetching page");
        let body = self
            .client
            .get(url)
            .header(
                ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .send()
            .await
            .with_context(|| format!("page http get {url}"))?
            .error_for_status()
            .with_context(|| format!("page http status {url}"))?
            .text()
            .await
            .context("page http .text()")?;

        // Html is !Send; parse fully before the next await point
        let items = parse_page(source, url, &body)?;
        Ok(FetchOutcome::Fetched {
            items,
            validators: Validators::default(),
        })
    }

    fn name(&self) -> &'static str {
        "page"
    }
}
