// src/ingest/http.rs
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, USER_AGENT};
use std::time::Duration;

use crate::config::Settings;

/// Shared client for source fetches: browser-like UA, per-request timeout.
pub fn build_fetch_client(user_agent: &str, timeout: Duration) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(user_agent).context("invalid user agent")?,
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

    reqwest::Client::builder()
        .default_headers(headers)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .timeout(timeout)
        .build()
        .context("building http client")
}

pub fn client_from_settings(settings: &Settings) -> Result<reqwest::Client> {
    build_fetch_client(&settings.user_agent, settings.fetch_timeout)
}

/// Header value as an owned string; empty when missing or not ASCII.
pub(crate) fn header_string(headers: &HeaderMap, name: reqwest::header::HeaderName) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}
