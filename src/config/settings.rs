// src/config/settings.rs
use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::notify::digest::DEFAULT_DIGEST_TITLE;
use crate::state::{DEFAULT_MAX_SEEN_PER_SOURCE, DEFAULT_STATE_PATH};

pub const ENV_SLACK_WEBHOOK_URL: &str = "SLACK_WEBHOOK_URL";
pub const ENV_STATE_PATH: &str = "STATE_PATH";
pub const ENV_MAX_SEEN_PER_SOURCE: &str = "MAX_SEEN_PER_SOURCE";
pub const ENV_FETCH_TIMEOUT_SECS: &str = "FETCH_TIMEOUT_SECS";
pub const ENV_NOTIFY_TIMEOUT_SECS: &str = "NOTIFY_TIMEOUT_SECS";
pub const ENV_REQUEST_DELAY_MS: &str = "REQUEST_DELAY_MS";
pub const ENV_USER_AGENT: &str = "USER_AGENT";
pub const ENV_DIGEST_TITLE: &str = "DIGEST_TITLE";

pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_NOTIFY_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_REQUEST_DELAY_MS: u64 = 2_000;
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Process-level settings, read from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub webhook_url: String,
    pub state_path: PathBuf,
    pub max_seen_per_source: usize,
    pub fetch_timeout: Duration,
    pub notify_timeout: Duration,
    /// Politeness pause between two fetches; zero disables it.
    pub request_delay: Duration,
    pub user_agent: String,
    /// Digest header, e.g. "AI News Update".
    pub digest_title: String,
}

impl Settings {
    /// Fails when the webhook URL is missing or malformed; everything else
    /// falls back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let webhook_url = get(ENV_SLACK_WEBHOOK_URL)
            .map(|v| v.trim().to_string())
            .unwrap_or_default();
        if webhook_url.is_empty() {
            bail!("{ENV_SLACK_WEBHOOK_URL} environment variable not set");
        }
        if url::Url::parse(&webhook_url).is_err() {
            bail!("{ENV_SLACK_WEBHOOK_URL} is not a valid URL");
        }

        let state_path = get(ENV_STATE_PATH)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_PATH));

        let max_seen_per_source = parse_or(
            &get,
            ENV_MAX_SEEN_PER_SOURCE,
            DEFAULT_MAX_SEEN_PER_SOURCE as u64,
        )
        .max(1) as usize;

        let user_agent = get(ENV_USER_AGENT)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let digest_title = get(ENV_DIGEST_TITLE)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_DIGEST_TITLE.to_string());

        Ok(Self {
            webhook_url,
            state_path,
            max_seen_per_source,
            fetch_timeout: Duration::from_secs(parse_or(
                &get,
                ENV_FETCH_TIMEOUT_SECS,
                DEFAULT_FETCH_TIMEOUT_SECS,
            )),
            notify_timeout: Duration::from_secs(parse_or(
                &get,
                ENV_NOTIFY_TIMEOUT_SECS,
                DEFAULT_NOTIFY_TIMEOUT_SECS,
            )),
            request_delay: Duration::from_millis(parse_or(
                &get,
                ENV_REQUEST_DELAY_MS,
                DEFAULT_REQUEST_DELAY_MS,
            )),
            user_agent,
            digest_title,
        })
    }
}

// unparsable values fall back to the default (with a warning)
fn parse_or<F>(get: &F, key: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => default,
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, default, "ignoring unparsable setting");
                default
            }
        },
    }
}
