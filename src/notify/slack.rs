use anyhow::{anyhow, Result};
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::digest::{build_digest, build_error, plural, Block, DEFAULT_DIGEST_TITLE};
use super::Notifier;
use crate::item::Item;

/// Posts digests to a Slack incoming webhook.
#[derive(Clone)]
pub struct SlackNotifier {
    webhook_url: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
    title: String,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    /// Fallback for notifications and clients without Block Kit.
    text: String,
    blocks: &'a [Block],
}

impl SlackNotifier {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            client: Client::new(),
            timeout: Duration::from_secs(10),
            max_retries: 1,
            title: DEFAULT_DIGEST_TITLE.to_string(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Total attempts per message (min 1).
    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    async fn post_blocks(&self, fallback: String, blocks: &[Block]) -> Result<()> {
        let payload = WebhookPayload {
            text: fallback,
            blocks,
        };

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.webhook_url)
                .timeout(self.timeout)
                .json(&payload)
                .send()
                .await;

            let err = match res {
                Ok(rsp) => match rsp.error_for_status() {
                    Ok(_) => return Ok(()),
                    Err(e) => anyhow!("slack webhook HTTP error: {e}"),
                },
                Err(e) => anyhow!("slack webhook request failed: {e}"),
            };

            if attempt >= self.max_retries {
                return Err(err);
            }
            tracing::debug!(attempt, "slack post failed, retrying: {err:#}");
            tokio::time::sleep(backoff(attempt)).await;
        }
    }
}

fn fallback_text(title: &str, count: usize) -> String {
    format!("{title}: {count} new update{}", plural(count))
}

/// 500ms doubling per attempt, capped at 32s.
fn backoff(attempt: u8) -> Duration {
    let shift = u32::from(attempt.saturating_sub(1)).min(6);
    Duration::from_millis(500u64 << shift)
}

#[async_trait::async_trait]
impl Notifier for SlackNotifier {
    async fn send_digest(&self, items: &[Item]) -> bool {
        if items.is_empty() {
            tracing::debug!("no items; nothing to send");
            return true;
        }

        let blocks = build_digest(items, &self.title, Utc::now().date_naive());
        if blocks.len() >= super::digest::MAX_BLOCKS {
            tracing::warn!(blocks = blocks.len(), "digest truncated to fit Slack limits");
        }
        let fallback = fallback_text(&self.title, items.len());

        match self.post_blocks(fallback, &blocks).await {
            Ok(()) => {
                tracing::info!(items = items.len(), blocks = blocks.len(), "digest sent to Slack");
                true
            }
            Err(e) => {
                tracing::error!("sending digest to Slack failed: {e:#}");
                false
            }
        }
    }

    async fn send_error(&self, message: &str) -> bool {
        let blocks = build_error(message);
        match self
            .post_blocks(format!("News Digest error: {message}"), &blocks)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("error notification failed: {e:#}");
                false
            }
        }
    }
}
