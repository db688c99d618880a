// src/notify/mod.rs
pub mod digest;
pub mod slack;

use crate::item::Item;

pub use slack::SlackNotifier;

/// Delivery side of a run. Implementations report failure as `false` and
/// log it themselves; nothing is raised past this boundary.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver the full cross-source batch of new items for this run.
    async fn send_digest(&self, items: &[Item]) -> bool;

    /// Out-of-band failure report. Best effort.
    async fn send_error(&self, message: &str) -> bool;
}
