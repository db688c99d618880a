// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod dedup;
pub mod ingest;
pub mod item;
pub mod notify;
pub mod run;
pub mod state;

// ---- Re-exports for stable public API ----
pub use crate::config::{Settings, SourceConfig, SourceKind};
pub use crate::item::Item;
pub use crate::notify::{Notifier, SlackNotifier};
pub use crate::run::{Delivery, Fetchers, RunCoordinator, RunOptions, RunReport};
pub use crate::state::{StateStore, Validators};
