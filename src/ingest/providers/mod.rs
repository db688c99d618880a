// src/ingest/providers/mod.rs
pub mod feed;
pub mod page;

pub use feed::FeedFetcher;
pub use page::PageFetcher;
