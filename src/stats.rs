//! # Statistics Module
//!
//! Atomic counters over the engine's notification bus.
//!
//! ## Overview
//!
//! [`StatsObserver`] is a stock [`EngineObserver`] that counts item
//! outcomes and lifecycle milestones. Register it with the builder, keep a
//! clone of the `Arc`, and read a [`StatsSnapshot`] at any point during or
//! after the crawl.
//!
//! ## Example
//!
//! ```rust,ignore
//! use skitter::stats::StatsObserver;
//! use std::sync::Arc;
//!
//! let stats = Arc::new(StatsObserver::new());
//! let engine = EngineBuilder::new(MySpider)
//!     .add_observer(stats.clone())
//!     .build()
//!     .await?;
//! // ... run the crawl ...
//! println!("{}", stats.snapshot());
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use url::Url;

use crate::pipeline::Item;
use crate::signals::EngineObserver;

/// Counting observer; all counters update atomically.
#[derive(Debug, Default)]
pub struct StatsObserver {
    items_scraped: AtomicU64,
    items_dropped: AtomicU64,
    item_errors: AtomicU64,
    idle_checks: AtomicU64,
    spiders_opened: AtomicU64,
    spiders_closed: AtomicU64,
}

/// Consistent point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub items_scraped: u64,
    pub items_dropped: u64,
    pub item_errors: u64,
    pub idle_checks: u64,
    pub spiders_opened: u64,
    pub spiders_closed: u64,
}

impl StatsObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            items_scraped: self.items_scraped.load(Ordering::SeqCst),
            items_dropped: self.items_dropped.load(Ordering::SeqCst),
            item_errors: self.item_errors.load(Ordering::SeqCst),
            idle_checks: self.idle_checks.load(Ordering::SeqCst),
            spiders_opened: self.spiders_opened.load(Ordering::SeqCst),
            spiders_closed: self.spiders_closed.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl EngineObserver for StatsObserver {
    async fn on_spider_opened(&self, _spider: &str) {
        self.spiders_opened.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_spider_idle(&self, _spider: &str) -> crate::signals::IdleDecision {
        self.idle_checks.fetch_add(1, Ordering::SeqCst);
        crate::signals::IdleDecision::Close
    }

    async fn on_spider_closed(&self, _spider: &str, _reason: &str) {
        self.spiders_closed.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_item_scraped(&self, _item: &Item, _url: &Url) {
        self.items_scraped.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_item_dropped(&self, _item: &Item, _url: &Url, _reason: &str) {
        self.items_dropped.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_item_error(&self, _item: &Item, _url: &Url, _error: &str) {
        self.item_errors.fetch_add(1, Ordering::SeqCst);
    }
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "scraped={} dropped={} errors={} idle_checks={}",
            self.items_scraped, self.items_dropped, self.item_errors, self.idle_checks
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn counters_track_notifications() {
        let stats = StatsObserver::new();
        let url = Url::parse("http://example.com/").unwrap();
        let mut item = Item::new();
        item.insert("k".into(), json!(1));

        stats.on_spider_opened("s").await;
        stats.on_item_scraped(&item, &url).await;
        stats.on_item_scraped(&item, &url).await;
        stats.on_item_dropped(&item, &url, "dup").await;
        stats.on_item_error(&item, &url, "boom").await;
        stats.on_spider_closed("s", "finished").await;

        let snap = stats.snapshot();
        assert_eq!(snap.items_scraped, 2);
        assert_eq!(snap.items_dropped, 1);
        assert_eq!(snap.item_errors, 1);
        assert_eq!(snap.spiders_opened, 1);
        assert_eq!(snap.spiders_closed, 1);
    }
}
