//! Notification bus connecting the engine to extensions.
//!
//! Extensions implement [`EngineObserver`] and register with the builder.
//! Every method has a no-op default, so an observer declares exactly the
//! lifecycle hooks it cares about; the set of observers is fixed once the
//! engine is built. `on_spider_idle` is the one two-way signal: returning
//! [`IdleDecision::KeepOpen`] vetoes an idle-triggered close, e.g. because
//! the extension is about to inject more work.

use async_trait::async_trait;
use std::sync::Arc;
use url::Url;

use crate::pipeline::Item;

/// Response to the spider-idle notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleDecision {
    /// No objection to closing the crawl.
    Close,
    /// Veto: keep the crawl open, more work may arrive.
    KeepOpen,
}

/// Receiver for engine notifications. All methods default to no-ops.
#[async_trait]
pub trait EngineObserver: Send + Sync {
    /// The engine has started; stages may lazily initialize resources.
    async fn on_engine_started(&self) {}

    /// A spider has been opened for crawling.
    async fn on_spider_opened(&self, _spider: &str) {}

    /// No request is queued, fetching, or parsing. Return
    /// [`IdleDecision::KeepOpen`] to veto the close.
    async fn on_spider_idle(&self, _spider: &str) -> IdleDecision {
        IdleDecision::Close
    }

    /// The close sequence has begun.
    async fn on_engine_stopping(&self, _spider: &str, _reason: &str) {}

    /// The close sequence has finished; no further notifications follow.
    async fn on_spider_closed(&self, _spider: &str, _reason: &str) {}

    /// An item passed the whole processing chain.
    async fn on_item_scraped(&self, _item: &Item, _url: &Url) {}

    /// The processing chain explicitly dropped an item.
    async fn on_item_dropped(&self, _item: &Item, _url: &Url, _reason: &str) {}

    /// The processing chain failed on an item.
    async fn on_item_error(&self, _item: &Item, _url: &Url, _error: &str) {}
}

/// Fan-out registry over all registered observers.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: Vec<Arc<dyn EngineObserver>>,
}

impl ObserverRegistry {
    pub fn new(observers: Vec<Arc<dyn EngineObserver>>) -> Self {
        Self { observers }
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub async fn notify_engine_started(&self) {
        for observer in &self.observers {
            observer.on_engine_started().await;
        }
    }

    pub async fn notify_spider_opened(&self, spider: &str) {
        for observer in &self.observers {
            observer.on_spider_opened(spider).await;
        }
    }

    /// Collects every observer's idle decision.
    pub async fn notify_spider_idle(&self, spider: &str) -> Vec<IdleDecision> {
        let mut decisions = Vec::with_capacity(self.observers.len());
        for observer in &self.observers {
            decisions.push(observer.on_spider_idle(spider).await);
        }
        decisions
    }

    pub async fn notify_engine_stopping(&self, spider: &str, reason: &str) {
        for observer in &self.observers {
            observer.on_engine_stopping(spider, reason).await;
        }
    }

    pub async fn notify_spider_closed(&self, spider: &str, reason: &str) {
        for observer in &self.observers {
            observer.on_spider_closed(spider, reason).await;
        }
    }

    pub async fn notify_item_scraped(&self, item: &Item, url: &Url) {
        for observer in &self.observers {
            observer.on_item_scraped(item, url).await;
        }
    }

    pub async fn notify_item_dropped(&self, item: &Item, url: &Url, reason: &str) {
        for observer in &self.observers {
            observer.on_item_dropped(item, url, reason).await;
        }
    }

    pub async fn notify_item_error(&self, item: &Item, url: &Url, error: &str) {
        for observer in &self.observers {
            observer.on_item_error(item, url, error).await;
        }
    }
}
