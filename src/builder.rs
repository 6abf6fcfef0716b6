//! # Builder Module
//!
//! Fluent construction of a fully wired [`ExecutionEngine`].
//!
//! ## Overview
//!
//! The builder assembles the scheduler, the fetch and parse stages, the
//! pipelines and the observer registry around one spider, validates the
//! settings and opens the engine. The returned `Arc<ExecutionEngine>` is
//! ready to [`start`](ExecutionEngine::start).
//!
//! ## Example
//!
//! ```rust,ignore
//! use skitter::EngineBuilder;
//!
//! async fn crawl() -> anyhow::Result<()> {
//!     let engine = EngineBuilder::new(MySpider)
//!         .concurrent_requests(16)
//!         .download_delay(std::time::Duration::from_millis(250))
//!         .add_pipeline(MyPipeline)
//!         .build()
//!         .await?;
//!     let reason = engine.start().await?;
//!     println!("crawl closed: {reason}");
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::downloader::Downloader;
use crate::engine::ExecutionEngine;
use crate::error::EngineError;
use crate::pipeline::{ItemPipeline, PipelineManager};
use crate::response::{HttpClient, ReqwestClient};
use crate::scheduler::{MemoryScheduler, Scheduler};
use crate::scraper::Scraper;
use crate::settings::Settings;
use crate::signals::{EngineObserver, ObserverRegistry};
use crate::spider::Spider;

/// Builder for [`ExecutionEngine`].
pub struct EngineBuilder {
    spider: Arc<dyn Spider>,
    settings: Settings,
    pipelines: Vec<Box<dyn ItemPipeline>>,
    observers: Vec<Arc<dyn EngineObserver>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    client: Option<Arc<dyn HttpClient>>,
    close_if_idle: bool,
}

impl EngineBuilder {
    pub fn new(spider: impl Spider) -> Self {
        Self {
            spider: Arc::new(spider),
            settings: Settings::default(),
            pipelines: Vec::new(),
            observers: Vec::new(),
            scheduler: None,
            client: None,
            close_if_idle: true,
        }
    }

    /// Replaces the whole settings block at once.
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Maximum simultaneously open fetches.
    pub fn concurrent_requests(mut self, limit: usize) -> Self {
        self.settings.concurrent_requests = limit;
        self
    }

    /// Maximum simultaneously running parse callbacks.
    pub fn concurrent_items(mut self, limit: usize) -> Self {
        self.settings.concurrent_items = limit;
        self
    }

    /// Minimum delay between successive fetch dispatches.
    pub fn download_delay(mut self, delay: Duration) -> Self {
        self.settings.download_delay = delay;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.settings.user_agent = user_agent.into();
        self
    }

    /// Appends a pipeline; items flow through pipelines in registration
    /// order.
    pub fn add_pipeline(mut self, pipeline: impl ItemPipeline + 'static) -> Self {
        self.pipelines.push(Box::new(pipeline));
        self
    }

    pub fn add_observer(mut self, observer: Arc<dyn EngineObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Swaps the in-memory FIFO for a custom scheduler.
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Swaps the stock transport, mainly for tests.
    pub fn client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// With `false` the engine survives idle periods and only an explicit
    /// `stop` closes it.
    pub fn close_if_idle(mut self, close_if_idle: bool) -> Self {
        self.close_if_idle = close_if_idle;
        self
    }

    /// Validates the configuration, wires the stages together and opens the
    /// engine.
    pub async fn build(self) -> Result<Arc<ExecutionEngine>, EngineError> {
        if self.settings.concurrent_requests == 0 {
            return Err(EngineError::Configuration(
                "concurrent_requests must be greater than zero".into(),
            ));
        }
        if self.settings.concurrent_items == 0 {
            return Err(EngineError::Configuration(
                "concurrent_items must be greater than zero".into(),
            ));
        }

        let scheduler = self
            .scheduler
            .unwrap_or_else(|| Arc::new(MemoryScheduler::new()));
        let client = self
            .client
            .unwrap_or_else(|| Arc::new(ReqwestClient::new()));
        let signals = Arc::new(ObserverRegistry::new(self.observers));
        let pipelines = Arc::new(PipelineManager::new(self.pipelines));

        let downloader = Downloader::new(client, &self.settings);
        let scraper = Scraper::new(
            Arc::clone(&self.spider),
            pipelines,
            Arc::clone(&signals),
            &self.settings,
        );

        let engine = Arc::new(ExecutionEngine::new(
            self.settings,
            self.spider,
            scheduler,
            downloader,
            scraper,
            signals,
        ));
        engine.open(self.close_if_idle).await?;
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Response;
    use async_trait::async_trait;
    use serde_json::Value;

    struct NoopSpider;

    #[async_trait]
    impl Spider for NoopSpider {
        fn name(&self) -> &str {
            "noop"
        }

        async fn parse(&self, _response: Response) -> anyhow::Result<Value> {
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn rejects_zero_concurrency() {
        let result = EngineBuilder::new(NoopSpider)
            .concurrent_requests(0)
            .build()
            .await;
        assert!(matches!(result, Err(EngineError::Configuration(_))));

        let result = EngineBuilder::new(NoopSpider)
            .concurrent_items(0)
            .build()
            .await;
        assert!(matches!(result, Err(EngineError::Configuration(_))));
    }

    #[tokio::test]
    async fn builds_with_defaults() {
        let engine = EngineBuilder::new(NoopSpider).build().await.unwrap();
        assert_eq!(engine.settings().concurrent_requests, 10);
        // the start iterator has not been drained yet
        assert!(!engine.spider_is_idle());
    }
}
