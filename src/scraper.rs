//! Parse stage: bounded-concurrency response parsing and item routing.
//!
//! Fetched responses queue here and a single drain task admits them while
//! parse slots are free, one spawned task per response. Each task runs the
//! spider's parse callback, interprets the returned JSON value (object means
//! item, `null` means nothing, anything else is a protocol violation that is
//! logged and dropped), and routes items through the processing chain. The
//! per-item outcome is reported on the notification bus so extensions can
//! count scraped, dropped and failed items.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use crossbeam::queue::SegQueue;
use serde_json::Value;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, error, trace};

use crate::error::PipelineError;
use crate::pipeline::PipelineManager;
use crate::response::Response;
use crate::settings::Settings;
use crate::signals::ObserverRegistry;
use crate::spider::Spider;

type ParseEntry = (Response, oneshot::Sender<()>);

/// Resolves when the response has been fully parsed and its items routed.
///
/// Resolves immediately if the stage was torn down first; parse work is not
/// an error source for the caller.
pub struct PendingParse {
    rx: oneshot::Receiver<()>,
}

impl Future for PendingParse {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|_| ())
    }
}

/// The parse stage.
pub struct Scraper {
    spider: Arc<dyn Spider>,
    pipelines: Arc<PipelineManager>,
    signals: Arc<ObserverRegistry>,
    max_concurrent: usize,
    active: AtomicUsize,
    queue: SegQueue<ParseEntry>,
    wake: Notify,
    closed: AtomicBool,
}

impl Scraper {
    /// Creates the stage and spawns its drain task.
    pub fn new(
        spider: Arc<dyn Spider>,
        pipelines: Arc<PipelineManager>,
        signals: Arc<ObserverRegistry>,
        settings: &Settings,
    ) -> Arc<Self> {
        let scraper = Arc::new(Self {
            spider,
            pipelines,
            signals,
            max_concurrent: settings.concurrent_items,
            active: AtomicUsize::new(0),
            queue: SegQueue::new(),
            wake: Notify::new(),
            closed: AtomicBool::new(false),
        });

        let drain = Arc::clone(&scraper);
        tokio::spawn(async move {
            drain.drain_loop().await;
        });

        scraper
    }

    /// Runs the pipelines' open hooks.
    pub async fn open_spider(&self) {
        self.pipelines.open_spider(self.spider.name()).await;
    }

    /// Runs the pipelines' close hooks and stops admitting responses.
    /// Idempotent.
    pub async fn close_spider(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("closing parse stage");
        self.wake.notify_one();
        self.drop_pending();
        self.pipelines.close_spider(self.spider.name()).await;
    }

    /// Queues one response for parsing.
    pub fn enqueue_scrape(&self, response: Response) -> PendingParse {
        let (tx, rx) = oneshot::channel();
        if self.closed.load(Ordering::SeqCst) {
            trace!(url = %response.url, "parse stage closed, discarding response");
        } else {
            self.queue.push((response, tx));
            self.wake.notify_one();
            // close_spider() may have drained the queue between the flag
            // load and the push; re-check so the entry's handle still
            // resolves
            if self.closed.load(Ordering::SeqCst) {
                self.drop_pending();
            }
        }
        PendingParse { rx }
    }

    /// Backpressure signal: true iff at least one parse slot is free.
    pub fn capacity_available(&self) -> bool {
        self.active.load(Ordering::SeqCst) < self.max_concurrent
    }

    /// True iff nothing is queued and nothing is being parsed.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.active.load(Ordering::SeqCst) == 0
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn drop_pending(&self) {
        while let Some((response, _tx)) = self.queue.pop() {
            trace!(url = %response.url, "discarding queued response, stage closed");
        }
    }

    async fn drain_loop(self: Arc<Self>) {
        loop {
            self.wake.notified().await;
            loop {
                if self.closed.load(Ordering::SeqCst) {
                    self.drop_pending();
                    trace!("parse drain task finished");
                    return;
                }
                if !self.capacity_available() {
                    break;
                }
                let Some((response, tx)) = self.queue.pop() else {
                    break;
                };
                self.active.fetch_add(1, Ordering::SeqCst);
                let this = Arc::clone(&self);
                tokio::spawn(async move {
                    this.scrape_one(response).await;
                    this.active.fetch_sub(1, Ordering::SeqCst);
                    let _ = tx.send(());
                    this.wake.notify_one();
                });
            }
        }
    }

    async fn scrape_one(&self, response: Response) {
        let url = response.url.clone();
        debug!(url = %url, status = response.status, "parsing response");
        let output = self.spider.parse(response).await;
        self.handle_spider_output(output, &url).await;
    }

    async fn handle_spider_output(&self, output: anyhow::Result<Value>, url: &url::Url) {
        let value = match output {
            Ok(value) => value,
            Err(e) => {
                error!(url = %url, error = %e, "parse callback failed");
                return;
            }
        };

        match value {
            Value::Null => {}
            Value::Object(item) => {
                match self.pipelines.process_item(item.clone(), self.spider.name()).await {
                    Ok(processed) => {
                        self.signals.notify_item_scraped(&processed, url).await;
                    }
                    Err(PipelineError::DropItem(reason)) => {
                        debug!(url = %url, reason = %reason, "item dropped");
                        self.signals.notify_item_dropped(&item, url, &reason).await;
                    }
                    Err(PipelineError::Failure(e)) => {
                        error!(url = %url, error = %e, "item processing failed");
                        self.signals
                            .notify_item_error(&item, url, &e.to_string())
                            .await;
                    }
                }
            }
            other => {
                error!(
                    url = %url,
                    got = other.to_string(),
                    "parse callback must return an object or null"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Item, ItemPipeline};
    use crate::request::Request;
    use crate::signals::EngineObserver;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    struct SlowSpider {
        latency: Duration,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl Spider for SlowSpider {
        fn name(&self) -> &str {
            "slow"
        }

        async fn parse(&self, response: Response) -> anyhow::Result<Value> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(json!({ "url": response.url.as_str() }))
        }
    }

    struct StringSpider;

    #[async_trait]
    impl Spider for StringSpider {
        fn name(&self) -> &str {
            "strings"
        }

        async fn parse(&self, _response: Response) -> anyhow::Result<Value> {
            Ok(json!("not an item"))
        }
    }

    struct DropShort;

    #[async_trait]
    impl ItemPipeline for DropShort {
        fn name(&self) -> &str {
            "drop_short"
        }

        async fn process_item(&self, item: Item, _spider: &str) -> Result<Item, PipelineError> {
            if item["url"].as_str().map_or(0, str::len) < 25 {
                Err(PipelineError::DropItem("url too short".into()))
            } else {
                Ok(item)
            }
        }
    }

    #[derive(Default)]
    struct Counting {
        scraped: AtomicUsize,
        dropped: AtomicUsize,
        errors: AtomicUsize,
    }

    #[async_trait]
    impl EngineObserver for Counting {
        async fn on_item_scraped(&self, _item: &Item, _url: &url::Url) {
            self.scraped.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_item_dropped(&self, _item: &Item, _url: &url::Url, _reason: &str) {
            self.dropped.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_item_error(&self, _item: &Item, _url: &url::Url, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn response(url: &str) -> Response {
        let request = Request::parse(url).unwrap();
        Response {
            url: request.url.clone(),
            status: 200,
            body: String::new(),
            request,
        }
    }

    fn settings(limit: usize) -> Settings {
        Settings {
            concurrent_items: limit,
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn concurrent_parses_stay_within_limit() {
        let spider = Arc::new(SlowSpider {
            latency: Duration::from_millis(10),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        });
        let scraper = Scraper::new(
            spider.clone(),
            Arc::new(PipelineManager::default()),
            Arc::new(ObserverRegistry::default()),
            &settings(2),
        );

        let handles: Vec<_> = (0..20)
            .map(|i| scraper.enqueue_scrape(response(&format!("http://example.com/{i}"))))
            .collect();
        for handle in handles {
            handle.await;
        }

        assert!(spider.peak_in_flight.load(Ordering::SeqCst) <= 2);
        assert!(scraper.is_idle());
    }

    #[tokio::test]
    async fn item_outcomes_reach_observers() {
        let counting = Arc::new(Counting::default());
        let scraper = Scraper::new(
            Arc::new(SlowSpider {
                latency: Duration::ZERO,
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
            }),
            Arc::new(PipelineManager::new(vec![Box::new(DropShort)])),
            Arc::new(ObserverRegistry::new(vec![counting.clone()])),
            &settings(4),
        );

        scraper
            .enqueue_scrape(response("http://example.com/a-rather-long-path"))
            .await;
        scraper.enqueue_scrape(response("http://e.com/s")).await;

        assert_eq!(counting.scraped.load(Ordering::SeqCst), 1);
        assert_eq!(counting.dropped.load(Ordering::SeqCst), 1);
        assert_eq!(counting.errors.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn non_object_output_produces_no_item_signal() {
        let counting = Arc::new(Counting::default());
        let scraper = Scraper::new(
            Arc::new(StringSpider),
            Arc::new(PipelineManager::default()),
            Arc::new(ObserverRegistry::new(vec![counting.clone()])),
            &settings(4),
        );

        scraper.enqueue_scrape(response("http://example.com/")).await;

        assert_eq!(counting.scraped.load(Ordering::SeqCst), 0);
        assert_eq!(counting.dropped.load(Ordering::SeqCst), 0);
        assert_eq!(counting.errors.load(Ordering::SeqCst), 0);
        assert!(scraper.is_idle());
    }

    #[tokio::test]
    async fn scrapes_racing_close_always_resolve() {
        for _ in 0..50 {
            let scraper = Scraper::new(
                Arc::new(SlowSpider {
                    latency: Duration::ZERO,
                    in_flight: AtomicUsize::new(0),
                    peak_in_flight: AtomicUsize::new(0),
                }),
                Arc::new(PipelineManager::default()),
                Arc::new(ObserverRegistry::default()),
                &settings(2),
            );

            let closer = tokio::spawn({
                let scraper = Arc::clone(&scraper);
                async move { scraper.close_spider().await }
            });
            let handles: Vec<_> = (0..8)
                .map(|i| scraper.enqueue_scrape(response(&format!("http://example.com/{i}"))))
                .collect();
            closer.await.unwrap();

            // handles resolve whether the entry was parsed or discarded
            for handle in handles {
                tokio::time::timeout(Duration::from_secs(1), handle)
                    .await
                    .expect("parse handle never resolved");
            }
        }
    }

    #[tokio::test]
    async fn close_discards_queued_responses() {
        let scraper = Scraper::new(
            Arc::new(SlowSpider {
                latency: Duration::from_millis(50),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
            }),
            Arc::new(PipelineManager::default()),
            Arc::new(ObserverRegistry::default()),
            &settings(1),
        );

        let _running = scraper.enqueue_scrape(response("http://example.com/0"));
        let queued = scraper.enqueue_scrape(response("http://example.com/1"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        scraper.close_spider().await;
        scraper.close_spider().await;

        // resolves by sender drop rather than completion
        queued.await;
    }
}
