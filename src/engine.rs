//! The execution engine: the progress loop tying scheduler, fetch stage and
//! parse stage together.
//!
//! ## Overview
//!
//! The engine is event-driven, not polling. Every state change that could
//! unlock progress (a request enqueued, a fetch completed, a parse slot
//! freed) pokes a [`DebouncedTrigger`] wrapping the progress step, so bursts
//! of completions collapse into one drain pass. A five second heartbeat
//! pokes the same trigger as a safety net.
//!
//! One progress step moves as many scheduled requests into the fetch stage
//! as downstream capacity allows, then pulls at most one start request into
//! the scheduler (keeping the start iterator lazy under backpressure), and
//! finally runs the idle check. Idle means no request is queued, fetching,
//! parsing, or tracked in flight and the start iterator is exhausted; on
//! idle the observers are consulted and any veto keeps the crawl open.
//!
//! The close sequence runs exactly once regardless of how many callers race
//! into it, and `start` returns the close reason once the sequence finishes.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::downloader::Downloader;
use crate::error::{EngineError, FetchError};
use crate::request::Request;
use crate::scheduler::Scheduler;
use crate::scraper::Scraper;
use crate::settings::Settings;
use crate::signals::{IdleDecision, ObserverRegistry};
use crate::spider::Spider;
use crate::trigger::DebouncedTrigger;

/// Close reason recorded when the crawl drains naturally.
pub const REASON_FINISHED: &str = "finished";
/// Close reason recorded on an explicit `stop`.
pub const REASON_STOPPED: &str = "stopped";

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

type StartRequests = Box<dyn Iterator<Item = Request> + Send>;

/// Coordinates one crawl from open to close. Built by
/// [`EngineBuilder`](crate::builder::EngineBuilder).
pub struct ExecutionEngine {
    settings: Settings,
    spider: Arc<dyn Spider>,
    scheduler: Arc<dyn Scheduler>,
    downloader: Arc<Downloader>,
    scraper: Arc<Scraper>,
    signals: Arc<ObserverRegistry>,
    /// Requests between scheduler pop and parse completion; part of the
    /// idle condition.
    in_progress: AtomicUsize,
    opened: AtomicBool,
    running: AtomicBool,
    closing: AtomicBool,
    closed: AtomicBool,
    close_if_idle: AtomicBool,
    close_reason: Mutex<Option<String>>,
    close_notify: Notify,
    next_call: Mutex<Option<Arc<DebouncedTrigger>>>,
    start_requests: Mutex<Option<StartRequests>>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl ExecutionEngine {
    pub(crate) fn new(
        settings: Settings,
        spider: Arc<dyn Spider>,
        scheduler: Arc<dyn Scheduler>,
        downloader: Arc<Downloader>,
        scraper: Arc<Scraper>,
        signals: Arc<ObserverRegistry>,
    ) -> Self {
        Self {
            settings,
            spider,
            scheduler,
            downloader,
            scraper,
            signals,
            in_progress: AtomicUsize::new(0),
            opened: AtomicBool::new(false),
            running: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            close_if_idle: AtomicBool::new(true),
            close_reason: Mutex::new(None),
            close_notify: Notify::new(),
            next_call: Mutex::new(None),
            start_requests: Mutex::new(None),
            heartbeat: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Prepares the crawl: installs the progress trigger, takes the start
    /// iterator from the spider, opens the scheduler and the pipelines and
    /// announces the spider. With `close_if_idle` false the engine keeps
    /// running through idle periods until an explicit `stop`.
    pub async fn open(self: &Arc<Self>, close_if_idle: bool) -> Result<(), EngineError> {
        if self.opened.swap(true, Ordering::SeqCst) {
            return Err(EngineError::Configuration(
                "engine opened more than once".into(),
            ));
        }
        info!(spider = self.spider.name(), "opening spider");
        self.close_if_idle.store(close_if_idle, Ordering::SeqCst);

        let weak = Arc::downgrade(self);
        let trigger = DebouncedTrigger::new(move || {
            let weak = Weak::clone(&weak);
            async move {
                if let Some(engine) = weak.upgrade() {
                    engine.next_request().await;
                }
            }
        });
        *self.next_call.lock() = Some(trigger);
        *self.start_requests.lock() = Some(self.spider.start_requests());

        self.scheduler.open().await?;
        self.signals.notify_spider_opened(self.spider.name()).await;
        self.scraper.open_spider().await;
        Ok(())
    }

    /// Runs the crawl to completion and returns the close reason.
    ///
    /// Resolves when the close sequence has finished, whether it was
    /// triggered by idleness or by [`stop`](Self::stop) from another task.
    pub async fn start(self: &Arc<Self>) -> Result<String, EngineError> {
        if !self.opened.load(Ordering::SeqCst) {
            return Err(EngineError::Configuration(
                "engine must be opened before start".into(),
            ));
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(EngineError::Configuration(
                "engine started more than once".into(),
            ));
        }
        info!(spider = self.spider.name(), "engine started");
        self.signals.notify_engine_started().await;
        self.downloader.open().await?;
        self.spawn_heartbeat();
        self.poke();

        loop {
            // register with the notifier before checking the flag, so a
            // notify_waiters landing between the load and the poll is not
            // lost
            let notified = self.close_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.closed.load(Ordering::SeqCst) {
                break;
            }
            notified.await;
        }

        let reason = self
            .close_reason
            .lock()
            .clone()
            .unwrap_or_else(|| REASON_FINISHED.to_string());
        Ok(reason)
    }

    /// Injects a request into the crawl.
    pub fn enqueue(&self, request: Request) -> Result<(), EngineError> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(EngineError::StageClosed("engine"));
        }
        self.scheduler.enqueue_request(request);
        self.poke();
        Ok(())
    }

    /// Runs the full close sequence with reason `"stopped"`.
    pub async fn stop(self: &Arc<Self>) {
        self.close(REASON_STOPPED).await;
    }

    /// A weak handle for callbacks and extensions; does not keep the engine
    /// alive.
    pub fn handle(self: &Arc<Self>) -> EngineHandle {
        EngineHandle {
            inner: Arc::downgrade(self),
        }
    }

    /// True iff no request is queued, fetching, parsing, or otherwise in
    /// flight and the start iterator is exhausted.
    pub fn spider_is_idle(&self) -> bool {
        self.scraper.is_idle()
            && self.downloader.active_count() == 0
            && self.downloader.queued_count() == 0
            && !self.scheduler.has_pending_requests()
            && self.in_progress.load(Ordering::SeqCst) == 0
            && self.start_requests.lock().is_none()
    }

    /// Schedules one progress step. Safe to call from any task; bursts
    /// coalesce in the trigger.
    fn poke(&self) {
        if let Some(trigger) = self.next_call.lock().as_ref() {
            trigger.trigger(Duration::ZERO);
        }
    }

    fn spawn_heartbeat(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(HEARTBEAT_INTERVAL);
            ticks.tick().await;
            loop {
                ticks.tick().await;
                match weak.upgrade() {
                    Some(engine) => engine.poke(),
                    None => break,
                }
            }
        });
        *self.heartbeat.lock() = Some(handle);
    }

    /// One progress step, run only through the trigger.
    async fn next_request(self: &Arc<Self>) {
        if self.closing.load(Ordering::SeqCst) {
            return;
        }

        while !self.should_pause() {
            match self.scheduler.next_request() {
                Some(request) => {
                    // keep draining concurrently with the dispatch
                    self.poke();
                    self.dispatch(request);
                }
                None => break,
            }
        }

        if !self.should_pause() {
            self.pull_start_request();
        }

        if self.close_if_idle.load(Ordering::SeqCst) && self.spider_is_idle() {
            self.spider_idle().await;
        }
    }

    /// Backpressure gate: scheduled requests stay in the scheduler while
    /// either downstream stage is saturated.
    fn should_pause(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
            || !self.downloader.capacity_available()
            || !self.scraper.capacity_available()
    }

    /// Moves at most one start request into the scheduler per step so a
    /// backpressured crawl never buffers the whole start iterator.
    fn pull_start_request(self: &Arc<Self>) {
        let mut guard = self.start_requests.lock();
        let Some(iter) = guard.as_mut() else {
            return;
        };
        match iter.next() {
            Some(request) => {
                drop(guard);
                self.scheduler.enqueue_request(request);
                self.poke();
            }
            None => {
                debug!("start requests exhausted");
                *guard = None;
            }
        }
    }

    /// Tracks one request from scheduler pop through parse completion.
    fn dispatch(self: &Arc<Self>, request: Request) {
        self.in_progress.fetch_add(1, Ordering::SeqCst);
        let pending = self.downloader.fetch(request);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let result = pending.await;
            // a connection slot just freed
            this.poke();
            match result {
                Ok(response) => {
                    let parsed = this.scraper.enqueue_scrape(response);
                    parsed.await;
                }
                Err(FetchError::StageClosed) => {
                    trace!("fetch abandoned by shutdown");
                }
                Err(e) => {
                    warn!(error = %e, "discarding failed fetch");
                }
            }
            this.in_progress.fetch_sub(1, Ordering::SeqCst);
            this.poke();
        });
    }

    /// Consults the observers about an idle-triggered close. Any single
    /// veto keeps the crawl open; the next idle moment asks again.
    async fn spider_idle(self: &Arc<Self>) {
        let decisions = self.signals.notify_spider_idle(self.spider.name()).await;
        if decisions.contains(&IdleDecision::KeepOpen) {
            debug!(spider = self.spider.name(), "idle close vetoed");
            return;
        }
        // observers may have injected work while being consulted
        if self.spider_is_idle() && !self.closing.load(Ordering::SeqCst) {
            self.close(REASON_FINISHED).await;
        }
    }

    /// The close sequence. The first caller wins; later callers return
    /// immediately while the sequence runs to completion exactly once.
    pub async fn close(self: &Arc<Self>, reason: &str) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(spider = self.spider.name(), reason, "closing spider");
        self.signals
            .notify_engine_stopping(self.spider.name(), reason)
            .await;

        if let Some(trigger) = self.next_call.lock().take() {
            trigger.cancel();
        }
        if let Some(heartbeat) = self.heartbeat.lock().take() {
            heartbeat.abort();
        }

        self.downloader.close().await;
        self.scraper.close_spider().await;
        if let Err(e) = self.scheduler.close(reason).await {
            warn!(error = %e, "scheduler close failed");
        }
        self.spider.closed(reason).await;
        self.signals
            .notify_spider_closed(self.spider.name(), reason)
            .await;

        self.running.store(false, Ordering::SeqCst);
        *self.close_reason.lock() = Some(reason.to_string());
        self.closed.store(true, Ordering::SeqCst);
        self.close_notify.notify_waiters();
        info!(spider = self.spider.name(), reason, "spider closed");
    }
}

/// Weak reference to a running engine, for spiders and extensions that need
/// to inject requests or stop the crawl from inside a callback.
#[derive(Clone)]
pub struct EngineHandle {
    inner: Weak<ExecutionEngine>,
}

impl EngineHandle {
    /// Injects a request, failing once the engine is closing or gone.
    pub fn enqueue(&self, request: Request) -> Result<(), EngineError> {
        match self.inner.upgrade() {
            Some(engine) => engine.enqueue(request),
            None => Err(EngineError::StageClosed("engine")),
        }
    }

    /// Requests the full close sequence with reason `"stopped"`.
    pub async fn stop(&self) {
        if let Some(engine) = self.inner.upgrade() {
            engine.stop().await;
        }
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}
