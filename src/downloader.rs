//! Fetch stage: bounded-concurrency, rate-limited resource fetching.
//!
//! ## Overview
//!
//! `fetch` never performs the transfer directly. It appends a (request,
//! completion sender) entry to an internal FIFO and returns a
//! [`PendingFetch`] handle immediately. A single long-lived drain task pulls
//! entries while connection slots are free and the rate-limit window
//! permits, and spawns one transfer task per admitted entry. Running the
//! drain as exactly one task is load-bearing: it is what prevents
//! overlapping drain runs from breaching the concurrency limit or the
//! inter-dispatch spacing.
//!
//! Every admitted fetch is tracked in the active set under a generated
//! `Uuid` token rather than by URL, so two identical URLs in flight never
//! collapse into one accounting entry. The token is removed exactly once, on
//! the completion path of the transfer task, success or failure alike.
//!
//! The stage does not retry and enforces no per-fetch timeout; both belong
//! to layers above.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use crossbeam::queue::SegQueue;
use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use tracing::{debug, error, trace};
use uuid::Uuid;

use crate::error::FetchError;
use crate::request::Request;
use crate::response::{HttpClient, Response};
use crate::settings::Settings;

type FetchResult = Result<Response, FetchError>;
type FetchEntry = (Request, oneshot::Sender<FetchResult>);

/// Deferred result of one fetch, resolved exactly once.
///
/// Resolves to [`FetchError::StageClosed`] if the stage is torn down before
/// the transfer completes.
pub struct PendingFetch {
    rx: oneshot::Receiver<FetchResult>,
}

impl Future for PendingFetch {
    type Output = FetchResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|res| match res {
            Ok(result) => result,
            Err(_) => Err(FetchError::StageClosed),
        })
    }
}

/// The fetch stage.
pub struct Downloader {
    client: Arc<dyn HttpClient>,
    max_concurrent: usize,
    delay: Duration,
    user_agent: String,
    queue: SegQueue<FetchEntry>,
    active: Mutex<HashSet<Uuid>>,
    last_seen: Mutex<Option<Instant>>,
    wake: Notify,
    closed: AtomicBool,
}

impl Downloader {
    /// Creates the stage and spawns its drain task.
    pub fn new(client: Arc<dyn HttpClient>, settings: &Settings) -> Arc<Self> {
        let downloader = Arc::new(Self {
            client,
            max_concurrent: settings.concurrent_requests,
            delay: settings.download_delay,
            user_agent: settings.user_agent.clone(),
            queue: SegQueue::new(),
            active: Mutex::new(HashSet::new()),
            last_seen: Mutex::new(None),
            wake: Notify::new(),
            closed: AtomicBool::new(false),
        });

        let drain = Arc::clone(&downloader);
        tokio::spawn(async move {
            drain.drain_loop().await;
        });

        downloader
    }

    /// Initializes the transport session. Called once when the engine
    /// starts; the connection pool is not built before that.
    pub async fn open(&self) -> Result<(), FetchError> {
        self.client.open().await
    }

    /// Queues one fetch and returns its deferred-result handle.
    pub fn fetch(&self, request: Request) -> PendingFetch {
        let (tx, rx) = oneshot::channel();
        if self.closed.load(Ordering::SeqCst) {
            let _ = tx.send(Err(FetchError::StageClosed));
        } else {
            trace!(url = %request.url, "queueing fetch");
            self.queue.push((request, tx));
            self.wake.notify_one();
            // close() may have drained the queue between the flag load and
            // the push; re-check so the entry cannot outlive the stage with
            // its handle unresolved
            if self.closed.load(Ordering::SeqCst) {
                self.fail_pending();
            }
        }
        PendingFetch { rx }
    }

    /// Backpressure signal: true iff at least one connection slot is free.
    pub fn capacity_available(&self) -> bool {
        self.active.lock().len() < self.max_concurrent
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    /// Tears the stage down: interrupts a pending rate-limit sleep, fails
    /// all still-queued entries and closes the transport. Idempotent.
    /// Fetches issued afterwards resolve to [`FetchError::StageClosed`].
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("closing fetch stage");
        self.wake.notify_one();
        self.fail_pending();
        self.client.close().await;
    }

    fn fail_pending(&self) {
        while let Some((request, tx)) = self.queue.pop() {
            trace!(url = %request.url, "failing queued fetch, stage closed");
            let _ = tx.send(Err(FetchError::StageClosed));
        }
    }

    async fn drain_loop(self: Arc<Self>) {
        loop {
            self.wake.notified().await;
            'drain: loop {
                if self.closed.load(Ordering::SeqCst) {
                    self.fail_pending();
                    trace!("fetch drain task finished");
                    return;
                }
                if self.queue.is_empty() || !self.capacity_available() {
                    // completions and new enqueues wake us again
                    break 'drain;
                }
                if let Some(wait) = self.rate_limit_wait() {
                    // one deferred continuation inside the same task; a wake
                    // during the sleep just re-evaluates the window
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = self.wake.notified() => {}
                    }
                    continue 'drain;
                }
                let Some((request, tx)) = self.queue.pop() else {
                    break 'drain;
                };
                *self.last_seen.lock() = Some(Instant::now());
                self.spawn_transfer(request, tx);
            }
        }
    }

    fn rate_limit_wait(&self) -> Option<Duration> {
        if self.delay.is_zero() {
            return None;
        }
        let last = (*self.last_seen.lock())?;
        let elapsed = last.elapsed();
        if elapsed >= self.delay {
            None
        } else {
            Some(self.delay - elapsed)
        }
    }

    fn spawn_transfer(self: &Arc<Self>, request: Request, tx: oneshot::Sender<FetchResult>) {
        let id = Uuid::new_v4();
        self.active.lock().insert(id);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            debug!(url = %request.url, "fetching");
            let result = this.client.get(&request, &this.user_agent).await;
            if let Err(e) = &result {
                error!(url = %request.url, error = %e, "fetch failed");
            }
            // unconditional, exactly-once removal from the active set
            this.active.lock().remove(&id);
            if tx.send(result).is_err() {
                trace!(url = %request.url, "fetch handle dropped before completion");
            }
            this.wake.notify_one();
        });
    }
}
