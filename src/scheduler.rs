//! # Scheduler Module
//!
//! The request scheduler holds the crawling frontier: requests that have been
//! accepted but not yet handed to the fetch stage.
//!
//! ## Overview
//!
//! The engine pushes requests in and pulls them back out one at a time while
//! the downstream stages report capacity. The shipped [`MemoryScheduler`] is
//! a plain in-memory FIFO with no deduplication and no ordering guarantee
//! beyond arrival order; duplicate URLs are fetched again. Policy (dedup,
//! priorities, durable queues) belongs to alternative [`Scheduler`]
//! implementations, not to the core.

use async_trait::async_trait;
use crossbeam::queue::SegQueue;
use tracing::trace;

use crate::error::EngineError;
use crate::request::Request;

/// Contract between the engine and a pending-request queue.
///
/// `open`/`close` are lifecycle hooks for implementations with external
/// state; they default to no-ops.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn open(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn close(&self, _reason: &str) -> Result<(), EngineError> {
        Ok(())
    }

    /// Appends a request to the frontier. Purely in-memory implementations
    /// cannot fail, so the method is infallible by contract.
    fn enqueue_request(&self, request: Request);

    /// Removes and returns the oldest pending request, if any.
    fn next_request(&self) -> Option<Request>;

    fn has_pending_requests(&self) -> bool;
}

/// In-memory FIFO scheduler.
#[derive(Default)]
pub struct MemoryScheduler {
    queue: SegQueue<Request>,
}

impl MemoryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[async_trait]
impl Scheduler for MemoryScheduler {
    fn enqueue_request(&self, request: Request) {
        trace!(url = %request.url, "enqueuing request");
        self.queue.push(request);
    }

    fn next_request(&self) -> Option<Request> {
        self.queue.pop()
    }

    fn has_pending_requests(&self) -> bool {
        !self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(url: &str) -> Request {
        Request::parse(url).unwrap()
    }

    #[test]
    fn dequeues_in_fifo_order() {
        let scheduler = MemoryScheduler::new();
        scheduler.enqueue_request(request("http://example.com/a"));
        scheduler.enqueue_request(request("http://example.com/b"));
        scheduler.enqueue_request(request("http://example.com/c"));

        assert_eq!(scheduler.len(), 3);
        assert_eq!(scheduler.next_request().unwrap().url.path(), "/a");
        assert_eq!(scheduler.next_request().unwrap().url.path(), "/b");
        assert_eq!(scheduler.next_request().unwrap().url.path(), "/c");
        assert!(scheduler.next_request().is_none());
    }

    #[test]
    fn duplicate_urls_are_kept() {
        let scheduler = MemoryScheduler::new();
        scheduler.enqueue_request(request("http://example.com/page"));
        scheduler.enqueue_request(request("http://example.com/page"));

        assert_eq!(scheduler.len(), 2);
    }

    #[test]
    fn has_pending_tracks_queue_state() {
        let scheduler = MemoryScheduler::new();
        assert!(!scheduler.has_pending_requests());

        scheduler.enqueue_request(request("http://example.com/"));
        assert!(scheduler.has_pending_requests());

        scheduler.next_request();
        assert!(!scheduler.has_pending_requests());
    }
}
