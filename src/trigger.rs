//! Coalescing trigger for "try to make progress" signals.
//!
//! The engine's progress step is poked from many call sites: after a request
//! is queued, after every fetch completes, after every parse slot frees, and
//! from the periodic heartbeat. Running one step per poke would spawn
//! redundant concurrent drain attempts; the [`DebouncedTrigger`] collapses
//! any burst of pokes into at most one pending invocation. The pending run
//! re-evaluates current state when it executes, so dropped pokes lose
//! nothing.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

type TriggerFn = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Schedules a wrapped async function at most once at a time.
///
/// `trigger` while an invocation is already scheduled is a no-op. The
/// scheduled marker is cleared immediately before the wrapped function runs,
/// so a trigger arriving *during* execution schedules a fresh run rather
/// than being swallowed.
pub struct DebouncedTrigger {
    func: TriggerFn,
    scheduled: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DebouncedTrigger {
    pub fn new<F, Fut>(func: F) -> Arc<Self>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Arc::new(Self {
            func: Box::new(move || Box::pin(func())),
            scheduled: AtomicBool::new(false),
            handle: Mutex::new(None),
        })
    }

    /// Schedules one invocation after `delay` unless one is already pending.
    pub fn trigger(self: &Arc<Self>, delay: Duration) {
        if self.scheduled.swap(true, Ordering::SeqCst) {
            return;
        }

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            // Cleared before the call so triggers landing mid-run are not
            // lost.
            this.scheduled.store(false, Ordering::SeqCst);
            (this.func)().await;
        });
        *self.handle.lock() = Some(handle);
    }

    /// Cancels a scheduled invocation that has not started running yet.
    pub fn cancel(&self) {
        if self.scheduled.swap(false, Ordering::SeqCst) {
            if let Some(handle) = self.handle.lock().take() {
                handle.abort();
            }
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_trigger(runs: Arc<AtomicUsize>) -> Arc<DebouncedTrigger> {
        DebouncedTrigger::new(move || {
            let runs = Arc::clone(&runs);
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
            }
        })
    }

    #[tokio::test]
    async fn burst_of_triggers_coalesces_into_one_run() {
        let runs = Arc::new(AtomicUsize::new(0));
        let trigger = counting_trigger(Arc::clone(&runs));

        for _ in 0..100 {
            trigger.trigger(Duration::from_millis(20));
        }
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn trigger_during_execution_schedules_fresh_run() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = Arc::clone(&runs);
        let trigger = DebouncedTrigger::new(move || {
            let runs = Arc::clone(&runs_clone);
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        });

        trigger.trigger(Duration::ZERO);
        // let the first run start; its scheduled marker is clear by then
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.trigger(Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancel_prevents_scheduled_run() {
        let runs = Arc::new(AtomicUsize::new(0));
        let trigger = counting_trigger(Arc::clone(&runs));

        trigger.trigger(Duration::from_millis(50));
        assert!(trigger.is_scheduled());
        trigger.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(!trigger.is_scheduled());
    }

    #[tokio::test]
    async fn trigger_works_again_after_cancel() {
        let runs = Arc::new(AtomicUsize::new(0));
        let trigger = counting_trigger(Arc::clone(&runs));

        trigger.trigger(Duration::from_millis(50));
        trigger.cancel();
        trigger.trigger(Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
