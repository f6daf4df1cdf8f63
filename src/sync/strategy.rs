//! C7 — scheduling strategy: wraps the executor in a background worker pool
//! that drains C5 either continuously (`Realtime`) or on a fixed cadence
//! (`Periodic`), per §4.7. An explicit `stop()` clears the queue; switching
//! strategy at runtime via `restart()` stops the current workers and starts
//! new ones without touching the queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::Strategy as StrategyConfig;
use crate::queue::RequestQueue;

use super::{dispatch, SyncContext};

/// Owns the background workers draining `queue` against `ctx`. `start`/`stop`
/// are idempotent; `stop` clears whatever is still queued by default (§4.7) —
/// use [`Strategy::restart`] to switch strategies without losing queued work.
pub struct Strategy {
    queue: Arc<RequestQueue>,
    ctx: Arc<SyncContext>,
    handles: Vec<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl Strategy {
    pub fn new(queue: Arc<RequestQueue>, ctx: Arc<SyncContext>) -> Self {
        Self {
            queue,
            ctx,
            handles: Vec::new(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start `parallelism` workers under `config`. A no-op if already running;
    /// call `stop` or `restart` first to switch strategies.
    pub fn start(&mut self, config: StrategyConfig, parallelism: usize) {
        if !self.handles.is_empty() {
            return;
        }
        self.stop.store(false, Ordering::SeqCst);

        for _ in 0..parallelism.max(1) {
            let queue = self.queue.clone();
            let ctx = self.ctx.clone();
            let stop = self.stop.clone();
            let handle = tokio::spawn(async move {
                match config {
                    StrategyConfig::Realtime => run_realtime(queue, ctx, stop).await,
                    StrategyConfig::Periodic { delay } => run_periodic(queue, ctx, stop, delay).await,
                }
            });
            self.handles.push(handle);
        }
    }

    /// Stop all workers without touching the queue. Used internally by
    /// [`Strategy::restart`]; a transient cloud disconnect (§5) should also
    /// use this rather than [`Strategy::stop`] so queued work survives.
    fn stop_workers(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }

    /// Stop all workers and clear the queue. Idempotent. This is the default
    /// explicit-stop behavior (§4.7); a runtime strategy switch should call
    /// [`Strategy::restart`] instead so queued work is preserved.
    pub fn stop(&mut self) {
        self.stop_workers();
        self.queue.clear();
    }

    /// Stop the current workers, preserving the queue, and start `parallelism`
    /// workers under the new `config` — used when switching strategies at
    /// runtime (§4.7: "preserving queued work").
    pub fn restart(&mut self, config: StrategyConfig, parallelism: usize) {
        self.stop_workers();
        self.start(config, parallelism);
    }

    pub fn is_running(&self) -> bool {
        !self.handles.is_empty()
    }
}

impl Drop for Strategy {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Continuously blocks on the queue's condition variable via a dedicated
/// blocking-pool thread, so the async executor only runs `execute` itself.
async fn run_realtime(queue: Arc<RequestQueue>, ctx: Arc<SyncContext>, stop: Arc<AtomicBool>) {
    loop {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        let q = queue.clone();
        let req = tokio::task::spawn_blocking(move || q.poll_timeout(Duration::from_millis(200))).await;
        match req {
            Ok(Some(req)) => dispatch(req, &queue, &ctx).await,
            Ok(None) => continue,
            Err(_) => return,
        }
    }
}

/// Sleeps `delay` seconds, then drains whatever is queued before sleeping again.
async fn run_periodic(queue: Arc<RequestQueue>, ctx: Arc<SyncContext>, stop: Arc<AtomicBool>, delay: u64) {
    loop {
        tokio::time::sleep(Duration::from_secs(delay.max(1))).await;
        if stop.load(Ordering::SeqCst) {
            return;
        }
        while let Some(req) = queue.poll() {
            if stop.load(Ordering::SeqCst) {
                queue.put(req, ctx.direction());
                return;
            }
            dispatch(req, &queue, &ctx).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::transport::{CloudTransport, TransportError};
    use crate::cloud::RateLimitedCloudClient;
    use crate::config::{Config, ConfigHandle, Direction};
    use crate::handlers::ShadowManager;
    use crate::notify::NullSink;
    use crate::queue::SyncRequest;
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;
    use serde_json::Value;

    struct NoopTransport;

    #[async_trait]
    impl CloudTransport for NoopTransport {
        async fn get(&self, _thing: &str, _shadow: &str) -> Result<Value, TransportError> {
            Err(TransportError::NotFound)
        }

        async fn update(
            &self,
            _thing: &str,
            _shadow: &str,
            payload: Value,
            _expected_version: u64,
        ) -> Result<Value, TransportError> {
            Ok(payload)
        }

        async fn delete(&self, _thing: &str, _shadow: &str) -> Result<(), TransportError> {
            Ok(())
        }

        async fn subscribe(&self, _thing: &str, _shadow: &str) -> Result<(), TransportError> {
            Ok(())
        }

        async fn unsubscribe(&self, _thing: &str, _shadow: &str) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn test_context() -> (Arc<SyncContext>, Arc<RequestQueue>) {
        let config = ConfigHandle::new(Config::default());
        let queue = Arc::new(RequestQueue::default());
        let manager = Arc::new(ShadowManager::new(
            Arc::new(InMemoryStore::new()),
            queue.clone(),
            Arc::new(NullSink),
            config.clone(),
        ));
        let cloud: Arc<dyn crate::cloud::CloudClient> =
            Arc::new(RateLimitedCloudClient::new(NoopTransport, &config));
        (Arc::new(SyncContext { manager, cloud, config }), queue)
    }

    fn delete_request() -> SyncRequest {
        SyncRequest::LocalDelete {
            key: ("t1".to_string(), "".to_string()),
            version: 1,
        }
    }

    #[tokio::test]
    async fn realtime_strategy_drains_queued_requests() {
        let (ctx, queue) = test_context();
        let mut strategy = Strategy::new(queue.clone(), ctx);
        strategy.start(StrategyConfig::Realtime, 1);

        queue.put(delete_request(), Direction::Between);

        for _ in 0..20 {
            if queue.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(queue.is_empty());

        strategy.stop();
    }

    #[tokio::test]
    async fn periodic_strategy_waits_for_the_configured_delay() {
        let (ctx, queue) = test_context();
        let mut strategy = Strategy::new(queue.clone(), ctx);
        strategy.start(StrategyConfig::Periodic { delay: 1 }, 1);

        queue.put(delete_request(), Direction::Between);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(queue.len(), 1, "periodic worker drained before its delay elapsed");

        for _ in 0..30 {
            if queue.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(queue.is_empty());

        strategy.stop();
    }

    #[test]
    fn stop_before_start_is_a_harmless_no_op() {
        let (ctx, queue) = test_context();
        let mut strategy = Strategy::new(queue, ctx);
        strategy.stop();
        strategy.stop();
        assert!(!strategy.is_running());
    }

    #[tokio::test]
    async fn explicit_stop_clears_the_queue() {
        let (ctx, queue) = test_context();
        let mut strategy = Strategy::new(queue.clone(), ctx);
        strategy.start(StrategyConfig::Periodic { delay: 3600 }, 1);

        queue.put(delete_request(), Direction::Between);
        assert_eq!(queue.len(), 1);

        strategy.stop();
        assert!(queue.is_empty());
        assert!(!strategy.is_running());
    }

    #[tokio::test]
    async fn restart_preserves_the_queue() {
        let (ctx, queue) = test_context();
        let mut strategy = Strategy::new(queue.clone(), ctx);
        strategy.start(StrategyConfig::Periodic { delay: 3600 }, 1);

        queue.put(delete_request(), Direction::Between);
        assert_eq!(queue.len(), 1);

        strategy.restart(StrategyConfig::Periodic { delay: 3600 }, 1);
        assert_eq!(queue.len(), 1, "restart must not drop queued work");
        assert!(strategy.is_running());

        strategy.stop();
    }
}
