use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::PoisonError;
use std::time::Duration;

use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::coalesce::{coalesce, CoalescedBatch};
use crate::collector::collect;
use crate::error::BatchError;
use crate::sizing::BatchSizer;
use crate::types::LifecycleState;

use super::BatchScheduler;

/// Sleep after a round that collected nothing.
const IDLE_BACKOFF: Duration = Duration::from_millis(10);

/// Sleep after a round that failed or panicked.
const FAULT_BACKOFF: Duration = Duration::from_millis(100);

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

impl BatchScheduler {
    /// Launch the background consumer loop. Must be called within a tokio
    /// runtime.
    ///
    /// Idempotent while running; a stopped scheduler cannot be restarted.
    pub fn start(&self) -> Result<(), BatchError> {
        let mut slot = self
            .inner
            .loop_handle
            .lock()
            .map_err(|e| BatchError::LockPoisoned(format!("loop handle: {e}")))?;

        let transition = self.inner.state.compare_exchange(
            LifecycleState::Created as u8,
            LifecycleState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );

        match transition {
            Ok(_) => {
                let scheduler = self.clone();
                *slot = Some(tokio::spawn(async move { scheduler.run_loop().await }));
                info!("batch processing loop started");
                Ok(())
            }
            Err(current) => match LifecycleState::from_u8(current) {
                LifecycleState::Running => {
                    debug!("batch processing loop already running");
                    Ok(())
                }
                _ => Err(BatchError::AlreadyStopped),
            },
        }
    }

    /// Stop the scheduler and wait for the consumer loop to exit.
    ///
    /// The in-flight batch completes first. Items still queued are then
    /// dispatched (`drain_on_stop`) or failed with `ShuttingDown`. Concurrent
    /// callers all return only once the scheduler is `Stopped`.
    pub async fn stop(&self) {
        let previous = self
            .inner
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                match LifecycleState::from_u8(s) {
                    LifecycleState::Created | LifecycleState::Running => {
                        Some(LifecycleState::Stopping as u8)
                    }
                    _ => None,
                }
            })
            .map(LifecycleState::from_u8);

        match previous {
            Ok(LifecycleState::Created) => {
                info!("stopping batch scheduler that was never started");
                self.finish().await;
            }
            Ok(_) => {
                self.inner.shutdown.store(true, Ordering::Release);
                info!("batch scheduler stop requested");

                let handle = self
                    .inner
                    .loop_handle
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                if let Some(handle) = handle {
                    if let Err(e) = handle.await {
                        error!(error = %e, "batch processing loop terminated abnormally");
                        self.mark_stopped();
                    }
                }
            }
            Err(_) => debug!("stop called on a stopping or stopped scheduler"),
        }

        self.wait_stopped().await;
    }

    fn mark_stopped(&self) {
        self.inner
            .state
            .store(LifecycleState::Stopped as u8, Ordering::Release);
        self.inner.stopped.send_replace(true);
    }

    async fn wait_stopped(&self) {
        let mut rx = self.inner.stopped.subscribe();
        if rx.wait_for(|&stopped| stopped).await.is_err() {
            warn!("stop signal channel closed before the scheduler stopped");
        }
    }

    /// The consumer loop. Never exits on error; only the shutdown flag ends it.
    async fn run_loop(self) {
        let mut sizer = BatchSizer::new(&self.inner.config);

        while !self.inner.shutdown.load(Ordering::Acquire) {
            let round = AssertUnwindSafe(self.run_round(&mut sizer))
                .catch_unwind()
                .await;

            match round {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => tokio::time::sleep(IDLE_BACKOFF).await,
                Ok(Err(e)) => {
                    error!(error = %e, "error in batch processing loop");
                    tokio::time::sleep(FAULT_BACKOFF).await;
                }
                Err(panic) => {
                    error!(panic = panic_message(&*panic), "batch processing loop panicked");
                    tokio::time::sleep(FAULT_BACKOFF).await;
                }
            }
        }

        self.finish().await;
    }

    /// One size → collect → dispatch round. Returns whether a batch was dispatched.
    async fn run_round(&self, sizer: &mut BatchSizer) -> Result<bool, BatchError> {
        let config = &self.inner.config;

        let sample = self.sample_utilization();
        let head = self.inner.queue.peek_min()?;
        let target = sizer.compute_target_size(config, sample, head);

        if sample.is_some() {
            let samples = sizer.samples();
            let mean = sizer.mean_utilization();
            self.with_metrics(|m| m.record_utilization(samples, mean));
        }

        let batch = collect(&self.inner.queue, config, target).await?;
        if batch.is_empty() {
            return Ok(false);
        }

        debug!(
            target,
            head = ?head,
            batch_size = batch.items.len(),
            followers = batch.follower_count(),
            "dispatching batch"
        );
        self.dispatch(batch).await;
        Ok(true)
    }

    /// Read the monitor. Failures and non-finite readings count as no sample.
    fn sample_utilization(&self) -> Option<f64> {
        if !self.inner.config.enable_utilization_aware_sizing {
            return None;
        }
        let monitor = self.inner.monitor.as_ref()?;

        match monitor.sample() {
            Ok(v) if v.is_finite() => Some(v.clamp(0.0, 1.0)),
            Ok(v) => {
                warn!(value = v, "ignoring non-finite utilization sample");
                None
            }
            Err(e) => {
                warn!(error = %e, "error getting utilization");
                None
            }
        }
    }

    /// Close the queue, settle whatever is left in it, and mark the
    /// scheduler stopped.
    async fn finish(&self) {
        if let Err(e) = self.inner.queue.close() {
            error!(error = %e, "failed to close admission queue");
        }

        let remaining = self.inner.queue.len();
        if remaining > 0 {
            if self.inner.config.drain_on_stop {
                info!(remaining, "draining queued requests");
                if let Err(panic) = AssertUnwindSafe(self.drain()).catch_unwind().await {
                    error!(panic = panic_message(&*panic), "drain panicked");
                }
            } else {
                info!(remaining, "rejecting queued requests");
                self.reject_remaining();
            }
        }

        self.mark_stopped();
        info!("batch processing loop stopped");
    }

    /// Dispatch everything left in the closed queue in max-size batches.
    async fn drain(&self) {
        let config = &self.inner.config;
        loop {
            let items = match self.inner.queue.pop_batch(config.max_batch_size) {
                Ok(items) if items.is_empty() => break,
                Ok(items) => items,
                Err(e) => {
                    error!(error = %e, "failed to drain admission queue");
                    break;
                }
            };
            let batch = if config.enable_coalescing && items.len() > 1 {
                coalesce(items)
            } else {
                CoalescedBatch::passthrough(items)
            };
            self.dispatch(batch).await;
        }
    }

    fn reject_remaining(&self) {
        loop {
            match self.inner.queue.pop_min() {
                Ok(Some(mut item)) => {
                    item.complete(Err(BatchError::ShuttingDown));
                }
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "failed to drain admission queue");
                    break;
                }
            }
        }
    }
}
