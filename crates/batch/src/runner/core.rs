use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::BatchConfig;
use crate::error::{BatchError, ConfigError};
use crate::metrics::{BatchMetrics, SubmissionCounters};
use crate::processor::{BatchProcessor, EchoProcessor, UtilizationMonitor};
use crate::queue::AdmissionQueue;
use crate::types::{LifecycleState, Priority, WorkItem};

/// State shared between producers, the consumer loop, and metric readers.
pub(super) struct Inner {
    pub(super) config: BatchConfig,
    pub(super) queue: AdmissionQueue,
    pub(super) processor: Arc<dyn BatchProcessor>,
    pub(super) monitor: Option<Arc<dyn UtilizationMonitor>>,
    /// Written by the consumer loop only.
    pub(super) metrics: RwLock<BatchMetrics>,
    /// Written by every producer.
    pub(super) submissions: SubmissionCounters,
    pub(super) next_seq: AtomicU64,
    pub(super) state: AtomicU8,
    /// Checked once per consumer-loop iteration.
    pub(super) shutdown: AtomicBool,
    pub(super) loop_handle: Mutex<Option<JoinHandle<()>>>,
    /// Flips to `true` once the scheduler reaches `Stopped`.
    pub(super) stopped: watch::Sender<bool>,
}

/// Priority-adaptive batch scheduler.
///
/// Callers [`submit`](Self::submit) individual payloads; a single background
/// loop groups them into batches sized by load and priority and hands each
/// batch to the configured [`BatchProcessor`]. Cloning is cheap and every
/// clone drives the same scheduler.
#[derive(Clone)]
pub struct BatchScheduler {
    pub(super) inner: Arc<Inner>,
}

/// Fluent builder for [`BatchScheduler`].
///
/// # Example
/// ```ignore
/// let scheduler = BatchScheduler::builder(BatchConfig::default())
///     .processor(Arc::new(MyModel::new()))
///     .monitor(Arc::new(|| Ok(gpu.utilization())))
///     .build()?;
/// scheduler.start()?;
/// ```
pub struct BatchSchedulerBuilder {
    config: BatchConfig,
    processor: Option<Arc<dyn BatchProcessor>>,
    monitor: Option<Arc<dyn UtilizationMonitor>>,
}

impl BatchSchedulerBuilder {
    /// Processor invoked once per batch (default: [`EchoProcessor`]).
    pub fn processor(mut self, processor: Arc<dyn BatchProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }

    /// Utilization source for load-aware sizing. Without one, sizing never
    /// adjusts for utilization.
    pub fn monitor(mut self, monitor: Arc<dyn UtilizationMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Validate the config and build the scheduler in the `Created` state.
    pub fn build(self) -> Result<BatchScheduler, ConfigError> {
        self.config.validate()?;

        let processor = match self.processor {
            Some(p) => p,
            None => {
                warn!("no processor configured, using echo handler");
                Arc::new(EchoProcessor)
            }
        };

        info!(
            max_batch = self.config.max_batch_size,
            target_batch = self.config.target_batch_size,
            priority_batching = self.config.enable_priority_batching,
            utilization_monitor = self.monitor.is_some(),
            coalescing = self.config.enable_coalescing,
            "batch scheduler initialized"
        );

        Ok(BatchScheduler {
            inner: Arc::new(Inner {
                config: self.config,
                queue: AdmissionQueue::new(),
                processor,
                monitor: self.monitor,
                metrics: RwLock::new(BatchMetrics::default()),
                submissions: SubmissionCounters::default(),
                next_seq: AtomicU64::new(0),
                state: AtomicU8::new(LifecycleState::Created as u8),
                shutdown: AtomicBool::new(false),
                loop_handle: Mutex::new(None),
                stopped: watch::channel(false).0,
            }),
        })
    }
}

impl BatchScheduler {
    pub fn builder(config: BatchConfig) -> BatchSchedulerBuilder {
        BatchSchedulerBuilder {
            config,
            processor: None,
            monitor: None,
        }
    }

    /// Create a scheduler with the given config and processor, no monitor.
    pub fn new(config: BatchConfig, processor: Arc<dyn BatchProcessor>) -> Result<Self, ConfigError> {
        Self::builder(config).processor(processor).build()
    }

    /// Default config with the echo processor.
    pub fn with_defaults() -> Result<Self, ConfigError> {
        Self::builder(BatchConfig::default()).build()
    }

    /// Submit a payload and wait for its result.
    ///
    /// Waits at most `timeout` (default: [`BatchConfig::default_submit_timeout`]).
    /// On timeout the item stays queued; if it is dispatched later its result
    /// is discarded.
    pub async fn submit(
        &self,
        payload: Value,
        priority: Priority,
        timeout: Option<Duration>,
    ) -> Result<Value, BatchError> {
        if matches!(
            self.state(),
            LifecycleState::Stopping | LifecycleState::Stopped
        ) {
            return Err(BatchError::ShuttingDown);
        }

        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let (item, rx) = WorkItem::new(payload, priority, seq);
        let request_id = item.id;
        self.inner.queue.push(item)?;
        self.inner.submissions.record(priority);

        let timeout = timeout.unwrap_or_else(|| self.inner.config.default_submit_timeout());
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(BatchError::Dropped),
            Err(_) => {
                warn!(request_id = %request_id, %priority, ?timeout, "request timed out");
                Err(BatchError::Timeout(timeout))
            }
        }
    }

    /// Snapshot of the current metrics. Safe to call from any task.
    pub fn metrics(&self) -> BatchMetrics {
        let mut snapshot = self
            .inner
            .metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        self.inner.submissions.fill(&mut snapshot);
        snapshot
    }

    /// Number of submitted items not yet collected into a batch.
    pub fn queue_length(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub fn config(&self) -> &BatchConfig {
        &self.inner.config
    }

    /// Apply a mutation to the running metrics.
    pub(super) fn with_metrics(&self, f: impl FnOnce(&mut BatchMetrics)) {
        let mut guard = self
            .inner
            .metrics
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut guard);
    }
}
