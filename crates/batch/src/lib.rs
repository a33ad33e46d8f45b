//! Priority-adaptive batch scheduler.
//!
//! Accepts individually submitted work items from many concurrent callers,
//! groups them into batches whose size and collection timeout adapt to queue
//! backlog, request priority, and a resource-utilization signal, and
//! dispatches each batch to a caller-supplied [`BatchProcessor`].

pub mod coalesce;
pub mod collector;
pub mod config;
pub mod error;
pub mod metrics;
pub mod processor;
pub mod queue;
pub mod runner;
pub mod sizing;
pub mod types;

pub use config::BatchConfig;
pub use error::{BatchError, ConfigError, ProcessorError};
pub use metrics::BatchMetrics;
pub use processor::{BatchProcessor, EchoProcessor, UtilizationMonitor};
pub use queue::AdmissionQueue;
pub use runner::{BatchScheduler, BatchSchedulerBuilder};
pub use sizing::BatchSizer;
pub use types::{LifecycleState, Priority, WorkItem};
