//! External collaborators: the batch processor and the utilization monitor.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::ProcessorError;

/// Turns a batch of payloads into a batch of results.
///
/// Called once per dispatched batch with payloads in collection order. Must
/// return exactly one result per payload, in the same order, or an error
/// that fails the whole batch.
#[async_trait]
pub trait BatchProcessor: Send + Sync {
    async fn process(&self, payloads: Vec<Value>) -> Result<Vec<Value>, ProcessorError>;
}

/// Reports a resource-saturation fraction in `[0, 1]` (e.g. GPU utilization).
pub trait UtilizationMonitor: Send + Sync {
    fn sample(&self) -> Result<f64, ProcessorError>;
}

impl<F> UtilizationMonitor for F
where
    F: Fn() -> Result<f64, ProcessorError> + Send + Sync,
{
    fn sample(&self) -> Result<f64, ProcessorError> {
        self()
    }
}

/// Fallback processor that wraps each payload in a success envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoProcessor;

#[async_trait]
impl BatchProcessor for EchoProcessor {
    async fn process(&self, payloads: Vec<Value>) -> Result<Vec<Value>, ProcessorError> {
        Ok(payloads
            .into_iter()
            .map(|data| {
                json!({
                    "status": "success",
                    "data": data,
                    "message": "Processed with default handler",
                })
            })
            .collect())
    }
}
