use std::time::Instant;

use serde_json::Value;
use tracing::{debug, error};

use crate::coalesce::CoalescedBatch;
use crate::error::BatchError;

use super::BatchScheduler;

impl BatchScheduler {
    /// Run one batch through the processor and complete every result handle.
    ///
    /// A processor error (or a result count that does not match the batch)
    /// fails every item in the batch, followers included, with the same error.
    pub(super) async fn dispatch(&self, batch: CoalescedBatch) {
        let CoalescedBatch {
            mut items,
            mut followers,
            merged_groups,
        } = batch;
        if items.is_empty() {
            return;
        }

        let started = Instant::now();
        let batch_size = items.len();

        if !merged_groups.is_empty() {
            self.with_metrics(|m| {
                for &group in &merged_groups {
                    m.record_coalesced_group(group);
                }
            });
        }

        let payloads: Vec<Value> = items
            .iter_mut()
            .map(|item| std::mem::take(&mut item.payload))
            .collect();

        let outcome = match self.inner.processor.process(payloads).await {
            Ok(results) if results.len() == batch_size => Ok(results),
            Ok(results) => Err(BatchError::Processor(format!(
                "processor returned {} results for {} payloads",
                results.len(),
                batch_size
            ))),
            Err(e) => Err(BatchError::from(e)),
        };

        let failed = outcome.is_err();
        match outcome {
            Ok(results) => {
                for (item, result) in items.iter_mut().zip(results) {
                    if let Some(group) = followers.get_mut(&item.id) {
                        for follower in group.iter_mut() {
                            follower.complete(Ok(result.clone()));
                        }
                    }
                    item.complete(Ok(result));
                }
            }
            Err(e) => {
                error!(batch_size, error = %e, "batch processing failed");
                for item in items
                    .iter_mut()
                    .chain(followers.values_mut().flat_map(|g| g.iter_mut()))
                {
                    item.complete(Err(e.clone()));
                }
            }
        }

        let processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        let max_batch_size = self.inner.config.max_batch_size;

        self.with_metrics(|m| {
            for item in items.iter().chain(followers.values().flatten()) {
                let wait = started.saturating_duration_since(item.enqueued_at);
                m.record_wait(wait.as_secs_f64() * 1000.0);
            }
            if failed {
                m.record_failure();
            }
            m.record_batch(batch_size, processing_time_ms, max_batch_size);
        });

        debug!(
            batch_size,
            followers = followers.values().map(Vec::len).sum::<usize>(),
            processing_time_ms,
            failed,
            "batch dispatched"
        );
    }
}
