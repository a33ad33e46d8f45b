//! Batch collector.
//!
//! Drains the admission queue up to a target size or until an adaptive
//! timeout elapses. Returns early with a partial batch as soon as the queue
//! runs dry after at least one item was taken, favouring latency for small
//! bursts.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::coalesce::{coalesce, CoalescedBatch};
use crate::config::{ms_to_duration, BatchConfig};
use crate::error::BatchError;
use crate::queue::AdmissionQueue;

/// Sleep between polls while the queue is empty and nothing is collected.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Collection timeout in milliseconds for the given backlog.
///
/// High backlog (`>= 2×target`) drains fast at `min_timeout_ms`; a nearly
/// empty queue (`< target/2`) waits the full `max_timeout_ms`; in between
/// the timeout shrinks linearly as the backlog approaches the target,
/// bottoming out at `min_timeout_ms` once the backlog passes it.
pub fn compute_timeout_ms(config: &BatchConfig, queue_len: usize, target_size: usize) -> f64 {
    if !config.enable_adaptive_timeout {
        return config.max_timeout_ms;
    }

    if queue_len >= target_size.saturating_mul(2) {
        config.min_timeout_ms
    } else if queue_len < target_size / 2 {
        config.max_timeout_ms
    } else {
        let ratio = queue_len as f64 / target_size as f64;
        let timeout =
            config.min_timeout_ms + (config.max_timeout_ms - config.min_timeout_ms) * (1.0 - ratio);
        timeout.clamp(config.min_timeout_ms, config.max_timeout_ms)
    }
}

/// Gather up to `target_size` items, then coalesce duplicates if enabled.
pub async fn collect(
    queue: &AdmissionQueue,
    config: &BatchConfig,
    target_size: usize,
) -> Result<CoalescedBatch, BatchError> {
    let timeout_ms = compute_timeout_ms(config, queue.len(), target_size);
    let deadline = ms_to_duration(timeout_ms);
    let started = Instant::now();
    let mut batch = Vec::with_capacity(target_size);

    while batch.len() < target_size {
        match queue.pop_min()? {
            Some(item) => batch.push(item),
            None if !batch.is_empty() => break,
            None => tokio::time::sleep(POLL_INTERVAL).await,
        }

        if started.elapsed() > deadline {
            break;
        }
    }

    if !batch.is_empty() {
        debug!(
            collected = batch.len(),
            target = target_size,
            timeout_ms,
            "collected batch"
        );
    }

    if config.enable_coalescing && batch.len() > 1 {
        Ok(coalesce(batch))
    } else {
        Ok(CoalescedBatch::passthrough(batch))
    }
}
