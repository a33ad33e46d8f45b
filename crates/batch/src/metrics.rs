use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::Priority;

/// Batch scheduler operational metrics.
///
/// Running means use the incremental update `mean' = (mean*(n-1) + x)/n`
/// over every observation since construction, not a windowed average.
#[derive(Debug, Clone, Serialize)]
pub struct BatchMetrics {
    /// Total `submit` calls accepted into the queue.
    pub total_requests: u64,
    /// Accepted submissions per priority level.
    pub requests_by_priority: HashMap<Priority, u64>,
    pub batches_processed: u64,
    /// Batches whose processor call failed.
    pub failed_batches: u64,
    /// Items whose wait time has been recorded (primaries and followers).
    pub items_dispatched: u64,
    pub avg_batch_size: f64,
    pub peak_batch_size: usize,
    pub avg_wait_time_ms: f64,
    pub avg_processing_time_ms: f64,
    /// Instantaneous throughput of the latest batch.
    pub throughput_req_per_sec: f64,
    /// Latest throughput relative to `max_batch_size / avg_processing_time_ms`.
    /// Can exceed 1.0 while the processing-time mean is still settling.
    pub batch_efficiency: f64,
    pub avg_utilization: f64,
    /// Rolling utilization window, oldest first.
    pub utilization_samples: Vec<f64>,
    pub coalescing_rate: f64,
    /// Items answered from another item's result.
    pub coalesced_requests: u64,
    pub last_updated: DateTime<Utc>,
}

impl Default for BatchMetrics {
    fn default() -> Self {
        Self {
            total_requests: 0,
            requests_by_priority: HashMap::new(),
            batches_processed: 0,
            failed_batches: 0,
            items_dispatched: 0,
            avg_batch_size: 0.0,
            peak_batch_size: 0,
            avg_wait_time_ms: 0.0,
            avg_processing_time_ms: 0.0,
            throughput_req_per_sec: 0.0,
            batch_efficiency: 0.0,
            avg_utilization: 0.0,
            utilization_samples: Vec::new(),
            coalescing_rate: 0.0,
            coalesced_requests: 0,
            last_updated: Utc::now(),
        }
    }
}

fn incremental_mean(prev: f64, x: f64, n: u64) -> f64 {
    (prev * (n - 1) as f64 + x) / n as f64
}

impl BatchMetrics {
    /// Record a dispatched batch of `batch_size` items.
    pub fn record_batch(&mut self, batch_size: usize, processing_time_ms: f64, max_batch_size: usize) {
        self.batches_processed += 1;
        let n = self.batches_processed;

        self.avg_batch_size = incremental_mean(self.avg_batch_size, batch_size as f64, n);
        if batch_size > self.peak_batch_size {
            self.peak_batch_size = batch_size;
        }
        self.avg_processing_time_ms =
            incremental_mean(self.avg_processing_time_ms, processing_time_ms, n);

        if processing_time_ms > 0.0 {
            self.throughput_req_per_sec = batch_size as f64 / processing_time_ms * 1000.0;
        }

        if self.avg_processing_time_ms > 0.0 {
            let theoretical = max_batch_size as f64 / self.avg_processing_time_ms;
            if theoretical > 0.0 {
                self.batch_efficiency = self.throughput_req_per_sec / theoretical;
            }
        }

        self.last_updated = Utc::now();
    }

    /// Record one item's queue wait (dispatch start minus enqueue time).
    pub fn record_wait(&mut self, wait_time_ms: f64) {
        self.items_dispatched += 1;
        self.avg_wait_time_ms =
            incremental_mean(self.avg_wait_time_ms, wait_time_ms, self.items_dispatched);
    }

    /// Record one merged coalescing group of `group_size` members.
    pub fn record_coalesced_group(&mut self, group_size: usize) {
        let merged = group_size.saturating_sub(1);
        let batches = self.batches_processed as f64;
        self.coalescing_rate = (self.coalescing_rate * batches + merged as f64) / (batches + 1.0);
        self.coalesced_requests += merged as u64;
    }

    pub fn record_failure(&mut self) {
        self.failed_batches += 1;
    }

    /// Mirror the sizing policy's utilization window.
    pub fn record_utilization(&mut self, samples: Vec<f64>, mean: Option<f64>) {
        self.utilization_samples = samples;
        if let Some(mean) = mean {
            self.avg_utilization = mean;
        }
    }

    /// LOW and BACKGROUND submissions combined.
    pub fn low_priority_requests(&self) -> u64 {
        [Priority::Low, Priority::Background]
            .iter()
            .map(|p| self.requests_by_priority.get(p).copied().unwrap_or(0))
            .sum()
    }
}

/// Submission counters touched by every producer.
#[derive(Debug, Default)]
pub struct SubmissionCounters {
    total: AtomicU64,
    by_priority: [AtomicU64; 5],
}

impl SubmissionCounters {
    pub fn record(&self, priority: Priority) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.by_priority[priority.ordinal()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn count(&self, priority: Priority) -> u64 {
        self.by_priority[priority.ordinal()].load(Ordering::Relaxed)
    }

    /// Copy the counters into a metrics snapshot.
    pub fn fill(&self, metrics: &mut BatchMetrics) {
        metrics.total_requests = self.total();
        metrics.requests_by_priority = Priority::ALL
            .iter()
            .map(|&p| (p, self.count(p)))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avg_batch_size_is_incremental() {
        let mut m = BatchMetrics::default();
        let expected = [10.0, 15.0, 20.0];
        for (size, want) in [10, 20, 30].into_iter().zip(expected) {
            m.record_batch(size, 5.0, 64);
            assert_eq!(m.avg_batch_size, want);
        }
        assert_eq!(m.batches_processed, 3);
        assert_eq!(m.peak_batch_size, 30);
    }

    #[test]
    fn throughput_and_efficiency() {
        let mut m = BatchMetrics::default();
        m.record_batch(8, 4.0, 64);
        // 8 items in 4ms = 2000 req/s; theoretical 64/4 = 16 per ms.
        assert_eq!(m.throughput_req_per_sec, 2000.0);
        assert_eq!(m.batch_efficiency, 2000.0 / 16.0);
        assert_eq!(m.avg_processing_time_ms, 4.0);
    }

    #[test]
    fn zero_processing_time_keeps_previous_throughput() {
        let mut m = BatchMetrics::default();
        m.record_batch(10, 10.0, 64);
        let before = m.throughput_req_per_sec;
        m.record_batch(10, 0.0, 64);
        assert_eq!(m.throughput_req_per_sec, before);
        assert_eq!(m.avg_processing_time_ms, 5.0);
    }

    #[test]
    fn wait_time_mean_across_items() {
        let mut m = BatchMetrics::default();
        m.record_wait(10.0);
        m.record_wait(30.0);
        m.record_wait(20.0);
        assert_eq!(m.items_dispatched, 3);
        assert_eq!(m.avg_wait_time_ms, 20.0);
    }

    #[test]
    fn coalescing_rate_update() {
        let mut m = BatchMetrics::default();
        m.record_coalesced_group(3);
        assert_eq!(m.coalescing_rate, 2.0);
        m.record_batch(1, 1.0, 64);
        m.record_coalesced_group(2);
        // (2.0 * 1 + 1) / 2
        assert_eq!(m.coalescing_rate, 1.5);
        assert_eq!(m.coalesced_requests, 3);
    }

    #[test]
    fn submission_counters_fill_snapshot() {
        let counters = SubmissionCounters::default();
        counters.record(Priority::Critical);
        counters.record(Priority::Low);
        counters.record(Priority::Background);
        counters.record(Priority::Background);

        let mut m = BatchMetrics::default();
        counters.fill(&mut m);
        assert_eq!(m.total_requests, 4);
        assert_eq!(m.requests_by_priority[&Priority::Critical], 1);
        assert_eq!(m.requests_by_priority[&Priority::Normal], 0);
        assert_eq!(m.low_priority_requests(), 3);
    }

    #[test]
    fn default_metrics() {
        let m = BatchMetrics::default();
        assert_eq!(m.batches_processed, 0);
        assert_eq!(m.avg_batch_size, 0.0);
        assert!(m.utilization_samples.is_empty());
    }

    #[test]
    fn snapshot_serializes_priority_keys() {
        let counters = SubmissionCounters::default();
        counters.record(Priority::High);
        let mut m = BatchMetrics::default();
        counters.fill(&mut m);
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["requests_by_priority"]["high"], 1);
    }
}
