//! Batch sizing policy.
//!
//! Produces the target size for the next collection round from the
//! configured target, a rolling utilization window, and the queue head's
//! priority. Utilization feedback is a hysteresis band (±0.1 around the
//! target, ±4 items per round), not a continuous controller.

use std::collections::VecDeque;

use crate::config::BatchConfig;
use crate::types::Priority;

/// Half-width of the utilization band inside which size is left alone.
const UTILIZATION_BAND: f64 = 0.1;

/// Items added or removed per round when outside the band.
const SIZE_STEP: usize = 4;

/// A fixed-size ring buffer backed by `VecDeque`.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    buf: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Create a new ring buffer with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push an item, evicting the oldest if at capacity.
    pub fn push(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Iterate over items from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buf.iter()
    }
}

impl RingBuffer<f64> {
    pub fn mean(&self) -> Option<f64> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.buf.iter().sum::<f64>() / self.buf.len() as f64)
        }
    }
}

/// Stateful sizing policy. Owned by the consumer loop.
#[derive(Debug, Clone)]
pub struct BatchSizer {
    window: RingBuffer<f64>,
}

impl BatchSizer {
    pub fn new(config: &BatchConfig) -> Self {
        Self {
            window: RingBuffer::new(config.utilization_window),
        }
    }

    /// Compute the target size for one collection round.
    ///
    /// `sample` is this round's utilization reading (already validated),
    /// `head` the priority at the front of the admission queue. The result
    /// always lies in `[min_batch_size, max_batch_size]`.
    pub fn compute_target_size(
        &mut self,
        config: &BatchConfig,
        sample: Option<f64>,
        head: Option<Priority>,
    ) -> usize {
        let mut size = config.target_batch_size;

        if config.enable_utilization_aware_sizing {
            if let Some(sample) = sample {
                self.window.push(sample);
                if let Some(mean) = self.window.mean() {
                    if mean < config.target_utilization - UTILIZATION_BAND {
                        size = (size + SIZE_STEP).min(config.max_batch_size);
                    } else if mean > config.target_utilization + UTILIZATION_BAND {
                        size = size.saturating_sub(SIZE_STEP).max(config.min_batch_size);
                    }
                }
            }
        }

        if config.enable_priority_batching {
            match head {
                Some(Priority::Critical) => size = config.critical_batch_size,
                Some(Priority::High) => size = size.min(config.high_priority_batch_size),
                _ => {}
            }
        }

        config.clamp_size(size)
    }

    /// Mean of the current utilization window.
    pub fn mean_utilization(&self) -> Option<f64> {
        self.window.mean()
    }

    /// Window samples, oldest first.
    pub fn samples(&self) -> Vec<f64> {
        self.window.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BatchConfig {
        BatchConfig::default()
    }

    #[test]
    fn ring_buffer_respects_capacity() {
        let mut ring = RingBuffer::new(3);
        for v in 1..=4 {
            ring.push(v);
        }
        assert_eq!(ring.len(), 3);
        let items: Vec<_> = ring.iter().cloned().collect();
        assert_eq!(items, vec![2, 3, 4]);
    }

    #[test]
    fn ring_buffer_mean() {
        let mut ring = RingBuffer::new(4);
        assert_eq!(ring.mean(), None);
        ring.push(0.5);
        ring.push(1.0);
        assert_eq!(ring.mean(), Some(0.75));
    }

    #[test]
    fn no_sample_keeps_target() {
        let cfg = config();
        let mut sizer = BatchSizer::new(&cfg);
        assert_eq!(sizer.compute_target_size(&cfg, None, None), 16);
        assert!(sizer.samples().is_empty());
    }

    #[test]
    fn underutilized_grows_by_step() {
        let cfg = config();
        let mut sizer = BatchSizer::new(&cfg);
        assert_eq!(sizer.compute_target_size(&cfg, Some(0.3), None), 20);
    }

    #[test]
    fn overutilized_shrinks_by_step() {
        let cfg = config();
        let mut sizer = BatchSizer::new(&cfg);
        assert_eq!(sizer.compute_target_size(&cfg, Some(0.99), None), 12);
    }

    #[test]
    fn within_band_is_unchanged() {
        let cfg = config();
        let mut sizer = BatchSizer::new(&cfg);
        assert_eq!(sizer.compute_target_size(&cfg, Some(0.8), None), 16);
        assert_eq!(sizer.compute_target_size(&cfg, Some(0.9), None), 16);
    }

    #[test]
    fn decision_uses_window_mean_not_latest_sample() {
        let cfg = config();
        let mut sizer = BatchSizer::new(&cfg);
        sizer.compute_target_size(&cfg, Some(0.2), None);
        // Mean of (0.2, 1.0) = 0.6, still below the band.
        assert_eq!(sizer.compute_target_size(&cfg, Some(1.0), None), 20);
    }

    #[test]
    fn window_evicts_oldest() {
        let cfg = BatchConfig {
            utilization_window: 2,
            ..config()
        };
        let mut sizer = BatchSizer::new(&cfg);
        for s in [0.1, 0.2, 0.3] {
            sizer.compute_target_size(&cfg, Some(s), None);
        }
        assert_eq!(sizer.samples(), vec![0.2, 0.3]);
    }

    #[test]
    fn sampling_disabled_ignores_sample() {
        let cfg = BatchConfig {
            enable_utilization_aware_sizing: false,
            ..config()
        };
        let mut sizer = BatchSizer::new(&cfg);
        assert_eq!(sizer.compute_target_size(&cfg, Some(0.0), None), 16);
        assert!(sizer.mean_utilization().is_none());
    }

    #[test]
    fn grow_clamps_to_max() {
        let cfg = BatchConfig {
            target_batch_size: 62,
            ..config()
        };
        let mut sizer = BatchSizer::new(&cfg);
        assert_eq!(sizer.compute_target_size(&cfg, Some(0.0), None), 64);
    }

    #[test]
    fn shrink_clamps_to_min() {
        let cfg = BatchConfig {
            min_batch_size: 2,
            target_batch_size: 3,
            ..config()
        };
        let mut sizer = BatchSizer::new(&cfg);
        assert_eq!(sizer.compute_target_size(&cfg, Some(1.0), None), 2);
    }

    #[test]
    fn critical_head_overrides_utilization() {
        let cfg = config();
        let mut sizer = BatchSizer::new(&cfg);
        for sample in [0.0, 0.5, 0.85, 1.0] {
            let size = sizer.compute_target_size(&cfg, Some(sample), Some(Priority::Critical));
            assert_eq!(size, cfg.critical_batch_size);
        }
    }

    #[test]
    fn high_head_caps_size() {
        let cfg = config();
        let mut sizer = BatchSizer::new(&cfg);
        assert_eq!(sizer.compute_target_size(&cfg, Some(0.1), Some(Priority::High)), 4);

        let cfg = BatchConfig {
            high_priority_batch_size: 32,
            ..config()
        };
        let mut sizer = BatchSizer::new(&cfg);
        assert_eq!(sizer.compute_target_size(&cfg, None, Some(Priority::High)), 16);
    }

    #[test]
    fn lower_priority_heads_do_not_affect_size() {
        let cfg = config();
        let mut sizer = BatchSizer::new(&cfg);
        for p in [Priority::Normal, Priority::Low, Priority::Background] {
            assert_eq!(sizer.compute_target_size(&cfg, None, Some(p)), 16);
        }
    }

    #[test]
    fn priority_batching_disabled_ignores_head() {
        let cfg = BatchConfig {
            enable_priority_batching: false,
            ..config()
        };
        let mut sizer = BatchSizer::new(&cfg);
        assert_eq!(sizer.compute_target_size(&cfg, None, Some(Priority::Critical)), 16);
    }

    #[test]
    fn size_always_within_bounds() {
        let configs = [
            BatchConfig { min_batch_size: 4, target_batch_size: 4, max_batch_size: 4, ..config() },
            BatchConfig { min_batch_size: 3, target_batch_size: 5, max_batch_size: 6, ..config() },
            BatchConfig { min_batch_size: 2, critical_batch_size: 1, ..config() },
            BatchConfig { high_priority_batch_size: 1, min_batch_size: 1, ..config() },
        ];
        let samples = [None, Some(0.0), Some(0.5), Some(0.85), Some(1.0)];
        let heads = [None, Some(Priority::Critical), Some(Priority::High), Some(Priority::Low)];

        for cfg in &configs {
            let mut sizer = BatchSizer::new(cfg);
            for _ in 0..3 {
                for sample in samples {
                    for head in heads {
                        let size = sizer.compute_target_size(cfg, sample, head);
                        assert!(
                            (cfg.min_batch_size..=cfg.max_batch_size).contains(&size),
                            "size {size} outside [{}, {}]",
                            cfg.min_batch_size,
                            cfg.max_batch_size
                        );
                    }
                }
            }
        }
    }
}
