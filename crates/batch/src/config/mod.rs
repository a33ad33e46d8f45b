//! Batch scheduler configuration.
//!
//! Parsed from TOML with environment variable overrides, then validated.
//! Immutable once handed to [`crate::BatchScheduler::new`].

mod loading;
mod validation;

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Multiplier applied to `max_timeout_ms` when no submit timeout is set.
const DEFAULT_SUBMIT_TIMEOUT_FACTOR: f64 = 10.0;

/// Largest accepted value for any timeout field (one day).
pub(crate) const MAX_TIMEOUT_MS: f64 = 86_400_000.0;

/// Milliseconds to a `Duration`. Negative and NaN map to zero, values too
/// large for a `Duration` saturate.
pub(crate) fn ms_to_duration(ms: f64) -> Duration {
    Duration::try_from_secs_f64(ms.max(0.0) / 1000.0).unwrap_or(Duration::MAX)
}

/// Configuration for the priority-adaptive batch scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    // ── Batch sizing ─────────────────────────────────────────
    #[serde(default = "default_min_batch")]
    pub min_batch_size: usize,
    #[serde(default = "default_max_batch")]
    pub max_batch_size: usize,
    #[serde(default = "default_target_batch")]
    pub target_batch_size: usize,

    // ── Priority overrides ───────────────────────────────────
    /// When false, the queue head's priority never affects sizing.
    #[serde(default = "default_true")]
    pub enable_priority_batching: bool,
    #[serde(default = "default_critical_batch")]
    pub critical_batch_size: usize,
    /// Cap applied while a HIGH item is at the queue head.
    #[serde(default = "default_high_batch")]
    pub high_priority_batch_size: usize,

    // ── Utilization feedback ─────────────────────────────────
    #[serde(default = "default_true")]
    pub enable_utilization_aware_sizing: bool,
    /// Operating point as a fraction in [0, 1].
    #[serde(default = "default_target_utilization")]
    pub target_utilization: f64,
    /// Number of samples in the rolling window.
    #[serde(default = "default_utilization_window")]
    pub utilization_window: usize,

    // ── Timeouts ─────────────────────────────────────────────
    #[serde(default = "default_true")]
    pub enable_adaptive_timeout: bool,
    #[serde(default = "default_min_timeout")]
    pub min_timeout_ms: f64,
    #[serde(default = "default_max_timeout")]
    pub max_timeout_ms: f64,
    /// Reserved. Not consulted by sizing or collection.
    #[serde(default = "default_critical_timeout")]
    pub critical_timeout_ms: f64,
    /// Default per-call submit timeout. Derived from `max_timeout_ms` when unset.
    #[serde(default)]
    pub submit_timeout_ms: Option<f64>,

    // ── Coalescing ───────────────────────────────────────────
    #[serde(default = "default_true")]
    pub enable_coalescing: bool,
    /// Reserved. Coalescing is exact content-hash equality.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    // ── Reserved tuning knobs ────────────────────────────────
    #[serde(default = "default_true")]
    pub enable_prefetch: bool,
    #[serde(default = "default_prefetch_size")]
    pub prefetch_size: usize,
    #[serde(default = "default_true")]
    pub enable_batch_splitting: bool,
    #[serde(default = "default_max_split")]
    pub max_batch_split_size: usize,

    // ── Shutdown ─────────────────────────────────────────────
    /// Dispatch still-queued items on stop instead of failing them.
    #[serde(default = "default_true")]
    pub drain_on_stop: bool,
}

fn default_min_batch() -> usize { 1 }
fn default_max_batch() -> usize { 64 }
fn default_target_batch() -> usize { 16 }
fn default_critical_batch() -> usize { 1 }
fn default_high_batch() -> usize { 4 }
fn default_target_utilization() -> f64 { 0.85 }
fn default_utilization_window() -> usize { 10 }
fn default_min_timeout() -> f64 { 10.0 }
fn default_max_timeout() -> f64 { 100.0 }
fn default_critical_timeout() -> f64 { 5.0 }
fn default_similarity_threshold() -> f64 { 0.95 }
fn default_prefetch_size() -> usize { 4 }
fn default_max_split() -> usize { 32 }
fn default_true() -> bool { true }

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            min_batch_size: default_min_batch(),
            max_batch_size: default_max_batch(),
            target_batch_size: default_target_batch(),
            enable_priority_batching: true,
            critical_batch_size: default_critical_batch(),
            high_priority_batch_size: default_high_batch(),
            enable_utilization_aware_sizing: true,
            target_utilization: default_target_utilization(),
            utilization_window: default_utilization_window(),
            enable_adaptive_timeout: true,
            min_timeout_ms: default_min_timeout(),
            max_timeout_ms: default_max_timeout(),
            critical_timeout_ms: default_critical_timeout(),
            submit_timeout_ms: None,
            enable_coalescing: true,
            similarity_threshold: default_similarity_threshold(),
            enable_prefetch: true,
            prefetch_size: default_prefetch_size(),
            enable_batch_splitting: true,
            max_batch_split_size: default_max_split(),
            drain_on_stop: true,
        }
    }
}

impl BatchConfig {
    /// Clamp a size into `[min_batch_size, max_batch_size]`.
    pub fn clamp_size(&self, size: usize) -> usize {
        size.clamp(self.min_batch_size, self.max_batch_size)
    }

    /// Default timeout applied to `submit` calls without an override.
    pub fn default_submit_timeout(&self) -> Duration {
        let ms = self
            .submit_timeout_ms
            .unwrap_or(self.max_timeout_ms * DEFAULT_SUBMIT_TIMEOUT_FACTOR);
        ms_to_duration(ms)
    }
}
